pub mod api;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod geo;
pub mod hub;
pub mod identity;
pub mod models;
pub mod notify;
pub mod observability;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_support;
