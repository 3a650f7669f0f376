pub mod lifecycle;
pub mod locks;
pub mod matching;
pub mod pricing;
pub mod scheduler;
