pub mod checker;
pub mod executor;
pub mod publisher;
pub mod strategy;
