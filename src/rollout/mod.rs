pub mod controller;
pub mod executor;
pub mod plan;
