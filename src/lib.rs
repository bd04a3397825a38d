pub mod audit;
pub mod config;
pub mod health;
pub mod ledger;
pub mod models;
pub mod optimize;
pub mod report;
pub mod rollout;
pub mod telemetry;
