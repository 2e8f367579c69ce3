pub mod batcher;
pub mod config;
pub mod ledger;
pub mod model;
pub mod reddit;
pub mod scanner;
pub mod sheets;
pub mod store;
pub mod summoner;
