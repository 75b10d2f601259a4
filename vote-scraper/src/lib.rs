pub mod config;
pub mod controller;
pub mod driver;
pub mod ledger;
pub mod logging;
pub mod query;
pub mod repository;
pub mod watcher;
