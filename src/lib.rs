pub mod api;
pub mod config;
pub mod download_actor;
pub mod error;
pub mod intake;
pub mod ledger;
pub mod registry;
pub mod speed;
pub mod store;
