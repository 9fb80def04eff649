pub mod api;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod ledger;
pub mod location;
pub mod models;
pub mod observability;
pub mod state;
