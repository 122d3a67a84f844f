pub mod auth;
pub mod bookie;
pub mod config;
pub mod entry;
pub mod humanize;
pub mod journal;
pub mod ledger;
pub mod observability;
pub mod server;
