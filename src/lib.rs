pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod i18n;
pub mod lexicon;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod retry;
pub mod security;
pub mod selection;
pub mod server;
pub mod store;
pub mod translation;
