// Library interface for rust_manga_tracker
// The binary and the integration tests both build on these modules

pub mod cache;
pub mod cloudflare_bypass;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod diff;
pub mod engine;
pub mod error;
pub mod helpers;
pub mod html;
pub mod http_client;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod registry;
pub mod request;
pub mod scanlators;
pub mod scheduler;
pub mod store;
