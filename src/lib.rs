// Roast Arena backend: turn-based roast battles between built-in bots and
// externally registered fighters, scored by an external judge oracle.

pub mod agents;
pub mod api;
pub mod auth;
pub mod battle;
pub mod config;
pub mod db;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod oracle;
pub mod rate_limit;
pub mod stream;
pub mod topics;
