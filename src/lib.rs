pub mod backoff;
pub mod config;
pub mod fake_feed;
pub mod http_client;
pub mod push_feed;
pub mod state;
pub mod status_fetch;
pub mod sync;
