pub mod browse;
pub mod cache;
pub mod connection;
pub mod documents;
pub mod fetch;
pub mod format;
pub mod jobs;
pub mod providers;
pub mod sync;
pub mod sync_config;
