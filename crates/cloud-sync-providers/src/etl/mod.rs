//! Providers served through an external ETL backend (Airbyte-style REST
//! API with a local-JSON sink).

mod client;
mod provider;
mod sources;
pub mod types;

pub use client::{EtlClient, EtlSettings};
pub use provider::{DelegatedOptions, DelegatedProvider, SINK_DESTINATION_NAME};
