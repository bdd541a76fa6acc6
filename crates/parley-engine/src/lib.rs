//! The relay-and-enrichment pipeline.
//!
//! [`ConnectionRegistry`] tracks open connections, [`RelayEngine`] fans each
//! inbound message out to every other connection and spawns one suggestion
//! task per recipient.

pub mod connection;
pub mod error;
pub mod registry;
pub mod relay;

pub use connection::{Connection, ConnectionState};
pub use error::SendError;
pub use registry::ConnectionRegistry;
pub use relay::{EnrichmentOutcome, RelayEngine, RelayReport, SuppressReason};
