//! Aggregating proxy for the Model Context Protocol: connects to many
//! downstream tool servers, maintains a unified catalog, and re-exposes a
//! curated, user-selected subset as a single upstream MCP server.

pub mod annotations;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod hashing;
pub mod pool;
pub mod recovery;
pub mod router;
pub mod supervisor;
pub mod toolset;
pub mod transport;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use router::RequestRouter;
