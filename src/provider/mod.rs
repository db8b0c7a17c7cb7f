//! Card-issuing provider implementations
//!
//! - `maplerad` - HTTP client for the Maplerad issuing API
//! - `sandbox` - offline in-memory provider that emits webhooks on a channel

pub mod maplerad;
pub mod sandbox;

pub use maplerad::MapleradClient;
pub use sandbox::{CreationBehaviour, SandboxProvider};
