//! Switch boundary: outbound addressing and HTTP transport
//!
//! This module provides:
//! - Pure addressing of the parties resource from a party identifier
//! - The transport port used for every outbound call
//! - A reqwest-backed transport with per-request timeout

pub mod address;
pub mod transport;

pub use address::{PartiesResource, SwitchAddress};
pub use transport::{HttpSwitchClient, OutboundRequest, SwitchTransport};
