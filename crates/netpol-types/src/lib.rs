//! Common value types for the network-policy agent.
//!
//! This crate provides type-safe representations of the primitives shared
//! by the policy model and the policy resolution core:
//!
//! - [`Uri`]: hierarchical managed-object identifiers
//! - [`IpAddress`]: IPv4 and IPv6 addresses with family-aware masking
//! - [`IpPrefix`]: IP network prefixes (CIDR notation)
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses

mod ip;
mod mac;
mod uri;

pub use ip::{IpAddress, IpPrefix};
pub use mac::MacAddress;
pub use uri::Uri;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),
}
