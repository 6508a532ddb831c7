//! Enumeration constants of the policy model.

/// Rule applies to traffic in both directions.
pub const DIRECTION_BIDIRECTIONAL: u64 = 0;
/// Rule applies to traffic into the provider group.
pub const DIRECTION_IN: u64 = 1;
/// Rule applies to traffic out of the provider group.
pub const DIRECTION_OUT: u64 = 2;

/// Symmetric next-hop hashing.
pub const HASH_ALGORITHM_SYMMETRIC: u64 = 0;
/// Hash on the source IP only.
pub const HASH_ALGORITHM_SOURCE_IP: u64 = 1;
/// Hash on the destination IP only.
pub const HASH_ALGORITHM_DEST_IP: u64 = 2;

/// Routing disabled on a bridge domain.
pub const ROUTING_MODE_DISABLED: u64 = 0;
/// Routing enabled on a bridge domain (the default).
pub const ROUTING_MODE_ENABLED: u64 = 1;

/// Resilient hashing defaults to enabled.
pub const DEFAULT_RESILIENT_HASH: u64 = 1;
