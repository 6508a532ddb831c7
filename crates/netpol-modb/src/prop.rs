//! Property and reference names of the policy model.
//!
//! Scalar attributes and reference lists on [`crate::MoObject`] are keyed
//! by these names. Keeping the vocabulary in one place prevents silent
//! drift between the resolver and the model snapshots.

/// Relative placement of a rule or classifier among its siblings.
pub const ORDER: &str = "order";
/// Traffic direction of a rule (see [`crate::constants`]).
pub const DIRECTION: &str = "direction";
/// Allow flag of an allow/deny action (non-zero allows).
pub const ALLOW: &str = "allow";
/// Encapsulation id (vnid) carried in an instance context.
pub const ENCAP_ID: &str = "encap-id";
/// Multicast group IP carried in an instance context.
pub const MULTICAST_IP: &str = "multicast-ip";
/// Class selector carried in an instance context.
pub const CLASS_SELECTOR: &str = "class-selector";
/// Network address of a subnet.
pub const ADDRESS: &str = "address";
/// Prefix length of a subnet.
pub const PREFIX_LEN: &str = "prefix-len";
/// Virtual router IP of a subnet.
pub const VIRTUAL_ROUTER_IP: &str = "virtual-router-ip";
/// Routing mode of a bridge domain (see [`crate::constants`]).
pub const ROUTING_MODE: &str = "routing-mode";
/// Hashing algorithm of a redirect destination group.
pub const HASH_ALGORITHM: &str = "hash-algorithm";
/// Resilient-hash flag of a redirect destination group.
pub const RESILIENT_HASH: &str = "resilient-hash";
/// Next-hop IP of a redirect destination.
pub const IP: &str = "ip";
/// Next-hop MAC of a redirect destination.
pub const MAC: &str = "mac";

/// Forwarding-domain reference of a group, bridge domain, or flood domain.
pub const NETWORK: &str = "network";
/// Subnets container reference of a group or forwarding domain.
pub const SUBNETS: &str = "subnets";
/// Provided-contract references of a group or external network.
pub const PROV_CONTRACT: &str = "prov-contract";
/// Consumed-contract references of a group or external network.
pub const CONS_CONTRACT: &str = "cons-contract";
/// Intra-group contract references of a group.
pub const INTRA_CONTRACT: &str = "intra-contract";
/// Classifier references of a rule.
pub const CLASSIFIER: &str = "classifier";
/// Action references of a rule.
pub const ACTION: &str = "action";
/// Remote-address (subnets) references of a security-group rule.
pub const REMOTE_ADDRESS: &str = "remote-address";
/// NAT endpoint-group reference of an external network.
pub const NAT_EPG: &str = "nat-epg";
/// Endpoint-retention policy reference of an instance context.
pub const EP_RETENTION: &str = "ep-retention";
/// Destination-group reference of a redirect action.
pub const DEST_GROUP: &str = "dest-group";
/// Domain references of a redirect destination.
pub const DOMAIN: &str = "domain";
/// Platform-config reference of the domain config.
pub const CONFIG: &str = "config";
