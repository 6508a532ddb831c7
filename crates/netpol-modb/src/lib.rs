//! Managed-object database facade for the network-policy agent.
//!
//! The central controller publishes a hierarchical, versioned tree of
//! managed objects ("MO tree") to each forwarding node. This crate holds
//! the node-local view of that tree:
//!
//! - [`ClassId`]: the policy model classes
//! - [`MoObject`]: a shared-immutable managed object (attributes plus
//!   named reference lists)
//! - [`Modb`]: the in-memory store with per-class listener registration
//!   and transactional [`Mutator`] commits
//!
//! # Architecture
//!
//! Consumers never mutate objects through a handle: the store replaces
//! whole objects on commit and retires the old handles. Listeners receive
//! `object_updated(class_id, uri)` callbacks after a commit, outside the
//! store lock, and must only enqueue work.

mod class;
mod object;
mod store;

pub mod constants;
pub mod prop;

pub use class::ClassId;
pub use object::{AttrValue, MoObject, Reference};
pub use store::{Modb, ModbListener, Mutator};
