//! Policy resolution core of the network-policy agent.
//!
//! The agent receives an object-oriented policy model from the central
//! controller through the managed-object database ([`netpol_modb::Modb`])
//! and continuously translates it into concrete forwarding state: which
//! endpoint groups belong to which forwarding domains, which contracts
//! govern traffic between groups, which classifier rules apply in which
//! direction, and which redirect destinations receive redirected flows.
//!
//! # Architecture
//!
//! ```text
//! [MO store] ──callbacks──> [listener sinks] ──dispatch──> [task queue]
//!                                                               │
//!                                    state mutex ──> update routines
//!                                                               │
//!                       [policy listeners] <──notify── (lock released)
//! ```
//!
//! All state mutation runs on the task queue's single worker; callbacks
//! only enqueue. Read queries take the state mutex on any thread.
//! Notifications are delivered after the state mutex is released, under
//! a separate listener mutex.

mod compile;
mod contract;
mod domain;
mod l3net;
mod manager;
mod queries;
mod redirect;
mod rule;
mod state;
mod task_queue;

pub use manager::{PolicyListener, PolicyManager};
pub use queries::PolicyDestGroup;
pub use rule::{
    Direction, PolicyRedirectDest, PolicyRule, MAX_POLICY_RULE_PRIORITY,
};
pub use task_queue::TaskQueue;
