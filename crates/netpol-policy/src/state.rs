//! Internal index state owned by the policy manager.
//!
//! Every map entry is created lazily on first mention and must default to
//! a value equal to its post-erase state, so that a create-then-erase
//! round-trips to "absent".

use crate::rule::{PolicyRedirectDest, PolicyRule};
use netpol_modb::{constants, MoObject};
use netpol_types::Uri;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Resolved forwarding-domain chain of one endpoint group.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct GroupState {
    pub ep_group: Option<Arc<MoObject>>,
    pub inst_context: Option<Arc<MoObject>>,
    pub flood_domain: Option<Arc<MoObject>>,
    pub flood_context: Option<Arc<MoObject>>,
    pub bridge_domain: Option<Arc<MoObject>>,
    pub routing_domain: Option<Arc<MoObject>>,
    pub inst_bd_context: Option<Arc<MoObject>>,
    pub inst_rd_context: Option<Arc<MoObject>>,
    pub l2_ep_ret_policy: Option<Arc<MoObject>>,
    pub l3_ep_ret_policy: Option<Arc<MoObject>>,
    /// Subnets reachable from the group, keyed by subnet URI.
    pub subnet_map: BTreeMap<Uri, Arc<MoObject>>,
}

/// External networks attached to one routing domain.
#[derive(Debug, Default)]
pub(crate) struct RoutingDomainState {
    pub ext_nets: BTreeSet<Uri>,
}

/// Routing domain and optional NAT endpoint group of one external network.
#[derive(Debug, Default)]
pub(crate) struct L3NetworkState {
    pub routing_domain: Option<Arc<MoObject>>,
    pub nat_epg: Option<Uri>,
}

/// Group membership and compiled rules of one contract.
#[derive(Debug, Default)]
pub(crate) struct ContractState {
    pub provider_groups: BTreeSet<Uri>,
    pub consumer_groups: BTreeSet<Uri>,
    pub intra_groups: BTreeSet<Uri>,
    pub rules: Vec<PolicyRule>,
}

impl ContractState {
    /// True when no group references this contract in any role.
    pub fn unreferenced(&self) -> bool {
        self.provider_groups.is_empty()
            && self.consumer_groups.is_empty()
            && self.intra_groups.is_empty()
    }
}

/// Contract references most recently observed on one group, used to
/// compute set differences on update.
#[derive(Debug, Default)]
pub(crate) struct GroupContractState {
    pub contracts_provided: BTreeSet<Uri>,
    pub contracts_consumed: BTreeSet<Uri>,
    pub contracts_intra: BTreeSet<Uri>,
}

/// Sorted destination list and hashing parameters of one redirect
/// destination group, plus the contracts referencing it.
#[derive(Debug)]
pub(crate) struct RedirectDestGrpState {
    pub dests: Vec<PolicyRedirectDest>,
    pub hash_algorithm: u64,
    pub resilient_hash: bool,
    pub ctrct_set: BTreeSet<Uri>,
}

impl Default for RedirectDestGrpState {
    fn default() -> Self {
        RedirectDestGrpState {
            dests: Vec::new(),
            hash_algorithm: constants::HASH_ALGORITHM_SYMMETRIC,
            resilient_hash: constants::DEFAULT_RESILIENT_HASH != 0,
            ctrct_set: BTreeSet::new(),
        }
    }
}

/// All index maps, guarded by the manager's state mutex.
#[derive(Debug, Default)]
pub(crate) struct PolicyState {
    pub group_map: HashMap<Uri, GroupState>,
    pub vnid_map: HashMap<u32, Uri>,
    pub rd_map: HashMap<Uri, RoutingDomainState>,
    pub l3n_map: HashMap<Uri, L3NetworkState>,
    /// NAT endpoint group -> external networks referencing it.
    pub nat_epg_l3_ext: HashMap<Uri, BTreeSet<Uri>>,
    pub contract_map: HashMap<Uri, ContractState>,
    pub group_contract_map: HashMap<Uri, GroupContractState>,
    pub sec_grp_map: HashMap<Uri, Vec<PolicyRule>>,
    pub redir_grp_map: HashMap<Uri, RedirectDestGrpState>,
}
