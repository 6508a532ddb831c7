//! Read-only query surface used by renderers.
//!
//! Every query takes the state mutex, performs a lookup, and returns a
//! copy or shared handle. Queries never take the listener mutex, so a
//! listener callback may re-enter them freely.

use crate::manager::PolicyManager;
use crate::rule::{PolicyRedirectDest, PolicyRule};
use netpol_modb::{constants, prop, ClassId, MoObject};
use netpol_types::{IpAddress, Uri};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// Snapshot of a redirect destination group: sorted next-hops plus the
/// hashing parameters renderers program alongside them.
#[derive(Debug, Clone)]
pub struct PolicyDestGroup {
    pub dests: Vec<PolicyRedirectDest>,
    pub hash_algorithm: u64,
    pub resilient_hash: bool,
}

impl PolicyManager {
    /// The routing domain at the end of the group's forwarding chain.
    pub fn get_rd_for_group(&self, eg: &Uri) -> Option<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        state.group_map.get(eg)?.routing_domain.clone()
    }

    /// The routing domain of an external L3 network.
    pub fn get_rd_for_l3_ext_net(&self, l3n: &Uri) -> Option<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        state.l3n_map.get(l3n)?.routing_domain.clone()
    }

    /// The bridge domain of the group's forwarding chain.
    pub fn get_bd_for_group(&self, eg: &Uri) -> Option<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        state.group_map.get(eg)?.bridge_domain.clone()
    }

    /// The flood domain of the group's forwarding chain.
    pub fn get_fd_for_group(&self, eg: &Uri) -> Option<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        state.group_map.get(eg)?.flood_domain.clone()
    }

    /// The flood context attached to the group's flood domain.
    pub fn get_flood_context_for_group(&self, eg: &Uri) -> Option<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        state.group_map.get(eg)?.flood_context.clone()
    }

    /// All subnets reachable from the group.
    pub fn get_subnets_for_group(&self, eg: &Uri) -> Vec<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        match state.group_map.get(eg) {
            Some(gs) => gs.subnet_map.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// The first of the group's subnets containing `ip`. Families never
    /// cross: a v4 endpoint only matches v4 subnets.
    pub fn find_subnet_for_ep(&self, eg: &Uri, ip: &IpAddress) -> Option<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        let gs = state.group_map.get(eg)?;
        for subnet in gs.subnet_map.values() {
            let (Some(addr), Some(prefix_len)) = (
                subnet.attr_str(prop::ADDRESS),
                subnet.attr_u64(prop::PREFIX_LEN),
            ) else {
                continue;
            };
            let Ok(net_addr) = addr.parse::<IpAddress>() else {
                continue;
            };
            if net_addr.is_v4() != ip.is_v4() {
                continue;
            }
            let prefix_len = prefix_len.min(net_addr.max_prefix_len() as u64) as u8;
            if net_addr.mask(prefix_len) == ip.mask(prefix_len) {
                return Some(subnet.clone());
            }
        }
        None
    }

    /// The group's encapsulation id.
    pub fn get_vnid_for_group(&self, eg: &Uri) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state
            .group_map
            .get(eg)?
            .inst_context
            .as_ref()?
            .attr_u64(prop::ENCAP_ID)
            .map(|v| v as u32)
    }

    /// The encapsulation id used for the group's bridge domain.
    pub fn get_bd_vnid_for_group(&self, eg: &Uri) -> Option<u32> {
        let state = self.state.lock().unwrap();
        let gs = state.group_map.get(eg)?;
        gs.inst_bd_context.as_ref()?;
        gs.inst_context
            .as_ref()?
            .attr_u64(prop::ENCAP_ID)
            .map(|v| v as u32)
    }

    /// The encapsulation id of the group's routing domain.
    pub fn get_rd_vnid_for_group(&self, eg: &Uri) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state
            .group_map
            .get(eg)?
            .inst_rd_context
            .as_ref()?
            .attr_u64(prop::ENCAP_ID)
            .map(|v| v as u32)
    }

    /// Reverse vnid lookup.
    pub fn get_group_for_vnid(&self, vnid: u32) -> Option<Uri> {
        let state = self.state.lock().unwrap();
        state.vnid_map.get(&vnid).cloned()
    }

    /// The multicast group IP of the group's instance context.
    pub fn get_multicast_ip_for_group(&self, eg: &Uri) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .group_map
            .get(eg)?
            .inst_context
            .as_ref()?
            .attr_str(prop::MULTICAST_IP)
            .map(String::from)
    }

    /// The multicast group IP of the bridge-domain instance context.
    pub fn get_bd_multicast_ip_for_group(&self, eg: &Uri) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .group_map
            .get(eg)?
            .inst_bd_context
            .as_ref()?
            .attr_str(prop::MULTICAST_IP)
            .map(String::from)
    }

    /// The multicast group IP of the routing-domain instance context.
    pub fn get_rd_multicast_ip_for_group(&self, eg: &Uri) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .group_map
            .get(eg)?
            .inst_rd_context
            .as_ref()?
            .attr_str(prop::MULTICAST_IP)
            .map(String::from)
    }

    /// The class selector of the group's instance context.
    pub fn get_sclass_for_group(&self, eg: &Uri) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state
            .group_map
            .get(eg)?
            .inst_context
            .as_ref()?
            .attr_u64(prop::CLASS_SELECTOR)
            .map(|v| v as u32)
    }

    /// The L2 endpoint-retention policy inherited from the bridge domain.
    pub fn get_l2_ep_retention_policy_for_group(&self, eg: &Uri) -> Option<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        state.group_map.get(eg)?.l2_ep_ret_policy.clone()
    }

    /// The L3 endpoint-retention policy inherited from the routing domain.
    pub fn get_l3_ep_retention_policy_for_group(&self, eg: &Uri) -> Option<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        state.group_map.get(eg)?.l3_ep_ret_policy.clone()
    }

    /// True when the group is known to the resolver.
    pub fn group_exists(&self, eg: &Uri) -> bool {
        let state = self.state.lock().unwrap();
        state.group_map.contains_key(eg)
    }

    /// URIs of all known endpoint groups.
    pub fn get_groups(&self) -> BTreeSet<Uri> {
        let state = self.state.lock().unwrap();
        state.group_map.keys().cloned().collect()
    }

    /// URIs of all known routing domains.
    pub fn get_routing_domains(&self) -> BTreeSet<Uri> {
        let state = self.state.lock().unwrap();
        state.rd_map.keys().cloned().collect()
    }

    /// Groups providing the contract.
    pub fn get_contract_providers(&self, contract: &Uri) -> BTreeSet<Uri> {
        let state = self.state.lock().unwrap();
        match state.contract_map.get(contract) {
            Some(cs) => cs.provider_groups.clone(),
            None => BTreeSet::new(),
        }
    }

    /// Groups consuming the contract.
    pub fn get_contract_consumers(&self, contract: &Uri) -> BTreeSet<Uri> {
        let state = self.state.lock().unwrap();
        match state.contract_map.get(contract) {
            Some(cs) => cs.consumer_groups.clone(),
            None => BTreeSet::new(),
        }
    }

    /// Groups using the contract intra-group.
    pub fn get_contract_intra(&self, contract: &Uri) -> BTreeSet<Uri> {
        let state = self.state.lock().unwrap();
        match state.contract_map.get(contract) {
            Some(cs) => cs.intra_groups.clone(),
            None => BTreeSet::new(),
        }
    }

    /// Contracts referenced by the group's backing object, straight from
    /// the store (provided, consumed, and intra roles combined).
    pub fn get_contracts_for_group(&self, eg: &Uri) -> BTreeSet<Uri> {
        let mut contracts = BTreeSet::new();
        let Some(epg) = self.framework.resolve_class(ClassId::EpGroup, eg) else {
            return contracts;
        };
        for name in [prop::PROV_CONTRACT, prop::CONS_CONTRACT, prop::INTRA_CONTRACT] {
            for reference in epg.refs(name) {
                contracts.insert(reference.uri.clone());
            }
        }
        contracts
    }

    /// The compiled rule list of a contract.
    pub fn get_contract_rules(&self, contract: &Uri) -> Vec<PolicyRule> {
        let state = self.state.lock().unwrap();
        match state.contract_map.get(contract) {
            Some(cs) => cs.rules.clone(),
            None => Vec::new(),
        }
    }

    /// The compiled rule list of a security group.
    pub fn get_sec_group_rules(&self, sec_group: &Uri) -> Vec<PolicyRule> {
        let state = self.state.lock().unwrap();
        state.sec_grp_map.get(sec_group).cloned().unwrap_or_default()
    }

    /// True when the contract is indexed (resolvable or referenced).
    pub fn contract_exists(&self, contract: &Uri) -> bool {
        let state = self.state.lock().unwrap();
        state.contract_map.contains_key(contract)
    }

    /// Snapshot of a redirect destination group.
    pub fn get_policy_dest_group(&self, group: &Uri) -> Option<PolicyDestGroup> {
        let state = self.state.lock().unwrap();
        let redir_state = state.redir_grp_map.get(group)?;
        Some(PolicyDestGroup {
            dests: redir_state.dests.clone(),
            hash_algorithm: redir_state.hash_algorithm,
            resilient_hash: redir_state.resilient_hash,
        })
    }

    /// The routing mode of the group's bridge domain; enabled when the
    /// group has no bridge domain or the attribute is unset.
    pub fn get_effective_routing_mode(&self, eg: &Uri) -> u8 {
        let mut routing_mode = constants::ROUTING_MODE_ENABLED;
        if let Some(bd) = self.get_bd_for_group(eg) {
            routing_mode = bd.attr_u64(prop::ROUTING_MODE).unwrap_or(routing_mode);
        }
        routing_mode as u8
    }

    /// The virtual router IP configured on a subnet, if it parses.
    pub fn get_router_ip_for_subnet(subnet: &MoObject) -> Option<IpAddress> {
        let router_ip = subnet.attr_str(prop::VIRTUAL_ROUTER_IP)?;
        match router_ip.parse() {
            Ok(ip) => Some(ip),
            Err(err) => {
                warn!(subnet = %subnet.uri(), %err, "invalid router IP for subnet");
                None
            }
        }
    }
}
