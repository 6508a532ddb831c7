//! Redirect destination group resolution.

use crate::manager::PolicyManager;
use crate::rule::PolicyRedirectDest;
use crate::state::PolicyState;
use netpol_modb::{constants, prop, ClassId};
use netpol_types::{IpAddress, MacAddress, Uri};
use std::collections::BTreeSet;
use tracing::debug;

impl PolicyManager {
    /// Re-resolves one redirect destination group into its sorted
    /// next-hop list. Contracts referencing the group are added to
    /// `notify` when the list or hashing parameters changed.
    pub(crate) fn update_redirect_dest_group(
        &self,
        state: &mut PolicyState,
        uri: &Uri,
        notify: &mut BTreeSet<Uri>,
    ) {
        let Some(group) = self
            .framework
            .resolve_class(ClassId::RedirectDestGroup, uri)
        else {
            if let Some(redir_state) = state.redir_grp_map.remove(uri) {
                notify.extend(redir_state.ctrct_set.iter().cloned());
            }
            return;
        };

        debug!(group = %uri, "updating redirect destination group");
        let mut new_dests: Vec<PolicyRedirectDest> = Vec::new();
        for dest in self.framework.resolve_children(uri, ClassId::RedirectDest) {
            // A destination must be completely resolved to be usable for
            // forwarding; partial ones arrive asynchronously and are
            // picked up by a later update.
            let mut bridge_domain = None;
            let mut routing_domain = None;
            for reference in dest.refs(prop::DOMAIN) {
                match reference.class_id {
                    ClassId::BridgeDomain => {
                        bridge_domain = self
                            .framework
                            .resolve_class(ClassId::BridgeDomain, &reference.uri);
                        if bridge_domain.is_none() {
                            break;
                        }
                    }
                    ClassId::RoutingDomain => {
                        routing_domain = self
                            .framework
                            .resolve_class(ClassId::RoutingDomain, &reference.uri);
                        if routing_domain.is_none() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let (Some(bridge_domain), Some(routing_domain)) = (bridge_domain, routing_domain)
            else {
                continue;
            };
            let Some(bd_inst) = self.resolve_inst_context(&bridge_domain) else {
                continue;
            };
            let Some(rd_inst) = self.resolve_inst_context(&routing_domain) else {
                continue;
            };
            let (Some(ip), Some(mac)) = (dest.attr_str(prop::IP), dest.attr_str(prop::MAC))
            else {
                continue;
            };
            let Ok(ip) = ip.parse::<IpAddress>() else {
                continue;
            };
            let Ok(mac) = mac.parse::<MacAddress>() else {
                continue;
            };
            new_dests.push(PolicyRedirectDest::new(
                dest.clone(),
                ip,
                mac,
                routing_domain,
                bridge_domain,
                rd_inst,
                bd_inst,
            ));
        }

        // Resolution order is not arrival order; keep ascending by IP.
        new_dests.sort_by(|a, b| a.ip().cmp(b.ip()));

        let new_hash_algorithm = group
            .attr_u64(prop::HASH_ALGORITHM)
            .unwrap_or(constants::HASH_ALGORITHM_SYMMETRIC);
        let new_resilient_hash = group
            .attr_u64(prop::RESILIENT_HASH)
            .unwrap_or(constants::DEFAULT_RESILIENT_HASH)
            != 0;

        let redir_state = state.redir_grp_map.entry(uri.clone()).or_default();
        if redir_state.dests != new_dests
            || redir_state.hash_algorithm != new_hash_algorithm
            || redir_state.resilient_hash != new_resilient_hash
        {
            notify.extend(redir_state.ctrct_set.iter().cloned());
        }
        redir_state.dests = new_dests;
        redir_state.hash_algorithm = new_hash_algorithm;
        redir_state.resilient_hash = new_resilient_hash;
    }

    /// Re-resolves every known redirect destination group.
    pub(crate) fn update_redirect_dest_groups(
        &self,
        state: &mut PolicyState,
        notify: &mut BTreeSet<Uri>,
    ) {
        let groups: Vec<Uri> = state.redir_grp_map.keys().cloned().collect();
        for uri in groups {
            self.update_redirect_dest_group(state, &uri, notify);
        }
    }
}
