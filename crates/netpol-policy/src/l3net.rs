//! External L3 network tracking per routing domain.

use crate::manager::PolicyManager;
use crate::state::PolicyState;
use netpol_modb::{prop, ClassId};
use netpol_types::Uri;
use std::collections::BTreeSet;

impl PolicyManager {
    fn prune_nat_reverse(state: &mut PolicyState, nat_epg: &Uri, net_uri: &Uri) {
        if let Some(ext_set) = state.nat_epg_l3_ext.get_mut(nat_epg) {
            ext_set.remove(net_uri);
            if ext_set.is_empty() {
                state.nat_epg_l3_ext.remove(nat_epg);
            }
        }
    }

    /// Re-reads the external networks of one routing domain, maintaining
    /// the per-network state, the NAT reverse index, and the contract
    /// index of each network.
    pub(crate) fn update_l3_nets(
        &self,
        state: &mut PolicyState,
        rd_uri: &Uri,
        contracts_to_notify: &mut BTreeSet<Uri>,
    ) {
        state.rd_map.entry(rd_uri.clone()).or_default();
        let old_nets = state
            .rd_map
            .get(rd_uri)
            .expect("entry created above")
            .ext_nets
            .clone();

        let Some(rd) = self.framework.resolve_class(ClassId::RoutingDomain, rd_uri) else {
            // The routing domain itself is gone: purge its networks.
            for net_uri in &old_nets {
                if let Some(l3s) = state.l3n_map.remove(net_uri) {
                    if let Some(nat_epg) = &l3s.nat_epg {
                        let nat_epg = nat_epg.clone();
                        Self::prune_nat_reverse(state, &nat_epg, net_uri);
                    }
                }
                self.update_group_contracts(
                    state,
                    ClassId::L3ExternalNetwork,
                    net_uri,
                    contracts_to_notify,
                );
            }
            state.rd_map.remove(rd_uri);
            return;
        };

        let mut ext_nets = Vec::new();
        for ext_dom in self
            .framework
            .resolve_children(rd_uri, ClassId::L3ExternalDomain)
        {
            ext_nets.extend(
                self.framework
                    .resolve_children(ext_dom.uri(), ClassId::L3ExternalNetwork),
            );
        }

        let mut new_nets = BTreeSet::new();
        for net in &ext_nets {
            let net_uri = net.uri().clone();
            new_nets.insert(net_uri.clone());

            let l3s = state.l3n_map.entry(net_uri.clone()).or_default();
            let stale_nat = if l3s.routing_domain.is_some() {
                l3s.nat_epg.clone()
            } else {
                None
            };
            if let Some(nat_epg) = stale_nat {
                Self::prune_nat_reverse(state, &nat_epg, &net_uri);
            }

            let l3s = state.l3n_map.get_mut(&net_uri).expect("entry created above");
            l3s.routing_domain = Some(rd.clone());
            match net.ref_uri(prop::NAT_EPG).cloned() {
                Some(nat_epg) => {
                    l3s.nat_epg = Some(nat_epg.clone());
                    state
                        .nat_epg_l3_ext
                        .entry(nat_epg)
                        .or_default()
                        .insert(net_uri.clone());
                }
                None => {
                    l3s.nat_epg = None;
                }
            }

            self.update_group_contracts(
                state,
                ClassId::L3ExternalNetwork,
                &net_uri,
                contracts_to_notify,
            );
        }

        // Networks no longer attached to this routing domain.
        for net_uri in old_nets.difference(&new_nets) {
            if let Some(l3s) = state.l3n_map.remove(net_uri) {
                if let Some(nat_epg) = &l3s.nat_epg {
                    let nat_epg = nat_epg.clone();
                    Self::prune_nat_reverse(state, &nat_epg, net_uri);
                }
            }
            self.update_group_contracts(
                state,
                ClassId::L3ExternalNetwork,
                net_uri,
                contracts_to_notify,
            );
        }

        state
            .rd_map
            .get_mut(rd_uri)
            .expect("entry created above")
            .ext_nets = new_nets;
    }
}
