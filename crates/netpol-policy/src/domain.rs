//! Forwarding-domain chain resolution for endpoint groups.

use crate::manager::PolicyManager;
use crate::state::{GroupState, PolicyState};
use netpol_modb::{prop, ClassId, MoObject};
use netpol_types::Uri;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

impl PolicyManager {
    /// Unions the subnet children of the referenced subnets container
    /// into `map`, keyed by subnet URI (last write wins per key).
    fn add_subnets(&self, subnets_uri: &Uri, map: &mut BTreeMap<Uri, Arc<MoObject>>) {
        if let Some(subnets) = self.framework.resolve_class(ClassId::Subnets, subnets_uri) {
            for subnet in self
                .framework
                .resolve_children(subnets.uri(), ClassId::Subnet)
            {
                map.insert(subnet.uri().clone(), subnet);
            }
        }
    }

    /// Resolves the instance-context child of a group or domain object.
    pub(crate) fn resolve_inst_context(&self, parent: &Arc<MoObject>) -> Option<Arc<MoObject>> {
        self.framework
            .resolve_children(parent.uri(), ClassId::InstContext)
            .into_iter()
            .next()
    }

    /// Resolves the endpoint-retention policy referenced by an instance
    /// context.
    fn resolve_retention(&self, inst_context: &Arc<MoObject>) -> Option<Arc<MoObject>> {
        let uri = inst_context.ref_uri(prop::EP_RETENTION)?;
        self.framework
            .resolve_class(ClassId::EndpointRetention, uri)
    }

    /// Re-resolves one endpoint group's forwarding-domain chain.
    ///
    /// Returns `(updated, to_remove)`: `updated` when any resolved field
    /// differs from the previous state, `to_remove` when the backing
    /// object is gone and the caller should drop the entry.
    pub(crate) fn update_epg_domains(
        &self,
        state: &mut PolicyState,
        eg_uri: &Uri,
    ) -> (bool, bool) {
        state.group_map.entry(eg_uri.clone()).or_default();

        let Some(epg) = self.framework.resolve_class(ClassId::EpGroup, eg_uri) else {
            return (true, true);
        };

        let new_inst_ctx = self.resolve_inst_context(&epg);
        let old_encap = state
            .group_map
            .get(eg_uri)
            .and_then(|gs| gs.inst_context.as_ref())
            .and_then(|ctx| ctx.attr_u64(prop::ENCAP_ID));
        if let Some(id) = old_encap {
            state.vnid_map.remove(&(id as u32));
        }
        if let Some(id) = new_inst_ctx
            .as_ref()
            .and_then(|ctx| ctx.attr_u64(prop::ENCAP_ID))
        {
            state.vnid_map.insert(id as u32, eg_uri.clone());
        }

        let mut new_rd = None;
        let mut new_bd = None;
        let mut new_fd = None;
        let mut new_fdctx = None;
        let mut new_smap = BTreeMap::new();
        let mut new_l2_ret = None;
        let mut new_l3_ret = None;
        // Until a bridge or routing domain supplies its own context, the
        // group's instance context stands in.
        let mut new_bd_inst = new_inst_ctx.clone();
        let mut new_rd_inst = new_inst_ctx.clone();

        // Subnets directly referenced by the group.
        if let Some(subnets_uri) = epg.ref_uri(prop::SUBNETS) {
            self.add_subnets(subnets_uri, &mut new_smap);
        }

        // Walk up the chain of forwarding domains.
        let mut next = epg.ref_one(prop::NETWORK).cloned();
        while let Some(reference) = next.take() {
            match reference.class_id {
                ClassId::RoutingDomain => {
                    if let Some(rd) = self
                        .framework
                        .resolve_class(ClassId::RoutingDomain, &reference.uri)
                    {
                        if let Some(subnets_uri) = rd.ref_uri(prop::SUBNETS) {
                            self.add_subnets(subnets_uri, &mut new_smap);
                        }
                        new_rd_inst = self.resolve_inst_context(&rd);
                        if let Some(ctx) = &new_rd_inst {
                            new_l3_ret = self.resolve_retention(ctx);
                        }
                        new_rd = Some(rd);
                    }
                }
                ClassId::BridgeDomain => {
                    if let Some(bd) = self
                        .framework
                        .resolve_class(ClassId::BridgeDomain, &reference.uri)
                    {
                        next = bd.ref_one(prop::NETWORK).cloned();
                        if let Some(subnets_uri) = bd.ref_uri(prop::SUBNETS) {
                            self.add_subnets(subnets_uri, &mut new_smap);
                        }
                        new_bd_inst = self.resolve_inst_context(&bd);
                        if let Some(ctx) = &new_bd_inst {
                            new_l2_ret = self.resolve_retention(ctx);
                        }
                        new_bd = Some(bd);
                    }
                }
                ClassId::FloodDomain => {
                    if let Some(fd) = self
                        .framework
                        .resolve_class(ClassId::FloodDomain, &reference.uri)
                    {
                        next = fd.ref_one(prop::NETWORK).cloned();
                        new_fdctx = self
                            .framework
                            .resolve_children(fd.uri(), ClassId::FloodContext)
                            .into_iter()
                            .next();
                        if let Some(subnets_uri) = fd.ref_uri(prop::SUBNETS) {
                            self.add_subnets(subnets_uri, &mut new_smap);
                        }
                        new_fd = Some(fd);
                    }
                }
                // a reference out of the forwarding-domain chain ends the walk
                _ => {}
            }
        }

        let new_gs = GroupState {
            ep_group: Some(epg),
            inst_context: new_inst_ctx,
            flood_domain: new_fd,
            flood_context: new_fdctx,
            bridge_domain: new_bd,
            routing_domain: new_rd,
            inst_bd_context: new_bd_inst,
            inst_rd_context: new_rd_inst,
            l2_ep_ret_policy: new_l2_ret,
            l3_ep_ret_policy: new_l3_ret,
            subnet_map: new_smap,
        };

        let gs = state
            .group_map
            .get_mut(eg_uri)
            .expect("entry created above");
        let updated = *gs != new_gs;
        *gs = new_gs;
        (updated, false)
    }

    /// Handles a forwarding-domain object change: re-resolves every known
    /// endpoint group, then notifies the groups and domains that changed.
    pub(crate) fn update_domain(&self, class_id: ClassId, uri: &Uri) {
        let mut notify_groups = BTreeSet::new();
        let mut notify_rds = BTreeSet::new();
        {
            let mut state = self.state.lock().unwrap();

            if class_id == ClassId::EpGroup {
                state.group_map.entry(uri.clone()).or_default();
            }

            let groups: Vec<Uri> = state.group_map.keys().cloned().collect();
            for eg_uri in groups {
                let (updated, to_remove) = self.update_epg_domains(&mut state, &eg_uri);
                if updated {
                    notify_groups.insert(eg_uri.clone());
                }
                if to_remove {
                    if let Some(gs) = state.group_map.remove(&eg_uri) {
                        // Drop the stale vnid mapping with the group.
                        if let Some(id) = gs
                            .inst_context
                            .as_ref()
                            .and_then(|ctx| ctx.attr_u64(prop::ENCAP_ID))
                        {
                            if state.vnid_map.get(&(id as u32)) == Some(&eg_uri) {
                                state.vnid_map.remove(&(id as u32));
                            }
                        }
                    }
                }
            }

            // Routing domains that may be affected by a NAT group change.
            for group in &notify_groups {
                if let Some(ext_nets) = state.nat_epg_l3_ext.get(group) {
                    for ext_net in ext_nets {
                        if let Some(l3s) = state.l3n_map.get(ext_net) {
                            if let Some(rd) = &l3s.routing_domain {
                                notify_rds.insert(rd.uri().clone());
                            }
                        }
                    }
                }
            }
            notify_rds.remove(uri); // avoid updating twice
        }

        for group in &notify_groups {
            self.notify_epg_domain(group);
        }
        if class_id != ClassId::EpGroup {
            self.notify_domain(class_id, uri);
        }
        for rd in &notify_rds {
            self.notify_domain(ClassId::RoutingDomain, rd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_modb::{Modb, Reference};

    fn put(store: &Modb, objects: Vec<MoObject>) {
        let mut mutator = store.mutator();
        for object in objects {
            mutator.put(object);
        }
        mutator.commit();
    }

    fn chain_fixture(store: &Modb) {
        put(
            store,
            vec![
                MoObject::new(ClassId::EpGroup, "/g1")
                    .with_ref(prop::NETWORK, Reference::new(ClassId::BridgeDomain, "/bd1")),
                MoObject::new(ClassId::InstContext, "/g1/ctx")
                    .with_parent("/g1")
                    .with_attr(prop::ENCAP_ID, 100u64),
                MoObject::new(ClassId::BridgeDomain, "/bd1")
                    .with_ref(prop::NETWORK, Reference::new(ClassId::RoutingDomain, "/rd1")),
                MoObject::new(ClassId::RoutingDomain, "/rd1"),
            ],
        );
    }

    #[test]
    fn test_chain_walk_records_domains() {
        let store = Arc::new(Modb::new());
        chain_fixture(&store);
        let manager = PolicyManager::new(store, "default");

        let mut state = PolicyState::default();
        let (updated, to_remove) = manager.update_epg_domains(&mut state, &Uri::new("/g1"));
        assert!(updated);
        assert!(!to_remove);

        let gs = state.group_map.get(&Uri::new("/g1")).unwrap();
        assert_eq!(
            gs.bridge_domain.as_ref().map(|o| o.uri().clone()),
            Some(Uri::new("/bd1"))
        );
        assert_eq!(
            gs.routing_domain.as_ref().map(|o| o.uri().clone()),
            Some(Uri::new("/rd1"))
        );
        assert_eq!(state.vnid_map.get(&100), Some(&Uri::new("/g1")));
        manager.stop();
    }

    #[test]
    fn test_unchanged_resolution_is_not_reported() {
        let store = Arc::new(Modb::new());
        chain_fixture(&store);
        let manager = PolicyManager::new(store, "default");

        let mut state = PolicyState::default();
        let (updated, _) = manager.update_epg_domains(&mut state, &Uri::new("/g1"));
        assert!(updated);
        let (updated, _) = manager.update_epg_domains(&mut state, &Uri::new("/g1"));
        assert!(!updated);
        manager.stop();
    }

    #[test]
    fn test_encap_change_moves_vnid_entry() {
        let store = Arc::new(Modb::new());
        chain_fixture(&store);
        let manager = PolicyManager::new(store.clone(), "default");

        let mut state = PolicyState::default();
        manager.update_epg_domains(&mut state, &Uri::new("/g1"));
        assert_eq!(state.vnid_map.get(&100), Some(&Uri::new("/g1")));

        put(
            &store,
            vec![MoObject::new(ClassId::InstContext, "/g1/ctx")
                .with_parent("/g1")
                .with_attr(prop::ENCAP_ID, 200u64)],
        );
        let (updated, _) = manager.update_epg_domains(&mut state, &Uri::new("/g1"));
        assert!(updated);
        assert!(!state.vnid_map.contains_key(&100));
        assert_eq!(state.vnid_map.get(&200), Some(&Uri::new("/g1")));
        manager.stop();
    }

    #[test]
    fn test_group_removal_cleans_vnid_index() {
        let store = Arc::new(Modb::new());
        chain_fixture(&store);
        let manager = PolicyManager::new(store.clone(), "default");

        manager.update_domain(ClassId::EpGroup, &Uri::new("/g1"));
        {
            let state = manager.state.lock().unwrap();
            assert_eq!(state.vnid_map.get(&100), Some(&Uri::new("/g1")));
        }

        let mut mutator = store.mutator();
        mutator.remove("/g1");
        mutator.commit();

        manager.update_domain(ClassId::EpGroup, &Uri::new("/g1"));
        {
            let state = manager.state.lock().unwrap();
            assert!(!state.group_map.contains_key(&Uri::new("/g1")));
            assert!(state.vnid_map.is_empty());
        }
        manager.stop();
    }
}
