//! Contract indexing: group membership, garbage collection, and the
//! whole-world recompute passes.

use crate::manager::PolicyManager;
use crate::state::PolicyState;
use netpol_modb::{prop, ClassId};
use netpol_types::Uri;
use std::collections::BTreeSet;
use tracing::debug;

impl PolicyManager {
    /// Erases a contract entry once nothing references it and the backing
    /// object is gone. Returns true when the entry was removed.
    pub(crate) fn remove_contract_if_required(
        &self,
        state: &mut PolicyState,
        uri: &Uri,
    ) -> bool {
        if self
            .framework
            .resolve_class(ClassId::Contract, uri)
            .is_some()
        {
            return false;
        }
        let unreferenced = state
            .contract_map
            .get(uri)
            .map(|cs| cs.unreferenced())
            .unwrap_or(false);
        if unreferenced {
            debug!(contract = %uri, "removing index for contract");
            state.contract_map.remove(uri);
            return true;
        }
        false
    }

    /// Re-reads the contract references of one group or external network
    /// and reconciles the contract ↔ group bipartite index. The contracts
    /// whose membership changed are added to `updated_contracts`.
    pub(crate) fn update_group_contracts(
        &self,
        state: &mut PolicyState,
        group_type: ClassId,
        group_uri: &Uri,
        updated_contracts: &mut BTreeSet<Uri>,
    ) {
        state
            .group_contract_map
            .entry(group_uri.clone())
            .or_default();

        let mut new_provided = BTreeSet::new();
        let mut new_consumed = BTreeSet::new();
        let mut new_intra = BTreeSet::new();

        let mut remove = true;
        match group_type {
            ClassId::EpGroup => {
                if let Some(epg) = self.framework.resolve_class(ClassId::EpGroup, group_uri) {
                    remove = false;
                    for reference in epg.refs(prop::PROV_CONTRACT) {
                        new_provided.insert(reference.uri.clone());
                    }
                    for reference in epg.refs(prop::CONS_CONTRACT) {
                        new_consumed.insert(reference.uri.clone());
                    }
                    for reference in epg.refs(prop::INTRA_CONTRACT) {
                        new_intra.insert(reference.uri.clone());
                    }
                }
            }
            ClassId::L3ExternalNetwork => {
                if let Some(net) = self
                    .framework
                    .resolve_class(ClassId::L3ExternalNetwork, group_uri)
                {
                    remove = false;
                    for reference in net.refs(prop::PROV_CONTRACT) {
                        new_provided.insert(reference.uri.clone());
                    }
                    for reference in net.refs(prop::CONS_CONTRACT) {
                        new_consumed.insert(reference.uri.clone());
                    }
                }
            }
            _ => {}
        }

        let prov_added: BTreeSet<Uri>;
        let prov_removed: BTreeSet<Uri>;
        let cons_added: BTreeSet<Uri>;
        let cons_removed: BTreeSet<Uri>;
        let intra_added: BTreeSet<Uri>;
        let intra_removed: BTreeSet<Uri>;

        if remove {
            let gcs = state
                .group_contract_map
                .remove(group_uri)
                .unwrap_or_default();
            prov_added = BTreeSet::new();
            cons_added = BTreeSet::new();
            intra_added = BTreeSet::new();
            prov_removed = gcs.contracts_provided;
            cons_removed = gcs.contracts_consumed;
            intra_removed = gcs.contracts_intra;
        } else {
            let gcs = state
                .group_contract_map
                .get_mut(group_uri)
                .expect("entry created above");
            prov_added = new_provided
                .difference(&gcs.contracts_provided)
                .cloned()
                .collect();
            prov_removed = gcs
                .contracts_provided
                .difference(&new_provided)
                .cloned()
                .collect();
            cons_added = new_consumed
                .difference(&gcs.contracts_consumed)
                .cloned()
                .collect();
            cons_removed = gcs
                .contracts_consumed
                .difference(&new_consumed)
                .cloned()
                .collect();
            intra_added = new_intra
                .difference(&gcs.contracts_intra)
                .cloned()
                .collect();
            intra_removed = gcs
                .contracts_intra
                .difference(&new_intra)
                .cloned()
                .collect();
            gcs.contracts_provided = new_provided;
            gcs.contracts_consumed = new_consumed;
            gcs.contracts_intra = new_intra;
        }

        for changed in [
            &prov_added,
            &prov_removed,
            &cons_added,
            &cons_removed,
            &intra_added,
            &intra_removed,
        ] {
            updated_contracts.extend(changed.iter().cloned());
        }

        for uri in &prov_added {
            state
                .contract_map
                .entry(uri.clone())
                .or_default()
                .provider_groups
                .insert(group_uri.clone());
            debug!(contract = %uri, group = %group_uri, "prov add");
        }
        for uri in &cons_added {
            state
                .contract_map
                .entry(uri.clone())
                .or_default()
                .consumer_groups
                .insert(group_uri.clone());
            debug!(contract = %uri, group = %group_uri, "cons add");
        }
        for uri in &intra_added {
            state
                .contract_map
                .entry(uri.clone())
                .or_default()
                .intra_groups
                .insert(group_uri.clone());
            debug!(contract = %uri, group = %group_uri, "intra add");
        }
        for uri in &prov_removed {
            state
                .contract_map
                .entry(uri.clone())
                .or_default()
                .provider_groups
                .remove(group_uri);
            debug!(contract = %uri, group = %group_uri, "prov remove");
            self.remove_contract_if_required(state, uri);
        }
        for uri in &cons_removed {
            state
                .contract_map
                .entry(uri.clone())
                .or_default()
                .consumer_groups
                .remove(group_uri);
            debug!(contract = %uri, group = %group_uri, "cons remove");
            self.remove_contract_if_required(state, uri);
        }
        for uri in &intra_removed {
            state
                .contract_map
                .entry(uri.clone())
                .or_default()
                .intra_groups
                .remove(group_uri);
            debug!(contract = %uri, group = %group_uri, "intra remove");
            self.remove_contract_if_required(state, uri);
        }
    }

    /// Recomputes the rules of every known contract. Contracts whose
    /// backing object vanished keep their entry (with cleared rules)
    /// while still referenced, and are erased otherwise.
    pub(crate) fn update_contracts(&self) {
        let mut to_notify = BTreeSet::new();
        {
            let mut state = self.state.lock().unwrap();
            let contracts: Vec<Uri> = state.contract_map.keys().cloned().collect();
            for uri in contracts {
                let (updated, not_found) = self.update_contract_rules(&mut state, &uri);
                if updated {
                    to_notify.insert(uri.clone());
                }
                // not_found covers both a removed contract and a group
                // reference to a contract that has not arrived yet
                if not_found {
                    to_notify.insert(uri.clone());
                    let unreferenced = state
                        .contract_map
                        .get(&uri)
                        .map(|cs| cs.unreferenced())
                        .unwrap_or(false);
                    if unreferenced {
                        state.contract_map.remove(&uri);
                    } else if let Some(cs) = state.contract_map.get_mut(&uri) {
                        cs.rules.clear();
                    }
                }
            }
        }

        for uri in &to_notify {
            self.notify_contract(uri);
        }
    }

    /// Recomputes the rules of every known security group, erasing
    /// entries whose backing object vanished.
    pub(crate) fn update_sec_grps(&self) {
        let mut to_notify = BTreeSet::new();
        {
            let mut state = self.state.lock().unwrap();
            let groups: Vec<Uri> = state.sec_grp_map.keys().cloned().collect();
            for uri in groups {
                let (updated, not_found) = self.update_sec_grp_rules(&mut state, &uri);
                if updated {
                    to_notify.insert(uri.clone());
                }
                if not_found {
                    to_notify.insert(uri.clone());
                    state.sec_grp_map.remove(&uri);
                }
            }
        }

        for uri in &to_notify {
            self.notify_sec_group(uri);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_modb::{Modb, MoObject, Reference};
    use std::sync::Arc;

    fn put(store: &Modb, objects: Vec<MoObject>) {
        let mut mutator = store.mutator();
        for object in objects {
            mutator.put(object);
        }
        mutator.commit();
    }

    fn epg_with_contracts(uri: &str, provided: &[&str], consumed: &[&str]) -> MoObject {
        let mut obj = MoObject::new(ClassId::EpGroup, uri);
        for contract in provided {
            obj = obj.with_ref(
                prop::PROV_CONTRACT,
                Reference::new(ClassId::Contract, *contract),
            );
        }
        for contract in consumed {
            obj = obj.with_ref(
                prop::CONS_CONTRACT,
                Reference::new(ClassId::Contract, *contract),
            );
        }
        obj
    }

    /// Bipartite index integrity: forward and reverse edges must agree.
    fn check_reference_integrity(state: &PolicyState) {
        for (contract, cs) in &state.contract_map {
            for group in &cs.provider_groups {
                let gcs = state.group_contract_map.get(group).unwrap();
                assert!(gcs.contracts_provided.contains(contract));
            }
            for group in &cs.consumer_groups {
                let gcs = state.group_contract_map.get(group).unwrap();
                assert!(gcs.contracts_consumed.contains(contract));
            }
        }
        for (group, gcs) in &state.group_contract_map {
            for contract in &gcs.contracts_provided {
                let cs = state.contract_map.get(contract).unwrap();
                assert!(cs.provider_groups.contains(group));
            }
            for contract in &gcs.contracts_consumed {
                let cs = state.contract_map.get(contract).unwrap();
                assert!(cs.consumer_groups.contains(group));
            }
        }
    }

    #[test]
    fn test_membership_diff_add_and_remove() {
        let store = Arc::new(Modb::new());
        put(&store, vec![epg_with_contracts("/g1", &["/c1"], &["/c2"])]);
        let manager = PolicyManager::new(store.clone(), "default");

        let mut state = PolicyState::default();
        let mut updated = BTreeSet::new();
        manager.update_group_contracts(&mut state, ClassId::EpGroup, &Uri::new("/g1"), &mut updated);
        assert_eq!(
            updated,
            BTreeSet::from([Uri::new("/c1"), Uri::new("/c2")])
        );
        check_reference_integrity(&state);

        // Swap the provided contract; only the delta is reported.
        put(&store, vec![epg_with_contracts("/g1", &["/c3"], &["/c2"])]);
        let mut updated = BTreeSet::new();
        manager.update_group_contracts(&mut state, ClassId::EpGroup, &Uri::new("/g1"), &mut updated);
        assert_eq!(
            updated,
            BTreeSet::from([Uri::new("/c1"), Uri::new("/c3")])
        );
        check_reference_integrity(&state);
        manager.stop();
    }

    #[test]
    fn test_contract_survives_while_referenced() {
        let store = Arc::new(Modb::new());
        put(
            &store,
            vec![
                epg_with_contracts("/g1", &["/c1"], &[]),
                epg_with_contracts("/g2", &[], &["/c1"]),
                MoObject::new(ClassId::Contract, "/c1"),
            ],
        );
        let manager = PolicyManager::new(store.clone(), "default");

        let mut state = PolicyState::default();
        let mut updated = BTreeSet::new();
        manager.update_group_contracts(&mut state, ClassId::EpGroup, &Uri::new("/g1"), &mut updated);
        manager.update_group_contracts(&mut state, ClassId::EpGroup, &Uri::new("/g2"), &mut updated);

        // Contract object removed from the store: still referenced, so
        // the index entry stays.
        let mut mutator = store.mutator();
        mutator.remove("/c1");
        mutator.commit();
        assert!(!manager.remove_contract_if_required(&mut state, &Uri::new("/c1")));
        assert!(state.contract_map.contains_key(&Uri::new("/c1")));

        // Both groups detach: the entry is garbage collected.
        put(
            &store,
            vec![
                epg_with_contracts("/g1", &[], &[]),
                epg_with_contracts("/g2", &[], &[]),
            ],
        );
        let mut updated = BTreeSet::new();
        manager.update_group_contracts(&mut state, ClassId::EpGroup, &Uri::new("/g1"), &mut updated);
        manager.update_group_contracts(&mut state, ClassId::EpGroup, &Uri::new("/g2"), &mut updated);
        assert!(!state.contract_map.contains_key(&Uri::new("/c1")));
        check_reference_integrity(&state);
        manager.stop();
    }

    #[test]
    fn test_vanished_group_releases_all_roles() {
        let store = Arc::new(Modb::new());
        put(&store, vec![epg_with_contracts("/g1", &["/c1"], &["/c1"])]);
        let manager = PolicyManager::new(store.clone(), "default");

        let mut state = PolicyState::default();
        let mut updated = BTreeSet::new();
        manager.update_group_contracts(&mut state, ClassId::EpGroup, &Uri::new("/g1"), &mut updated);

        let mut mutator = store.mutator();
        mutator.remove("/g1");
        mutator.commit();

        let mut updated = BTreeSet::new();
        manager.update_group_contracts(&mut state, ClassId::EpGroup, &Uri::new("/g1"), &mut updated);
        assert_eq!(updated, BTreeSet::from([Uri::new("/c1")]));
        assert!(!state.group_contract_map.contains_key(&Uri::new("/g1")));
        // no backing object and no remaining references: GC'd
        assert!(!state.contract_map.contains_key(&Uri::new("/c1")));
        manager.stop();
    }
}
