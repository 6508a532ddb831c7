//! Policy manager lifecycle, listener sinks, and notification fan-out.

use crate::state::PolicyState;
use crate::task_queue::TaskQueue;
use netpol_modb::{prop, ClassId, Modb, ModbListener, MoObject, Reference};
use netpol_types::Uri;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Receives change notifications from the policy manager.
///
/// All callbacks default to no-ops so a listener implements only what it
/// renders. Callbacks run outside the state mutex: re-entering the query
/// surface is safe.
pub trait PolicyListener: Send + Sync {
    /// An endpoint group's resolved forwarding state changed.
    fn eg_domain_updated(&self, _uri: &Uri) {}
    /// A domain object changed (possibly indirectly, via a NAT group).
    fn domain_updated(&self, _class_id: ClassId, _uri: &Uri) {}
    /// A contract's compiled rules or group membership changed.
    fn contract_updated(&self, _uri: &Uri) {}
    /// A security group's compiled rules changed.
    fn sec_group_updated(&self, _uri: &Uri) {}
    /// A platform config object changed.
    fn config_updated(&self, _uri: &Uri) {}
}

/// Classes routed to the domain sink.
const DOMAIN_CLASSES: [ClassId; 8] = [
    ClassId::BridgeDomain,
    ClassId::FloodDomain,
    ClassId::FloodContext,
    ClassId::RoutingDomain,
    ClassId::Subnets,
    ClassId::Subnet,
    ClassId::EpGroup,
    ClassId::L3ExternalNetwork,
];

/// Classes routed to the contract sink.
const CONTRACT_CLASSES: [ClassId; 10] = [
    ClassId::EpGroup,
    ClassId::L3ExternalNetwork,
    ClassId::RoutingDomain,
    ClassId::Contract,
    ClassId::Subject,
    ClassId::Rule,
    ClassId::L24Classifier,
    ClassId::RedirectDestGroup,
    ClassId::RedirectDest,
    ClassId::RedirectAction,
];

/// Classes routed to the security-group sink.
const SEC_GROUP_CLASSES: [ClassId; 6] = [
    ClassId::SecGroup,
    ClassId::SecGroupSubject,
    ClassId::SecGroupRule,
    ClassId::L24Classifier,
    ClassId::Subnets,
    ClassId::Subnet,
];

struct Sinks {
    domain: Arc<dyn ModbListener>,
    contract: Arc<dyn ModbListener>,
    sec_group: Arc<dyn ModbListener>,
    config: Arc<dyn ModbListener>,
}

/// The policy resolution core.
///
/// Subscribes to the managed-object store, resolves forwarding-domain
/// chains, maintains the contract and NAT cross-indices, compiles
/// classifier rules, and notifies registered [`PolicyListener`]s of what
/// actually changed. All mutation runs on the internal task queue's
/// single worker; queries may run on any thread.
pub struct PolicyManager {
    pub(crate) framework: Arc<Modb>,
    policy_domain: String,
    pub(crate) task_queue: TaskQueue,
    pub(crate) state: Mutex<PolicyState>,
    listeners: Mutex<Vec<Weak<dyn PolicyListener>>>,
    sinks: Mutex<Option<Sinks>>,
}

impl PolicyManager {
    /// Creates a manager bound to a store, with the given management
    /// domain name.
    pub fn new(framework: Arc<Modb>, policy_domain: impl Into<String>) -> Arc<Self> {
        Arc::new(PolicyManager {
            framework,
            policy_domain: policy_domain.into(),
            task_queue: TaskQueue::new(),
            state: Mutex::new(PolicyState::default()),
            listeners: Mutex::new(Vec::new()),
            sinks: Mutex::new(None),
        })
    }

    /// The URI at which this manager's platform config is expected.
    pub fn platform_config_uri(&self) -> Uri {
        Uri::root().child("platform").child(&self.policy_domain)
    }

    /// Registers the listener sinks with the store and commits the
    /// initial domain-config reference.
    pub fn start(self: &Arc<Self>) {
        debug!("starting policy manager");

        let domain: Arc<dyn ModbListener> = Arc::new(DomainSink {
            manager: Arc::downgrade(self),
        });
        let contract: Arc<dyn ModbListener> = Arc::new(ContractSink {
            manager: Arc::downgrade(self),
        });
        let sec_group: Arc<dyn ModbListener> = Arc::new(SecGroupSink {
            manager: Arc::downgrade(self),
        });
        let config: Arc<dyn ModbListener> = Arc::new(ConfigSink {
            manager: Arc::downgrade(self),
        });

        for class_id in DOMAIN_CLASSES {
            self.framework.register_listener(class_id, domain.clone());
        }
        for class_id in CONTRACT_CLASSES {
            self.framework.register_listener(class_id, contract.clone());
        }
        for class_id in SEC_GROUP_CLASSES {
            self.framework.register_listener(class_id, sec_group.clone());
        }
        self.framework
            .register_listener(ClassId::PlatformConfig, config.clone());

        *self.sinks.lock().unwrap() = Some(Sinks {
            domain,
            contract,
            sec_group,
            config,
        });

        // Point the domain config at our platform config.
        let mut mutator = self.framework.mutator();
        mutator.put(
            MoObject::new(ClassId::DomainConfig, Uri::root().child("domain-config")).with_ref(
                prop::CONFIG,
                Reference::new(ClassId::PlatformConfig, self.platform_config_uri()),
            ),
        );
        mutator.commit();
    }

    /// Unregisters all store listeners, drains the task queue, and clears
    /// the resolved indices. Queued tasks complete before this returns.
    pub fn stop(&self) {
        debug!("stopping policy manager");

        if let Some(sinks) = self.sinks.lock().unwrap().take() {
            for class_id in DOMAIN_CLASSES {
                self.framework.unregister_listener(class_id, &sinks.domain);
            }
            for class_id in CONTRACT_CLASSES {
                self.framework.unregister_listener(class_id, &sinks.contract);
            }
            for class_id in SEC_GROUP_CLASSES {
                self.framework
                    .unregister_listener(class_id, &sinks.sec_group);
            }
            self.framework
                .unregister_listener(ClassId::PlatformConfig, &sinks.config);
        }

        self.task_queue.stop();

        let mut state = self.state.lock().unwrap();
        *state = PolicyState::default();
    }

    /// Blocks until all dispatched updates have settled.
    pub fn wait_idle(&self) {
        self.task_queue.wait_idle();
    }

    /// Registers a policy listener. The manager holds only a weak
    /// reference and never extends the listener's lifetime.
    pub fn register_listener(&self, listener: &Arc<dyn PolicyListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.push(Arc::downgrade(listener));
    }

    /// Unregisters a previously registered listener.
    pub fn unregister_listener(&self, listener: &Arc<dyn PolicyListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|weak| match weak.upgrade() {
            Some(current) => !Arc::ptr_eq(&current, listener),
            None => false,
        });
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn PolicyListener>> {
        let listeners = self.listeners.lock().unwrap();
        listeners.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn notify_epg_domain(&self, uri: &Uri) {
        for listener in self.snapshot_listeners() {
            listener.eg_domain_updated(uri);
        }
    }

    pub(crate) fn notify_domain(&self, class_id: ClassId, uri: &Uri) {
        for listener in self.snapshot_listeners() {
            listener.domain_updated(class_id, uri);
        }
    }

    pub(crate) fn notify_contract(&self, uri: &Uri) {
        for listener in self.snapshot_listeners() {
            listener.contract_updated(uri);
        }
    }

    pub(crate) fn notify_sec_group(&self, uri: &Uri) {
        for listener in self.snapshot_listeners() {
            listener.sec_group_updated(uri);
        }
    }

    pub(crate) fn notify_config(&self, uri: &Uri) {
        for listener in self.snapshot_listeners() {
            listener.config_updated(uri);
        }
    }

    /// Runs `update` under the state mutex, then notifies the contracts
    /// it collected after the mutex is released.
    pub(crate) fn execute_and_notify_contract(
        &self,
        update: impl FnOnce(&mut PolicyState, &mut BTreeSet<Uri>),
    ) {
        let mut to_notify = BTreeSet::new();
        {
            let mut state = self.state.lock().unwrap();
            update(&mut state, &mut to_notify);
        }
        for uri in &to_notify {
            self.notify_contract(uri);
        }
    }
}

/// Routes forwarding-domain object changes onto the task queue, keyed by
/// URI so bursts for one object coalesce.
struct DomainSink {
    manager: Weak<PolicyManager>,
}

impl ModbListener for DomainSink {
    fn object_updated(&self, class_id: ClassId, uri: &Uri) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let key = format!("dl{uri}");
        let uri = uri.clone();
        let task_manager = manager.clone();
        manager.task_queue.dispatch(key, move || {
            task_manager.update_domain(class_id, &uri);
        });
    }
}

/// Routes contract-related object changes: per-object updates for groups,
/// routing domains, and redirect groups; a whole-world recompute under
/// the constant `"contract"` key for policy objects.
struct ContractSink {
    manager: Weak<PolicyManager>,
}

impl ModbListener for ContractSink {
    fn object_updated(&self, class_id: ClassId, uri: &Uri) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        debug!(%uri, "contract listener update");
        let key = format!("cl{uri}");
        let uri = uri.clone();
        match class_id {
            ClassId::EpGroup | ClassId::L3ExternalNetwork => {
                let task_manager = manager.clone();
                manager.task_queue.dispatch(key, move || {
                    task_manager.execute_and_notify_contract(|state, notify| {
                        task_manager.update_group_contracts(state, class_id, &uri, notify);
                    });
                });
            }
            ClassId::RoutingDomain => {
                let task_manager = manager.clone();
                manager.task_queue.dispatch(key, move || {
                    task_manager.execute_and_notify_contract(|state, notify| {
                        task_manager.update_l3_nets(state, &uri, notify);
                    });
                });
            }
            ClassId::RedirectDestGroup => {
                let task_manager = manager.clone();
                manager.task_queue.dispatch(key, move || {
                    task_manager.execute_and_notify_contract(|state, notify| {
                        task_manager.update_redirect_dest_group(state, &uri, notify);
                    });
                });
            }
            ClassId::RedirectDest => {
                let task_manager = manager.clone();
                manager.task_queue.dispatch(key, move || {
                    task_manager.execute_and_notify_contract(|state, notify| {
                        task_manager.update_redirect_dest_groups(state, notify);
                    });
                });
            }
            _ => {
                if class_id == ClassId::Contract {
                    // Ensure an entry exists so a later delete is seen by
                    // the whole-world recompute.
                    let mut state = manager.state.lock().unwrap();
                    state.contract_map.entry(uri).or_default();
                }
                let task_manager = manager.clone();
                manager.task_queue.dispatch("contract", move || {
                    task_manager.update_contracts();
                });
            }
        }
    }
}

/// Routes security-group object changes into a whole-world recompute
/// under the constant `"secgroup"` key.
struct SecGroupSink {
    manager: Weak<PolicyManager>,
}

impl ModbListener for SecGroupSink {
    fn object_updated(&self, class_id: ClassId, uri: &Uri) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        debug!(%uri, "security group listener update");
        if class_id == ClassId::SecGroup {
            let mut state = manager.state.lock().unwrap();
            state.sec_grp_map.entry(uri.clone()).or_default();
        }
        let task_manager = manager.clone();
        manager.task_queue.dispatch("secgroup", move || {
            task_manager.update_sec_grps();
        });
    }
}

/// Forwards platform-config changes to config listeners verbatim.
struct ConfigSink {
    manager: Weak<PolicyManager>,
}

impl ModbListener for ConfigSink {
    fn object_updated(&self, _class_id: ClassId, uri: &Uri) {
        if let Some(manager) = self.manager.upgrade() {
            manager.notify_config(uri);
        }
    }
}
