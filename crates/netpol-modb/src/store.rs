//! In-memory managed-object store with listener registration and
//! transactional commits.

use crate::{ClassId, MoObject};
use netpol_types::Uri;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Receives object-changed events from the store.
///
/// Callbacks are delivered on the committing thread, after the store lock
/// is released. Implementations must not mutate policy state directly;
/// they enqueue work and return.
pub trait ModbListener: Send + Sync {
    fn object_updated(&self, class_id: ClassId, uri: &Uri);
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<Uri, Arc<MoObject>>,
    /// Child URIs per parent, sorted: iteration order is model order.
    children: HashMap<Uri, BTreeSet<Uri>>,
}

/// The node-local managed-object database.
///
/// Holds the current MO tree, hands out shared-immutable handles, and
/// notifies per-class listeners after each commit.
#[derive(Default)]
pub struct Modb {
    state: Mutex<StoreState>,
    listeners: Mutex<Vec<(ClassId, Arc<dyn ModbListener>)>>,
}

impl Modb {
    pub fn new() -> Self {
        Modb::default()
    }

    /// Resolves a URI to its current object, if any.
    pub fn resolve(&self, uri: &Uri) -> Option<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        state.objects.get(uri).cloned()
    }

    /// Resolves a URI, returning the object only if it has the expected
    /// class.
    pub fn resolve_class(&self, class_id: ClassId, uri: &Uri) -> Option<Arc<MoObject>> {
        self.resolve(uri).filter(|obj| obj.class_id() == class_id)
    }

    /// Returns the children of `parent` with the given class, in model
    /// order (sorted by URI).
    pub fn resolve_children(&self, parent: &Uri, class_id: ClassId) -> Vec<Arc<MoObject>> {
        let state = self.state.lock().unwrap();
        let Some(children) = state.children.get(parent) else {
            return Vec::new();
        };
        children
            .iter()
            .filter_map(|uri| state.objects.get(uri))
            .filter(|obj| obj.class_id() == class_id)
            .cloned()
            .collect()
    }

    /// Registers a listener for changes to objects of one class.
    pub fn register_listener(&self, class_id: ClassId, listener: Arc<dyn ModbListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.push((class_id, listener));
    }

    /// Unregisters a listener previously registered for the class.
    pub fn unregister_listener(&self, class_id: ClassId, listener: &Arc<dyn ModbListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|(c, l)| *c != class_id || !Arc::ptr_eq(l, listener));
    }

    /// Starts a mutation transaction.
    pub fn mutator(&self) -> Mutator<'_> {
        Mutator {
            store: self,
            puts: Vec::new(),
            removes: Vec::new(),
        }
    }

    fn notify(&self, touched: &[(ClassId, Uri)]) {
        for (class_id, uri) in touched {
            let targets: Vec<Arc<dyn ModbListener>> = {
                let listeners = self.listeners.lock().unwrap();
                listeners
                    .iter()
                    .filter(|(c, _)| c == class_id)
                    .map(|(_, l)| l.clone())
                    .collect()
            };
            for listener in targets {
                listener.object_updated(*class_id, uri);
            }
        }
    }
}

/// A batch of puts and removes applied atomically on commit.
///
/// Removing a URI removes its entire subtree; every removed object
/// produces a listener notification, as does every put.
pub struct Mutator<'a> {
    store: &'a Modb,
    puts: Vec<MoObject>,
    removes: Vec<Uri>,
}

impl Mutator<'_> {
    /// Stages an object insert or replacement.
    pub fn put(&mut self, object: MoObject) -> &mut Self {
        self.puts.push(object);
        self
    }

    /// Stages removal of a URI and its subtree.
    pub fn remove(&mut self, uri: impl Into<Uri>) -> &mut Self {
        self.removes.push(uri.into());
        self
    }

    /// Applies the batch under the store lock, then notifies listeners.
    pub fn commit(self) {
        let mut touched: Vec<(ClassId, Uri)> = Vec::new();
        {
            let mut state = self.store.state.lock().unwrap();
            let state = &mut *state;
            for object in self.puts {
                let uri = object.uri().clone();
                if let Some(old) = state.objects.get(&uri) {
                    if old.parent() != object.parent() {
                        if let Some(old_parent) = old.parent().cloned() {
                            if let Some(siblings) = state.children.get_mut(&old_parent) {
                                siblings.remove(&uri);
                            }
                        }
                    }
                }
                if let Some(parent) = object.parent().cloned() {
                    state.children.entry(parent).or_default().insert(uri.clone());
                }
                touched.push((object.class_id(), uri.clone()));
                state.objects.insert(uri, Arc::new(object));
            }

            for root in self.removes {
                let mut stack = vec![root];
                let mut subtree = Vec::new();
                while let Some(uri) = stack.pop() {
                    if let Some(children) = state.children.get(&uri) {
                        stack.extend(children.iter().cloned());
                    }
                    subtree.push(uri);
                }
                for uri in subtree {
                    if let Some(object) = state.objects.remove(&uri) {
                        touched.push((object.class_id(), uri.clone()));
                        if let Some(parent) = object.parent() {
                            if let Some(siblings) = state.children.get_mut(parent) {
                                siblings.remove(&uri);
                                if siblings.is_empty() {
                                    state.children.remove(parent);
                                }
                            }
                        }
                        state.children.remove(&uri);
                    }
                }
            }
        }

        debug!(touched = touched.len(), "committed mutation");
        self.store.notify(&touched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prop;
    use crate::Reference;
    use pretty_assertions::assert_eq;

    struct Recorder {
        events: Mutex<Vec<(ClassId, Uri)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Recorder {
                events: Mutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<(ClassId, Uri)> {
            std::mem::take(&mut self.events.lock().unwrap())
        }
    }

    impl ModbListener for Recorder {
        fn object_updated(&self, class_id: ClassId, uri: &Uri) {
            self.events.lock().unwrap().push((class_id, uri.clone()));
        }
    }

    #[test]
    fn test_resolve_and_class_filter() {
        let store = Modb::new();
        let mut m = store.mutator();
        m.put(MoObject::new(ClassId::EpGroup, "/g1"));
        m.commit();

        assert!(store.resolve(&Uri::new("/g1")).is_some());
        assert!(store
            .resolve_class(ClassId::EpGroup, &Uri::new("/g1"))
            .is_some());
        assert!(store
            .resolve_class(ClassId::Contract, &Uri::new("/g1"))
            .is_none());
        assert!(store.resolve(&Uri::new("/missing")).is_none());
    }

    #[test]
    fn test_children_sorted_and_filtered() {
        let store = Modb::new();
        let mut m = store.mutator();
        m.put(MoObject::new(ClassId::Subnets, "/sns"));
        m.put(MoObject::new(ClassId::Subnet, "/sns/b").with_parent("/sns"));
        m.put(MoObject::new(ClassId::Subnet, "/sns/a").with_parent("/sns"));
        m.put(MoObject::new(ClassId::EpGroup, "/sns/zz").with_parent("/sns"));
        m.commit();

        let subnets = store.resolve_children(&Uri::new("/sns"), ClassId::Subnet);
        let uris: Vec<&str> = subnets.iter().map(|o| o.uri().as_str()).collect();
        assert_eq!(uris, vec!["/sns/a", "/sns/b"]);
    }

    #[test]
    fn test_listener_notified_on_put_and_remove() {
        let store = Modb::new();
        let recorder = Recorder::new();
        store.register_listener(ClassId::Subnet, recorder.clone());

        let mut m = store.mutator();
        m.put(MoObject::new(ClassId::Subnet, "/s1"));
        m.put(MoObject::new(ClassId::EpGroup, "/g1"));
        m.commit();
        assert_eq!(recorder.take(), vec![(ClassId::Subnet, Uri::new("/s1"))]);

        let mut m = store.mutator();
        m.remove("/s1");
        m.commit();
        assert_eq!(recorder.take(), vec![(ClassId::Subnet, Uri::new("/s1"))]);
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let store = Modb::new();
        let recorder = Recorder::new();
        store.register_listener(ClassId::Subnet, recorder.clone());
        store.unregister_listener(ClassId::Subnet, &(recorder.clone() as Arc<dyn ModbListener>));

        let mut m = store.mutator();
        m.put(MoObject::new(ClassId::Subnet, "/s1"));
        m.commit();
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_subtree_removal() {
        let store = Modb::new();
        let mut m = store.mutator();
        m.put(MoObject::new(ClassId::Contract, "/c1"));
        m.put(MoObject::new(ClassId::Subject, "/c1/s1").with_parent("/c1"));
        m.put(MoObject::new(ClassId::Rule, "/c1/s1/r1").with_parent("/c1/s1"));
        m.commit();

        let mut m = store.mutator();
        m.remove("/c1");
        m.commit();

        assert!(store.resolve(&Uri::new("/c1")).is_none());
        assert!(store.resolve(&Uri::new("/c1/s1")).is_none());
        assert!(store.resolve(&Uri::new("/c1/s1/r1")).is_none());
    }

    #[test]
    fn test_replacement_keeps_reference_lists_fresh() {
        let store = Modb::new();
        let mut m = store.mutator();
        m.put(
            MoObject::new(ClassId::EpGroup, "/g1")
                .with_ref(prop::PROV_CONTRACT, Reference::new(ClassId::Contract, "/c1")),
        );
        m.commit();

        let mut m = store.mutator();
        m.put(MoObject::new(ClassId::EpGroup, "/g1"));
        m.commit();

        let obj = store.resolve(&Uri::new("/g1")).unwrap();
        assert!(obj.refs(prop::PROV_CONTRACT).is_empty());
    }
}
