//! Managed-object representation.

use crate::ClassId;
use netpol_types::Uri;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scalar attribute value.
///
/// The model carries only unsigned integers and strings; addresses and
/// MACs travel as strings and are parsed at the point of use, where a
/// malformed value can be skipped without poisoning the rest of the
/// object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Unsigned(u64),
    Str(String),
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        AttrValue::Unsigned(v)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Unsigned(v as u64)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

/// A typed reference to another managed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub class_id: ClassId,
    pub uri: Uri,
}

impl Reference {
    pub fn new(class_id: ClassId, uri: impl Into<Uri>) -> Self {
        Reference {
            class_id,
            uri: uri.into(),
        }
    }
}

/// A managed object: class, URI, optional parent link, scalar attributes,
/// and named reference lists.
///
/// Objects are immutable once committed to the store; consumers hold
/// `Arc<MoObject>` handles and compare them by content. A change is a
/// whole-object replacement through a [`crate::Mutator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoObject {
    class_id: ClassId,
    uri: Uri,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<Uri>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attrs: BTreeMap<String, AttrValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    refs: BTreeMap<String, Vec<Reference>>,
}

impl MoObject {
    /// Creates a new object of the given class at the given URI.
    pub fn new(class_id: ClassId, uri: impl Into<Uri>) -> Self {
        MoObject {
            class_id,
            uri: uri.into(),
            parent: None,
            attrs: BTreeMap::new(),
            refs: BTreeMap::new(),
        }
    }

    /// Links this object under a parent in the MO tree.
    pub fn with_parent(mut self, parent: impl Into<Uri>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Sets a scalar attribute.
    pub fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    /// Appends a reference under the given name.
    pub fn with_ref(mut self, name: &str, reference: Reference) -> Self {
        self.refs.entry(name.to_string()).or_default().push(reference);
        self
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn parent(&self) -> Option<&Uri> {
        self.parent.as_ref()
    }

    /// Returns an unsigned attribute, if present and of integer type.
    pub fn attr_u64(&self, name: &str) -> Option<u64> {
        match self.attrs.get(name) {
            Some(AttrValue::Unsigned(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a string attribute, if present and of string type.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(AttrValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the reference list under the given name (empty if absent).
    pub fn refs(&self, name: &str) -> &[Reference] {
        self.refs.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the first reference under the given name.
    pub fn ref_one(&self, name: &str) -> Option<&Reference> {
        self.refs(name).first()
    }

    /// Returns the target URI of the first reference under the given name.
    pub fn ref_uri(&self, name: &str) -> Option<&Uri> {
        self.ref_one(name).map(|r| &r.uri)
    }
}
