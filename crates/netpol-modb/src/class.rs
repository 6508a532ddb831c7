//! Policy model class identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the class of a managed object.
///
/// The listener registration surface of [`crate::Modb`] is keyed by class:
/// a listener registered for `ClassId::EpGroup` is invoked for every
/// committed change to an endpoint group.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ClassId {
    PlatformConfig,
    DomainConfig,
    EpGroup,
    BridgeDomain,
    FloodDomain,
    FloodContext,
    RoutingDomain,
    Subnets,
    Subnet,
    L3ExternalDomain,
    L3ExternalNetwork,
    InstContext,
    EndpointRetention,
    Contract,
    Subject,
    Rule,
    L24Classifier,
    AllowDenyAction,
    RedirectAction,
    RedirectDestGroup,
    RedirectDest,
    SecGroup,
    SecGroupSubject,
    SecGroupRule,
}

impl ClassId {
    /// Returns the class name as used in serialized model snapshots.
    pub fn name(&self) -> &'static str {
        match self {
            ClassId::PlatformConfig => "platform-config",
            ClassId::DomainConfig => "domain-config",
            ClassId::EpGroup => "ep-group",
            ClassId::BridgeDomain => "bridge-domain",
            ClassId::FloodDomain => "flood-domain",
            ClassId::FloodContext => "flood-context",
            ClassId::RoutingDomain => "routing-domain",
            ClassId::Subnets => "subnets",
            ClassId::Subnet => "subnet",
            ClassId::L3ExternalDomain => "l3-external-domain",
            ClassId::L3ExternalNetwork => "l3-external-network",
            ClassId::InstContext => "inst-context",
            ClassId::EndpointRetention => "endpoint-retention",
            ClassId::Contract => "contract",
            ClassId::Subject => "subject",
            ClassId::Rule => "rule",
            ClassId::L24Classifier => "l24-classifier",
            ClassId::AllowDenyAction => "allow-deny-action",
            ClassId::RedirectAction => "redirect-action",
            ClassId::RedirectDestGroup => "redirect-dest-group",
            ClassId::RedirectDest => "redirect-dest",
            ClassId::SecGroup => "sec-group",
            ClassId::SecGroupSubject => "sec-group-subject",
            ClassId::SecGroupRule => "sec-group-rule",
        }
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&ClassId::EpGroup).unwrap();
        assert_eq!(json, "\"ep-group\"");
        let back: ClassId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ClassId::EpGroup);
    }

    #[test]
    fn test_name_matches_serde() {
        for class in [
            ClassId::BridgeDomain,
            ClassId::L3ExternalNetwork,
            ClassId::SecGroupRule,
        ] {
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json.trim_matches('"'), class.name());
        }
    }
}
