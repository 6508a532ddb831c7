//! Compiled policy rule and redirect destination value types.

use netpol_modb::{constants, MoObject};
use netpol_types::{IpAddress, IpPrefix, MacAddress, Uri};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Highest priority assigned to a compiled rule.
pub const MAX_POLICY_RULE_PRIORITY: u16 = 8192;

/// Traffic direction of a compiled rule, relative to the provider group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Bidirectional,
    In,
    Out,
}

impl Direction {
    /// Maps a model direction value; unknown values yield `None`.
    pub fn from_value(value: u64) -> Option<Direction> {
        match value {
            constants::DIRECTION_BIDIRECTIONAL => Some(Direction::Bidirectional),
            constants::DIRECTION_IN => Some(Direction::In),
            constants::DIRECTION_OUT => Some(Direction::Out),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bidirectional => "bi",
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// One compiled classifier rule of a contract or security group.
///
/// Value type compared by content; the classifier handle compares by
/// object content, so an unchanged recompile produces an equal rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    direction: Direction,
    priority: u16,
    classifier: Arc<MoObject>,
    allow: bool,
    remote_subnets: BTreeSet<IpPrefix>,
    redirect: bool,
    redirect_dest_grp: Option<Uri>,
}

impl PolicyRule {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        direction: Direction,
        priority: u16,
        classifier: Arc<MoObject>,
        allow: bool,
        remote_subnets: BTreeSet<IpPrefix>,
        redirect: bool,
        redirect_dest_grp: Option<Uri>,
    ) -> Self {
        PolicyRule {
            direction,
            priority,
            classifier,
            allow,
            remote_subnets,
            redirect,
            redirect_dest_grp,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn classifier(&self) -> &Arc<MoObject> {
        &self.classifier
    }

    pub fn allow(&self) -> bool {
        self.allow
    }

    pub fn remote_subnets(&self) -> &BTreeSet<IpPrefix> {
        &self.remote_subnets
    }

    pub fn redirect(&self) -> bool {
        self.redirect
    }

    pub fn redirect_dest_grp(&self) -> Option<&Uri> {
        self.redirect_dest_grp.as_ref()
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PolicyRule[classifier={},allow={},redirect={},prio={},direction={}",
            self.classifier.uri(),
            self.allow,
            self.redirect,
            self.priority,
            self.direction.as_str()
        )?;
        if !self.remote_subnets.is_empty() {
            let subnets: Vec<String> =
                self.remote_subnets.iter().map(|s| s.to_string()).collect();
            write!(f, ",remoteSubnets=[{}]", subnets.join(","))?;
        }
        if let Some(group) = &self.redirect_dest_grp {
            write!(f, ",redirectGroup={group}")?;
        }
        f.write_str("]")
    }
}

/// A fully resolved redirect next-hop: IP, MAC, and the bridge and
/// routing domains (with instance contexts) it forwards through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRedirectDest {
    dest: Arc<MoObject>,
    ip: IpAddress,
    mac: MacAddress,
    routing_domain: Arc<MoObject>,
    bridge_domain: Arc<MoObject>,
    rd_inst_context: Arc<MoObject>,
    bd_inst_context: Arc<MoObject>,
}

impl PolicyRedirectDest {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dest: Arc<MoObject>,
        ip: IpAddress,
        mac: MacAddress,
        routing_domain: Arc<MoObject>,
        bridge_domain: Arc<MoObject>,
        rd_inst_context: Arc<MoObject>,
        bd_inst_context: Arc<MoObject>,
    ) -> Self {
        PolicyRedirectDest {
            dest,
            ip,
            mac,
            routing_domain,
            bridge_domain,
            rd_inst_context,
            bd_inst_context,
        }
    }

    pub fn dest(&self) -> &Arc<MoObject> {
        &self.dest
    }

    pub fn ip(&self) -> &IpAddress {
        &self.ip
    }

    pub fn mac(&self) -> &MacAddress {
        &self.mac
    }

    pub fn routing_domain(&self) -> &Arc<MoObject> {
        &self.routing_domain
    }

    pub fn bridge_domain(&self) -> &Arc<MoObject> {
        &self.bridge_domain
    }

    pub fn rd_inst_context(&self) -> &Arc<MoObject> {
        &self.rd_inst_context
    }

    pub fn bd_inst_context(&self) -> &Arc<MoObject> {
        &self.bd_inst_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_modb::ClassId;
    use pretty_assertions::assert_eq;

    fn classifier(uri: &str) -> Arc<MoObject> {
        Arc::new(MoObject::new(ClassId::L24Classifier, uri))
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(Direction::from_value(0), Some(Direction::Bidirectional));
        assert_eq!(Direction::from_value(1), Some(Direction::In));
        assert_eq!(Direction::from_value(2), Some(Direction::Out));
        assert_eq!(Direction::from_value(99), None);
    }

    #[test]
    fn test_rule_content_equality() {
        let a = PolicyRule::new(
            Direction::In,
            8192,
            classifier("/cls1"),
            true,
            BTreeSet::new(),
            false,
            None,
        );
        let b = PolicyRule::new(
            Direction::In,
            8192,
            classifier("/cls1"),
            true,
            BTreeSet::new(),
            false,
            None,
        );
        assert_eq!(a, b);

        let c = PolicyRule::new(
            Direction::In,
            8192,
            classifier("/cls2"),
            true,
            BTreeSet::new(),
            false,
            None,
        );
        assert_ne!(a, c);
    }

    #[test]
    fn test_rule_display() {
        let mut subnets = BTreeSet::new();
        subnets.insert("10.0.0.0/8".parse().unwrap());
        let rule = PolicyRule::new(
            Direction::Out,
            8064,
            classifier("/cls1"),
            false,
            subnets,
            true,
            Some(Uri::new("/rg1")),
        );
        assert_eq!(
            rule.to_string(),
            "PolicyRule[classifier=/cls1,allow=false,redirect=true,prio=8064,\
             direction=out,remoteSubnets=[10.0.0.0/8],redirectGroup=/rg1]"
        );
    }
}
