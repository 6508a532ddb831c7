//! Rule compilation for contracts and security groups.
//!
//! A contract (or security group) is joined with its subjects, rules,
//! classifiers, and actions into an ordered, priority-stamped
//! [`PolicyRule`] list.

use crate::manager::PolicyManager;
use crate::rule::{Direction, PolicyRule, MAX_POLICY_RULE_PRIORITY};
use crate::state::PolicyState;
use netpol_modb::{prop, ClassId, Modb, MoObject};
use netpol_types::{IpAddress, IpPrefix, Uri};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Priority step between successive rules.
const RULE_PRIORITY_STEP: u16 = 128;
/// Per-rule classifier offset saturates here.
const MAX_CLASSIFIER_OFFSET: u16 = 127;

/// The class triple walked by [`compile_policy_rules`].
#[derive(Clone, Copy)]
pub(crate) struct RuleClasses {
    pub parent: ClassId,
    pub subject: ClassId,
    pub rule: ClassId,
    /// Security-group rules carry remote-subnet predicates.
    pub remote_subnets: bool,
}

pub(crate) const CONTRACT_RULE_CLASSES: RuleClasses = RuleClasses {
    parent: ClassId::Contract,
    subject: ClassId::Subject,
    rule: ClassId::Rule,
    remote_subnets: false,
};

pub(crate) const SEC_GROUP_RULE_CLASSES: RuleClasses = RuleClasses {
    parent: ClassId::SecGroup,
    subject: ClassId::SecGroupSubject,
    rule: ClassId::SecGroupRule,
    remote_subnets: true,
};

/// Collects the subnets referenced by a remote-address target, masking
/// each address by its prefix length.
fn resolve_remote_subnets(framework: &Modb, subnets_uri: &Uri, out: &mut BTreeSet<IpPrefix>) {
    let Some(subnets) = framework.resolve_class(ClassId::Subnets, subnets_uri) else {
        return;
    };
    for subnet in framework.resolve_children(subnets.uri(), ClassId::Subnet) {
        let (Some(addr), Some(len)) = (
            subnet.attr_str(prop::ADDRESS),
            subnet.attr_u64(prop::PREFIX_LEN),
        ) else {
            continue;
        };
        let addr: IpAddress = match addr.parse() {
            Ok(addr) => addr,
            Err(err) => {
                warn!(subnet = %subnet.uri(), %err, "skipping subnet with bad address");
                continue;
            }
        };
        let len = len.min(addr.max_prefix_len() as u64) as u8;
        if let Ok(prefix) = IpPrefix::new(addr.mask(len), len) {
            out.insert(prefix);
        }
    }
}

/// Recompiles the rule list of one contract or security group.
///
/// On success the new list replaces `rules` only when it differs
/// structurally; redirect destination groups referenced by the old and
/// new lists are accumulated for the caller's index bookkeeping.
/// Returns `(updated, not_found)`; when the parent is unresolvable
/// `rules` is left untouched and `not_found` is set.
pub(crate) fn compile_policy_rules(
    framework: &Modb,
    parent_uri: &Uri,
    classes: RuleClasses,
    rules: &mut Vec<PolicyRule>,
    old_redir_grps: &mut BTreeSet<Uri>,
    new_redir_grps: &mut BTreeSet<Uri>,
) -> (bool, bool) {
    if framework.resolve_class(classes.parent, parent_uri).is_none() {
        return (false, true);
    }

    let mut new_rules: Vec<PolicyRule> = Vec::new();
    for subject in framework.resolve_children(parent_uri, classes.subject) {
        let mut model_rules = framework.resolve_children(subject.uri(), classes.rule);
        // stable: equal-order rules keep model order
        model_rules.sort_by_key(|rule| rule.attr_u64(prop::ORDER).unwrap_or(0));

        let mut rule_prio = MAX_POLICY_RULE_PRIORITY;
        for model_rule in model_rules {
            let Some(direction) = model_rule
                .attr_u64(prop::DIRECTION)
                .and_then(Direction::from_value)
            else {
                continue; // ignore rules with no direction
            };

            let mut remote_subnets = BTreeSet::new();
            if classes.remote_subnets {
                for remote in model_rule.refs(prop::REMOTE_ADDRESS) {
                    resolve_remote_subnets(framework, &remote.uri, &mut remote_subnets);
                }
            }

            let mut classifiers: Vec<Arc<MoObject>> = Vec::new();
            for reference in model_rule.refs(prop::CLASSIFIER) {
                if reference.class_id != ClassId::L24Classifier {
                    continue;
                }
                if let Some(classifier) =
                    framework.resolve_class(ClassId::L24Classifier, &reference.uri)
                {
                    classifiers.push(classifier);
                }
            }
            classifiers.sort_by_key(|cls| cls.attr_u64(prop::ORDER).unwrap_or(0));

            let mut rule_allow = true;
            let mut rule_redirect = false;
            let mut min_order = u64::MAX;
            let mut dest_grp_uri: Option<Uri> = None;
            for reference in model_rule.refs(prop::ACTION) {
                match reference.class_id {
                    ClassId::AllowDenyAction => {
                        if let Some(action) =
                            framework.resolve_class(ClassId::AllowDenyAction, &reference.uri)
                        {
                            let order = action.attr_u64(prop::ORDER).unwrap_or(u64::MAX - 1);
                            if order < min_order {
                                min_order = order;
                                rule_allow = action.attr_u64(prop::ALLOW).unwrap_or(0) != 0;
                            }
                        }
                    }
                    ClassId::RedirectAction => {
                        rule_redirect = true;
                        rule_allow = false;
                        let Some(action) =
                            framework.resolve_class(ClassId::RedirectAction, &reference.uri)
                        else {
                            continue;
                        };
                        let Some(group_uri) = action.ref_uri(prop::DEST_GROUP) else {
                            continue;
                        };
                        dest_grp_uri = Some(group_uri.clone());
                        new_redir_grps.insert(group_uri.clone());
                    }
                    _ => {}
                }
            }

            let mut cls_offset: u16 = 0;
            for classifier in &classifiers {
                new_rules.push(PolicyRule::new(
                    direction,
                    rule_prio - cls_offset,
                    classifier.clone(),
                    rule_allow,
                    remote_subnets.clone(),
                    rule_redirect,
                    dest_grp_uri.clone(),
                ));
                if cls_offset < MAX_CLASSIFIER_OFFSET {
                    cls_offset += 1;
                }
            }
            // priorities saturate near the floor
            if rule_prio > RULE_PRIORITY_STEP {
                rule_prio -= RULE_PRIORITY_STEP;
            }
        }
    }

    for rule in rules.iter() {
        if let Some(group_uri) = rule.redirect_dest_grp() {
            old_redir_grps.insert(group_uri.clone());
        }
    }

    let updated = *rules != new_rules;
    if updated {
        *rules = new_rules;
        for rule in rules.iter() {
            debug!(parent = %parent_uri, %rule, "compiled rule");
        }
    }
    (updated, false)
}

impl PolicyManager {
    /// Recompiles one contract's rules and reconciles the redirect-group
    /// back-references its rules contribute.
    pub(crate) fn update_contract_rules(
        &self,
        state: &mut PolicyState,
        uri: &Uri,
    ) -> (bool, bool) {
        let mut old_redir_grps = BTreeSet::new();
        let mut new_redir_grps = BTreeSet::new();
        let contract_state = state.contract_map.entry(uri.clone()).or_default();
        let (updated, not_found) = compile_policy_rules(
            &self.framework,
            uri,
            CONTRACT_RULE_CLASSES,
            &mut contract_state.rules,
            &mut old_redir_grps,
            &mut new_redir_grps,
        );
        for group_uri in &old_redir_grps {
            if let Some(redir_state) = state.redir_grp_map.get_mut(group_uri) {
                redir_state.ctrct_set.remove(uri);
            }
        }
        for group_uri in &new_redir_grps {
            state
                .redir_grp_map
                .entry(group_uri.clone())
                .or_default()
                .ctrct_set
                .insert(uri.clone());
        }
        (updated, not_found)
    }

    /// Recompiles one security group's rules.
    pub(crate) fn update_sec_grp_rules(&self, state: &mut PolicyState, uri: &Uri) -> (bool, bool) {
        let mut old_redir_grps = BTreeSet::new();
        let mut new_redir_grps = BTreeSet::new();
        let rules = state.sec_grp_map.entry(uri.clone()).or_default();
        compile_policy_rules(
            &self.framework,
            uri,
            SEC_GROUP_RULE_CLASSES,
            rules,
            &mut old_redir_grps,
            &mut new_redir_grps,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_modb::{constants, Reference};
    use pretty_assertions::assert_eq;

    fn put(store: &Modb, objects: Vec<MoObject>) {
        let mut mutator = store.mutator();
        for object in objects {
            mutator.put(object);
        }
        mutator.commit();
    }

    fn classifier(uri: &str, order: u64) -> MoObject {
        MoObject::new(ClassId::L24Classifier, uri).with_attr(prop::ORDER, order)
    }

    #[test]
    fn test_two_rules_get_stepped_priorities() {
        let store = Modb::new();
        put(
            &store,
            vec![
                MoObject::new(ClassId::Contract, "/c1"),
                MoObject::new(ClassId::Subject, "/c1/s").with_parent("/c1"),
                MoObject::new(ClassId::Rule, "/c1/s/rA")
                    .with_parent("/c1/s")
                    .with_attr(prop::ORDER, 1u64)
                    .with_attr(prop::DIRECTION, constants::DIRECTION_IN)
                    .with_ref(prop::CLASSIFIER, Reference::new(ClassId::L24Classifier, "/clsX"))
                    .with_ref(prop::ACTION, Reference::new(ClassId::AllowDenyAction, "/allow")),
                MoObject::new(ClassId::Rule, "/c1/s/rB")
                    .with_parent("/c1/s")
                    .with_attr(prop::ORDER, 2u64)
                    .with_attr(prop::DIRECTION, constants::DIRECTION_OUT)
                    .with_ref(prop::CLASSIFIER, Reference::new(ClassId::L24Classifier, "/clsY"))
                    .with_ref(prop::ACTION, Reference::new(ClassId::AllowDenyAction, "/deny")),
                classifier("/clsX", 0),
                classifier("/clsY", 0),
                MoObject::new(ClassId::AllowDenyAction, "/allow").with_attr(prop::ALLOW, 1u64),
                MoObject::new(ClassId::AllowDenyAction, "/deny").with_attr(prop::ALLOW, 0u64),
            ],
        );

        let mut rules = Vec::new();
        let (updated, not_found) = compile_policy_rules(
            &store,
            &Uri::new("/c1"),
            CONTRACT_RULE_CLASSES,
            &mut rules,
            &mut BTreeSet::new(),
            &mut BTreeSet::new(),
        );
        assert!(updated);
        assert!(!not_found);
        assert_eq!(rules.len(), 2);

        assert_eq!(rules[0].priority(), 8192);
        assert_eq!(rules[0].direction(), Direction::In);
        assert!(rules[0].allow());
        assert_eq!(rules[0].classifier().uri(), &Uri::new("/clsX"));

        assert_eq!(rules[1].priority(), 8064);
        assert_eq!(rules[1].direction(), Direction::Out);
        assert!(!rules[1].allow());
        assert_eq!(rules[1].classifier().uri(), &Uri::new("/clsY"));
    }

    #[test]
    fn test_classifier_order_and_offset() {
        let store = Modb::new();
        put(
            &store,
            vec![
                MoObject::new(ClassId::Contract, "/c1"),
                MoObject::new(ClassId::Subject, "/c1/s").with_parent("/c1"),
                MoObject::new(ClassId::Rule, "/c1/s/r")
                    .with_parent("/c1/s")
                    .with_attr(prop::DIRECTION, constants::DIRECTION_IN)
                    .with_ref(prop::CLASSIFIER, Reference::new(ClassId::L24Classifier, "/cls2"))
                    .with_ref(prop::CLASSIFIER, Reference::new(ClassId::L24Classifier, "/cls1")),
                classifier("/cls1", 1),
                classifier("/cls2", 2),
            ],
        );

        let mut rules = Vec::new();
        compile_policy_rules(
            &store,
            &Uri::new("/c1"),
            CONTRACT_RULE_CLASSES,
            &mut rules,
            &mut BTreeSet::new(),
            &mut BTreeSet::new(),
        );
        assert_eq!(rules.len(), 2);
        // sorted by classifier order, priority decreasing by one inside
        // the rule
        assert_eq!(rules[0].classifier().uri(), &Uri::new("/cls1"));
        assert_eq!(rules[0].priority(), 8192);
        assert_eq!(rules[1].classifier().uri(), &Uri::new("/cls2"));
        assert_eq!(rules[1].priority(), 8191);
    }

    #[test]
    fn test_rule_without_direction_is_skipped() {
        let store = Modb::new();
        put(
            &store,
            vec![
                MoObject::new(ClassId::Contract, "/c1"),
                MoObject::new(ClassId::Subject, "/c1/s").with_parent("/c1"),
                MoObject::new(ClassId::Rule, "/c1/s/r")
                    .with_parent("/c1/s")
                    .with_ref(prop::CLASSIFIER, Reference::new(ClassId::L24Classifier, "/cls")),
                classifier("/cls", 0),
            ],
        );

        let mut rules = Vec::new();
        let (updated, _) = compile_policy_rules(
            &store,
            &Uri::new("/c1"),
            CONTRACT_RULE_CLASSES,
            &mut rules,
            &mut BTreeSet::new(),
            &mut BTreeSet::new(),
        );
        assert!(!updated);
        assert!(rules.is_empty());
    }

    #[test]
    fn test_lowest_order_allow_deny_wins() {
        let store = Modb::new();
        put(
            &store,
            vec![
                MoObject::new(ClassId::Contract, "/c1"),
                MoObject::new(ClassId::Subject, "/c1/s").with_parent("/c1"),
                MoObject::new(ClassId::Rule, "/c1/s/r")
                    .with_parent("/c1/s")
                    .with_attr(prop::DIRECTION, constants::DIRECTION_IN)
                    .with_ref(prop::CLASSIFIER, Reference::new(ClassId::L24Classifier, "/cls"))
                    .with_ref(prop::ACTION, Reference::new(ClassId::AllowDenyAction, "/deny"))
                    .with_ref(prop::ACTION, Reference::new(ClassId::AllowDenyAction, "/allow")),
                classifier("/cls", 0),
                MoObject::new(ClassId::AllowDenyAction, "/deny")
                    .with_attr(prop::ORDER, 10u64)
                    .with_attr(prop::ALLOW, 0u64),
                MoObject::new(ClassId::AllowDenyAction, "/allow")
                    .with_attr(prop::ORDER, 5u64)
                    .with_attr(prop::ALLOW, 1u64),
            ],
        );

        let mut rules = Vec::new();
        compile_policy_rules(
            &store,
            &Uri::new("/c1"),
            CONTRACT_RULE_CLASSES,
            &mut rules,
            &mut BTreeSet::new(),
            &mut BTreeSet::new(),
        );
        assert_eq!(rules.len(), 1);
        assert!(rules[0].allow());
    }

    #[test]
    fn test_redirect_action_forces_deny_and_records_group() {
        let store = Modb::new();
        put(
            &store,
            vec![
                MoObject::new(ClassId::Contract, "/c2"),
                MoObject::new(ClassId::Subject, "/c2/s").with_parent("/c2"),
                MoObject::new(ClassId::Rule, "/c2/s/r")
                    .with_parent("/c2/s")
                    .with_attr(prop::DIRECTION, constants::DIRECTION_IN)
                    .with_ref(prop::CLASSIFIER, Reference::new(ClassId::L24Classifier, "/cls"))
                    .with_ref(prop::ACTION, Reference::new(ClassId::RedirectAction, "/redir")),
                classifier("/cls", 0),
                MoObject::new(ClassId::RedirectAction, "/redir").with_ref(
                    prop::DEST_GROUP,
                    Reference::new(ClassId::RedirectDestGroup, "/rg"),
                ),
            ],
        );

        let mut rules = Vec::new();
        let mut new_redir = BTreeSet::new();
        compile_policy_rules(
            &store,
            &Uri::new("/c2"),
            CONTRACT_RULE_CLASSES,
            &mut rules,
            &mut BTreeSet::new(),
            &mut new_redir,
        );
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].allow());
        assert!(rules[0].redirect());
        assert_eq!(rules[0].redirect_dest_grp(), Some(&Uri::new("/rg")));
        assert!(new_redir.contains(&Uri::new("/rg")));
    }

    #[test]
    fn test_sec_group_remote_subnets_are_masked() {
        let store = Modb::new();
        put(
            &store,
            vec![
                MoObject::new(ClassId::SecGroup, "/sg"),
                MoObject::new(ClassId::SecGroupSubject, "/sg/s").with_parent("/sg"),
                MoObject::new(ClassId::SecGroupRule, "/sg/s/r")
                    .with_parent("/sg/s")
                    .with_attr(prop::DIRECTION, constants::DIRECTION_IN)
                    .with_ref(prop::CLASSIFIER, Reference::new(ClassId::L24Classifier, "/cls"))
                    .with_ref(prop::REMOTE_ADDRESS, Reference::new(ClassId::Subnets, "/sns")),
                classifier("/cls", 0),
                MoObject::new(ClassId::Subnets, "/sns"),
                MoObject::new(ClassId::Subnet, "/sns/a")
                    .with_parent("/sns")
                    .with_attr(prop::ADDRESS, "10.1.2.3")
                    .with_attr(prop::PREFIX_LEN, 16u64),
                MoObject::new(ClassId::Subnet, "/sns/bad")
                    .with_parent("/sns")
                    .with_attr(prop::ADDRESS, "not-an-ip")
                    .with_attr(prop::PREFIX_LEN, 24u64),
            ],
        );

        let mut rules = Vec::new();
        compile_policy_rules(
            &store,
            &Uri::new("/sg"),
            SEC_GROUP_RULE_CLASSES,
            &mut rules,
            &mut BTreeSet::new(),
            &mut BTreeSet::new(),
        );
        assert_eq!(rules.len(), 1);
        let subnets: Vec<IpPrefix> = rules[0].remote_subnets().iter().cloned().collect();
        assert_eq!(subnets, vec!["10.1.0.0/16".parse().unwrap()]);
    }

    #[test]
    fn test_missing_parent_reports_not_found() {
        let store = Modb::new();
        let mut rules = vec![];
        let (updated, not_found) = compile_policy_rules(
            &store,
            &Uri::new("/nope"),
            CONTRACT_RULE_CLASSES,
            &mut rules,
            &mut BTreeSet::new(),
            &mut BTreeSet::new(),
        );
        assert!(!updated);
        assert!(not_found);
    }

    #[test]
    fn test_recompile_without_change_is_stable() {
        let store = Modb::new();
        put(
            &store,
            vec![
                MoObject::new(ClassId::Contract, "/c1"),
                MoObject::new(ClassId::Subject, "/c1/s").with_parent("/c1"),
                MoObject::new(ClassId::Rule, "/c1/s/r")
                    .with_parent("/c1/s")
                    .with_attr(prop::DIRECTION, constants::DIRECTION_IN)
                    .with_ref(prop::CLASSIFIER, Reference::new(ClassId::L24Classifier, "/cls")),
                classifier("/cls", 0),
            ],
        );

        let mut rules = Vec::new();
        let (updated, _) = compile_policy_rules(
            &store,
            &Uri::new("/c1"),
            CONTRACT_RULE_CLASSES,
            &mut rules,
            &mut BTreeSet::new(),
            &mut BTreeSet::new(),
        );
        assert!(updated);
        let (updated, _) = compile_policy_rules(
            &store,
            &Uri::new("/c1"),
            CONTRACT_RULE_CLASSES,
            &mut rules,
            &mut BTreeSet::new(),
            &mut BTreeSet::new(),
        );
        assert!(!updated);
    }
}
