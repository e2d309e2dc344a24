//! First-match-wins policy evaluation over a compiled rule set.
//!
//! Pure functions of `(compiled state, request)`: no I/O, no locks, safe to
//! call from any number of tasks concurrently. Evaluation never fails; a
//! request no rule matches receives the configured default policy.

use std::collections::HashMap;

use crate::access::compiler::{GROUP_CAPTURE, USER_CAPTURE};
use crate::access::types::{
    CompiledQueryCondition, CompiledRule, Policy, QueryOperator, RequestDescriptor,
    SubjectCondition,
};
use crate::access::AccessControl;

/// The outcome of one evaluation: the required policy and, when a rule
/// matched, its 1-based authored position.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub policy: Policy,
    pub rule: Option<usize>,
}

/// Decide the required authentication policy for `req`.
pub fn evaluate(acl: &AccessControl, req: &RequestDescriptor) -> Policy {
    decide(acl, req).policy
}

/// Like [`evaluate`], but also reports which rule matched.
pub fn decide(acl: &AccessControl, req: &RequestDescriptor) -> Decision {
    for rule in &acl.rules {
        if let Some(policy) = match_rule(rule, req) {
            return Decision {
                policy,
                rule: Some(rule.position),
            };
        }
    }
    Decision {
        policy: acl.default_policy,
        rule: None,
    }
}

/// Identity tokens captured by a domain regex, to be correlated with the
/// authenticated subject.
#[derive(Debug, Default)]
struct IdentityCaptures {
    user: Option<String>,
    group: Option<String>,
}

fn match_rule(rule: &CompiledRule, req: &RequestDescriptor) -> Option<Policy> {
    let candidates = domain_candidates(rule, req);
    if candidates.is_empty() {
        return None;
    }
    if !match_network(rule, req) {
        return None;
    }
    // Each matching domain entry is an independent candidate: an identity
    // correlation failure on one pattern must not veto a rule whose domain
    // is also matched by another entry.
    if !candidates
        .iter()
        .any(|captures| match_subject(rule, req, captures))
    {
        return None;
    }
    if !match_resource(rule, req) {
        return None;
    }
    if !match_method(rule, req) {
        return None;
    }
    if !match_query(rule, req) {
        return None;
    }
    Some(rule.policy)
}

/// Collect the identity captures of every domain entry that matches. The
/// domain criterion holds if the result is non-empty.
///
/// Exact and suffix matching is dot-boundary inclusive: a rule domain
/// `example.com` matches `example.com` and `other.example.com`, never
/// `notexample.com`.
fn domain_candidates(rule: &CompiledRule, req: &RequestDescriptor) -> Vec<IdentityCaptures> {
    let domain = req.domain.to_ascii_lowercase();
    let mut candidates = Vec::new();

    if rule
        .domains
        .iter()
        .any(|entry| domain == *entry || is_dot_suffix(&domain, entry))
    {
        candidates.push(IdentityCaptures::default());
    }

    for pattern in &rule.domains_regex {
        if let Some(caps) = pattern.pattern.captures(&domain) {
            candidates.push(IdentityCaptures {
                user: caps.name(USER_CAPTURE).map(|m| m.as_str().to_string()),
                group: caps.name(GROUP_CAPTURE).map(|m| m.as_str().to_string()),
            });
        }
    }

    candidates
}

fn is_dot_suffix(domain: &str, suffix: &str) -> bool {
    domain.len() > suffix.len()
        && domain.ends_with(suffix)
        && domain.as_bytes()[domain.len() - suffix.len() - 1] == b'.'
}

fn match_network(rule: &CompiledRule, req: &RequestDescriptor) -> bool {
    rule.networks.is_empty() || rule.networks.iter().any(|net| net.contains(req.source_ip))
}

fn match_subject(
    rule: &CompiledRule,
    req: &RequestDescriptor,
    captures: &IdentityCaptures,
) -> bool {
    // Domain-derived identity correlation: the claimed subdomain token must
    // actually belong to the authenticated subject.
    if let Some(user) = &captures.user {
        if req.subject.is_anonymous() || req.subject.username != *user {
            return false;
        }
    }
    if let Some(group) = &captures.group {
        if !req.subject.groups.iter().any(|g| g == group) {
            return false;
        }
    }

    if rule.subjects.is_empty() {
        return true;
    }

    rule.subjects.iter().any(|conjunction| {
        conjunction.iter().all(|condition| match condition {
            SubjectCondition::User(user) => {
                !req.subject.is_anonymous() && req.subject.username == *user
            }
            SubjectCondition::Group(group) => {
                !req.subject.is_anonymous() && req.subject.groups.contains(group)
            }
            SubjectCondition::Unrestricted => true,
        })
    })
}

fn match_resource(rule: &CompiledRule, req: &RequestDescriptor) -> bool {
    rule.resources.is_empty() || rule.resources.iter().any(|re| re.is_match(&req.path))
}

fn match_method(rule: &CompiledRule, req: &RequestDescriptor) -> bool {
    if rule.methods.is_empty() {
        return true;
    }
    let method = req.method.to_ascii_uppercase();
    rule.methods.iter().any(|m| *m == method)
}

fn match_query(rule: &CompiledRule, req: &RequestDescriptor) -> bool {
    if rule.query.is_empty() {
        return true;
    }
    rule.query.iter().any(|conjunction| {
        conjunction
            .iter()
            .all(|cond| query_condition_holds(cond, &req.query))
    })
}

fn query_condition_holds(
    cond: &CompiledQueryCondition,
    query: &HashMap<String, Vec<String>>,
) -> bool {
    let first = query.get(&cond.key).and_then(|values| values.first());
    match cond.operator {
        QueryOperator::Present => query.contains_key(&cond.key),
        QueryOperator::Absent => !query.contains_key(&cond.key),
        QueryOperator::Equal => first.is_some_and(|v| *v == cond.value),
        QueryOperator::NotEqual => first.map_or(true, |v| *v != cond.value),
        QueryOperator::Pattern => match (&cond.pattern, first) {
            (Some(re), Some(v)) => re.is_match(v),
            _ => false,
        },
        QueryOperator::NotPattern => match (&cond.pattern, first) {
            (Some(re), Some(v)) => !re.is_match(v),
            (Some(_), None) => true,
            // A missing compiled pattern cannot occur after validation;
            // treated as a non-match rather than a failure.
            (None, _) => false,
        },
    }
}
