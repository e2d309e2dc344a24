//! Turns authored rules into immutable [`CompiledRule`] values.
//!
//! Compilation never stops at the first problem: every rule is checked
//! independently and every violation is reported, tagged with the rule's
//! 1-based authored position. Rules with any error are excluded from the
//! compiled output.

use regex::Regex;

use crate::access::errors::{Diagnostic, Severity};
use crate::access::networks::{parse_network, NetworkGroupResolver};
use crate::access::types::{
    CompiledQueryCondition, CompiledRule, DomainPattern, Policy, QueryOperator, RawRule,
    SubjectCondition,
};

/// Reserved capture-group name correlating a domain match with the username.
pub const USER_CAPTURE: &str = "User";
/// Reserved capture-group name correlating a domain match with a group.
pub const GROUP_CAPTURE: &str = "Group";

const VALID_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "TRACE", "CONNECT", "OPTIONS",
];

/// Compile every rule, expanding network-group references via `resolver`.
/// Returns the compiled rules (invalid ones omitted) together with all
/// accumulated diagnostics.
pub fn compile(
    raw: &[RawRule],
    resolver: &NetworkGroupResolver,
) -> (Vec<CompiledRule>, Vec<Diagnostic>) {
    let mut compiled = Vec::new();
    let mut diagnostics = Vec::new();

    for (index, rule) in raw.iter().enumerate() {
        let position = index + 1;
        if let Some(c) = compile_rule(rule, position, resolver, &mut diagnostics) {
            compiled.push(c);
        }
    }

    (compiled, diagnostics)
}

/// Compile one rule, appending every violation found to `diagnostics`.
/// Returns `None` if any error-level diagnostic was produced for this rule.
fn compile_rule(
    rule: &RawRule,
    position: usize,
    resolver: &NetworkGroupResolver,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<CompiledRule> {
    let errors_before = count_errors(diagnostics);

    if rule.domains.is_empty() && rule.domains_regex.is_empty() {
        diagnostics.push(Diagnostic::error(
            Some(position),
            format!("rule {position} specifies no domains"),
        ));
    }

    let policy = Policy::parse(&rule.policy);
    if policy.is_none() {
        diagnostics.push(Diagnostic::error(
            Some(position),
            format!("rule {position} has invalid policy '{}'", rule.policy),
        ));
    }

    let domains: Vec<String> = rule.domains.iter().map(|d| d.to_ascii_lowercase()).collect();

    let mut domains_regex = Vec::new();
    for source in &rule.domains_regex {
        match Regex::new(source) {
            Ok(pattern) => {
                let captures_user = pattern.capture_names().flatten().any(|n| n == USER_CAPTURE);
                let captures_group = pattern.capture_names().flatten().any(|n| n == GROUP_CAPTURE);
                domains_regex.push(DomainPattern {
                    pattern,
                    captures_user,
                    captures_group,
                });
            }
            Err(e) => diagnostics.push(Diagnostic::error(
                Some(position),
                format!("rule {position} domain regex '{source}' is invalid: {e}"),
            )),
        }
    }

    let mut networks = Vec::new();
    for entry in &rule.networks {
        if let Some(net) = parse_network(entry) {
            networks.push(net);
        } else if let Some(members) = resolver.resolve(entry) {
            // Group expansion happens exactly once, here. The compiled rule
            // owns its own copy of the CIDR list.
            networks.extend_from_slice(members);
        } else {
            diagnostics.push(Diagnostic::error(
                Some(position),
                format!("rule {position} network '{entry}' is not a valid network or network group"),
            ));
        }
    }

    let mut subjects = Vec::new();
    for conjunction in &rule.subjects {
        let mut conditions = Vec::new();
        for element in conjunction {
            if element.is_empty() {
                conditions.push(SubjectCondition::Unrestricted);
            } else if let Some(user) = element.strip_prefix("user:") {
                conditions.push(SubjectCondition::User(user.to_string()));
            } else if let Some(group) = element.strip_prefix("group:") {
                conditions.push(SubjectCondition::Group(group.to_string()));
            } else {
                diagnostics.push(Diagnostic::error(
                    Some(position),
                    format!(
                        "rule {position} subject '{element}' must start with 'user:' or 'group:'"
                    ),
                ));
            }
        }
        subjects.push(conditions);
    }

    let mut resources = Vec::new();
    for source in &rule.resources {
        match Regex::new(source) {
            Ok(pattern) => resources.push(pattern),
            Err(e) => diagnostics.push(Diagnostic::error(
                Some(position),
                format!("rule {position} resource regex '{source}' is invalid: {e}"),
            )),
        }
    }

    let mut methods = Vec::new();
    for method in &rule.methods {
        let upper = method.to_ascii_uppercase();
        if VALID_METHODS.contains(&upper.as_str()) {
            methods.push(upper);
        } else {
            diagnostics.push(Diagnostic::error(
                Some(position),
                format!("rule {position} method '{method}' is invalid"),
            ));
        }
    }

    let mut query = Vec::new();
    for conjunction in &rule.query {
        let mut conditions = Vec::new();
        for cond in conjunction {
            let pattern = match cond.operator {
                QueryOperator::Pattern | QueryOperator::NotPattern => {
                    match Regex::new(&cond.value) {
                        Ok(pattern) => Some(pattern),
                        Err(e) => {
                            diagnostics.push(Diagnostic::error(
                                Some(position),
                                format!(
                                    "rule {position} query pattern '{}' is invalid: {e}",
                                    cond.value
                                ),
                            ));
                            None
                        }
                    }
                }
                _ => None,
            };
            conditions.push(CompiledQueryCondition {
                key: cond.key.clone(),
                operator: cond.operator,
                value: cond.value.clone(),
                pattern,
            });
        }
        query.push(conditions);
    }

    // Bypass is defined as "no identity check occurs". A bypass rule that
    // restricts by subject, or whose domain match depends on identity-derived
    // tokens, is a logic contradiction and a hard error.
    if policy == Some(Policy::Bypass) {
        if !rule.subjects.is_empty() {
            diagnostics.push(Diagnostic::error(
                Some(position),
                format!(
                    "rule {position} policy 'bypass' is invalid when subjects are configured on the same rule"
                ),
            ));
        }
        if domains_regex.iter().any(DomainPattern::has_identity_captures) {
            diagnostics.push(Diagnostic::error(
                Some(position),
                format!(
                    "rule {position} policy 'bypass' is invalid when a domain regex contains the identity subexpressions '{USER_CAPTURE}' or '{GROUP_CAPTURE}'"
                ),
            ));
        }
    }

    if count_errors(diagnostics) > errors_before {
        return None;
    }

    Some(CompiledRule {
        position,
        policy: policy?,
        domains,
        domains_regex,
        subjects,
        networks,
        resources,
        methods,
        query,
    })
}

fn count_errors(diagnostics: &[Diagnostic]) -> usize {
    diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::types::{NetworkGroupSettings, RawQueryCondition};

    fn compile_one(rule: RawRule) -> (Vec<CompiledRule>, Vec<Diagnostic>) {
        let (resolver, diags) = NetworkGroupResolver::from_settings(&[]);
        assert!(diags.is_empty());
        compile(&[rule], &resolver)
    }

    fn basic_rule() -> RawRule {
        RawRule {
            domains: vec!["example.com".into()],
            policy: "two_factor".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_rule_compiles() {
        let (compiled, diags) = compile_one(basic_rule());
        assert!(diags.is_empty());
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].policy, Policy::TwoFactor);
        assert_eq!(compiled[0].position, 1);
    }

    #[test]
    fn test_rule_without_domains_rejected() {
        let (compiled, diags) = compile_one(RawRule {
            policy: "deny".into(),
            ..Default::default()
        });
        assert!(compiled.is_empty());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "rule 1 specifies no domains");
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let (compiled, diags) = compile_one(RawRule {
            domains: vec!["example.com".into()],
            policy: "three_factor".into(),
            ..Default::default()
        });
        assert!(compiled.is_empty());
        assert_eq!(diags[0].message, "rule 1 has invalid policy 'three_factor'");
    }

    #[test]
    fn test_invalid_network_rejected() {
        let mut rule = basic_rule();
        rule.networks = vec!["nowhere".into()];
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        assert_eq!(
            diags[0].message,
            "rule 1 network 'nowhere' is not a valid network or network group"
        );
    }

    #[test]
    fn test_network_group_expanded_at_compile_time() {
        let (resolver, _) = NetworkGroupResolver::from_settings(&[NetworkGroupSettings {
            name: "internal".into(),
            networks: vec!["10.0.0.0/8".into(), "172.16.0.0/12".into()],
        }]);
        let mut rule = basic_rule();
        rule.networks = vec!["internal".into(), "192.0.2.1".into()];

        let (compiled, diags) = compile(&[rule], &resolver);
        assert!(diags.is_empty());
        assert_eq!(compiled[0].networks.len(), 3);
    }

    #[test]
    fn test_subject_prefix_validated() {
        let mut rule = basic_rule();
        rule.subjects = vec![vec!["admin:bob".into()]];
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        assert_eq!(
            diags[0].message,
            "rule 1 subject 'admin:bob' must start with 'user:' or 'group:'"
        );
    }

    #[test]
    fn test_empty_subject_element_permitted() {
        let mut rule = basic_rule();
        rule.subjects = vec![vec!["".into(), "group:dev".into()]];
        let (compiled, diags) = compile_one(rule);
        assert!(diags.is_empty());
        assert_eq!(
            compiled[0].subjects[0],
            vec![
                SubjectCondition::Unrestricted,
                SubjectCondition::Group("dev".into())
            ]
        );
    }

    #[test]
    fn test_subject_prefix_case_sensitive() {
        let mut rule = basic_rule();
        rule.subjects = vec![vec!["User:bob".into()]];
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        assert!(diags[0].message.contains("must start with"));
    }

    #[test]
    fn test_methods_normalized_uppercase() {
        let mut rule = basic_rule();
        rule.methods = vec!["get".into(), "Post".into()];
        let (compiled, diags) = compile_one(rule);
        assert!(diags.is_empty());
        assert_eq!(compiled[0].methods, vec!["GET", "POST"]);
    }

    #[test]
    fn test_invalid_method_rejected() {
        let mut rule = basic_rule();
        rule.methods = vec!["FETCH".into()];
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        assert_eq!(diags[0].message, "rule 1 method 'FETCH' is invalid");
    }

    #[test]
    fn test_invalid_resource_regex_reports_engine_error() {
        let mut rule = basic_rule();
        rule.resources = vec!["([unclosed".into()];
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        assert!(diags[0].message.starts_with("rule 1 resource regex '([unclosed' is invalid:"));
    }

    #[test]
    fn test_invalid_domain_regex_rejected() {
        let rule = RawRule {
            domains_regex: vec!["(?P<User".into()],
            policy: "one_factor".into(),
            ..Default::default()
        };
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        assert!(diags[0].message.contains("domain regex"));
    }

    #[test]
    fn test_identity_captures_extracted() {
        let rule = RawRule {
            domains_regex: vec![r"^(?P<User>[a-z]+)\.apps\.example\.com$".into()],
            policy: "one_factor".into(),
            ..Default::default()
        };
        let (compiled, diags) = compile_one(rule);
        assert!(diags.is_empty());
        assert!(compiled[0].domains_regex[0].captures_user);
        assert!(!compiled[0].domains_regex[0].captures_group);
    }

    #[test]
    fn test_bypass_with_subjects_rejected() {
        let mut rule = basic_rule();
        rule.policy = "bypass".into();
        rule.subjects = vec![vec!["user:bob".into()]];
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        assert!(diags
            .iter()
            .any(|d| d.message.contains("'bypass' is invalid when subjects are configured")));
    }

    #[test]
    fn test_bypass_with_identity_regex_rejected() {
        let rule = RawRule {
            domains_regex: vec![r"^(?P<Group>[a-z]+)\.example\.com$".into()],
            policy: "bypass".into(),
            ..Default::default()
        };
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        assert!(diags
            .iter()
            .any(|d| d.message.contains("identity subexpressions")));
    }

    #[test]
    fn test_bypass_with_plain_regex_allowed() {
        let rule = RawRule {
            domains_regex: vec![r"^static\.example\.com$".into()],
            policy: "bypass".into(),
            ..Default::default()
        };
        let (compiled, diags) = compile_one(rule);
        assert!(diags.is_empty());
        assert_eq!(compiled.len(), 1);
    }

    #[test]
    fn test_invalid_query_pattern_rejected() {
        let mut rule = basic_rule();
        rule.query = vec![vec![RawQueryCondition {
            key: "token".into(),
            operator: QueryOperator::Pattern,
            value: "([bad".into(),
        }]];
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        assert!(diags[0].message.contains("query pattern"));
    }

    #[test]
    fn test_positions_are_authored_order() {
        let invalid = RawRule {
            policy: "deny".into(),
            ..Default::default()
        };
        let valid = basic_rule();
        let (resolver, _) = NetworkGroupResolver::from_settings(&[]);
        let (compiled, diags) = compile(&[invalid, valid], &resolver);

        // Rule 1 is invalid; rule 2 survives but keeps its authored position.
        assert_eq!(diags[0].message, "rule 1 specifies no domains");
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].position, 2);
    }

    #[test]
    fn test_multiple_violations_all_reported() {
        let rule = RawRule {
            policy: "nope".into(),
            networks: vec!["bad".into()],
            methods: vec!["FETCH".into()],
            subjects: vec![vec!["x".into()]],
            ..Default::default()
        };
        let (compiled, diags) = compile_one(rule);
        assert!(compiled.is_empty());
        // no domains + invalid policy + bad network + bad method + bad subject
        assert_eq!(diags.len(), 5);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let rules = vec![basic_rule(), {
            let mut r = basic_rule();
            r.domains_regex = vec![r"^(?P<User>\w+)\.example\.com$".into()];
            r
        }];
        let (resolver, _) = NetworkGroupResolver::from_settings(&[]);
        let (a, da) = compile(&rules, &resolver);
        let (b, db) = compile(&rules, &resolver);
        assert_eq!(da, db);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.position, y.position);
            assert_eq!(x.policy, y.policy);
            assert_eq!(x.domains, y.domains);
            assert_eq!(x.methods, y.methods);
        }
    }
}
