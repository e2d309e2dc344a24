//! Load-time orchestration: resolve network groups, compile rules, add
//! configuration-level checks, and gate whether the process may serve.

use crate::access::compiler;
use crate::access::errors::{error_count, has_errors, Diagnostic};
use crate::access::networks::NetworkGroupResolver;
use crate::access::types::{AccessControlSettings, Policy};
use crate::access::AccessControl;

/// Validate and compile the whole access-control configuration.
///
/// Every problem found is returned; nothing short-circuits. The compiled
/// state is produced only when zero error-level diagnostics exist, so a
/// caller holding `Some(AccessControl)` knows the configuration is fully
/// valid (possibly with warnings).
pub fn validate(settings: &AccessControlSettings) -> (Option<AccessControl>, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();

    let (resolver, mut group_diags) = NetworkGroupResolver::from_settings(&settings.networks);
    diagnostics.append(&mut group_diags);

    let default_policy = Policy::parse(&settings.default_policy);
    if default_policy.is_none() {
        diagnostics.push(Diagnostic::error(
            None,
            format!("default policy '{}' is invalid", settings.default_policy),
        ));
    }

    let (rules, mut rule_diags) = compiler::compile(&settings.rules, &resolver);
    diagnostics.append(&mut rule_diags);

    if settings.rules.is_empty() {
        match default_policy {
            // An empty rule set with a deny default locks everyone out; with
            // a bypass default it exposes everything. Either is almost
            // certainly a misconfiguration.
            Some(Policy::Deny) | Some(Policy::Bypass) => diagnostics.push(Diagnostic::error(
                None,
                format!(
                    "no rules are defined and the default policy '{}' would apply to all traffic",
                    settings.default_policy
                ),
            )),
            Some(_) => diagnostics.push(Diagnostic::warning(
                None,
                format!(
                    "no rules are defined; the default policy '{}' applies to all traffic",
                    settings.default_policy
                ),
            )),
            None => {}
        }
    }

    // Exact duplicates are harmless (first match wins) but usually indicate
    // a copy-paste mistake.
    for (index, rule) in settings.rules.iter().enumerate().skip(1) {
        if let Some(earlier) = settings.rules[..index].iter().position(|r| r == rule) {
            diagnostics.push(Diagnostic::warning(
                Some(index + 1),
                format!("rule {} duplicates rule {}", index + 1, earlier + 1),
            ));
        }
    }

    if has_errors(&diagnostics) {
        return (None, diagnostics);
    }

    let acl = AccessControl {
        // Checked above; an invalid default policy is an error-level
        // diagnostic and we have already returned.
        default_policy: default_policy.unwrap_or(Policy::Deny),
        rules,
    };

    tracing::info!(
        rules = acl.rules.len(),
        network_groups = settings.networks.len(),
        default_policy = %acl.default_policy,
        warnings = diagnostics.len(),
        "Compiled access control configuration"
    );

    (Some(acl), diagnostics)
}

/// Number of error-level diagnostics, for the startup refusal message.
pub fn fatal_errors(diagnostics: &[Diagnostic]) -> usize {
    error_count(diagnostics)
}
