use std::collections::HashMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::access::errors::Diagnostic;
use crate::access::types::NetworkGroupSettings;

/// Resolves a named network group to its concrete CIDR members.
///
/// Built once from the declared groups at configuration load; rules consult
/// it during compilation only, never during per-request evaluation.
#[derive(Debug, Default)]
pub struct NetworkGroupResolver {
    groups: HashMap<String, Vec<IpNetwork>>,
}

impl NetworkGroupResolver {
    /// Build the resolver from declared groups, accumulating a diagnostic for
    /// every duplicate name and every member that is not a valid network.
    pub fn from_settings(groups: &[NetworkGroupSettings]) -> (Self, Vec<Diagnostic>) {
        let mut resolver = Self::default();
        let mut diagnostics = Vec::new();

        for group in groups {
            if group.name.is_empty() {
                diagnostics.push(Diagnostic::error(None, "network group with empty name"));
                continue;
            }
            if resolver.groups.contains_key(&group.name) {
                diagnostics.push(Diagnostic::error(
                    None,
                    format!("network group '{}' is declared more than once", group.name),
                ));
                continue;
            }

            let mut members = Vec::new();
            for entry in &group.networks {
                match parse_network(entry) {
                    Some(net) => members.push(net),
                    None => diagnostics.push(Diagnostic::error(
                        None,
                        format!(
                            "network group '{}' entry '{}' is not a valid network",
                            group.name, entry
                        ),
                    )),
                }
            }
            resolver.groups.insert(group.name.clone(), members);
        }

        (resolver, diagnostics)
    }

    pub fn resolve(&self, name: &str) -> Option<&[IpNetwork]> {
        self.groups.get(name).map(Vec::as_slice)
    }
}

/// Parse a CIDR block or a bare IP address. Bare addresses become host
/// networks (/32 for IPv4, /128 for IPv6).
pub fn parse_network(value: &str) -> Option<IpNetwork> {
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(IpNetwork::from(ip));
    }
    value.parse::<IpNetwork>().ok()
}
