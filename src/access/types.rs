use std::collections::HashMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Authentication level required before a request may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Deny,
    Bypass,
    OneFactor,
    TwoFactor,
}

impl Policy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deny" => Some(Self::Deny),
            "bypass" => Some(Self::Bypass),
            "one_factor" => Some(Self::OneFactor),
            "two_factor" => Some(Self::TwoFactor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::Bypass => "bypass",
            Self::OneFactor => "one_factor",
            Self::TwoFactor => "two_factor",
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, reusable list of networks referenced by name from rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NetworkGroupSettings {
    pub name: String,
    #[serde(default)]
    pub networks: Vec<String>,
}

/// One access-control rule exactly as authored in the configuration file.
/// Validation and compilation happen in `compiler`; this struct is plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawRule {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub domains_regex: Vec<String>,
    #[serde(default)]
    pub policy: String,
    /// Disjunction of conjunctions: the outer list is OR'd, the inner AND'd.
    #[serde(default)]
    pub subjects: Vec<Vec<String>>,
    /// Inline CIDRs/IPs or names of declared network groups.
    #[serde(default)]
    pub networks: Vec<String>,
    /// Path patterns (regular expressions).
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    /// Disjunction of conjunctions over query-string parameters.
    #[serde(default)]
    pub query: Vec<Vec<RawQueryCondition>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOperator {
    Equal,
    NotEqual,
    Present,
    Absent,
    Pattern,
    NotPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQueryCondition {
    pub key: String,
    pub operator: QueryOperator,
    #[serde(default)]
    pub value: String,
}

/// Raw access-control section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessControlSettings {
    #[serde(default = "default_policy_name")]
    pub default_policy: String,
    #[serde(default)]
    pub networks: Vec<NetworkGroupSettings>,
    #[serde(default)]
    pub rules: Vec<RawRule>,
}

fn default_policy_name() -> String {
    "deny".to_string()
}

impl Default for AccessControlSettings {
    fn default() -> Self {
        Self {
            default_policy: default_policy_name(),
            networks: Vec::new(),
            rules: Vec::new(),
        }
    }
}

// ---------- Compiled forms ----------

/// A pre-compiled domain regex, annotated with which of the reserved
/// identity capture groups (`User`, `Group`) it declares.
#[derive(Debug, Clone)]
pub struct DomainPattern {
    pub pattern: Regex,
    pub captures_user: bool,
    pub captures_group: bool,
}

impl DomainPattern {
    pub fn has_identity_captures(&self) -> bool {
        self.captures_user || self.captures_group
    }
}

/// One element of a subject conjunction, parsed once at compile time so the
/// evaluator never re-parses `user:`/`group:` prefixes.
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectCondition {
    User(String),
    Group(String),
    /// An empty-string element in the authored conjunction; always matches.
    Unrestricted,
}

#[derive(Debug, Clone)]
pub struct CompiledQueryCondition {
    pub key: String,
    pub operator: QueryOperator,
    pub value: String,
    /// Present only for `Pattern`/`NotPattern`.
    pub pattern: Option<Regex>,
}

/// The validated, immutable form of a rule used at evaluation time.
/// Network groups are already expanded into concrete CIDRs; no name
/// lookup ever happens during a request.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 1-based authored-order position, kept for logging.
    pub position: usize,
    pub policy: Policy,
    /// Exact/suffix domains, lowercased.
    pub domains: Vec<String>,
    pub domains_regex: Vec<DomainPattern>,
    pub subjects: Vec<Vec<SubjectCondition>>,
    pub networks: Vec<IpNetwork>,
    pub resources: Vec<Regex>,
    /// Uppercased method tokens.
    pub methods: Vec<String>,
    pub query: Vec<Vec<CompiledQueryCondition>>,
}

// ---------- Evaluation input ----------

/// The authenticated principal. An anonymous request carries an empty
/// username, which fails every `user:`/`group:` subject condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Subject {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Subject {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

/// Everything the engine needs to know about one inbound request.
/// Built per request by the HTTP layer and discarded after the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub domain: String,
    pub path: String,
    pub method: String,
    pub source_ip: IpAddr,
    #[serde(default)]
    pub subject: Subject,
    #[serde(default)]
    pub query: HashMap<String, Vec<String>>,
}

// ---------- API request/response types ----------

#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub policy: Policy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub reloaded: bool,
    pub diagnostics: Vec<String>,
}
