// src/core/acl/compiled.rs

//! The compiled, immutable permission object produced by the resolver.

use super::capabilities::{CoarsePolicy, NamespaceCapability};
use super::policy::PolicyDocument;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A wildcard namespace rule compiled to a matcher. Ties are broken by the
/// number of literal characters in the original pattern, most specific wins.
#[derive(Debug, Clone)]
struct GlobRule {
    pattern: Regex,
    literal_len: usize,
    caps: NamespaceCapability,
}

/// A compiled ACL. Operators are O(1) map lookups; construction merges any
/// number of policy documents.
#[derive(Debug, Default)]
pub struct Acl {
    management: bool,
    namespaces: HashMap<String, NamespaceCapability>,
    wildcard_namespaces: Vec<GlobRule>,
    node: CoarsePolicy,
    agent: CoarsePolicy,
    operator: CoarsePolicy,
}

impl Acl {
    /// The singleton management ACL: every check passes.
    pub fn management() -> Arc<Self> {
        static MANAGEMENT: once_cell::sync::Lazy<Arc<Acl>> =
            once_cell::sync::Lazy::new(|| {
                Arc::new(Acl {
                    management: true,
                    ..Default::default()
                })
            });
        MANAGEMENT.clone()
    }

    /// An ACL that grants nothing.
    pub fn deny_all() -> Arc<Self> {
        static DENY: once_cell::sync::Lazy<Arc<Acl>> =
            once_cell::sync::Lazy::new(|| Arc::new(Acl::default()));
        DENY.clone()
    }

    /// Compiles and merges a set of policy documents into one ACL.
    pub fn compile(documents: &[PolicyDocument]) -> Arc<Self> {
        let mut acl = Acl::default();

        for doc in documents {
            for (name, rule) in &doc.namespace {
                let mut caps = rule
                    .policy
                    .as_deref()
                    .and_then(NamespaceCapability::from_policy)
                    .unwrap_or_default();
                for cap in &rule.capabilities {
                    if let Some(c) = NamespaceCapability::from_capability_name(cap) {
                        caps |= c;
                    }
                }

                if name.contains('*') {
                    if let Some(pattern) = compile_glob(name) {
                        // Merge with an existing rule for the same pattern.
                        if let Some(existing) = acl
                            .wildcard_namespaces
                            .iter_mut()
                            .find(|g| g.pattern.as_str() == pattern.as_str())
                        {
                            existing.caps |= caps;
                        } else {
                            acl.wildcard_namespaces.push(GlobRule {
                                pattern,
                                literal_len: name.chars().filter(|c| *c != '*').count(),
                                caps,
                            });
                        }
                    }
                } else {
                    *acl.namespaces.entry(name.clone()).or_default() |= caps;
                }
            }

            if let Some(rule) = &doc.node {
                let p = CoarsePolicy::parse(&rule.policy).unwrap_or_default();
                acl.node = acl.node.merge(p);
            }
            if let Some(rule) = &doc.agent {
                let p = CoarsePolicy::parse(&rule.policy).unwrap_or_default();
                acl.agent = acl.agent.merge(p);
            }
            if let Some(rule) = &doc.operator {
                let p = CoarsePolicy::parse(&rule.policy).unwrap_or_default();
                acl.operator = acl.operator.merge(p);
            }
        }

        // Most specific wildcard first.
        acl.wildcard_namespaces
            .sort_by(|a, b| b.literal_len.cmp(&a.literal_len));
        Arc::new(acl)
    }

    pub fn is_management(&self) -> bool {
        self.management
    }

    /// The capability set applying to a namespace: an exact rule if present,
    /// otherwise the most specific matching wildcard rule.
    fn namespace_caps(&self, namespace: &str) -> NamespaceCapability {
        if let Some(caps) = self.namespaces.get(namespace) {
            return *caps;
        }
        for rule in &self.wildcard_namespaces {
            if rule.pattern.is_match(namespace) {
                return rule.caps;
            }
        }
        NamespaceCapability::empty()
    }

    /// Whether the holder may perform `cap` within `namespace`.
    pub fn allow_namespace_op(&self, namespace: &str, cap: NamespaceCapability) -> bool {
        self.management || self.namespace_caps(namespace).allows(cap)
    }

    /// Whether the holder may read *any* namespace; used to gate wildcard
    /// list requests before per-row filtering.
    pub fn allow_any_namespace(&self, cap: NamespaceCapability) -> bool {
        self.management
            || self.namespaces.values().any(|c| c.allows(cap))
            || self.wildcard_namespaces.iter().any(|g| g.caps.allows(cap))
    }

    pub fn allow_node_read(&self) -> bool {
        self.management || self.node.allows_read()
    }

    pub fn allow_node_write(&self) -> bool {
        self.management || self.node.allows_write()
    }

    pub fn allow_agent_read(&self) -> bool {
        self.management || self.agent.allows_read()
    }

    pub fn allow_agent_write(&self) -> bool {
        self.management || self.agent.allows_write()
    }

    pub fn allow_operator_read(&self) -> bool {
        self.management || self.operator.allows_read()
    }
}

/// Converts a `*` glob into an anchored regex.
fn compile_glob(pattern: &str) -> Option<Regex> {
    let mut regex_pattern = String::with_capacity(pattern.len() * 2);
    regex_pattern.push('^');
    for c in pattern.chars() {
        match c {
            '*' => regex_pattern.push_str(".*"),
            _ => regex_pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_pattern.push('$');

    match Regex::new(&regex_pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(r#"Invalid namespace glob pattern "{}": {}"#, pattern, e);
            None
        }
    }
}
