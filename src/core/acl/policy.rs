// src/core/acl/policy.rs

//! The policy language: TOML documents mapping scopes to dispositions.
//!
//! ```toml
//! [namespace."platform"]
//! policy = "write"
//!
//! [namespace."team-*"]
//! policy = "read"
//! capabilities = ["submit-job"]
//!
//! [node]
//! policy = "read"
//! ```

use crate::core::FlotillaError;
use serde::Deserialize;
use std::collections::HashMap;

/// A namespace rule: a coarse disposition, extra named capabilities, or both.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct NamespaceRule {
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A coarse rule for the node/agent/operator scopes.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct CoarseRule {
    pub policy: String,
}

/// A parsed policy document, one per `AclPolicy.rules` source.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct PolicyDocument {
    #[serde(default)]
    pub namespace: HashMap<String, NamespaceRule>,
    #[serde(default)]
    pub node: Option<CoarseRule>,
    #[serde(default)]
    pub agent: Option<CoarseRule>,
    #[serde(default)]
    pub operator: Option<CoarseRule>,
}

impl PolicyDocument {
    /// Parses and validates policy source. Unknown dispositions and unknown
    /// capability names are rejected here so bad policies never reach the
    /// store.
    pub fn parse(source: &str) -> Result<Self, FlotillaError> {
        let doc: PolicyDocument = toml::from_str(source)?;

        for (name, rule) in &doc.namespace {
            if rule.policy.is_none() && rule.capabilities.is_empty() {
                return Err(FlotillaError::InvalidRequest(format!(
                    "namespace rule {name:?} grants nothing"
                )));
            }
            if let Some(policy) = &rule.policy
                && super::NamespaceCapability::from_policy(policy).is_none()
            {
                return Err(FlotillaError::InvalidRequest(format!(
                    "invalid policy {policy:?} for namespace {name:?}"
                )));
            }
            for cap in &rule.capabilities {
                if super::NamespaceCapability::from_capability_name(cap).is_none() {
                    return Err(FlotillaError::InvalidRequest(format!(
                        "invalid capability {cap:?} for namespace {name:?}"
                    )));
                }
            }
        }
        for (scope, rule) in [("node", &doc.node), ("agent", &doc.agent), ("operator", &doc.operator)]
        {
            if let Some(rule) = rule
                && super::CoarsePolicy::parse(&rule.policy).is_none()
            {
                return Err(FlotillaError::InvalidRequest(format!(
                    "invalid policy {:?} for {scope}",
                    rule.policy
                )));
            }
        }
        Ok(doc)
    }
}
