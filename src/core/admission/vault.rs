// src/core/admission/vault.rs

//! The Vault validator and the interface to the external Vault system.

use super::{AdmissionContext, JobValidator};
use crate::core::FlotillaError;
use crate::core::model::Job;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// What the validator needs to know about a Vault token. Vault itself is an
/// external collaborator; this is its interface.
#[derive(Debug, Clone, Default)]
pub struct VaultTokenData {
    pub policies: Vec<String>,
    /// Entity aliases the token's roles permit creating.
    pub allowed_entity_aliases: Vec<String>,
}

/// Looks up a submitted Vault token. Implementations talk to the real
/// Vault; tests supply a static table.
#[async_trait]
pub trait VaultTokenLookup: Send + Sync {
    async fn lookup(&self, token: &str) -> Result<VaultTokenData, FlotillaError>;
}

pub struct VaultValidator;

#[async_trait]
impl JobValidator for VaultValidator {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn validate(
        &self,
        job: &Job,
        ctx: &AdmissionContext,
    ) -> Result<Vec<String>, FlotillaError> {
        if !job.uses_vault() {
            return Ok(Vec::new());
        }
        if !ctx.config.vault.enabled {
            return Err(FlotillaError::InvalidRequest(
                "job requires Vault but Vault is not enabled on the server".to_string(),
            ));
        }

        // Identity-based flow: no token authentication needed.
        if ctx.config.vault.use_identity {
            return Ok(Vec::new());
        }

        let requested: BTreeSet<&String> = job
            .tasks()
            .filter_map(|(_, t)| t.vault.as_ref())
            .flat_map(|v| v.policies.iter())
            .collect();
        let aliases: BTreeSet<&String> = job
            .tasks()
            .filter_map(|(_, t)| t.vault.as_ref())
            .flat_map(|v| v.entity_aliases.iter())
            .collect();

        // Authentication is only required when the job asks for policies
        // or entity aliases.
        if requested.is_empty() && aliases.is_empty() {
            return Ok(Vec::new());
        }

        let Some(token) = &job.vault_token else {
            return Err(FlotillaError::InvalidRequest(
                "job requires Vault policies but no Vault token was submitted".to_string(),
            ));
        };
        let Some(lookup) = &ctx.vault else {
            return Err(FlotillaError::InvalidRequest(
                "Vault token authentication is not configured on this server".to_string(),
            ));
        };

        let data = lookup.lookup(token).await?;

        // The submitter's token must cover every policy the job asks for.
        let held: BTreeSet<&String> = data.policies.iter().collect();
        let missing: Vec<&str> = requested
            .iter()
            .filter(|p| !held.contains(*p) && p.as_str() != "default")
            .map(|p| p.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(FlotillaError::InvalidRequest(format!(
                "submitted Vault token lacks policies required by the job: {}",
                missing.join(", ")
            )));
        }

        for alias in aliases {
            if !data.allowed_entity_aliases.iter().any(|a| a == alias) {
                return Err(FlotillaError::InvalidRequest(format!(
                    "Vault token roles do not permit entity alias {alias:?}"
                )));
            }
        }

        Ok(Vec::new())
    }
}
