// src/core/admission/mod.rs

//! The job-admission pipeline: ordered mutating hooks followed by ordered
//! validating hooks, run before a registration enters the log.
//!
//! The pipeline is pure: hooks transform or vet the job and never touch the
//! store directly (validators read it through their own snapshots). Hook
//! order is fixed; earlier mutations may trigger later validations.

pub mod canonicalize;
pub mod constraints;
pub mod consul;
pub mod expose;
pub mod identity;
pub mod validate;
pub mod vault;

use crate::config::Config;
use crate::core::FlotillaError;
use crate::core::model::Job;
use crate::core::store::StateStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Everything a hook may consult: the configuration snapshot, the store,
/// and the optional Vault token source.
pub struct AdmissionContext {
    pub config: Config,
    pub store: Arc<StateStore>,
    pub vault: Option<Arc<dyn vault::VaultTokenLookup>>,
}

/// A mutating hook: receives the job, returns a possibly-modified job plus
/// warnings. Mutators are idempotent; running one twice changes nothing.
#[async_trait]
pub trait JobMutator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn mutate(
        &self,
        job: Job,
        ctx: &AdmissionContext,
    ) -> Result<(Job, Vec<String>), FlotillaError>;
}

/// A validating hook: receives the canonicalized job, returns warnings or
/// rejects the submission.
#[async_trait]
pub trait JobValidator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn validate(&self, job: &Job, ctx: &AdmissionContext)
    -> Result<Vec<String>, FlotillaError>;
}

pub struct AdmissionPipeline {
    store: Arc<StateStore>,
    vault: Option<Arc<dyn vault::VaultTokenLookup>>,
    mutators: Vec<Box<dyn JobMutator>>,
    validators: Vec<Box<dyn JobValidator>>,
}

impl AdmissionPipeline {
    /// The canonical hook set, in its documented order.
    pub fn new(store: Arc<StateStore>, vault: Option<Arc<dyn vault::VaultTokenLookup>>) -> Self {
        Self {
            store,
            vault,
            mutators: vec![
                Box::new(canonicalize::Canonicalizer),
                Box::new(identity::ImplicitIdentities),
                Box::new(expose::ExposeCheckMutator),
                Box::new(constraints::ImplicitConstraints),
                Box::new(consul::ConsulCluster),
                Box::new(expose::ExposeReconciler),
            ],
            validators: vec![
                Box::new(validate::NamespaceConstraintCheck),
                Box::new(expose::ExposeCheckValidator),
                Box::new(vault::VaultValidator),
                Box::new(consul::ConsulServiceValidator),
                Box::new(validate::NodePoolValidator),
                Box::new(validate::NumaValidator),
                Box::new(validate::SubmissionSizeValidator),
            ],
        }
    }

    /// Runs the full pipeline, returning the canonical job and accumulated
    /// warnings, or the first validator rejection.
    pub async fn admit(
        &self,
        job: Job,
        config: &Config,
    ) -> Result<(Job, Vec<String>), FlotillaError> {
        let ctx = AdmissionContext {
            config: config.clone(),
            store: self.store.clone(),
            vault: self.vault.clone(),
        };

        let mut job = job;
        let mut warnings = Vec::new();

        for mutator in &self.mutators {
            let (mutated, mut hook_warnings) = mutator.mutate(job, &ctx).await?;
            job = mutated;
            if !hook_warnings.is_empty() {
                debug!(hook = mutator.name(), warnings = ?hook_warnings, "admission warnings");
                warnings.append(&mut hook_warnings);
            }
        }

        for validator in &self.validators {
            let mut hook_warnings = validator.validate(&job, &ctx).await.map_err(|e| {
                debug!(hook = validator.name(), error = %e, "admission rejected");
                e
            })?;
            warnings.append(&mut hook_warnings);
        }

        Ok((job, warnings))
    }
}

impl std::fmt::Debug for AdmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPipeline")
            .field(
                "mutators",
                &self.mutators.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field(
                "validators",
                &self.validators.iter().map(|v| v.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
