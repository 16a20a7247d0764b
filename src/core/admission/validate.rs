// src/core/admission/validate.rs

//! Structural validators: namespace capabilities, enterprise placeholders,
//! and the submission size cap.

use super::{AdmissionContext, JobValidator};
use crate::core::FlotillaError;
use crate::core::model::Job;
use async_trait::async_trait;

/// The namespace must exist and its capabilities must admit every task
/// driver the job uses.
pub struct NamespaceConstraintCheck;

#[async_trait]
impl JobValidator for NamespaceConstraintCheck {
    fn name(&self) -> &'static str {
        "namespace-constraint-check"
    }

    async fn validate(
        &self,
        job: &Job,
        ctx: &AdmissionContext,
    ) -> Result<Vec<String>, FlotillaError> {
        let snapshot = ctx.store.snapshot();
        let Some(namespace) = snapshot.namespace_by_name(None, &job.namespace) else {
            return Err(FlotillaError::NotFound(format!(
                "namespace {:?}",
                job.namespace
            )));
        };
        let Some(capabilities) = &namespace.capabilities else {
            return Ok(Vec::new());
        };

        for (group, task) in job.tasks() {
            if !capabilities.allows_driver(&task.driver) {
                return Err(FlotillaError::InvalidRequest(format!(
                    "driver {:?} (task {:?} of group {:?}) is not allowed in namespace {:?}",
                    task.driver, task.name, group.name, namespace.name
                )));
            }
        }
        if !capabilities.allowed_node_pools.is_empty()
            && !capabilities
                .allowed_node_pools
                .iter()
                .any(|p| p == &job.node_pool)
        {
            return Err(FlotillaError::InvalidRequest(format!(
                "node pool {:?} is not allowed in namespace {:?}",
                job.node_pool, namespace.name
            )));
        }
        Ok(Vec::new())
    }
}

/// Enterprise-only node-pool governance; pass-through in CE.
pub struct NodePoolValidator;

#[async_trait]
impl JobValidator for NodePoolValidator {
    fn name(&self) -> &'static str {
        "node-pool"
    }

    async fn validate(
        &self,
        _job: &Job,
        _ctx: &AdmissionContext,
    ) -> Result<Vec<String>, FlotillaError> {
        Ok(Vec::new())
    }
}

/// Enterprise-only NUMA scheduling validation; pass-through in CE.
pub struct NumaValidator;

#[async_trait]
impl JobValidator for NumaValidator {
    fn name(&self) -> &'static str {
        "numa"
    }

    async fn validate(
        &self,
        _job: &Job,
        _ctx: &AdmissionContext,
    ) -> Result<Vec<String>, FlotillaError> {
        Ok(Vec::new())
    }
}

/// Rejects submissions whose raw source text exceeds the configured cap.
pub struct SubmissionSizeValidator;

#[async_trait]
impl JobValidator for SubmissionSizeValidator {
    fn name(&self) -> &'static str {
        "submission-size"
    }

    async fn validate(
        &self,
        job: &Job,
        ctx: &AdmissionContext,
    ) -> Result<Vec<String>, FlotillaError> {
        if let Some(source) = &job.source {
            let max = ctx.config.job.max_source_size;
            if source.len() > max {
                return Err(FlotillaError::InvalidRequest(format!(
                    "job source size {} exceeds the server limit of {max} bytes",
                    source.len()
                )));
            }
        }
        Ok(Vec::new())
    }
}
