// src/core/model/eval.rs

//! Evaluations: scheduler work units triggered by state changes.

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EvalStatus {
    #[default]
    Pending,
    Blocked,
    Complete,
    Failed,
    Canceled,
}

impl EvalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EvalStatus::Complete | EvalStatus::Failed | EvalStatus::Canceled
        )
    }
}

pub const EVAL_TRIGGER_JOB_REGISTER: &str = "job-register";
pub const EVAL_TRIGGER_JOB_DEREGISTER: &str = "job-deregister";
pub const EVAL_TRIGGER_DEPLOYMENT_WATCHER: &str = "deployment-watcher";
pub const EVAL_TRIGGER_NODE_UPDATE: &str = "node-update";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Evaluation {
    pub id: String,
    #[serde(default)]
    pub namespace: String,
    pub job_id: String,
    #[serde(default)]
    pub triggered_by: String,
    #[serde(default)]
    pub status: EvalStatus,
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Evaluation {
    /// A fresh pending evaluation for the given job and trigger.
    pub fn new(namespace: &str, job_id: &str, triggered_by: &str) -> Self {
        Self {
            id: super::generate_id(),
            namespace: namespace.to_string(),
            job_id: job_id.to_string(),
            triggered_by: triggered_by.to_string(),
            status: EvalStatus::Pending,
            create_time: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            ..Default::default()
        }
    }
}
