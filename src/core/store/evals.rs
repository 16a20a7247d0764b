// src/core/store/evals.rs

//! Evaluation table.

use super::jobs::job_row_key;
use super::{StateSnapshot, StateStore, StoreInner, TableId, WatchSet, WatchToken};
use crate::core::FlotillaError;
use crate::core::model::Evaluation;
use std::sync::Arc;

impl StoreInner {
    pub(super) fn insert_eval_locked(&mut self, index: u64, mut eval: Evaluation) {
        if let Some(existing) = self.evals.get(&eval.id) {
            eval.create_index = existing.create_index;
        } else {
            eval.create_index = index;
        }
        eval.modify_index = index;
        self.evals_by_job
            .entry((eval.namespace.clone(), eval.job_id.clone()))
            .or_default()
            .insert(eval.id.clone());
        self.evals.insert(eval.id.clone(), Arc::new(eval));
        self.bump(TableId::Evaluations, index);
    }
}

impl StateStore {
    pub fn upsert_evals(&self, index: u64, evals: Vec<Evaluation>) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut keys = Vec::with_capacity(evals.len());
            for eval in evals {
                if eval.id.is_empty() {
                    return Err(FlotillaError::InvalidRequest(
                        "evaluation id is required".to_string(),
                    ));
                }
                keys.push(eval.id.clone());
                inner.insert_eval_locked(index, eval);
            }
            Ok(((), vec![(TableId::Evaluations, keys)]))
        })
    }

    pub fn delete_evals(&self, index: u64, ids: &[String]) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut removed = Vec::new();
            for id in ids {
                let Some(eval) = inner.evals.remove(id) else {
                    continue;
                };
                removed.push(id.clone());
                if let Some(set) = inner
                    .evals_by_job
                    .get_mut(&(eval.namespace.clone(), eval.job_id.clone()))
                {
                    set.remove(id);
                }
            }
            if !removed.is_empty() {
                inner.bump(TableId::Evaluations, index);
            }
            Ok(((), vec![(TableId::Evaluations, removed)]))
        })
    }
}

impl<'a> StateSnapshot<'a> {
    pub fn eval_by_id(&self, ws: Option<&mut WatchSet>, id: &str) -> Option<Arc<Evaluation>> {
        self.maybe_arm(ws, WatchToken::Row(TableId::Evaluations, id.to_string()));
        self.inner.evals.get(id).cloned()
    }

    pub fn evals_by_job(
        &self,
        ws: Option<&mut WatchSet>,
        namespace: &str,
        job_id: &str,
    ) -> Vec<Arc<Evaluation>> {
        self.maybe_arm(
            ws,
            WatchToken::Prefix(TableId::Evaluations, job_row_key(namespace, job_id)),
        );
        self.inner
            .evals_by_job
            .get(&(namespace.to_string(), job_id.to_string()))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.inner.evals.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all_evals(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<Evaluation>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::Evaluations));
        self.inner.evals.values().cloned().collect()
    }
}
