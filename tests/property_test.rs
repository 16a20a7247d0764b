// tests/property_test.rs

//! Property-based tests for the store's index discipline and the ACL
//! policy compiler.

use flotilla::core::acl::{Acl, NamespaceCapability, PolicyDocument};
use flotilla::core::model::Evaluation;
use flotilla::core::store::{StateStore, TableId};
use proptest::prelude::*;

fn eval_ids() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z0-9]{4,12}", 1..40)
}

proptest! {
    /// Every committed write strictly advances the global index, and row
    /// modify indexes never exceed their table index.
    #[test]
    fn prop_index_monotonicity(batches in proptest::collection::vec(eval_ids(), 1..10)) {
        let store = StateStore::new();
        let mut index = 0u64;
        for batch in &batches {
            index += 1;
            let evals: Vec<Evaluation> = batch
                .iter()
                .map(|id| Evaluation {
                    id: id.clone(),
                    namespace: "default".to_string(),
                    job_id: "job".to_string(),
                    ..Default::default()
                })
                .collect();
            store.upsert_evals(index, evals).unwrap();

            prop_assert_eq!(store.table_index(TableId::Evaluations), index);
            prop_assert_eq!(store.latest_index(), index);
            let snapshot = store.snapshot();
            for eval in snapshot.all_evals(None) {
                prop_assert!(eval.modify_index <= snapshot.table_index(TableId::Evaluations));
                prop_assert!(eval.create_index <= eval.modify_index);
            }
        }
    }

    /// Merging policy documents is monotone: adding a document never
    /// removes a capability (absent an explicit deny).
    #[test]
    fn prop_policy_merge_is_monotone(namespaces in proptest::collection::vec("[a-z]{1,8}", 1..5)) {
        let docs: Vec<PolicyDocument> = namespaces
            .iter()
            .map(|ns| {
                PolicyDocument::parse(&format!("[namespace.\"{ns}\"]\npolicy = \"read\"\n"))
                    .unwrap()
            })
            .collect();
        let merged = Acl::compile(&docs);
        for ns in &namespaces {
            prop_assert!(merged.allow_namespace_op(ns, NamespaceCapability::READ_JOB));
            prop_assert!(!merged.allow_namespace_op(ns, NamespaceCapability::SUBMIT_JOB));
        }
    }

    /// A deny disposition poisons a namespace no matter what other
    /// documents grant.
    #[test]
    fn prop_deny_wins(ns in "[a-z]{1,8}") {
        let grant = PolicyDocument::parse(&format!("[namespace.\"{ns}\"]\npolicy = \"write\"\n")).unwrap();
        let deny = PolicyDocument::parse(&format!("[namespace.\"{ns}\"]\npolicy = \"deny\"\n")).unwrap();
        let merged = Acl::compile(&[grant, deny]);
        prop_assert!(!merged.allow_namespace_op(&ns, NamespaceCapability::READ_JOB));
        prop_assert!(!merged.allow_namespace_op(&ns, NamespaceCapability::SUBMIT_JOB));
    }
}
