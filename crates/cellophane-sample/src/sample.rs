//! The [`Sample`] record and its merge semantics.

use std::path::PathBuf;

use cellophane_container::Container;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::merge::MergeRegistry;

pub const NOT_PROCESSED_REASON: &str = "Sample was not processed";

/// One unit of work flowing through a pipeline.
///
/// `id` is deliberately **not** unique — many samples may share an `id`;
/// `uuid` is the only identity the engine relies on. A `Sample` is mutated
/// only while owned by exactly one runner at a time; runners receive and
/// may return a new/mutated value, never a shared reference across worker
/// boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    /// Insertion-ordered, deduplicated.
    pub files: Vec<PathBuf>,
    pub processed: bool,
    uuid: Uuid,
    pub meta: Container,
    pub fail_reason: Option<String>,
    /// Fields contributed by mixins that are not part of the engine's core
    /// schema; merged through the [`MergeRegistry`] rather than a hardcoded
    /// rule.
    pub extra: Container,
}

impl Sample {
    /// Constructs a fresh sample with a newly assigned, frozen identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            files: Vec::new(),
            processed: false,
            uuid: Uuid::new_v4(),
            meta: Container::new(),
            fail_reason: None,
            extra: Container::new(),
        }
    }

    /// Reconstructs a sample with an explicit uuid — used when loading a
    /// samples file row that already carries identity (e.g. resuming from a
    /// checkpoint), never for fresh construction.
    pub fn with_uuid(id: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            uuid,
            ..Self::new(id)
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.fail_reason = Some(match self.fail_reason.take() {
            Some(existing) => format!("{existing}\n{reason}"),
            None => reason,
        });
    }

    /// `fail_reason`, or the implicit reason for an unprocessed sample.
    pub fn failed(&self) -> Option<String> {
        match &self.fail_reason {
            Some(reason) => Some(reason.clone()),
            None if !self.processed => Some(NOT_PROCESSED_REASON.to_string()),
            None => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed().is_none()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SampleMergeError {
    #[error("cannot merge samples with different uuids: {left} != {right}")]
    UuidMismatch { left: Uuid, right: Uuid },
}

/// Merges `b` into `a` field-by-field using the fixed built-in rules plus
/// whatever the supplied [`MergeRegistry`] contributes for `extra` fields.
/// `a` and `b` must share a uuid; callers that discover a mismatch append
/// both samples unmerged and fail them with the error's message rather than
/// calling this function.
pub fn merge_samples(
    a: &Sample,
    b: &Sample,
    registry: &MergeRegistry,
) -> Result<Sample, SampleMergeError> {
    if a.uuid != b.uuid {
        return Err(SampleMergeError::UuidMismatch {
            left: a.uuid,
            right: b.uuid,
        });
    }

    let mut files = a.files.clone();
    for f in &b.files {
        if !files.contains(f) {
            files.push(f.clone());
        }
    }

    let fail_reason = match (&a.fail_reason, &b.fail_reason) {
        (Some(x), Some(y)) => Some(format!("{x}\n{y}")),
        (Some(x), None) => Some(x.clone()),
        (None, Some(y)) => Some(y.clone()),
        (None, None) => None,
    };

    let mut extra = a.extra.deep_merge(&b.extra);
    for (key, a_val) in a.extra.iter() {
        if let (Some(merge_fn), Some(b_val)) = (registry.get(key), b.extra.get(key)) {
            extra.insert(key.clone(), merge_fn(a_val, b_val));
        }
    }

    Ok(Sample {
        id: a.id.clone(),
        files,
        processed: a.processed && b.processed,
        uuid: a.uuid,
        meta: a.meta.deep_merge(&b.meta),
        fail_reason,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellophane_container::Value;

    #[test]
    fn merge_fails_on_uuid_mismatch() {
        let a = Sample::new("s1");
        let b = Sample::new("s1");
        let err = merge_samples(&a, &b, &MergeRegistry::new()).unwrap_err();
        assert!(matches!(err, SampleMergeError::UuidMismatch { .. }));
    }

    #[test]
    fn merge_unions_files_preserving_insertion_order() {
        let mut a = Sample::new("s1");
        a.add_file("a.bam");
        a.add_file("b.bam");
        let mut b = Sample::with_uuid("s1", a.uuid());
        b.add_file("b.bam");
        b.add_file("c.bam");

        let merged = merge_samples(&a, &b, &MergeRegistry::new()).expect("merge");
        assert_eq!(
            merged.files,
            vec![
                PathBuf::from("a.bam"),
                PathBuf::from("b.bam"),
                PathBuf::from("c.bam"),
            ]
        );
    }

    #[test]
    fn merge_ands_processed_flags() {
        let mut a = Sample::new("s1");
        a.processed = true;
        let mut b = Sample::with_uuid("s1", a.uuid());
        b.processed = false;
        let merged = merge_samples(&a, &b, &MergeRegistry::new()).expect("merge");
        assert!(!merged.processed);
    }

    #[test]
    fn merge_concatenates_fail_reasons_with_newline() {
        let mut a = Sample::new("s1");
        a.fail("first failure");
        let mut b = Sample::with_uuid("s1", a.uuid());
        b.fail("second failure");
        let merged = merge_samples(&a, &b, &MergeRegistry::new()).expect("merge");
        assert_eq!(
            merged.fail_reason.as_deref(),
            Some("first failure\nsecond failure")
        );
    }

    #[test]
    fn merge_keeps_non_null_fail_reason_when_other_side_is_none() {
        let mut a = Sample::new("s1");
        a.fail("only failure");
        let b = Sample::with_uuid("s1", a.uuid());
        let merged = merge_samples(&a, &b, &MergeRegistry::new()).expect("merge");
        assert_eq!(merged.fail_reason.as_deref(), Some("only failure"));
    }

    #[test]
    fn unprocessed_sample_derives_implicit_fail_reason() {
        let s = Sample::new("s1");
        assert_eq!(s.failed().as_deref(), Some(NOT_PROCESSED_REASON));
        assert!(!s.is_complete());
    }

    #[test]
    fn processed_sample_with_no_fail_reason_is_complete() {
        let mut s = Sample::new("s1");
        s.processed = true;
        assert_eq!(s.failed(), None);
        assert!(s.is_complete());
    }

    #[test]
    fn registered_merge_rule_applies_to_extra_fields() {
        fn max_priority(a: &Value, b: &Value) -> Value {
            match (a, b) {
                (Value::Int(x), Value::Int(y)) => Value::Int((*x).max(*y)),
                _ => b.clone(),
            }
        }
        let mut registry = MergeRegistry::new();
        registry.register("priority", max_priority);

        let mut a = Sample::new("s1");
        a.extra.insert("priority", 1i64);
        let mut b = Sample::with_uuid("s1", a.uuid());
        b.extra.insert("priority", 5i64);

        let merged = merge_samples(&a, &b, &registry).expect("merge");
        assert_eq!(merged.extra.get("priority"), Some(&Value::Int(5)));
    }

    proptest::proptest! {
        // Invariant 1: uuid is assigned once at construction and never
        // changes across mutation or merge.
        #[test]
        fn uuid_is_stable_across_mutation_and_merge(
            id in "[a-zA-Z][a-zA-Z0-9_]{0,15}",
            files in proptest::collection::vec("[a-z]{1,10}\\.txt", 0..4),
        ) {
            let mut sample = Sample::new(id);
            let original_uuid = sample.uuid();
            for f in &files {
                sample.add_file(f.clone());
            }
            sample.fail("whatever");
            proptest::prop_assert_eq!(sample.uuid(), original_uuid);

            let other = Sample::with_uuid(sample.id.clone(), original_uuid);
            let merged = merge_samples(&sample, &other, &MergeRegistry::new()).expect("merge");
            proptest::prop_assert_eq!(merged.uuid(), original_uuid);
        }

        // Invariant 2: merging two same-uuid samples always succeeds, and is
        // idempotent for the `files`/`processed` fields (`a & a == a` there).
        #[test]
        fn merge_closure_succeeds_and_is_idempotent_for_builtin_fields(
            id in "[a-zA-Z][a-zA-Z0-9_]{0,15}",
            files in proptest::collection::vec("[a-z]{1,10}\\.txt", 0..4),
            processed in proptest::bool::ANY,
        ) {
            let mut sample = Sample::new(id);
            for f in &files {
                sample.add_file(f.clone());
            }
            sample.processed = processed;

            let merged = merge_samples(&sample, &sample, &MergeRegistry::new()).expect("merge");
            proptest::prop_assert_eq!(merged.files, sample.files.clone());
            proptest::prop_assert_eq!(merged.processed, sample.processed);
        }

        // Invariant 3: a mismatched-uuid merge attempt never silently drops a
        // sample — the caller's fallback path (mirrored here directly, since
        // merge_samples itself only reports the mismatch) still has both
        // uuids available to append-and-fail with the exception repr.
        #[test]
        fn uuid_mismatch_reports_both_identities(
            id_a in "[a-zA-Z][a-zA-Z0-9_]{0,15}",
            id_b in "[a-zA-Z][a-zA-Z0-9_]{0,15}",
        ) {
            let a = Sample::new(id_a);
            let b = Sample::new(id_b);
            let err = merge_samples(&a, &b, &MergeRegistry::new()).unwrap_err();
            let SampleMergeError::UuidMismatch { left, right } = err;
            proptest::prop_assert_eq!(left, a.uuid());
            proptest::prop_assert_eq!(right, b.uuid());
        }
    }
}
