//! [`Samples`]: an insertion-ordered, uuid-keyed collection of [`Sample`]
//! plus the set of declared outputs collected for the session.

use std::collections::HashSet;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::merge::MergeRegistry;
use crate::output_decl::{OutputDecl, OutputKey};
use crate::sample::{merge_samples, Sample, SampleMergeError};

/// A sequence of [`Sample`]s with stable insertion order and O(1) lookup by
/// `uuid`. `IndexMap` gives both for free, the way the teacher's
/// `ReleasePlan` keeps package order while still supporting name lookups.
#[derive(Debug, Clone, Default)]
pub struct Samples {
    by_uuid: IndexMap<Uuid, Sample>,
    outputs: Vec<OutputDecl>,
    output_keys: HashSet<OutputKey>,
}

impl Samples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }

    /// Appends a sample. If its uuid is already present this replaces the
    /// existing entry in place (preserving its original position), matching
    /// the lightweight "last write wins" semantics of the `|` union
    /// operator — full field-by-field reconciliation is [`Samples::merge`].
    pub fn union_one(&mut self, sample: Sample) {
        self.by_uuid.insert(sample.uuid(), sample);
    }

    pub fn union(&mut self, other: Samples) {
        for (_, sample) in other.by_uuid {
            self.union_one(sample);
        }
        self.absorb_outputs(other.outputs);
    }

    /// Applies the registered per-field merge rules to every sample in
    /// `other` whose uuid already exists in `self`; samples with a new uuid
    /// are appended unmerged. Mirrors the `&` operator in the data model.
    pub fn merge(
        &mut self,
        other: &Samples,
        registry: &MergeRegistry,
    ) -> Result<(), SampleMergeError> {
        for (uuid, incoming) in other.by_uuid.iter() {
            match self.by_uuid.get(uuid) {
                Some(existing) => {
                    let merged = merge_samples(existing, incoming, registry)?;
                    self.by_uuid.insert(*uuid, merged);
                }
                None => {
                    self.by_uuid.insert(*uuid, incoming.clone());
                }
            }
        }
        self.absorb_outputs(other.outputs.clone());
        Ok(())
    }

    fn absorb_outputs(&mut self, outputs: Vec<OutputDecl>) {
        for decl in outputs {
            self.add_output(decl);
        }
    }

    pub fn add_output(&mut self, decl: OutputDecl) {
        if self.output_keys.insert(decl.dedup_key()) {
            self.outputs.push(decl);
        }
    }

    pub fn outputs(&self) -> &[OutputDecl] {
        &self.outputs
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Sample> {
        self.by_uuid.get(&uuid)
    }

    pub fn get_mut(&mut self, uuid: Uuid) -> Option<&mut Sample> {
        self.by_uuid.get_mut(&uuid)
    }

    pub fn get_index(&self, index: usize) -> Option<&Sample> {
        self.by_uuid.get_index(index).map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.by_uuid.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Sample> {
        self.by_uuid.values_mut()
    }

    /// Drops every declared `OutputGlob` and replaces it with its resolved
    /// concrete `Output`s, leaving already-concrete declarations untouched.
    /// Used once a runner has expanded its globs against a finished workdir.
    pub fn resolve_globs(&mut self, resolved: Vec<crate::output_decl::Output>) {
        self.outputs.retain(|decl| matches!(decl, OutputDecl::Output(_)));
        self.output_keys = self
            .outputs
            .iter()
            .map(OutputDecl::dedup_key)
            .collect();
        for output in resolved {
            self.add_output(OutputDecl::Output(output));
        }
    }

    pub fn uuids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.by_uuid.keys().copied()
    }

    pub fn complete(&self) -> Samples {
        self.filtered(|s| s.is_complete())
    }

    pub fn failed(&self) -> Samples {
        self.filtered(|s| !s.is_complete())
    }

    pub fn unprocessed(&self) -> Samples {
        self.filtered(|s| !s.processed)
    }

    pub fn with_files(&self) -> Samples {
        self.filtered(|s| !s.files.is_empty() && s.files.iter().all(|f| f.exists()))
    }

    pub fn without_files(&self) -> Samples {
        self.filtered(|s| s.files.is_empty() || !s.files.iter().all(|f| f.exists()))
    }

    fn filtered(&self, predicate: impl Fn(&Sample) -> bool) -> Samples {
        let mut out = Samples::new();
        for sample in self.iter() {
            if predicate(sample) {
                out.union_one(sample.clone());
            }
        }
        out
    }

    /// Splits into `(group, subset)` pairs keyed by the dotted `extra` field
    /// named by `split_by`, preserving first-seen group order and
    /// within-group sample order. `split_by = None` yields a single
    /// `(None, self-clone)` pair, matching a runner with no `split_by`.
    pub fn split_by(&self, split_by: Option<&str>) -> Vec<(Option<String>, Samples)> {
        let Some(field) = split_by else {
            return vec![(None, self.clone())];
        };

        let mut order: Vec<Option<String>> = Vec::new();
        let mut groups: IndexMap<Option<String>, Samples> = IndexMap::new();
        for sample in self.iter() {
            let key = sample
                .extra
                .get_path(field)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().union_one(sample.clone());
        }
        order
            .into_iter()
            .map(|key| {
                let subset = groups.shift_remove(&key).unwrap_or_default();
                (key, subset)
            })
            .collect()
    }
}

impl FromIterator<Sample> for Samples {
    fn from_iter<T: IntoIterator<Item = Sample>>(iter: T) -> Self {
        let mut samples = Samples::new();
        for sample in iter {
            samples.union_one(sample);
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_decl::Output;

    #[test]
    fn union_one_replaces_existing_uuid_in_place() {
        let mut samples = Samples::new();
        let mut s = Sample::new("s1");
        s.processed = false;
        let uuid = s.uuid();
        samples.union_one(s.clone());

        let mut s2 = s.clone();
        s2.processed = true;
        samples.union_one(s2);

        assert_eq!(samples.len(), 1);
        assert!(samples.get(uuid).unwrap().processed);
    }

    #[test]
    fn merge_applies_field_rules_on_matching_uuid() {
        let mut a = Sample::new("s1");
        a.add_file("a.bam");
        let mut base = Samples::new();
        base.union_one(a.clone());

        let mut b = Sample::with_uuid("s1", a.uuid());
        b.add_file("b.bam");
        let mut incoming = Samples::new();
        incoming.union_one(b);

        base.merge(&incoming, &MergeRegistry::new()).expect("merge");
        assert_eq!(base.get(a.uuid()).unwrap().files.len(), 2);
    }

    #[test]
    fn no_two_samples_share_a_uuid_after_union() {
        let mut samples = Samples::new();
        let s = Sample::new("s1");
        let uuid = s.uuid();
        samples.union_one(s.clone());
        samples.union_one(Sample::with_uuid("s1-renamed", uuid));
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn derived_slices_partition_by_completion() {
        let mut samples = Samples::new();
        let mut complete = Sample::new("ok");
        complete.processed = true;
        samples.union_one(complete);

        let incomplete = Sample::new("not-ok");
        samples.union_one(incomplete);

        assert_eq!(samples.complete().len(), 1);
        assert_eq!(samples.failed().len(), 1);
        assert_eq!(samples.unprocessed().len(), 1);
    }

    #[test]
    fn outputs_are_deduplicated_by_src_dst() {
        let mut samples = Samples::new();
        samples.add_output(OutputDecl::Output(Output::new("a", "b")));
        samples.add_output(OutputDecl::Output(Output::new("a", "b")));
        assert_eq!(samples.outputs().len(), 1);
    }

    #[test]
    fn split_by_none_yields_a_single_group() {
        let mut samples = Samples::new();
        samples.union_one(Sample::new("s1"));
        let groups = samples.split_by(None);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, None);
        assert_eq!(groups[0].1.len(), 1);
    }

    #[test]
    fn split_by_groups_preserve_first_seen_order() {
        let mut samples = Samples::new();
        let mut s1 = Sample::new("s1");
        s1.extra.insert("batch", "b");
        let mut s2 = Sample::new("s2");
        s2.extra.insert("batch", "a");
        let mut s3 = Sample::new("s3");
        s3.extra.insert("batch", "b");
        samples.union_one(s1);
        samples.union_one(s2);
        samples.union_one(s3);

        let groups = samples.split_by(Some("batch"));
        assert_eq!(
            groups.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
            vec![Some("b".to_string()), Some("a".to_string())]
        );
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
    }
}
