//! Shared test support for the Cellophane workspace: `proptest` strategies
//! for the engine's core record types, literal/regex output comparators,
//! and an invocation fixture that wires a tempdir-rooted [`Dispatcher`]
//! without each crate re-deriving the same boilerplate.
//!
//! Modeled on `shipper`'s `property_tests.rs` (strategy style) and
//! `shipper-cli`'s `tests/bdd_publish.rs` (fixture-building style, there
//! over a Cargo workspace tree, here over a Cellophane session root).

use std::path::PathBuf;

use cellophane::Dispatcher;
use cellophane_container::{Container, Value};
use cellophane_runner::Runner;
use cellophane_sample::{Sample, Samples};
use proptest::prelude::*;

/// An arbitrary sample id: short, alphanumeric, never empty. `Sample.id`
/// is deliberately non-unique in the data model, so strategies built on
/// top of this one should not assume distinctness.
pub fn sample_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_-]{0,15}"
}

/// A handful of plausible relative file paths, order-preserving and
/// capped in length the way real sample records are (a handful of FASTQ
/// lanes, not thousands).
pub fn files_strategy() -> impl Strategy<Value = Vec<PathBuf>> {
    prop::collection::vec("[a-z][a-z0-9_]{2,10}\\.txt", 0..4)
        .prop_map(|names| names.into_iter().map(PathBuf::from).collect())
}

/// A bounded, non-recursive `Container::Value` — scalars and one level of
/// list/map nesting, enough to exercise merge and serialization without
/// proptest spending its budget on deeply nested trees.
pub fn container_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        "[a-z]{0,10}".prop_map(Value::String),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::vec(("[a-z]{1,8}", inner), 0..4).prop_map(|pairs| {
                let mut container = Container::new();
                for (key, value) in pairs {
                    container.insert(key, value);
                }
                Value::Map(container)
            }),
        ]
    })
}

/// An arbitrary [`Sample`]: fresh uuid, random id/files, starts
/// unprocessed and unfailed.
pub fn sample_strategy() -> impl Strategy<Value = Sample> {
    (sample_id_strategy(), files_strategy()).prop_map(|(id, files)| {
        let mut sample = Sample::new(id);
        for file in files {
            sample.add_file(file);
        }
        sample
    })
}

/// A [`Samples`] collection of `0..len` distinct-uuid samples (distinct
/// because [`Sample::new`] always assigns a fresh uuid).
pub fn samples_strategy(len: impl Into<proptest::collection::SizeRange>) -> impl Strategy<Value = Samples> {
    prop::collection::vec(sample_strategy(), len).prop_map(|samples| {
        let mut collection = Samples::new();
        for sample in samples {
            collection.union_one(sample);
        }
        collection
    })
}

/// Asserts `haystack` contains `needle` as a literal substring, with a
/// diagnostic panic message showing both on failure.
pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "expected output to contain {needle:?}\n--- actual ---\n{haystack}"
    );
}

/// Asserts `haystack` matches the regular expression `pattern` anywhere
/// in the string. Panics on an invalid pattern rather than silently
/// passing, since a typo'd regex would otherwise mask a real failure.
pub fn assert_matches(haystack: &str, pattern: &str) {
    let re = regex::Regex::new(pattern).unwrap_or_else(|err| panic!("invalid regex {pattern:?}: {err}"));
    assert!(
        re.is_match(haystack),
        "expected output to match /{pattern}/\n--- actual ---\n{haystack}"
    );
}

/// A tempdir-rooted session fixture: constructs a [`Dispatcher`] over a
/// fresh workspace so integration tests don't each re-derive tempdir +
/// workdir + `Container` wiring.
pub struct Fixture {
    tmp: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            tmp: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        self.tmp.path()
    }

    /// Builds a `Dispatcher` rooted at this fixture's tempdir, with the
    /// given runners already registered and an empty `Container`.
    pub fn dispatcher(&self, runners: Vec<Runner>) -> Dispatcher {
        let mut dispatcher =
            Dispatcher::new(self.root(), self.root().join("work"), Container::new());
        for runner in runners {
            dispatcher.add_runner(runner);
        }
        dispatcher
    }

    /// Convenience for the common one-sample-one-runner case.
    pub fn single_sample(id: impl Into<String>) -> Samples {
        let mut samples = Samples::new();
        samples.union_one(Sample::new(id));
        samples
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
