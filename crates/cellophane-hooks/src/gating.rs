//! Condition gating: which subset of a `Samples` collection a given hook
//! invocation sees, per §4.3's pre/post condition table.

use cellophane_sample::Samples;

use crate::types::{Condition, HookWhen};

/// Returns the subset `samples` a hook with `condition` should run over for
/// phase `when`, or `None` if the hook should be skipped entirely (an empty
/// `unprocessed`/`failed` subset skips the hook rather than running it over
/// zero samples).
pub fn gated_subset(samples: &Samples, when: HookWhen, condition: Condition) -> Option<Samples> {
    let subset = match (when, condition) {
        (_, Condition::Always) => samples.clone(),
        (HookWhen::Pre, Condition::Unprocessed) => samples.unprocessed(),
        (HookWhen::Pre, Condition::Failed) => samples.failed(),
        (HookWhen::Post, Condition::Complete) => samples.complete(),
        (HookWhen::Post, Condition::Failed) => samples.failed(),
        // Combinations the data model does not define (e.g. a pre-hook
        // gated on `complete`) degrade to the full input set rather than
        // silently running over nothing.
        _ => samples.clone(),
    };

    if matches!(
        condition,
        Condition::Unprocessed | Condition::Complete | Condition::Failed
    ) && subset.is_empty()
    {
        return None;
    }
    Some(subset)
}
