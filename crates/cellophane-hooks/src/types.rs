//! Hook declarations and the fixed vocabulary hooks order themselves with.

use std::fmt;

/// A fixed enumeration used in `before`/`after`, plus the pseudo-tag `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageTag {
    SamplesPresent,
    SamplesFinalized,
    FilesPresent,
    FilesFinalized,
    OutputPresent,
    OutputFinalized,
    OutputTransfered,
    NotificationsFinalized,
    NotificationsSent,
}

impl StageTag {
    pub const ALL: [StageTag; 9] = [
        StageTag::SamplesPresent,
        StageTag::SamplesFinalized,
        StageTag::FilesPresent,
        StageTag::FilesFinalized,
        StageTag::OutputPresent,
        StageTag::OutputFinalized,
        StageTag::OutputTransfered,
        StageTag::NotificationsFinalized,
        StageTag::NotificationsSent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageTag::SamplesPresent => "SAMPLES_PRESENT",
            StageTag::SamplesFinalized => "SAMPLES_FINALIZED",
            StageTag::FilesPresent => "FILES_PRESENT",
            StageTag::FilesFinalized => "FILES_FINALIZED",
            StageTag::OutputPresent => "OUTPUT_PRESENT",
            StageTag::OutputFinalized => "OUTPUT_FINALIZED",
            StageTag::OutputTransfered => "OUTPUT_TRANSFERED",
            StageTag::NotificationsFinalized => "NOTIFICATIONS_FINALIZED",
            StageTag::NotificationsSent => "NOTIFICATIONS_SENT",
        }
    }
}

impl fmt::Display for StageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed relative order of stage tags within one phase. Pre-hooks must
/// not depend on `OUTPUT_TRANSFERED`; post-hooks must not depend on
/// `SAMPLES_PRESENT` or either `FILES_*` tag — callers validate that
/// separately (see [`crate::ordering::resolve`]).
pub const PRE_STAGE_ORDER: [StageTag; 8] = [
    StageTag::SamplesPresent,
    StageTag::SamplesFinalized,
    StageTag::NotificationsFinalized,
    StageTag::NotificationsSent,
    StageTag::FilesPresent,
    StageTag::FilesFinalized,
    StageTag::OutputPresent,
    StageTag::OutputFinalized,
];

pub const POST_STAGE_ORDER: [StageTag; 6] = [
    StageTag::SamplesFinalized,
    StageTag::OutputPresent,
    StageTag::OutputFinalized,
    StageTag::OutputTransfered,
    StageTag::NotificationsFinalized,
    StageTag::NotificationsSent,
];

/// A `before`/`after` dependency: a named hook, a stage tag, or the
/// pseudo-tag meaning "every other hook in the phase".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dep {
    Name(String),
    Stage(StageTag),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookWhen {
    Pre,
    Post,
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    Complete,
    Unprocessed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Per {
    Session,
    Sample,
    Runner,
}

/// One hook declaration.
#[derive(Debug, Clone)]
pub struct Hook {
    pub name: String,
    pub label: String,
    pub when: HookWhen,
    /// `None` only ever makes sense for `when == Exception`, which has no
    /// condition gating.
    pub condition: Option<Condition>,
    pub per: Per,
    pub before: Vec<Dep>,
    pub after: Vec<Dep>,
}

impl Hook {
    pub fn new(name: impl Into<String>, when: HookWhen, per: Per) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            when,
            condition: match when {
                HookWhen::Exception => None,
                _ => Some(Condition::Always),
            },
            per,
            before: Vec::new(),
            after: Vec::new(),
        }
    }
}
