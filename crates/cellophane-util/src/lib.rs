//! Small, dependency-light primitives shared by every other Cellophane crate:
//! a wall-clock timestamp type, duration (de)serialization helpers that accept
//! either a plain integer (seconds) or a humantime string, and a stable
//! content-fingerprint helper used by the checkpoint store.
//!
//! Modeled on `shipper-duration`'s role in the teacher workspace: a tiny leaf
//! crate with no intra-workspace dependencies that every other crate can pull
//! in without pulling in anything else.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A wall-clock instant, stored as whole seconds since the Unix epoch.
///
/// Sub-second precision is not needed anywhere in the engine (checkpoints key
/// on file size and mtime at one-second granularity, same as most
/// filesystems expose through `std::fs::Metadata`), so we keep this as a
/// plain `u64` rather than reaching for `chrono`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Build a timestamp from a raw epoch-seconds value.
    pub fn from_epoch_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        Self(secs)
    }

    pub fn epoch_secs(self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, other: Timestamp) -> Duration {
        Duration::from_secs(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(value: SystemTime) -> Self {
        let secs = value
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        Self(secs)
    }
}

/// Serializes a `Duration` as a humantime string (`"30s"`, `"2m"`), matching
/// the wire format the teacher's retry policy uses for timeouts.
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// Deserializes a `Duration` from either a humantime string or a plain
/// integer number of seconds, so existing config files that predate the
/// humantime format keep working.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrSecs {
        String(String),
        Secs(u64),
    }

    match StringOrSecs::deserialize(deserializer)? {
        StringOrSecs::Secs(secs) => Ok(Duration::from_secs(secs)),
        StringOrSecs::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}"))),
    }
}

/// Computes a stable, hex-encoded SHA-256 fingerprint over an arbitrary set
/// of byte fragments, joining them with a separator so that `("ab", "c")`
/// never collides with `("a", "bc")`.
///
/// Used by the checkpoint store to fingerprint `(args, kwargs, label, file
/// stats)` tuples, the same way `shipper::plan::compute_plan_id` hashes a
/// canonical encoding of the release plan.
pub fn stable_fingerprint<I, S>(fragments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for fragment in fragments {
        hasher.update(fragment.as_ref());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
