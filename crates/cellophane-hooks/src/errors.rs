//! Shared hook-execution error type, consumed by both the dispatcher (which
//! runs hooks) and the runner (which invokes per-runner hooks through a
//! dispatcher-supplied callback).

#[derive(Debug, thiserror::Error, Clone)]
#[error("Hook {name} failed: {message}")]
pub struct HookFailure {
    pub name: String,
    pub message: String,
}

impl HookFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}
