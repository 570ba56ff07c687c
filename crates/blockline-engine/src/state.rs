//! Shared run state: per-stage completion flags and first-error-wins messages.
//!
//! One [`RunState`] exists per run and is cloned into every stage worker.
//! All reads and writes go through a single lock. Flags only ever move from
//! `false` to `true`; an error message, once set, is never replaced.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::PipelineError;

/// One independently-failing unit of pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the shared flags and error messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessState {
    pub ext_is_end: bool,
    pub transformer_is_end: bool,
    pub loader_is_end: bool,
    pub ext_error_message: Option<String>,
    pub transformer_error_message: Option<String>,
    pub loader_error_message: Option<String>,
}

impl ProcessState {
    #[must_use]
    pub fn is_end(&self, stage: Stage) -> bool {
        match stage {
            Stage::Extract => self.ext_is_end,
            Stage::Transform => self.transformer_is_end,
            Stage::Load => self.loader_is_end,
        }
    }

    #[must_use]
    pub fn error_message(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Extract => self.ext_error_message.as_deref(),
            Stage::Transform => self.transformer_error_message.as_deref(),
            Stage::Load => self.loader_error_message.as_deref(),
        }
    }

    fn end_flag(&mut self, stage: Stage) -> &mut bool {
        match stage {
            Stage::Extract => &mut self.ext_is_end,
            Stage::Transform => &mut self.transformer_is_end,
            Stage::Load => &mut self.loader_is_end,
        }
    }

    fn error_slot(&mut self, stage: Stage) -> &mut Option<String> {
        match stage {
            Stage::Extract => &mut self.ext_error_message,
            Stage::Transform => &mut self.transformer_error_message,
            Stage::Load => &mut self.loader_error_message,
        }
    }
}

/// Cloneable handle to the lock-guarded [`ProcessState`] of one run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    inner: Arc<Mutex<ProcessState>>,
}

impl RunState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ProcessState>, PipelineError> {
        self.inner.lock().map_err(|_| {
            PipelineError::Infrastructure(anyhow::anyhow!("run state lock poisoned"))
        })
    }

    /// # Errors
    ///
    /// Returns `Infrastructure` if the state lock is poisoned.
    pub fn is_end(&self, stage: Stage) -> Result<bool, PipelineError> {
        Ok(self.lock()?.is_end(stage))
    }

    /// Whether every stage in `stages` has ended.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` if the state lock is poisoned.
    pub fn all_ended(&self, stages: &[Stage]) -> Result<bool, PipelineError> {
        let state = self.lock()?;
        Ok(stages.iter().all(|s| state.is_end(*s)))
    }

    /// Set the completion flag of `stage`. Setting it twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` if the state lock is poisoned.
    pub fn mark_end(&self, stage: Stage) -> Result<(), PipelineError> {
        *self.lock()?.end_flag(stage) = true;
        Ok(())
    }

    /// Record a stage failure and end the stage. Returns `false` when an
    /// earlier message was already recorded for that stage, in which case
    /// `message` is discarded.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` if the state lock is poisoned.
    pub fn record_failure(&self, stage: Stage, message: impl Into<String>) -> Result<bool, PipelineError> {
        let mut state = self.lock()?;
        *state.end_flag(stage) = true;
        let slot = state.error_slot(stage);
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(message.into());
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns `Infrastructure` if the state lock is poisoned.
    pub fn snapshot(&self) -> Result<ProcessState, PipelineError> {
        Ok(self.lock()?.clone())
    }
}
