//! Checkpoint-gated stage runner shared by `setup` and `destroy`.
//!
//! A pipeline is an ordered slice of [`Stage`] descriptors. For each stage:
//! skip when its checkpoint is already recorded, otherwise run it, then
//! record the checkpoint and persist the store before moving on. A stage
//! that fails leaves no checkpoint behind, so the next invocation resumes
//! at that stage.

use std::cell::RefCell;

use crate::error::{DevxError, Result};
use crate::state::StateStore;
use crate::trace::traced;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

pub type StageFn<C> = fn(&mut C) -> Result<()>;

pub struct Stage<C> {
    /// Checkpoint recorded once the stage completes.
    pub name: &'static str,
    pub description: &'static str,
    /// Run only when this checkpoint is present; otherwise the stage is
    /// skipped without recording anything.
    pub requires: Option<&'static str>,
    pub run: StageFn<C>,
}

impl<C> Stage<C> {
    pub const fn new(name: &'static str, description: &'static str, run: StageFn<C>) -> Self {
        Self {
            name,
            description,
            requires: None,
            run,
        }
    }

    pub const fn requires(mut self, checkpoint: &'static str) -> Self {
        self.requires = Some(checkpoint);
        self
    }
}

/// Anything a stage runs against must expose the store it checkpoints into.
pub trait PipelineContext {
    fn store(&mut self) -> &mut StateStore;
    fn reporter(&self) -> &dyn Reporter;
}

// ---------------------------------------------------------------------------
// Reporter / Operator
// ---------------------------------------------------------------------------

/// Operator-facing progress output.
pub trait Reporter {
    fn stage_started(&self, name: &str, description: &str);
    fn stage_skipped(&self, name: &str, reason: &str);
    fn stage_finished(&self, name: &str);
    fn info(&self, message: &str);
}

/// Progress through `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn stage_started(&self, name: &str, description: &str) {
        tracing::info!(stage = name, "{description}");
    }

    fn stage_skipped(&self, name: &str, reason: &str) {
        tracing::info!(stage = name, reason, "skipped");
    }

    fn stage_finished(&self, name: &str) {
        tracing::info!(stage = name, "done");
    }

    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }
}

/// Collects progress lines, for tests.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    lines: RefCell<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

impl Reporter for RecordingReporter {
    fn stage_started(&self, name: &str, _description: &str) {
        self.lines.borrow_mut().push(format!("start {name}"));
    }

    fn stage_skipped(&self, name: &str, _reason: &str) {
        self.lines.borrow_mut().push(format!("skip {name}"));
    }

    fn stage_finished(&self, name: &str) {
        self.lines.borrow_mut().push(format!("done {name}"));
    }

    fn info(&self, message: &str) {
        self.lines.borrow_mut().push(message.to_string());
    }
}

/// Confirmation gate for destructive operations.
pub trait Operator {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Answers every prompt the same way (`--yes`, tests).
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Operator for FixedAnswer {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

/// Fail with [`DevxError::Aborted`] unless the operator agrees.
pub fn require_confirmation(operator: &dyn Operator, prompt: &str) -> Result<()> {
    if operator.confirm(prompt) {
        Ok(())
    } else {
        Err(DevxError::Aborted(prompt.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Run `stages` in order against `ctx`.
///
/// Errors are wrapped in [`DevxError::StageFailed`] naming the stage.
/// Persisting a checkpoint is part of the stage: if `save` fails the run
/// aborts too.
pub fn run_stages<C: PipelineContext>(ctx: &mut C, stages: &[Stage<C>]) -> Result<()> {
    for stage in stages {
        if ctx.store().has_checkpoint(stage.name) {
            ctx.reporter().stage_skipped(stage.name, "already completed");
            continue;
        }
        if let Some(required) = stage.requires {
            if !ctx.store().has_checkpoint(required) {
                ctx.reporter()
                    .stage_skipped(stage.name, &format!("'{required}' never completed"));
                continue;
            }
        }

        ctx.reporter().stage_started(stage.name, stage.description);
        traced(stage.name, || (stage.run)(ctx))
            .and_then(|()| {
                let store = ctx.store();
                store.set_checkpoint(stage.name);
                store.save()
            })
            .map_err(|e| DevxError::StageFailed {
                stage: stage.name.to_string(),
                source: Box::new(e),
            })?;
        ctx.reporter().stage_finished(stage.name);
    }
    Ok(())
}

/// Run a cleanup step whose failure must not abort the surrounding stage.
pub fn best_effort(what: &str, f: impl FnOnce() -> Result<()>) {
    if let Err(e) = f() {
        tracing::warn!(step = what, error = %e, "cleanup step failed, continuing");
    }
}
