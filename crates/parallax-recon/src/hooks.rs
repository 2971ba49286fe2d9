use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ReconError, Stage};

/// A shared flag asking a running pipeline to stop.
///
/// Clones share the flag, so one token can be handed to another thread and
/// cancelled from there while the pipeline polls it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Progress reporting and cancellation for a reconstruction run.
///
/// The progress callback receives the running stage and its completion in
/// `[0, 1]`. It fires at stage entry and exit and between the work items
/// of a stage, so it must be cheap and thread safe. The token is polled at
/// stage boundaries and inside the iterative solvers.
#[derive(Default)]
pub struct Hooks {
    progress: Option<Box<dyn Fn(Stage, f32) + Send + Sync>>,
    cancel: CancelToken,
}

impl Hooks {
    /// Hooks that report nothing and never cancel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a progress callback.
    pub fn with_progress(
        mut self,
        callback: impl Fn(Stage, f32) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Install a cancellation token shared with the caller.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Whether the attached token has been cancelled.
    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report stage progress, clamped to `[0, 1]`.
    pub(crate) fn report(&self, stage: Stage, fraction: f32) {
        if let Some(callback) = &self.progress {
            callback(stage, fraction.clamp(0.0, 1.0));
        }
    }

    /// Fail with [`ReconError::Cancelled`] when the token is set.
    pub(crate) fn check(&self, stage: Stage) -> Result<(), ReconError> {
        if self.cancelled() {
            Err(ReconError::Cancelled { stage })
        } else {
            Ok(())
        }
    }

    /// Poll the token and mark the stage as entered.
    pub(crate) fn enter(&self, stage: Stage) -> Result<(), ReconError> {
        self.check(stage)?;
        log::debug!("stage {stage} started");
        self.report(stage, 0.0);
        Ok(())
    }

    /// Mark the stage as finished.
    pub(crate) fn leave(&self, stage: Stage) {
        self.report(stage, 1.0);
        log::debug!("stage {stage} finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn check_carries_the_stage() {
        let token = CancelToken::new();
        token.cancel();
        let hooks = Hooks::new().with_cancel(token);
        let err = hooks.check(Stage::Surface).unwrap_err();
        assert!(matches!(
            err,
            ReconError::Cancelled {
                stage: Stage::Surface
            }
        ));
    }

    #[test]
    fn progress_is_clamped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hooks =
            Hooks::new().with_progress(move |stage, f| sink.lock().unwrap().push((stage, f)));

        hooks.report(Stage::Bake, 1.5);
        hooks.report(Stage::Bake, -0.5);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), [(Stage::Bake, 1.0), (Stage::Bake, 0.0)]);
    }
}
