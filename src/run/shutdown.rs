//! Shutdown handler.
//!
//! Every run ends through a [`SafetyChain`]: normal completion, operator
//! abort, and the fault path all call [`SafetyChain::make_safe_all`]. The
//! chain visits every registered instrument even when an earlier one's
//! safe-idle sequence fails, so one stuck instrument never leaves another
//! energized. Errors are collected, not short-circuited.
//!
//! The chain is idempotent: the first call does the work, later calls
//! return immediately without issuing further hardware commands.

use crate::error::{RigError, RigResult};
use crate::instrument::SafeIdle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SafetyChain {
    instruments: Vec<(String, Arc<dyn SafeIdle>)>,
    completed: AtomicBool,
}

impl SafetyChain {
    pub fn new() -> Self {
        Self {
            instruments: Vec::new(),
            completed: AtomicBool::new(false),
        }
    }

    /// Register an instrument to be driven to safe idle at run end.
    /// Registration order is preserved; sources before heaters, so the
    /// sample is de-energized before temperature control lets go.
    pub fn register(&mut self, name: impl Into<String>, instrument: Arc<dyn SafeIdle>) {
        self.instruments.push((name.into(), instrument));
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Drive every registered instrument to safe idle. Never panics and
    /// never skips an instrument because an earlier one failed.
    pub async fn make_safe_all(&self) -> RigResult<()> {
        if self.completed.swap(true, Ordering::SeqCst) {
            debug!("shutdown already completed; nothing to do");
            return Ok(());
        }

        let mut errors = Vec::new();
        for (name, instrument) in &self.instruments {
            match instrument.make_safe().await {
                Ok(()) => debug!(instrument = %name, "safe idle"),
                Err(err) => {
                    warn!(instrument = %name, %err, "safe idle failed; continuing with remaining instruments");
                    errors.push(RigError::Command(err.context(format!(
                        "safe idle failed for '{name}'"
                    ))));
                }
            }
        }

        if errors.is_empty() {
            info!(instruments = self.instruments.len(), "all instruments safe");
            Ok(())
        } else {
            Err(RigError::ShutdownFailed(errors))
        }
    }
}

impl Default for SafetyChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{MockSource, MockTempController};

    #[tokio::test]
    async fn visits_every_instrument_even_after_a_failure() {
        let failing = Arc::new(MockSource::failing_on_safe_idle());
        let controller = Arc::new(MockTempController::starting_at(300.0));

        let mut chain = SafetyChain::new();
        chain.register("k2400", failing.clone());
        chain.register("lakeshore", controller.clone());

        let result = chain.make_safe_all().await;
        match result {
            Err(RigError::ShutdownFailed(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected ShutdownFailed, got {other:?}"),
        }
        // the heater still went off
        assert_eq!(controller.heater_range().await, 0);
        assert_eq!(controller.heater_commands(), 1);
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let source = Arc::new(MockSource::new());
        let mut chain = SafetyChain::new();
        chain.register("k2400", source.clone());

        chain.make_safe_all().await.unwrap();
        let commands_after_first = source.safe_idle_commands();
        assert!(commands_after_first > 0);

        chain.make_safe_all().await.unwrap();
        assert_eq!(source.safe_idle_commands(), commands_after_first);
    }
}
