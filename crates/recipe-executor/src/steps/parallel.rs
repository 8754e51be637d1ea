// `parallel`: concurrent fan-out with fail-fast, bounded concurrency, and
// launch delay (spec §4.5). Grounded directly on the teacher's
// `file_container_server.rs` `parallel_download`/`parallel_upload`
// (`Arc<Semaphore>` + one `tokio::spawn` per item + collect handles), with
// two additions the teacher's fire-and-collect loop doesn't need: a launch
// delay between spawns, and fail-fast — the first substep error cancels and
// abandons the rest rather than waiting for every handle.
//
// `tokio::task::JoinSet` is used instead of a `Vec<JoinHandle>` because
// dropping a `JoinSet` aborts every task still in it; returning early on the
// first failure therefore cancels the remaining in-flight substeps for
// free, with no separate bookkeeping of handles to abort (spec §4.5 step 5,
// §5 "Cancellation & timeouts").

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::StepRuntimeError;
use crate::recipe::StepSpec;
use crate::step::{dispatch_step, Step};

#[derive(Debug, Deserialize)]
struct ParallelConfig {
    substeps: Vec<StepSpec>,
    #[serde(default)]
    max_concurrency: usize,
    #[serde(default)]
    delay: f64,
}

struct ParallelStep {
    config: ParallelConfig,
}

pub fn construct(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
    let config: ParallelConfig = serde_json::from_value(value.clone())?;
    Ok(Box::new(ParallelStep { config }))
}

#[async_trait]
impl Step for ParallelStep {
    async fn execute(
        &self,
        ctx: &mut Context,
        cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError> {
        if self.config.substeps.is_empty() {
            return Ok(());
        }

        let effective_concurrency = if self.config.max_concurrency > 0 {
            self.config.max_concurrency
        } else {
            self.config.substeps.len()
        };
        let semaphore = Arc::new(Semaphore::new(effective_concurrency));
        let delay = Duration::from_secs_f64(self.config.delay.max(0.0));

        // Scoped to this step's own substeps: firing it must not reach back
        // up and cancel the parent recipe's remaining sequential steps.
        let fanout_cancel = cancel.child_token();

        let mut join_set: JoinSet<(usize, Result<(), StepRuntimeError>)> = JoinSet::new();

        for (index, spec) in self.config.substeps.iter().cloned().enumerate() {
            if fanout_cancel.is_cancelled() {
                break;
            }
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let permit = tokio::select! {
                biased;
                _ = fanout_cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("parallel semaphore is never closed")
                }
            };

            // Each substep gets its own clone: parallel branches never share
            // the parent Context (spec §4.5 step 3, §5 "shared-resource
            // policy"). Writes made inside a branch are not merged back.
            let mut branch_ctx = ctx.clone_deep();
            let branch_cancel = fanout_cancel.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let result = dispatch_step(index, &spec, &mut branch_ctx, &branch_cancel).await;
                (index, result)
            });

            if let Some(failure) = drain_completed(&mut join_set, &fanout_cancel) {
                return Err(failure);
            }
        }

        while let Some(joined) = join_set.join_next().await {
            if let Some(failure) = handle_joined(joined, &fanout_cancel) {
                return Err(failure);
            }
        }
        Ok(())
    }
}

/// Non-blocking drain of already-finished substeps, used between launches
/// so a fast failure is observed (and the launch loop stopped) before every
/// substep has necessarily been started.
fn drain_completed(
    join_set: &mut JoinSet<(usize, Result<(), StepRuntimeError>)>,
    fanout_cancel: &CancellationToken,
) -> Option<StepRuntimeError> {
    while let Some(joined) = join_set.try_join_next() {
        if let Some(failure) = handle_joined(joined, fanout_cancel) {
            return Some(failure);
        }
    }
    None
}

/// Inspects one joined task's outcome. Returns `Some(error)` the first time
/// a substep fails, after signalling `fanout_cancel` so siblings still
/// waiting on the semaphore or their own suspension points observe it.
/// Dropping the `JoinSet` (which happens as soon as the caller returns the
/// error) aborts every substep still in flight.
fn handle_joined(
    joined: Result<(usize, Result<(), StepRuntimeError>), tokio::task::JoinError>,
    fanout_cancel: &CancellationToken,
) -> Option<StepRuntimeError> {
    match joined {
        Ok((_, Ok(()))) => None,
        Ok((index, Err(source))) => {
            fanout_cancel.cancel();
            Some(StepRuntimeError::ParallelFailed {
                index,
                source: Box::new(source),
            })
        }
        Err(join_err) => {
            if join_err.is_cancelled() {
                None
            } else {
                fanout_cancel.cancel();
                Some(StepRuntimeError::Other(format!(
                    "parallel substep panicked: {join_err}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::register_step_type;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Once;
    use std::time::Instant;

    static COMPLETED: AtomicUsize = AtomicUsize::new(0);
    static PEAK_CONCURRENCY: AtomicUsize = AtomicUsize::new(0);
    static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

    #[derive(Deserialize)]
    struct SleepConfig {
        millis: u64,
        #[serde(default)]
        fail: bool,
    }

    struct SleepStep(SleepConfig);

    #[async_trait]
    impl Step for SleepStep {
        async fn execute(
            &self,
            _ctx: &mut Context,
            _cancel: &CancellationToken,
        ) -> Result<(), StepRuntimeError> {
            let in_flight = IN_FLIGHT.fetch_add(1, Ordering::SeqCst) + 1;
            PEAK_CONCURRENCY.fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.0.millis)).await;
            IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
            COMPLETED.fetch_add(1, Ordering::SeqCst);
            if self.0.fail {
                Err(StepRuntimeError::Other("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn construct_sleep(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
        let config: SleepConfig = serde_json::from_value(value.clone())?;
        Ok(Box::new(SleepStep(config)))
    }

    fn register_sleep_step() {
        static ONCE: Once = Once::new();
        ONCE.call_once(|| {
            register_step_type("__test_sleep", construct_sleep);
        });
    }

    #[tokio::test]
    async fn all_succeed_runs_every_substep_against_a_clone() {
        register_sleep_step();
        COMPLETED.store(0, Ordering::SeqCst);
        let step = construct(&json!({
            "substeps": [
                {"type": "__test_sleep", "config": {"millis": 5}},
                {"type": "__test_sleep", "config": {"millis": 5}},
                {"type": "__test_sleep", "config": {"millis": 5}},
            ],
        }))
        .unwrap();
        let mut ctx = Context::empty();
        ctx.set("shared", json!("untouched"));
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(COMPLETED.load(Ordering::SeqCst), 3);
        // No substep writes anything into the parent context.
        assert_eq!(ctx.get("shared"), Some(&json!("untouched")));
        assert_eq!(ctx.len(), 1);
    }

    #[tokio::test]
    async fn fail_fast_returns_long_before_the_slow_siblings_finish() {
        register_sleep_step();
        COMPLETED.store(0, Ordering::SeqCst);
        let step = construct(&json!({
            "substeps": [
                {"type": "__test_sleep", "config": {"millis": 200}},
                {"type": "__test_sleep", "config": {"millis": 10, "fail": true}},
                {"type": "__test_sleep", "config": {"millis": 200}},
            ],
        }))
        .unwrap();
        let mut ctx = Context::empty();
        let start = Instant::now();
        let err = step
            .execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(
            err,
            StepRuntimeError::ParallelFailed { index: 1, .. }
        ));
        assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");
        // The slow siblings never reached their own completion increment.
        assert_eq!(COMPLETED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn max_concurrency_caps_overlap() {
        register_sleep_step();
        PEAK_CONCURRENCY.store(0, Ordering::SeqCst);
        IN_FLIGHT.store(0, Ordering::SeqCst);
        let step = construct(&json!({
            "substeps": [
                {"type": "__test_sleep", "config": {"millis": 20}},
                {"type": "__test_sleep", "config": {"millis": 20}},
                {"type": "__test_sleep", "config": {"millis": 20}},
                {"type": "__test_sleep", "config": {"millis": 20}},
            ],
            "max_concurrency": 2,
        }))
        .unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert!(PEAK_CONCURRENCY.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_substeps_is_a_no_op() {
        let step = construct(&json!({"substeps": []})).unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
    }
}
