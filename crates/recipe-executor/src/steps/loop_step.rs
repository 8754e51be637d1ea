// `loop`: iteration over a sequence or mapping with bounded concurrency,
// per-item context isolation, and error aggregation (spec §4.6). Shares its
// concurrency shape with `parallel` (`Arc<Semaphore>` + `JoinSet`, grounded
// on the teacher's `file_container_server.rs` parallel-download/-upload
// pair), but adds what `parallel` deliberately omits: an aggregated
// `result_key` output, input-order preservation regardless of completion
// order, and an optional non-fail-fast mode that collects per-item errors
// instead of aborting (spec §9's open-question resolution: per-item writes
// land only in `result_key`, never directly into the parent context).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{LoopTypeError, StepRuntimeError};
use crate::recipe::StepSpec;
use crate::step::{run_sequence, Step};

#[derive(Debug, Deserialize)]
struct LoopConfig {
    items: String,
    item_key: String,
    #[serde(default)]
    substeps: Vec<StepSpec>,
    result_key: String,
    #[serde(default = "default_max_concurrency")]
    max_concurrency: usize,
    #[serde(default)]
    delay: f64,
    #[serde(default = "default_true")]
    fail_fast: bool,
}

fn default_max_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

struct LoopStep {
    config: LoopConfig,
}

pub fn construct(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
    let config: LoopConfig = serde_json::from_value(value.clone())?;
    Ok(Box::new(LoopStep { config }))
}

/// An item's position in the input collection: a sequence index or a
/// mapping key. Carried alongside each iteration's outcome so results land
/// back at the right slot and error records can name the offending item
/// (spec §4.6 step 2, §8 scenario 3).
#[derive(Debug, Clone)]
enum ItemLabel {
    Index(usize),
    Key(String),
}

impl ItemLabel {
    fn as_json(&self) -> Value {
        match self {
            ItemLabel::Index(i) => json!(i),
            ItemLabel::Key(k) => json!(k),
        }
    }
}

impl std::fmt::Display for ItemLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemLabel::Index(i) => write!(f, "{i}"),
            ItemLabel::Key(k) => write!(f, "{k}"),
        }
    }
}

type IterationOutcome = (usize, ItemLabel, Result<Value, StepRuntimeError>);

#[async_trait]
impl Step for LoopStep {
    async fn execute(
        &self,
        ctx: &mut Context,
        cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError> {
        let collection = ctx
            .resolve_path(&self.config.items)
            .ok_or_else(|| LoopTypeError::MissingArtifact(self.config.items.clone()))?;

        let is_array = matches!(collection, Value::Array(_));
        let items: Vec<(ItemLabel, Value)> = match collection {
            Value::Array(values) => values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (ItemLabel::Index(i), v))
                .collect(),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (ItemLabel::Key(k), v))
                .collect(),
            _ => return Err(LoopTypeError::NotACollection.into()),
        };

        if items.is_empty() {
            ctx.set(
                self.config.result_key.clone(),
                if is_array {
                    Value::Array(Vec::new())
                } else {
                    Value::Object(Map::new())
                },
            );
            return Ok(());
        }

        let labels: Vec<ItemLabel> = items.iter().map(|(label, _)| label.clone()).collect();
        let effective_concurrency = self.config.max_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(effective_concurrency));
        let delay = Duration::from_secs_f64(self.config.delay.max(0.0));
        let fanout_cancel = cancel.child_token();
        let substeps = Arc::new(self.config.substeps.clone());
        let item_key = self.config.item_key.clone();
        let fail_fast = self.config.fail_fast;

        let mut join_set: JoinSet<IterationOutcome> = JoinSet::new();
        let mut results: Vec<Option<Value>> = vec![None; items.len()];
        let mut errors: Vec<(ItemLabel, String)> = Vec::new();

        for (position, (label, value)) in items.into_iter().enumerate() {
            if fail_fast && fanout_cancel.is_cancelled() {
                break;
            }
            if position > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let permit = if fail_fast {
                tokio::select! {
                    biased;
                    _ = fanout_cancel.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => {
                        permit.expect("loop semaphore is never closed")
                    }
                }
            } else {
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("loop semaphore is never closed")
            };

            let mut branch_ctx = ctx.clone_deep();
            branch_ctx.set(item_key.clone(), value);
            match &label {
                ItemLabel::Index(i) => branch_ctx.set("__index", json!(i)),
                ItemLabel::Key(k) => branch_ctx.set("__key", json!(k)),
            }
            let branch_cancel = fanout_cancel.clone();
            let branch_substeps = substeps.clone();
            let branch_item_key = item_key.clone();
            let branch_label = label;

            join_set.spawn(async move {
                let _permit = permit;
                let mut branch_ctx = branch_ctx;
                let outcome = run_sequence(&branch_substeps, &mut branch_ctx, &branch_cancel)
                    .await
                    .map(|()| branch_ctx.get(&branch_item_key).cloned().unwrap_or(Value::Null));
                (position, branch_label, outcome)
            });

            if fail_fast {
                while let Some(joined) = join_set.try_join_next() {
                    if let Some(err) =
                        record(joined, &mut results, &mut errors, &fanout_cancel, fail_fast)
                    {
                        return Err(err);
                    }
                }
            }
        }

        while let Some(joined) = join_set.join_next().await {
            if let Some(err) = record(joined, &mut results, &mut errors, &fanout_cancel, fail_fast)
            {
                return Err(err);
            }
        }

        if is_array {
            let aggregated: Vec<Value> = results.into_iter().map(|v| v.unwrap_or(Value::Null)).collect();
            ctx.set(self.config.result_key.clone(), Value::Array(aggregated));
        } else {
            let mut map = Map::new();
            for (label, value) in labels.into_iter().zip(results.into_iter()) {
                if let (ItemLabel::Key(key), Some(value)) = (label, value) {
                    map.insert(key, value);
                }
            }
            ctx.set(self.config.result_key.clone(), Value::Object(map));
        }

        if !fail_fast && !errors.is_empty() {
            let records: Vec<Value> = errors
                .into_iter()
                .map(|(label, message)| {
                    json!({ "index_or_key": label.as_json(), "error": message })
                })
                .collect();
            ctx.set(format!("{}__errors", self.config.result_key), Value::Array(records));
        }

        Ok(())
    }
}

/// Records one finished iteration's outcome into `results`/`errors`.
/// Under `fail_fast`, the first error cancels `fanout_cancel` (so siblings
/// still queued or waiting on a suspension point observe it) and is
/// returned to the caller, which aborts the remaining in-flight iterations
/// by dropping the `JoinSet`. Otherwise every outcome is recorded and `None`
/// is always returned, so the loop runs every iteration to completion.
fn record(
    joined: Result<IterationOutcome, tokio::task::JoinError>,
    results: &mut [Option<Value>],
    errors: &mut Vec<(ItemLabel, String)>,
    fanout_cancel: &CancellationToken,
    fail_fast: bool,
) -> Option<StepRuntimeError> {
    match joined {
        Ok((position, _label, Ok(value))) => {
            results[position] = Some(value);
            None
        }
        Ok((_, label, Err(err))) => {
            if fail_fast {
                fanout_cancel.cancel();
                Some(StepRuntimeError::LoopIteration {
                    key: label.to_string(),
                    source: Box::new(err),
                })
            } else {
                errors.push((label, err.to_string()));
                None
            }
        }
        Err(join_err) => {
            if join_err.is_cancelled() {
                None
            } else if fail_fast {
                fanout_cancel.cancel();
                Some(StepRuntimeError::Other(format!(
                    "loop iteration panicked: {join_err}"
                )))
            } else {
                errors.push((ItemLabel::Key("?".to_string()), join_err.to_string()));
                None
            }
        }
    }
}
