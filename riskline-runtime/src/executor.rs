//! DAG executor
//!
//! Runs a compiled [`ExecutionPlan`]. Independent stages are dispatched
//! concurrently onto the blocking pool, gated by a [`ConcurrencyLimiter`].
//! Each stage is looked up in the [`ArtifactCache`] before it runs, and
//! transient failures are retried according to the [`RetryPolicy`].
//!
//! A failure marks the stage and every transitive dependent `failed`;
//! branches that do not depend on it keep running. Cancellation is checked
//! whenever a stage becomes ready: in-flight stages finish and stages that
//! never started are failed with class `cancelled`.

use crate::artifact::StageOutput;
use crate::cache::{ArtifactCache, CacheKey};
use crate::compiler::ExecutionPlan;
use crate::concurrency::ConcurrencyLimiter;
use crate::metrics::{RUNS_TOTAL, STAGE_DURATION, STAGE_EXECUTIONS_TOTAL, STAGE_RETRIES_TOTAL};
use crate::retry::RetryPolicy;
use crate::run::PipelineRun;
use crate::stage::{CancellationFlag, FailureClass, Stage, StageContext, StageError, StageInputs};
use crate::state_machine::{RunState, StageState};
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Executor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Time budget of a single stage attempt
    pub stage_timeout_secs: u64,

    pub retry: RetryPolicy,

    /// Concurrent stage limit; defaults to the available parallelism
    pub max_parallel: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 600,
            retry: RetryPolicy::default(),
            max_parallel: None,
        }
    }
}

impl ExecutorConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stage_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "stage_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_parallel == Some(0) {
            return Err(Error::InvalidConfig(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        self.retry.validate()
    }
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Opaque compute parameters recorded on the run
    pub compute: BTreeMap<String, serde_json::Value>,
    pub cancel: CancellationFlag,
}

/// Executes compiled pipelines
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    cache: Arc<ArtifactCache>,
    limiter: ConcurrencyLimiter,
    config: ExecutorConfig,
}

impl PipelineExecutor {
    pub fn new(config: ExecutorConfig, cache: Arc<ArtifactCache>) -> Result<Self> {
        config.validate()?;
        let limiter = match config.max_parallel {
            Some(n) => ConcurrencyLimiter::new(n),
            None => ConcurrencyLimiter::from_available_parallelism(),
        };
        Ok(Self {
            cache,
            limiter,
            config,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Execute every stage of the plan and return the finished run
    #[instrument(
        name = "executor.execute",
        skip(self, plan, options),
        fields(pipeline = %plan.pipeline(), stages = plan.len(), run_id = tracing::field::Empty)
    )]
    pub async fn execute(&self, plan: &ExecutionPlan, options: RunOptions) -> Result<PipelineRun> {
        let mut run = PipelineRun::new(
            plan.pipeline(),
            plan.order().iter().filter_map(|name| {
                plan.stage(name)
                    .map(|def| (name.clone(), def.stage.kind().to_string()))
            }),
            options.compute.clone(),
        );
        tracing::Span::current().record("run_id", tracing::field::display(run.id));
        info!(run_id = %run.id, "Starting pipeline run");

        let mut remaining: HashMap<&str, usize> = HashMap::new();
        let mut ready: VecDeque<String> = VecDeque::new();
        for name in plan.order() {
            let def = plan
                .stage(name)
                .ok_or_else(|| Error::Internal(format!("plan lost stage '{}'", name)))?;
            remaining.insert(name.as_str(), def.depends_on.len());
            if def.depends_on.is_empty() {
                ready.push_back(name.clone());
            }
        }

        let mut outputs: HashMap<String, Arc<StageOutput>> = HashMap::new();
        let mut in_flight: JoinSet<StageOutcome> = JoinSet::new();

        loop {
            if options.cancel.is_cancelled() {
                if !ready.is_empty() {
                    debug!(skipped = ready.len(), "Run cancelled; not dispatching ready stages");
                    ready.clear();
                }
            } else {
                while let Some(name) = ready.pop_front() {
                    let task = self.prepare(plan, &name, &outputs, &options, run.id)?;
                    run.record_mut(&name)?
                        .machine
                        .transition(StageState::Running)?;
                    in_flight.spawn(task.execute());
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let outcome =
                joined.map_err(|e| Error::Internal(format!("stage task aborted: {}", e)))?;
            self.apply(plan, &mut run, &mut remaining, &mut ready, &mut outputs, outcome)?;
        }

        if options.cancel.is_cancelled() {
            for name in plan.order() {
                let record = run.record_mut(name)?;
                if record.state() == StageState::Pending {
                    record.machine.transition(StageState::Failed)?;
                    record.error = Some(StageError::cancelled());
                    record.finished_at = Some(Utc::now());
                }
            }
        }

        run.state = final_state(&run);
        run.finished_at = Some(Utc::now());
        RUNS_TOTAL.with_label_values(&[run.state.as_str()]).inc();

        match run.state {
            RunState::Succeeded => info!(
                run_id = %run.id,
                cached = run.count(StageState::Cached),
                succeeded = run.count(StageState::Succeeded),
                "Pipeline run succeeded"
            ),
            state => warn!(
                run_id = %run.id,
                state = %state,
                failed = run.count(StageState::Failed),
                "Pipeline run did not succeed"
            ),
        }
        Ok(run)
    }

    fn prepare(
        &self,
        plan: &ExecutionPlan,
        name: &str,
        outputs: &HashMap<String, Arc<StageOutput>>,
        options: &RunOptions,
        run_id: Uuid,
    ) -> Result<StageTask> {
        let def = plan
            .stage(name)
            .ok_or_else(|| Error::Internal(format!("plan lost stage '{}'", name)))?;

        let mut inputs = BTreeMap::new();
        for dep in &def.depends_on {
            let output = outputs.get(dep).ok_or_else(|| {
                Error::InvalidState(format!("stage '{}' dispatched before '{}'", name, dep))
            })?;
            inputs.insert(dep.clone(), Arc::clone(output));
        }

        Ok(StageTask {
            run_id,
            name: name.to_string(),
            stage: Arc::clone(&def.stage),
            inputs: StageInputs::new(inputs),
            cache: Arc::clone(&self.cache),
            limiter: self.limiter.clone(),
            retry: self.config.retry.clone(),
            timeout: self.config.stage_timeout(),
            cancel: options.cancel.clone(),
        })
    }

    fn apply(
        &self,
        plan: &ExecutionPlan,
        run: &mut PipelineRun,
        remaining: &mut HashMap<&str, usize>,
        ready: &mut VecDeque<String>,
        outputs: &mut HashMap<String, Arc<StageOutput>>,
        outcome: StageOutcome,
    ) -> Result<()> {
        let name = outcome.name;
        let record = run.record_mut(&name)?;
        record.attempts = outcome.attempts;
        record.cache_key = outcome.cache_key.map(|k| k.fingerprint().to_hex());
        record.finished_at = Some(Utc::now());

        match outcome.result {
            Ok(Completed { output, cached }) => {
                let state = if cached {
                    StageState::Cached
                } else {
                    StageState::Succeeded
                };
                record.machine.transition(state)?;
                record.output_fingerprint = Some(output.fingerprint);
                STAGE_EXECUTIONS_TOTAL
                    .with_label_values(&[name.as_str(), state.as_str()])
                    .inc();
                debug!(stage = %name, state = %state, "Stage finished");

                outputs.insert(name.clone(), output);
                for dependent in plan.dependents(&name) {
                    if let Some(count) = remaining.get_mut(dependent.as_str()) {
                        *count = count.saturating_sub(1);
                        if *count == 0 && run.stage_state(dependent) == Some(StageState::Pending) {
                            ready.push_back(dependent.clone());
                        }
                    }
                }
            }
            Err(err) => {
                record.machine.transition(StageState::Failed)?;
                error!(stage = %name, class = %err.class, error = %err.message, "Stage failed");
                record.error = Some(err);
                STAGE_EXECUTIONS_TOTAL
                    .with_label_values(&[name.as_str(), StageState::Failed.as_str()])
                    .inc();

                for dependent in plan.transitive_dependents(&name) {
                    let record = run.record_mut(&dependent)?;
                    if record.state() == StageState::Pending {
                        record.machine.transition(StageState::Failed)?;
                        record.error = Some(StageError::upstream(&name));
                        record.finished_at = Some(Utc::now());
                    }
                }
            }
        }
        Ok(())
    }
}

fn final_state(run: &PipelineRun) -> RunState {
    let mut cancelled = false;
    let mut failed = false;
    for record in run.stages.values() {
        if record.state() != StageState::Failed {
            continue;
        }
        match record.error.as_ref().map(|e| e.class) {
            Some(FailureClass::Cancelled) => cancelled = true,
            _ => failed = true,
        }
    }
    if cancelled {
        RunState::Cancelled
    } else if failed {
        RunState::Failed
    } else {
        RunState::Succeeded
    }
}

struct Completed {
    output: Arc<StageOutput>,
    cached: bool,
}

struct StageOutcome {
    name: String,
    attempts: u32,
    cache_key: Option<CacheKey>,
    result: std::result::Result<Completed, StageError>,
}

/// Everything a spawned stage needs, owned
struct StageTask {
    run_id: Uuid,
    name: String,
    stage: Arc<dyn Stage>,
    inputs: StageInputs,
    cache: Arc<ArtifactCache>,
    limiter: ConcurrencyLimiter,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancellationFlag,
}

impl StageTask {
    async fn execute(self) -> StageOutcome {
        let started = Instant::now();
        let mut outcome = StageOutcome {
            name: self.name.clone(),
            attempts: 0,
            cache_key: None,
            result: Err(StageError::internal("stage never attempted")),
        };

        let _permit = match self.limiter.acquire_for(&self.name).await {
            Ok(permit) => permit,
            Err(e) => {
                outcome.result = Err(StageError::internal(e.to_string()));
                return outcome;
            }
        };

        loop {
            outcome.attempts += 1;
            let attempt = outcome.attempts;
            let result = self.attempt(attempt, &mut outcome.cache_key).await;

            match result {
                Err(err)
                    if err.is_retryable()
                        && self.retry.should_retry(attempt)
                        && !self.cancel.is_cancelled() =>
                {
                    let delay = self.retry.calculate_delay(attempt);
                    warn!(
                        stage = %self.name,
                        attempt,
                        class = %err.class,
                        delay_ms = delay.as_millis() as u64,
                        error = %err.message,
                        "Retrying stage after transient failure"
                    );
                    STAGE_RETRIES_TOTAL
                        .with_label_values(&[self.name.as_str(), err.class.as_str()])
                        .inc();
                    tokio::time::sleep(delay).await;
                }
                result => {
                    outcome.result = result;
                    break;
                }
            }
        }

        STAGE_DURATION
            .with_label_values(&[self.name.as_str()])
            .observe(started.elapsed().as_secs_f64());
        outcome
    }

    async fn attempt(
        &self,
        attempt: u32,
        cache_key: &mut Option<CacheKey>,
    ) -> std::result::Result<Completed, StageError> {
        let config = self.stage.config_fingerprint()?;
        let key = CacheKey::compute(&self.name, &self.inputs, &config);
        *cache_key = Some(key);

        let mut stale = false;
        if let Some(output) = self.cache.lookup(&key).await? {
            if self.stage.is_current(&self.inputs, &output.artifact) {
                debug!(stage = %self.name, key = %key, "Cache hit");
                return Ok(Completed {
                    output,
                    cached: true,
                });
            }
            warn!(stage = %self.name, key = %key, "Cached output is stale, rerunning");
            stale = true;
        }

        let ctx = StageContext {
            run_id: self.run_id,
            stage: self.name.clone(),
            attempt,
            cancel: self.cancel.clone(),
        };
        let stage = Arc::clone(&self.stage);
        let inputs = self.inputs.clone();
        let handle = tokio::task::spawn_blocking(move || stage.run(&ctx, &inputs));

        let artifact = match tokio::time::timeout(self.timeout, handle).await {
            Err(_) => return Err(StageError::timeout(&self.name, self.timeout)),
            Ok(Err(join)) => {
                return Err(StageError::internal(format!(
                    "stage '{}' panicked: {}",
                    self.name, join
                )))
            }
            Ok(Ok(result)) => result?,
        };

        let output = if stale {
            self.cache.replace(key, StageOutput::new(artifact)).await?
        } else {
            self.cache.insert(key, StageOutput::new(artifact)).await?
        };
        Ok(Completed {
            output,
            cached: false,
        })
    }
}
