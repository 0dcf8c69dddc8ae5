use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, Utc};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::{
    error::{PipelineError, Result},
    notify::{Alert, AlertKind, Notifier},
    sink::{Sink, StoredObject},
    source::WeatherSource,
    transform::transform_and_store,
};

pub const IS_WEATHER_API_READY: &str = "is_weather_api_ready";
pub const EXTRACT_WEATHER_DATA: &str = "extract_weather_data";
pub const TRANSFORM_LOAD_WEATHER_DATA: &str = "transform_load_weather_data";

/// Per-stage retry: `retries` extra attempts, fixed delay in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retries: 2, retry_delay: Duration::from_secs(120) }
    }
}

/// How long and how often the readiness stage polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorPolicy {
    pub poke_interval: Duration,
    pub timeout: Duration,
}

impl Default for SensorPolicy {
    fn default() -> Self {
        Self {
            poke_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// State carried through one invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub logical_date: DateTime<Utc>,
    payload: Option<serde_json::Value>,
    stored: Option<StoredObject>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, logical_date: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            logical_date,
            payload: None,
            stored: None,
        }
    }

    pub fn manual(now: DateTime<Utc>) -> Self {
        Self::new(format!("manual__{}", now.to_rfc3339_opts(SecondsFormat::Secs, true)), now)
    }

    pub fn scheduled(logical_date: DateTime<Utc>) -> Self {
        Self::new(
            format!("scheduled__{}", logical_date.to_rfc3339_opts(SecondsFormat::Secs, true)),
            logical_date,
        )
    }

    /// Start from an already-fetched document, e.g. one read from disk.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    pub fn stored(&self) -> Option<&StoredObject> {
        self.stored.as_ref()
    }
}

#[async_trait]
pub trait Stage: Send + Sync + Debug {
    fn id(&self) -> &'static str;
    async fn execute(&self, ctx: &mut RunContext) -> Result<()>;
}

/// Polls the source until it reports ready or the sensor times out.
#[derive(Debug, Clone)]
pub struct ReadinessCheck {
    source: Arc<dyn WeatherSource>,
    policy: SensorPolicy,
}

impl ReadinessCheck {
    pub fn new(source: Arc<dyn WeatherSource>, policy: SensorPolicy) -> Self {
        Self { source, policy }
    }
}

#[async_trait]
impl Stage for ReadinessCheck {
    fn id(&self) -> &'static str {
        IS_WEATHER_API_READY
    }

    async fn execute(&self, _ctx: &mut RunContext) -> Result<()> {
        let started = Instant::now();
        let mut pokes = 0u32;

        loop {
            pokes += 1;
            // A single poke may not outlive the sensor timeout.
            let remaining = self.policy.timeout.saturating_sub(started.elapsed());
            match timeout(remaining, self.source.probe()).await {
                Ok(Ok(true)) => {
                    debug!(pokes, "Weather API is ready");
                    return Ok(());
                }
                Ok(Ok(false)) => {}
                Ok(Err(err)) => {
                    warn!(error = %format!("{err:#}"), "Readiness probe failed");
                }
                Err(_) => {
                    warn!(pokes, ?remaining, "Readiness check timed out");
                }
            }

            let waited = started.elapsed();
            if waited >= self.policy.timeout {
                return Err(PipelineError::Unavailable { waited });
            }

            let remaining = self.policy.timeout - waited;
            sleep(self.policy.poke_interval.min(remaining)).await;
        }
    }
}

/// Fetches the raw document into the run context.
#[derive(Debug, Clone)]
pub struct ExtractWeather {
    source: Arc<dyn WeatherSource>,
}

impl ExtractWeather {
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Stage for ExtractWeather {
    fn id(&self) -> &'static str {
        EXTRACT_WEATHER_DATA
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let payload = self.source.fetch().await.map_err(PipelineError::Fetch)?;
        ctx.payload = Some(payload);
        Ok(())
    }
}

/// Wall-clock source for the transform stage.
pub type Clock = fn() -> NaiveDateTime;

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Flattens the fetched payload and writes it to the sink.
#[derive(Debug, Clone)]
pub struct TransformLoad {
    sink: Arc<dyn Sink>,
    clock: Clock,
}

impl TransformLoad {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink, clock: local_now }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl Stage for TransformLoad {
    fn id(&self) -> &'static str {
        TRANSFORM_LOAD_WEATHER_DATA
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let payload = ctx
            .payload
            .as_ref()
            .ok_or(PipelineError::MissingPayload { stage: TRANSFORM_LOAD_WEATHER_DATA })?;

        let stored = transform_and_store(payload, (self.clock)(), self.sink.as_ref()).await?;
        ctx.stored = Some(stored);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: &'static str,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub stages: Vec<StageOutcome>,
    pub stored: Option<StoredObject>,
}

/// A named, ordered list of stages with a shared retry policy.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn Stage>>,
    retry: RetryPolicy,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            retry: RetryPolicy::default(),
            notifier: None,
        }
    }

    /// Readiness check, then extract, then transform-and-load.
    pub fn weather(
        name: impl Into<String>,
        source: Arc<dyn WeatherSource>,
        sink: Arc<dyn Sink>,
        sensor: SensorPolicy,
    ) -> Self {
        Self::new(name)
            .then(ReadinessCheck::new(source.clone(), sensor))
            .then(ExtractWeather::new(source))
            .then(TransformLoad::new(sink))
    }

    /// Append a stage that runs after all existing ones.
    pub fn then(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_ids(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    /// Run every stage in order. The first stage to exhaust its retries fails the run.
    pub async fn run(&self, ctx: &mut RunContext) -> Result<RunReport> {
        info!(pipeline = %self.name, run_id = %ctx.run_id, "Starting run");
        let mut outcomes = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let attempts = self.run_stage(stage.as_ref(), ctx).await?;
            outcomes.push(StageOutcome { stage: stage.id(), attempts });
        }

        info!(pipeline = %self.name, run_id = %ctx.run_id, "Run succeeded");

        Ok(RunReport {
            run_id: ctx.run_id.clone(),
            stages: outcomes,
            stored: ctx.stored.clone(),
        })
    }

    async fn run_stage(&self, stage: &dyn Stage, ctx: &mut RunContext) -> Result<u32> {
        let max_attempts = self.retry.retries + 1;
        let mut attempt = 1;

        loop {
            debug!(stage = stage.id(), attempt, "Running stage");

            let err = match stage.execute(ctx).await {
                Ok(()) => {
                    info!(stage = stage.id(), attempt, "Stage succeeded");
                    return Ok(attempt);
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                error!(stage = stage.id(), attempt, error = %err, "Stage failed, giving up");
                self.alert(AlertKind::Failure, stage, ctx, attempt, &err).await;
                return Err(err);
            }

            warn!(
                stage = stage.id(),
                attempt,
                max_attempts,
                delay = ?self.retry.retry_delay,
                error = %err,
                "Stage failed, retrying"
            );
            self.alert(AlertKind::Retry, stage, ctx, attempt, &err).await;

            sleep(self.retry.retry_delay).await;
            attempt += 1;
        }
    }

    async fn alert(
        &self,
        kind: AlertKind,
        stage: &dyn Stage,
        ctx: &RunContext,
        attempt: u32,
        err: &PipelineError,
    ) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let alert = Alert {
            kind,
            pipeline: self.name.clone(),
            run_id: ctx.run_id.clone(),
            stage: stage.id(),
            attempt,
            error: err.to_string(),
        };

        if let Err(e) = notifier.notify(&alert).await {
            warn!(error = %format!("{e:#}"), "Failed to deliver alert");
        }
    }
}
