use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tracing::{error, info};

use crate::{
    config::Config,
    error::PipelineError,
    notify::EmailNotifier,
    pipeline::{Pipeline, RunContext, RunReport},
    schedule::Schedule,
    sink::{ObjectStoreSink, Sink},
    source::{OpenWeatherSource, WeatherSource},
};

/// Build the three-stage weather pipeline described by `config`.
pub fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let api_key = config.api_key()?;
    let source: Arc<dyn WeatherSource> =
        Arc::new(OpenWeatherSource::new(&config.api, &config.pipeline.city, api_key)?);
    let sink = build_sink(config)?;

    Ok(Pipeline::weather(&config.pipeline.name, source, sink, config.sensor_policy())
        .with_retry(config.retry_policy())
        .with_notifier(Arc::new(EmailNotifier::new(config.alerts.clone()))))
}

pub fn build_sink(config: &Config) -> Result<Arc<dyn Sink>> {
    let sink = ObjectStoreSink::from_url(&config.sink.url)
        .with_context(|| format!("Failed to open sink '{}'", config.sink.url))?;
    Ok(Arc::new(sink))
}

/// Run the pipeline once, right now.
pub async fn trigger(pipeline: &Pipeline) -> Result<RunReport, PipelineError> {
    let mut ctx = RunContext::manual(Utc::now());
    pipeline.run(&mut ctx).await
}

/// Run the pipeline on `schedule` until `shutdown` resolves.
///
/// Runs never overlap and missed intervals are not caught up. A failed run is
/// logged and the loop moves on to the next interval.
pub async fn run_on_schedule<F>(
    pipeline: &Pipeline,
    schedule: Schedule,
    start_date: Option<NaiveDate>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut next = schedule.first_fire(Utc::now(), start_date);

    while let Some(fire_at) = next {
        info!(pipeline = pipeline.name(), %schedule, next_run = %fire_at, "Waiting for next run");

        let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping scheduler");
                return Ok(());
            }
        }

        let mut ctx = RunContext::scheduled(fire_at);
        let run_id = ctx.run_id.clone();
        let outcome = tokio::select! {
            outcome = pipeline.run(&mut ctx) => outcome,
            _ = &mut shutdown => {
                info!(%run_id, "Shutdown requested during run, stopping scheduler");
                return Ok(());
            }
        };

        match outcome {
            Ok(report) => {
                if let Some(stored) = &report.stored {
                    info!(run_id = %report.run_id, location = %stored.location, "Run stored");
                }
            }
            Err(err) => error!(%run_id, error = %err, "Run failed"),
        }

        next = schedule.next_after(Utc::now().max(fire_at));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_pipeline_requires_api_key() {
        let cfg = Config::default();
        let err = build_pipeline(&cfg).unwrap_err();
        assert!(err.to_string().contains("No API key configured"));
    }

    #[test]
    fn build_pipeline_from_valid_config() {
        let mut cfg = Config::default();
        cfg.api.api_key = Some("KEY".into());
        cfg.sink.url = "memory://".into();

        let pipeline = build_pipeline(&cfg).unwrap();
        assert_eq!(pipeline.name(), "weather_dag");
        assert_eq!(pipeline.stage_ids().len(), 3);
    }

    #[test]
    fn build_pipeline_rejects_bad_sink() {
        let mut cfg = Config::default();
        cfg.api.api_key = Some("KEY".into());
        cfg.sink.url = "gs://bucket".into();

        let err = build_pipeline(&cfg).unwrap_err();
        assert!(format!("{err:#}").contains("Unsupported sink scheme"));
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown() {
        let mut cfg = Config::default();
        cfg.api.api_key = Some("KEY".into());
        cfg.sink.url = "memory://".into();
        let pipeline = build_pipeline(&cfg).unwrap();

        // The next daily boundary is hours away; shutdown wins immediately.
        let result = run_on_schedule(&pipeline, Schedule::Daily, None, async {}).await;
        assert!(result.is_ok());
    }
}
