use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use inquire::{Confirm, Password, Text};
use weather_pipeline_core::{
    Config, OpenWeatherSource, Pipeline, RunContext, WeatherObservation, WeatherSource,
    pipeline::TransformLoad,
    runner::{build_pipeline, build_sink, run_on_schedule, trigger},
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-pipeline", version, about = "Scheduled weather extract/transform/load")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Config file; defaults to the platform config directory.
    #[arg(long, global = true, env = "WEATHER_PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides `api.api_key`.
    #[arg(long, global = true, env = "WEATHER_PIPELINE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Overrides `pipeline.city`.
    #[arg(long, global = true)]
    pub city: Option<String>,

    /// Overrides `sink.url`, e.g. `s3://bucket/prefix` or `./out`.
    #[arg(long, global = true)]
    pub sink: Option<String>,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively write the config file.
    Configure,

    /// Run the pipeline once, now.
    Run,

    /// Run the pipeline on its configured schedule until Ctrl-C.
    Schedule,

    /// Check once whether the weather API is reachable.
    Probe,

    /// Transform a saved current-weather JSON document and store it.
    Transform {
        /// Path to the JSON document.
        input: PathBuf,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure(&self.global).await,
            Command::Run => {
                let config = self.global.load_config()?;
                config.validate()?;
                let pipeline = build_pipeline(&config)?;

                let report = trigger(&pipeline).await?;
                match report.stored {
                    Some(stored) => println!("{} ({} bytes)", stored.location, stored.size),
                    None => println!("Run {} finished without output", report.run_id),
                }
                Ok(())
            }
            Command::Schedule => {
                let config = self.global.load_config()?;
                config.validate()?;
                let pipeline = build_pipeline(&config)?;
                let schedule = config.schedule()?;

                let shutdown = async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %err, "Failed to listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                };

                run_on_schedule(&pipeline, schedule, config.pipeline.start_date, shutdown).await
            }
            Command::Probe => {
                let config = self.global.load_config()?;
                let source =
                    OpenWeatherSource::new(&config.api, &config.pipeline.city, config.api_key()?)?;

                if source.probe().await? {
                    println!("{} is ready", source.url());
                    Ok(())
                } else {
                    Err(anyhow!("{} is not ready", source.url()))
                }
            }
            Command::Transform { input } => {
                let config = self.global.load_config()?;

                let payload = read_observation(&input)?;

                let pipeline = Pipeline::new(&config.pipeline.name)
                    .then(TransformLoad::new(build_sink(&config)?))
                    .with_retry(config.retry_policy());

                let mut ctx = RunContext::manual(chrono::Utc::now()).with_payload(payload);
                let report = pipeline.run(&mut ctx).await?;
                if let Some(stored) = report.stored {
                    println!("{} ({} bytes)", stored.location, stored.size);
                }
                Ok(())
            }
        }
    }
}

impl GlobalArgs {
    /// Config file merged with command-line overrides.
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        if let Some(key) = &self.api_key {
            config.api.api_key = Some(key.clone());
        }
        if let Some(city) = &self.city {
            config.pipeline.city = city.clone();
        }
        if let Some(sink) = &self.sink {
            config.sink.url = sink.clone();
        }

        Ok(config)
    }
}

async fn configure(global: &GlobalArgs) -> anyhow::Result<()> {
    let mut config = global.load_config()?;

    let api_key = Password::new("OpenWeather API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    if !api_key.trim().is_empty() {
        config.api.api_key = Some(api_key.trim().to_string());
    }

    config.pipeline.city = Text::new("City:")
        .with_default(&config.pipeline.city)
        .prompt()
        .context("Failed to read city")?;

    config.sink.url = Text::new("Sink URL (s3://bucket/prefix, file:///dir or a directory):")
        .with_default(&config.sink.url)
        .prompt()
        .context("Failed to read sink URL")?;

    let email = Text::new("Alert email (blank for none):")
        .with_default(&config.alerts.email.join(","))
        .prompt()
        .context("Failed to read alert email")?;
    config.alerts.email = parse_recipients(&email);

    config.alerts.email_on_failure = if config.alerts.email.is_empty() {
        false
    } else {
        Confirm::new("Email alerts when a run fails?")
            .with_default(config.alerts.email_on_failure)
            .prompt()
            .context("Failed to read alert preference")?
    };

    config.validate()?;

    let path = match &global.config {
        Some(path) => {
            config.save_to(path)?;
            path.clone()
        }
        None => config.save()?,
    };

    println!("Configuration saved to {}", path.display());

    let source = OpenWeatherSource::new(&config.api, &config.pipeline.city, config.api_key()?)?;
    if !source.probe().await? {
        eprintln!("Warning: {} did not answer successfully with these settings", source.url());
    }

    Ok(())
}

/// Read a saved current-weather document, rejecting a bad shape before any stage runs.
fn read_observation(path: &Path) -> anyhow::Result<serde_json::Value> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    WeatherObservation::from_slice(&bytes)
        .with_context(|| format!("{} is not a current-weather document", path.display()))?;

    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON in {}", path.display()))
}

/// Comma-separated addresses, blanks dropped.
fn parse_recipients(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
