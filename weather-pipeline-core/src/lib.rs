//! Core library for the `weather-pipeline` CLI.
//!
//! This crate defines:
//! - Kelvin → Fahrenheit conversion and the flattening of a current-weather
//!   observation into a single CSV row
//! - The weather API client (readiness probe + fetch)
//! - Object-storage sinks
//! - The ordered three-stage pipeline, its retry policy and schedule
//! - Configuration & alerting
//!
//! It is used by `weather-pipeline-cli`, but can also be embedded in other
//! binaries or services.

pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod runner;
pub mod schedule;
pub mod sink;
pub mod source;
pub mod transform;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Config;
pub use convert::kelvin_to_fahrenheit;
pub use error::{PipelineError, ShapeError};
pub use model::{WeatherObservation, WeatherRecord};
pub use pipeline::{Pipeline, RetryPolicy, RunContext, RunReport, SensorPolicy};
pub use schedule::Schedule;
pub use sink::{ObjectStoreSink, Sink, StoredObject};
pub use source::{OpenWeatherSource, WeatherSource};
