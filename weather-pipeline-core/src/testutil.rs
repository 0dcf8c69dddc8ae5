//! Fixtures and trait stubs shared by the unit tests.

use std::sync::{
    Mutex,
    atomic::{AtomicU32, Ordering},
};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use crate::{
    error::{PipelineError, Result},
    notify::{Alert, Notifier},
    sink::{Sink, StoredObject},
    source::WeatherSource,
};

/// Ahmedabad, 2023-09-10 08:00:00 UTC, clear sky.
pub fn sample() -> serde_json::Value {
    json!({
        "coord": { "lon": 72.58, "lat": 23.03 },
        "name": "Ahmedabad",
        "weather": [{ "id": 800, "main": "Clear", "description": "clear sky" }],
        "main": {
            "temp": 300.0,
            "feels_like": 301.0,
            "temp_min": 298.0,
            "temp_max": 303.0,
            "pressure": 1010,
            "humidity": 40
        },
        "wind": { "speed": 3.5 },
        "dt": 1694332800,
        "timezone": 19800,
        "sys": { "sunrise": 1694307600, "sunset": 1694351400 }
    })
}

#[derive(Debug)]
pub struct StubSource {
    payload: serde_json::Value,
    ready_after: Option<u32>,
    stalls: bool,
    failing_fetches: u32,
    probes: AtomicU32,
    fetches: AtomicU32,
}

impl StubSource {
    pub fn ready(payload: serde_json::Value) -> Self {
        Self::ready_after(1, payload)
    }

    /// Reports ready on the `n`th probe.
    pub fn ready_after(n: u32, payload: serde_json::Value) -> Self {
        Self {
            payload,
            ready_after: Some(n),
            stalls: false,
            failing_fetches: 0,
            probes: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn never_ready(payload: serde_json::Value) -> Self {
        Self { ready_after: None, ..Self::ready(payload) }
    }

    /// Readiness checks never complete, like a connection that hangs.
    pub fn stalled(payload: serde_json::Value) -> Self {
        Self { stalls: true, ..Self::never_ready(payload) }
    }

    /// The first `n` fetches fail.
    pub fn failing_fetches(mut self, n: u32) -> Self {
        self.failing_fetches = n;
        self
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherSource for StubSource {
    async fn probe(&self) -> anyhow::Result<bool> {
        let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.stalls {
            std::future::pending::<()>().await;
        }
        Ok(self.ready_after.is_some_and(|after| n >= after))
    }

    async fn fetch(&self) -> anyhow::Result<serde_json::Value> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failing_fetches {
            return Err(anyhow!("OpenWeather current request failed with status 503"));
        }
        Ok(self.payload.clone())
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    fail: bool,
    writes: Mutex<Vec<(String, Bytes)>>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn writes(&self) -> Vec<(String, Bytes)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn write(&self, name: &str, body: Bytes) -> Result<StoredObject> {
        if self.fail {
            return Err(PipelineError::Sink(object_store::Error::Generic {
                store: "recording",
                source: "access denied".into(),
            }));
        }

        let size = body.len();
        self.writes.lock().unwrap().push((name.to_string(), body));
        Ok(StoredObject { location: format!("memory://{name}"), size })
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    fail: bool,
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        if self.fail {
            return Err(anyhow!("mail server unreachable"));
        }
        Ok(())
    }
}
