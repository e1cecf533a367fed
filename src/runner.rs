use crate::error::{ConstructionError, Error, Result};
use crate::http::descriptor::{RequestDescriptor, WriteMode};
use crate::http::prober::probe_with_mode;
use crate::http::result::ProbeResult;
use crate::timing::{average, reconstruct_from_durations, Timestamp};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub count: u32,
    /// Pause between two consecutive probes. Not applied after the last one.
    pub delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            count: 1,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RunOptions {
    pub fn new(count: u32) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Measurement {
    Single(ProbeResult),
    Runs(Vec<ProbeResult>),
}

impl Measurement {
    pub fn results(&self) -> &[ProbeResult] {
        match self {
            Measurement::Single(result) => std::slice::from_ref(result),
            Measurement::Runs(results) => results,
        }
    }

    /// Folds the run set into one synthetic result. See [`average_results`].
    pub fn average(&self) -> Result<ProbeResult> {
        average_results(self.results())
    }
}

/// Measures `descriptor` `options.count` times, strictly one after another.
///
/// A single request yields [`Measurement::Single`]. Any failure aborts the whole run.
pub async fn measure(
    descriptor: impl Into<RequestDescriptor>,
    options: RunOptions,
) -> Result<Measurement> {
    let descriptor = descriptor.into();
    if options.count == 0 {
        return Err(ConstructionError::ZeroRequests.into());
    }

    let mut mode = descriptor
        .output
        .as_ref()
        .map(|output| output.mode)
        .unwrap_or_default();

    if options.count == 1 {
        return probe_with_mode(&descriptor, mode).await.map(Measurement::Single);
    }

    let mut results = Vec::with_capacity(options.count as usize);
    for i in 0..options.count {
        if i > 0 {
            sleep(options.delay).await;
        }
        info!("Request {}/{} to {}", i + 1, options.count, descriptor.url);
        let result = probe_with_mode(&descriptor, mode).await?;
        debug!(
            "Request {}/{} finished with {}",
            i + 1,
            options.count,
            result.status_code
        );
        results.push(result);
        mode = WriteMode::Append;
    }
    Ok(Measurement::Runs(results))
}

/// Measures and folds the runs into one averaged result.
pub async fn measure_average(
    descriptor: impl Into<RequestDescriptor>,
    options: RunOptions,
) -> Result<ProbeResult> {
    measure(descriptor, options).await?.average()
}

/// Averages per-phase durations across runs that all ended with the same status code.
///
/// The averaged timings are anchored at zero; version, status and message come from
/// the first run. Headers and bodies are not carried over.
pub fn average_results(results: &[ProbeResult]) -> Result<ProbeResult> {
    let first = results.first().ok_or(ConstructionError::NoRuns)?;

    let mut codes: Vec<u16> = Vec::new();
    for result in results {
        if !codes.contains(&result.status_code) {
            codes.push(result.status_code);
        }
    }
    if codes.len() > 1 {
        return Err(Error::Consistency { codes });
    }

    let durations = results
        .iter()
        .map(|result| result.timings.durations_from_start())
        .collect::<Result<Vec<_>>>()?;
    let timings = reconstruct_from_durations(&average(&durations), Timestamp::ZERO);

    Ok(ProbeResult {
        http_version: first.http_version,
        status_code: first.status_code,
        status_message: first.status_message.clone(),
        timings,
        headers: None,
        response: None,
        output_write_failed: results.iter().any(|r| r.output_write_failed),
    })
}
