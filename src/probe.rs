//! Network speed measurement.
//!
//! The probe is a capability: run one test, report throughput and latency.
//! [`HttpProbe`] is the production implementation; the pipeline only sees
//! the [`SpeedProbe`] trait, so tests substitute their own.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;

/// Candidate measurement endpoints, ranked by latency before the test.
const SERVERS: &[&str] = &["https://speed.cloudflare.com"];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on any single transfer; a hung endpoint fails the run
/// instead of blocking it forever.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);
const LATENCY_ROUNDS: usize = 3;
const DOWNLOAD_BYTES: u64 = 25_000_000;
const UPLOAD_BYTES: usize = 8_000_000;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no measurement endpoint reachable")]
    NoServer,
    #[error("download test failed")]
    Download(#[source] reqwest::Error),
    #[error("upload test failed")]
    Upload(#[source] reqwest::Error),
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
}

/// Result of one full measurement run.
#[derive(Debug, Clone, Copy)]
pub struct ProbeReport {
    /// Completion time of the run.
    pub timestamp: DateTime<Utc>,
    /// Megabytes per second, rounded to two decimals.
    pub download: f64,
    /// Megabytes per second, rounded to two decimals.
    pub upload: f64,
    /// Milliseconds, rounded to a whole number.
    pub ping: f64,
}

pub trait SpeedProbe {
    fn run(&self) -> Result<ProbeReport, ProbeError>;
}

pub struct HttpProbe {
    client: Client,
    servers: Vec<String>,
}

impl HttpProbe {
    pub fn new() -> Result<Self, ProbeError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TRANSFER_TIMEOUT)
            .build()
            .map_err(ProbeError::Client)?;
        Ok(HttpProbe {
            client,
            servers: SERVERS.iter().map(|s| (*s).to_owned()).collect(),
        })
    }

    /// Lowest-latency endpoint wins; unreachable candidates are skipped.
    fn pick_server(&self) -> Result<(&str, f64), ProbeError> {
        let mut best: Option<(&str, f64)> = None;
        for server in &self.servers {
            let Some(latency) = self.measure_latency(server) else {
                debug!(server = %server, "endpoint unreachable, skipping");
                continue;
            };
            if best.is_none_or(|(_, current)| latency < current) {
                best = Some((server.as_str(), latency));
            }
        }
        best.ok_or(ProbeError::NoServer)
    }

    /// Median of a few tiny timed requests, in milliseconds.
    fn measure_latency(&self, server: &str) -> Option<f64> {
        let url = format!("{server}/__down?bytes=0");
        let mut readings = Vec::with_capacity(LATENCY_ROUNDS);
        for _ in 0..LATENCY_ROUNDS {
            let started = Instant::now();
            let response = self.client.get(&url).send().ok()?;
            response.bytes().ok()?;
            readings.push(started.elapsed().as_secs_f64() * 1_000.0);
        }
        readings.sort_by(f64::total_cmp);
        readings.get(readings.len() / 2).copied()
    }

    fn download_test(&self, server: &str) -> Result<f64, ProbeError> {
        let url = format!("{server}/__down?bytes={DOWNLOAD_BYTES}");
        let started = Instant::now();
        let body = self
            .client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.bytes())
            .map_err(ProbeError::Download)?;
        Ok(bits_per_second(body.len(), started.elapsed()))
    }

    fn upload_test(&self, server: &str) -> Result<f64, ProbeError> {
        let url = format!("{server}/__up");
        let payload = vec![0u8; UPLOAD_BYTES];
        let started = Instant::now();
        self.client
            .post(&url)
            .body(payload)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(ProbeError::Upload)?;
        Ok(bits_per_second(UPLOAD_BYTES, started.elapsed()))
    }
}

impl SpeedProbe for HttpProbe {
    fn run(&self) -> Result<ProbeReport, ProbeError> {
        let (server, latency_ms) = self.pick_server()?;
        debug!(server = %server, latency_ms, "measurement endpoint selected");
        let download_bits = self.download_test(server)?;
        let upload_bits = self.upload_test(server)?;
        Ok(ProbeReport {
            timestamp: Utc::now(),
            download: megabytes_per_second(download_bits),
            upload: megabytes_per_second(upload_bits),
            ping: latency_ms.round(),
        })
    }
}

fn bits_per_second(bytes: usize, elapsed: Duration) -> f64 {
    bytes as f64 * 8.0 / elapsed.as_secs_f64().max(f64::EPSILON)
}

/// bits/s to MB/s, rounded to two decimals.
fn megabytes_per_second(bits_per_sec: f64) -> f64 {
    (bits_per_sec / 8.0 / 1024.0 / 1024.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_conversion_rounds_to_two_decimals() {
        // 1 MiB in exactly one second is 8 Mibit/s
        let bits = bits_per_second(1_048_576, Duration::from_secs(1));
        assert_eq!(bits, 8_388_608.0);
        assert_eq!(megabytes_per_second(bits), 1.0);
        assert_eq!(megabytes_per_second(123_456_789.0), 14.72);
    }

    #[test]
    fn instantaneous_transfers_do_not_divide_by_zero() {
        let bits = bits_per_second(1_000, Duration::from_secs(0));
        assert!(bits.is_finite());
    }
}
