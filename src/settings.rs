//! Typed configuration schema, validated at load time.
//!
//! All behavior is driven from `settings.toml`; there are no CLI flags.
//! Every field is checked while loading so a malformed file fails the run
//! before any store, probe, or network interaction happens.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::series::{Bound, Bounds, Channel, RingSpec};

/// Consolidated rows cover this many minutes in total.
const RETENTION_MINUTES: u32 = 7 * 24 * 60;
/// A stored value stays valid for this many sampling intervals.
const HEARTBEAT_STEPS: i64 = 3;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("uploading enabled but `graph_upload.{0}` is missing")]
    MissingUploadField(&'static str),
    #[error("invalid timeframe expression {0:?}, expected e.g. \"1w\", \"36h\" or \"30m\"")]
    BadTimeframe(String),
    #[error("`general.frequency` must be at least 1 minute")]
    BadFrequency,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub general: General,
    pub download: ChannelSettings,
    pub upload: ChannelSettings,
    pub ping: ChannelSettings,
    pub graph: Graph,
    #[serde(default)]
    pub graph_upload: GraphUpload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    /// Minutes between scheduled runs; drives store step, heartbeat, and
    /// capacity.
    pub frequency: u32,
    /// Take a new measurement this run, or only re-render from prior data.
    pub measure: bool,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSettings {
    /// Upper axis bound; also the store's clamping bound for this channel.
    pub top: f64,
    /// Lower axis bound.
    pub bot: f64,
    pub title: String,
    pub unit: String,
    /// Series line color, hex without the leading `#`.
    pub color: String,
    /// Best / average / worst display targets. Operator-supplied, drawn as
    /// horizontal reference lines; never computed from stored data.
    pub max: f64,
    pub avg: f64,
    pub min: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Graph {
    pub width: u32,
    pub height: u32,
    /// Lookback window for every rendered graph.
    pub timeframe: Timeframe,
    /// File name of the composed output image, also used as the remote name.
    pub name: String,
    /// Reference-line colors, keyed like the per-channel target values.
    pub max: String,
    pub avg: String,
    pub min: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GraphUpload {
    #[serde(default)]
    pub enable: bool,
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Where to publish the composed image.
#[derive(Debug, Clone, Copy)]
pub struct UploadTarget<'a> {
    pub url: &'a str,
    pub user: &'a str,
    pub password: &'a str,
    pub file_name: &'a str,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.general.frequency == 0 {
            return Err(SettingsError::BadFrequency);
        }
        if self.graph_upload.enable {
            if self.graph_upload.url.is_none() {
                return Err(SettingsError::MissingUploadField("url"));
            }
            if self.graph_upload.user.is_none() {
                return Err(SettingsError::MissingUploadField("user"));
            }
            if self.graph_upload.password.is_none() {
                return Err(SettingsError::MissingUploadField("password"));
            }
        }
        Ok(())
    }

    pub fn channel(&self, channel: Channel) -> &ChannelSettings {
        match channel {
            Channel::Download => &self.download,
            Channel::Upload => &self.upload,
            Channel::Ping => &self.ping,
        }
    }

    /// Store parameters derived from the configuration: one row per
    /// sampling interval, a heartbeat of three intervals, and enough rows
    /// for a week.
    pub fn ring_spec(&self) -> RingSpec {
        let frequency = self.general.frequency;
        let step = i64::from(frequency) * 60;
        let capacity_rows = RETENTION_MINUTES.div_ceil(frequency) as usize;
        let bound = |top| Bound { min: 0.0, max: top };
        RingSpec {
            step,
            heartbeat: step * HEARTBEAT_STEPS,
            capacity_rows,
            bounds: Bounds {
                download: bound(self.download.top),
                upload: bound(self.upload.top),
                ping: bound(self.ping.top),
            },
        }
    }

    /// Upload destination, when uploading is enabled. Field presence is
    /// guaranteed by `validate`, so a `None` here simply means disabled.
    pub fn upload_target(&self) -> Option<UploadTarget<'_>> {
        if !self.graph_upload.enable {
            return None;
        }
        Some(UploadTarget {
            url: self.graph_upload.url.as_deref()?,
            user: self.graph_upload.user.as_deref()?,
            password: self.graph_upload.password.as_deref()?,
            file_name: &self.graph.name,
        })
    }
}

/// Lookback window expression such as `"1w"`, `"36h"`, `"30m"` or `"90s"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeframe(i64);

impl Timeframe {
    pub fn seconds(self) -> i64 {
        self.0
    }
}

impl FromStr for Timeframe {
    type Err = SettingsError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let bad = || SettingsError::BadTimeframe(expr.to_owned());
        let trimmed = expr.trim();
        let unit = trimmed.chars().last().ok_or_else(bad)?;
        let count: i64 = trimmed[..trimmed.len() - unit.len_utf8()]
            .parse()
            .map_err(|_| bad())?;
        if count <= 0 {
            return Err(bad());
        }
        let seconds = match unit {
            's' => count,
            'm' => count * 60,
            'h' => count * 3_600,
            'd' => count * 86_400,
            'w' => count * 604_800,
            _ => return Err(bad()),
        };
        Ok(Timeframe(seconds))
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
