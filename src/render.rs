//! Per-channel graph construction.
//!
//! A render is two halves: building the [`GraphSpec`] (what to draw:
//! series points, axis bounds, window, reference lines) and handing it to
//! a [`RenderBackend`] that turns it into a raster. The split keeps the
//! graph logic testable without any rendering engine installed.

pub mod gnuplot;

use std::path::Path;

use thiserror::Error;

use crate::series::{Channel, RingStore};
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("graph renderer `{0}` not found")]
    BackendMissing(String),
    #[error("graph renderer exited with {status}: {stderr}")]
    BackendFailed { status: String, stderr: String },
    #[error("graph renderer timed out after {0} seconds")]
    Timeout(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A horizontal display target drawn across the whole window.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceLine {
    pub value: f64,
    /// Hex color without the leading `#`.
    pub color: String,
    pub label: String,
}

/// Everything a backend needs to draw one channel graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSpec {
    pub title: String,
    pub unit: String,
    pub width: u32,
    pub height: u32,
    /// Lower axis bound (`bot` in the channel settings).
    pub lower: f64,
    /// Upper axis bound (`top` in the channel settings).
    pub upper: f64,
    /// Epoch-second window, oldest end first.
    pub window: (i64, i64),
    pub series_label: String,
    /// Hex color without the leading `#`.
    pub series_color: String,
    /// Consolidated points within the window, oldest first.
    pub points: Vec<(i64, f64)>,
    /// Best, average, worst, in that order.
    pub references: Vec<ReferenceLine>,
}

/// The external rendering engine at its interface. Tests substitute a fake
/// that captures the spec it was given.
pub trait RenderBackend {
    fn render(&self, spec: &GraphSpec, out: &Path) -> Result<(), RenderError>;
}

/// Builds the graph request for one channel over the configured window.
///
/// The three reference lines carry the operator-configured targets from the
/// channel section with colors from the graph section; they are display
/// values, never derived from the stored series.
pub fn build_graph_spec(
    channel: Channel,
    settings: &Settings,
    store: &RingStore,
    now: i64,
) -> GraphSpec {
    let cfg = settings.channel(channel);
    let graph = &settings.graph;
    let window = (now - graph.timeframe.seconds(), now);
    let points = store.query(channel, window).collect();

    let reference = |value: f64, color: &str, kind: &str| ReferenceLine {
        value,
        color: color.to_owned(),
        label: format!("{kind} {value}{unit}", unit = cfg.unit),
    };

    GraphSpec {
        title: cfg.title.clone(),
        unit: cfg.unit.clone(),
        width: graph.width,
        height: graph.height,
        lower: cfg.bot,
        upper: cfg.top,
        window,
        series_label: channel.display_name().to_owned(),
        series_color: cfg.color.clone(),
        points,
        references: vec![
            reference(cfg.max, &graph.max, "Preferably"),
            reference(cfg.avg, &graph.avg, "Average"),
            reference(cfg.min, &graph.min, "Worst"),
        ],
    }
}
