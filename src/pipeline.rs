//! One full run: ensure the store, maybe measure, render, compose, maybe
//! upload.
//!
//! Everything is sequenced synchronously; any failure up to and including
//! composition aborts the run, while an upload failure is logged and
//! swallowed: the graph exists locally at that point and the next
//! scheduled run will publish again.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info, warn};

use crate::compose;
use crate::paths;
use crate::probe::SpeedProbe;
use crate::publish;
use crate::render::{self, RenderBackend};
use crate::series::{Channel, RingStore, Sample};
use crate::settings::Settings;

pub fn run(
    settings: &Settings,
    data_dir: &Path,
    probe: &dyn SpeedProbe,
    backend: &dyn RenderBackend,
) -> Result<()> {
    fs::create_dir_all(data_dir).context("failed to create data directory")?;

    let store_path = data_dir.join(paths::STORE_FILE);
    let mut store = if store_path.exists() {
        debug!(path = %store_path.display(), "store present, continuing");
        RingStore::open(&store_path).context("failed to open ring store")?
    } else {
        debug!(path = %store_path.display(), "store not found, creating");
        RingStore::create(&store_path, settings.ring_spec())
            .context("failed to create ring store")?
    };

    if settings.general.measure {
        debug!("starting speedtest");
        let report = probe.run().context("speed measurement failed")?;
        info!(
            download = report.download,
            upload = report.upload,
            ping = report.ping,
            "measurement complete"
        );
        store
            .append(Sample {
                timestamp: report.timestamp.with_timezone(&Local).timestamp(),
                download: report.download,
                upload: report.upload,
                ping: report.ping,
            })
            .context("failed to record sample")?;
    }

    debug!("updating graph");
    let now = Local::now().timestamp();
    let mut rasters = Vec::with_capacity(Channel::ALL.len());
    for channel in Channel::ALL {
        let raster = tempfile::Builder::new()
            .prefix(channel.name())
            .suffix(".png")
            .tempfile_in(data_dir)
            .context("failed to create temporary raster")?;
        let spec = render::build_graph_spec(channel, settings, &store, now);
        backend
            .render(&spec, raster.path())
            .with_context(|| format!("failed to render {} graph", channel.name()))?;
        rasters.push(raster);
    }

    let out = data_dir.join(&settings.graph.name);
    compose::compose(
        [rasters[0].path(), rasters[1].path(), rasters[2].path()],
        &out,
    )
    .context("failed to compose graph image")?;
    drop(rasters);

    if let Some(target) = settings.upload_target() {
        debug!("uploading graph");
        match publish::publish(&out, &target) {
            Ok(status) => debug!(code = status.as_u16(), "upload response code"),
            Err(err) => warn!(error = %err, "graph upload failed"),
        }
    } else {
        debug!("not uploading graph");
    }

    Ok(())
}
