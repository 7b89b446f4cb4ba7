use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use speedchart::paths;
use speedchart::pipeline;
use speedchart::probe::HttpProbe;
use speedchart::render::gnuplot::GnuplotBackend;
use speedchart::settings::Settings;

fn main() -> Result<()> {
    let settings = Settings::load(Path::new(paths::SETTINGS_FILE))
        .context("failed to load settings")?;

    let filter =
        EnvFilter::try_new(&settings.general.log_level).context("invalid general.log_level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let probe = HttpProbe::new().context("failed to build measurement client")?;
    let backend = GnuplotBackend::new();
    pipeline::run(&settings, Path::new(paths::DATA_DIR), &probe, &backend)
}
