//! Gnuplot-backed raster rendering.
//!
//! The graph definition is fed to `gnuplot` as a script over a scoped data
//! file; gnuplot produces the PNG. A missing binary, a non-zero exit, or a
//! hung child is fatal to the whole run; there is no partial-graph
//! fallback.

use std::fmt::Write as _;
use std::io::{ErrorKind, Read as _, Write as _};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{GraphSpec, RenderBackend, RenderError};

/// Renderer child processes are killed after this long.
const RENDER_TIMEOUT: Duration = Duration::from_secs(60);
const WAIT_POLL: Duration = Duration::from_millis(50);

pub struct GnuplotBackend {
    binary: String,
}

impl GnuplotBackend {
    pub fn new() -> Self {
        GnuplotBackend {
            binary: "gnuplot".to_owned(),
        }
    }
}

impl RenderBackend for GnuplotBackend {
    fn render(&self, spec: &GraphSpec, out: &Path) -> Result<(), RenderError> {
        let mut data = NamedTempFile::new()?;
        for (timestamp, value) in &spec.points {
            writeln!(data, "{timestamp} {value}")?;
        }
        data.flush()?;

        let script = build_script(spec, data.path(), out);
        debug!(graph = %spec.series_label, "invoking gnuplot");

        let mut child = Command::new(&self.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => RenderError::BackendMissing(self.binary.clone()),
                _ => RenderError::Io(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
        }

        let started = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if started.elapsed() > RENDER_TIMEOUT => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RenderError::Timeout(RENDER_TIMEOUT.as_secs()));
                }
                None => std::thread::sleep(WAIT_POLL),
            }
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(RenderError::BackendFailed {
                status: status.to_string(),
                stderr: stderr.trim().to_owned(),
            });
        }
        Ok(())
    }
}

/// The script is the whole data-definition protocol: terminal and output,
/// axes over the fixed window, then the series line plus the three labeled
/// reference lines.
fn build_script(spec: &GraphSpec, data: &Path, out: &Path) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "set terminal png size {},{}", spec.width, spec.height);
    let _ = writeln!(s, "set output '{}'", out.display());
    let _ = writeln!(s, "set title '{}'", spec.title);
    let _ = writeln!(s, "set ylabel '{}'", spec.unit);
    let _ = writeln!(s, "set yrange [{}:{}]", spec.lower, spec.upper);
    let _ = writeln!(s, "set xdata time");
    let _ = writeln!(s, "set timefmt '%s'");
    let _ = writeln!(s, "set format x '%H:%M'");
    let _ = writeln!(s, "set xrange [{}:{}]", spec.window.0, spec.window.1);
    let _ = writeln!(s, "set grid");
    let _ = writeln!(s, "set key outside top center horizontal");

    let mut parts = Vec::with_capacity(1 + spec.references.len());
    if !spec.points.is_empty() {
        parts.push(format!(
            "'{}' using 1:2 with lines lc rgb '#{}' title '{}'",
            data.display(),
            spec.series_color,
            spec.series_label
        ));
    }
    for line in &spec.references {
        parts.push(format!(
            "{} with lines lc rgb '#{}' title '{}'",
            line.value, line.color, line.label
        ));
    }
    let _ = writeln!(s, "plot {}", parts.join(", "));
    s
}
