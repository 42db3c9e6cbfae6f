//! Writing a completed sweep to disk.
//!
//! Everything is rendered in memory first. Files are then staged as temporary
//! files in the output directory and renamed into place; if any rename fails
//! the ones already placed are removed, so a run leaves either the full set of
//! artifacts or nothing.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tmeter_shared::config::OutputConfig;

use crate::analysis::{JfetParameters, round2};
use crate::chart::{self, ChartError};
use crate::result_set::ResultSet;

const MAX_SEQUENCE: u32 = 100_000;
const EXTENSIONS: [&str; 3] = ["json", "png", "csv"];

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("chart rendering failed: {0}")]
    Chart(#[from] ChartError),
    #[error("no free file name for prefix '{0}'")]
    NoFreeName(String),
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// JSON document layout; field order is alphabetical.
#[derive(Serialize)]
struct SweepDocument<'a> {
    #[serde(rename = "Id")]
    id: &'a [f32],
    #[serde(rename = "Idss", skip_serializing_if = "Option::is_none")]
    idss: Option<f64>,
    #[serde(rename = "Vg")]
    vg: &'a [f32],
    #[serde(rename = "Voff", skip_serializing_if = "Option::is_none")]
    voff: Option<f64>,
    #[serde(rename = "Vsat", skip_serializing_if = "Option::is_none")]
    vsat: Option<f64>,
    #[serde(rename = "Yfs", skip_serializing_if = "Option::is_none")]
    yfs: Option<f64>,
}

#[derive(Serialize)]
struct CsvRow {
    index: u16,
    gate_v: f32,
    drain_ma: f32,
}

/// Serialize the sweep and its fitted parameters (rounded to 2 decimals) as
/// pretty-printed JSON with a 4-space indent.
pub fn serialize_json(results: &ResultSet, params: Option<&JfetParameters>) -> Result<Vec<u8>, PersistError> {
    let vg = results.stimuli();
    let id = results.responses();
    let document = SweepDocument {
        id: &id,
        idss: params.map(|p| round2(p.idss)),
        vg: &vg,
        voff: params.map(|p| round2(p.voff)),
        vsat: params.map(|p| round2(p.vsat)),
        yfs: params.map(|p| round2(p.yfs)),
    };
    let mut out = Vec::with_capacity(64 * results.len() + 128);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    document.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}

pub fn serialize_csv(results: &ResultSet) -> Result<Vec<u8>, PersistError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for s in results.samples() {
        wtr.serialize(CsvRow {
            index: s.index,
            gate_v: s.stimulus,
            drain_ma: s.response,
        })?;
    }
    wtr.into_inner().map_err(|e| PersistError::Csv(csv::Error::from(e.into_error())))
}

/// Rendered artifacts, not yet on disk.
#[derive(Debug, Clone)]
pub struct RenderedArtifacts {
    pub json: Vec<u8>,
    pub chart: Vec<u8>,
    pub csv: Option<Vec<u8>>,
}

/// Where a sweep's artifacts ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub basename: String,
    pub json: PathBuf,
    pub chart: PathBuf,
    pub csv: Option<PathBuf>,
}

impl ArtifactPaths {
    pub fn all(&self) -> Vec<&Path> {
        let mut paths = vec![self.json.as_path(), self.chart.as_path()];
        if let Some(csv) = &self.csv {
            paths.push(csv.as_path());
        }
        paths
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    prefix: String,
    csv: bool,
    chart_width: u32,
    chart_height: u32,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            csv: false,
            chart_width: 800,
            chart_height: 600,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            prefix: config.prefix.clone(),
            csv: config.csv,
            chart_width: config.chart_width,
            chart_height: config.chart_height,
        }
    }

    pub fn with_csv(mut self, csv: bool) -> Self {
        self.csv = csv;
        self
    }

    /// First `<prefix>-<n>` (n >= 1) with no artifact of any kind on disk, so
    /// a stray chart or CSV from an earlier run is never clobbered.
    pub fn next_basename(&self) -> Result<String, PersistError> {
        (1..=MAX_SEQUENCE)
            .map(|i| format!("{}-{}", self.prefix, i))
            .find(|name| {
                EXTENSIONS
                    .iter()
                    .all(|ext| !self.dir.join(format!("{name}.{ext}")).exists())
            })
            .ok_or_else(|| PersistError::NoFreeName(self.prefix.clone()))
    }

    pub fn render(&self, results: &ResultSet, params: Option<&JfetParameters>) -> Result<RenderedArtifacts, PersistError> {
        let json = serialize_json(results, params)?;
        let chart = chart::render_png(results, params, self.chart_width, self.chart_height)?;
        let csv = if self.csv { Some(serialize_csv(results)?) } else { None };
        Ok(RenderedArtifacts { json, chart, csv })
    }

    /// Render and write all artifacts for one completed sweep.
    pub fn write(&self, results: &ResultSet, params: Option<&JfetParameters>) -> Result<ArtifactPaths, PersistError> {
        let rendered = self.render(results, params)?;
        self.write_rendered(&rendered)
    }

    pub fn write_rendered(&self, rendered: &RenderedArtifacts) -> Result<ArtifactPaths, PersistError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PersistError::io(&self.dir, e))?;
        let basename = self.next_basename()?;
        let paths = ArtifactPaths {
            json: self.dir.join(format!("{basename}.json")),
            chart: self.dir.join(format!("{basename}.png")),
            csv: rendered.csv.as_ref().map(|_| self.dir.join(format!("{basename}.csv"))),
            basename,
        };

        let mut staged = vec![
            (self.stage(&rendered.json)?, paths.json.clone()),
            (self.stage(&rendered.chart)?, paths.chart.clone()),
        ];
        if let (Some(bytes), Some(path)) = (&rendered.csv, &paths.csv) {
            staged.push((self.stage(bytes)?, path.clone()));
        }

        let mut placed: Vec<PathBuf> = Vec::with_capacity(staged.len());
        for (file, target) in staged {
            match file.persist_noclobber(&target) {
                Ok(_) => placed.push(target),
                Err(e) => {
                    for path in &placed {
                        if let Err(cleanup) = std::fs::remove_file(path) {
                            tracing::warn!("Failed to remove {}: {}", path.display(), cleanup);
                        }
                    }
                    return Err(PersistError::io(&target, e.error));
                }
            }
        }
        tracing::info!("Wrote {} artifact(s) as {}", placed.len(), paths.basename);
        Ok(paths)
    }

    fn stage(&self, bytes: &[u8]) -> Result<NamedTempFile, PersistError> {
        let mut file = NamedTempFile::new_in(&self.dir).map_err(|e| PersistError::io(&self.dir, e))?;
        file.write_all(bytes).map_err(|e| PersistError::io(file.path(), e))?;
        file.as_file().sync_all().map_err(|e| PersistError::io(file.path(), e))?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result_set::ResultSetBuilder;
    use tempfile::tempdir;
    use tmeter_shared::{SampleRecord, SweepRequest};

    fn small_set() -> ResultSet {
        let request = SweepRequest { start: 0.0, stop: -1.0, steps: 3, settle_us: 0 };
        let mut builder = ResultSetBuilder::new(request);
        for (index, response) in [(0u16, 4.0f32), (1, 2.5), (2, 0.0)] {
            builder
                .push(SampleRecord { index, stimulus: request.stimulus_at(index), response })
                .unwrap();
        }
        builder.finish(3).unwrap()
    }

    #[test]
    fn test_json_layout() {
        let params = JfetParameters { idss: 4.004, voff: -1.234, yfs: 3.0, vsat: 0.5 };
        let json = String::from_utf8(serialize_json(&small_set(), Some(&params)).unwrap()).unwrap();
        let expected = r#"{
    "Id": [
        4.0,
        2.5,
        0.0
    ],
    "Idss": 4.0,
    "Vg": [
        0.0,
        -0.5,
        -1.0
    ],
    "Voff": -1.23,
    "Vsat": 0.5,
    "Yfs": 3.0
}
"#;
        assert_eq!(json, expected);
    }

    #[test]
    fn test_json_without_parameters() {
        let json = String::from_utf8(serialize_json(&small_set(), None).unwrap()).unwrap();
        assert!(json.contains("\"Vg\""));
        assert!(!json.contains("Idss"));
    }

    #[test]
    fn test_csv_rows() {
        let csv = String::from_utf8(serialize_csv(&small_set()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["index,gate_v,drain_ma", "0,0.0,4.0", "1,-0.5,2.5", "2,-1.0,0.0"]);
    }

    #[test]
    fn test_sequential_basenames() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), "n-jfet").with_csv(true);
        let first = writer.write(&small_set(), None).unwrap();
        let second = writer.write(&small_set(), None).unwrap();
        assert_eq!(first.basename, "n-jfet-1");
        assert_eq!(second.basename, "n-jfet-2");
        for path in first.all().into_iter().chain(second.all()) {
            assert!(path.exists(), "{} missing", path.display());
        }
        // no leftover temporaries
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 6);
    }

    #[test]
    fn test_basename_skips_existing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("n-jfet-1.json"), "{}").unwrap();
        let writer = ArtifactWriter::new(dir.path(), "n-jfet");
        assert_eq!(writer.next_basename().unwrap(), "n-jfet-2");
    }

    #[test]
    fn test_basename_skips_orphan_chart_and_csv() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("n-jfet-1.png"), b"old").unwrap();
        std::fs::write(dir.path().join("n-jfet-2.csv"), b"old").unwrap();
        let writer = ArtifactWriter::new(dir.path(), "n-jfet");
        assert_eq!(writer.next_basename().unwrap(), "n-jfet-3");
    }

    #[test]
    fn test_write_beside_orphan_chart_keeps_both() {
        let dir = tempdir().unwrap();
        let orphan = dir.path().join("n-jfet-1.png");
        std::fs::write(&orphan, b"old").unwrap();
        let writer = ArtifactWriter::new(dir.path(), "n-jfet");
        let paths = writer.write(&small_set(), None).unwrap();
        assert_eq!(paths.basename, "n-jfet-2");
        assert!(paths.json.exists() && paths.chart.exists());
        assert_eq!(std::fs::read(&orphan).unwrap(), b"old");
    }
}
