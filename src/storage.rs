//! On-disk format for the ring store.
//!
//! The first line is a JSON header carrying the creation-time parameters
//! and the last write position; every following line is one consolidated
//! row. The file is rewritten whole on each append; it holds at most one
//! week of rows and stays small by construction.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::series::{RingSpec, Row, StoreError};

#[derive(Serialize, Deserialize)]
struct Header {
    spec: RingSpec,
    last_timestamp: Option<i64>,
}

pub fn create(path: &Path, spec: &RingSpec) -> Result<(), StoreError> {
    if path.exists() {
        return Err(StoreError::AlreadyExists(path.to_owned()));
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    rewrite(path, spec, None, std::iter::empty())
}

pub fn load(path: &Path) -> Result<(RingSpec, Option<i64>, VecDeque<Row>), StoreError> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines();
    let header_line = lines
        .next()
        .ok_or_else(|| StoreError::Malformed("missing header".to_owned()))?;
    let header: Header =
        serde_json::from_str(header_line).map_err(|e| StoreError::Malformed(e.to_string()))?;

    let mut rows = VecDeque::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let row: Row =
            serde_json::from_str(line).map_err(|e| StoreError::Malformed(e.to_string()))?;
        rows.push_back(row);
    }
    Ok((header.spec, header.last_timestamp, rows))
}

pub fn rewrite<'a>(
    path: &Path,
    spec: &RingSpec,
    last_timestamp: Option<i64>,
    rows: impl Iterator<Item = &'a Row>,
) -> Result<(), StoreError> {
    let header = Header {
        spec: spec.clone(),
        last_timestamp,
    };
    let mut content =
        serde_json::to_string(&header).map_err(|e| StoreError::Malformed(e.to_string()))?;
    content.push('\n');
    for row in rows {
        content
            .push_str(&serde_json::to_string(row).map_err(|e| StoreError::Malformed(e.to_string()))?);
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_rejects_empty_and_garbled_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speed.series");

        fs::write(&path, "").unwrap();
        assert!(matches!(load(&path), Err(StoreError::Malformed(_))));

        fs::write(&path, "not json\n").unwrap();
        assert!(matches!(load(&path), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn load_of_a_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
