//! Key-based row extraction from merged, master and result workbooks.

use log::{debug, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{Config, validate_filename};
use crate::error::{Error, Result};
use crate::saving::{file_name, list_files};
use crate::workbook::{CellValue, Row, Workbook};

/// Rows of one version that matched a search.
#[derive(Debug, Clone, Serialize)]
pub struct VersionResult {
    pub version: String,
    pub rows: Vec<Row>,
}

/// A per-user extract written to disk.
#[derive(Debug, Clone)]
pub struct Extract {
    pub key: String,
    pub path: PathBuf,
    pub rows_matched: usize,
}

/// Rows from `data_start_row` (1-based) whose cell at `key_column` (0-based)
/// equals `key_value`
///
/// Both sides are stringified and trimmed before comparing, so a numeric cell
/// `14` matches the query `"14"`. Rows too short to hold the key column and
/// rows with a blank key are skipped. Blank cells in the result are returned
/// as empty strings.
pub fn filter_by_key(
    workbook: &Workbook,
    key_column: usize,
    data_start_row: usize,
    key_value: &str,
) -> Vec<Row> {
    let key_value = key_value.trim();

    workbook
        .rows_from(data_start_row)
        .filter(|row| {
            row.get(key_column).is_some_and(|cell| {
                let key = cell.key_string();
                !key.is_empty() && key == key_value
            })
        })
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    CellValue::Empty => CellValue::Text(String::new()),
                    other => other.clone(),
                })
                .collect()
        })
        .collect()
}

/// Load a workbook that a search or extract reads from
///
/// # Errors
/// * [`Error::SourceNotFound`] when the file is absent
/// * [`Error::MalformedSource`] when it cannot be parsed
pub fn load_source(path: &Path) -> Result<Workbook> {
    if !path.is_file() {
        return Err(Error::SourceNotFound(path.to_path_buf()));
    }
    Workbook::load(path).map_err(|e| Error::MalformedSource {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Most recent result workbook in `results_dir`: the last `.xlsx` file
/// starting with `prefix`, by filename order.
pub fn latest_result(results_dir: &Path, prefix: &str) -> Result<PathBuf> {
    if !results_dir.is_dir() {
        return Err(Error::SourceNotFound(results_dir.to_path_buf()));
    }

    list_files(results_dir, "xlsx")?
        .into_iter()
        .filter(|path| file_name(path).starts_with(prefix))
        .next_back()
        .ok_or_else(|| Error::SourceNotFound(results_dir.to_path_buf()))
}

/// Search the latest result workbook of one version.
pub fn search_version(config: &Config, version: &str, key_value: &str) -> Result<Vec<Row>> {
    let source = latest_result(&config.results_dir(version)?, &config.result_prefix)?;
    debug!("Searching {} for key '{}'", source.display(), key_value);

    let workbook = load_source(&source)?;
    Ok(filter_by_key(
        &workbook,
        config.search.key_column,
        config.search.data_start_row,
        key_value,
    ))
}

/// Search every configured version
///
/// A version whose result workbook is missing or unreadable contributes an
/// empty row list instead of failing the whole search.
pub fn search_all(config: &Config, key_value: &str) -> Vec<VersionResult> {
    config
        .versions
        .iter()
        .map(|version| {
            let rows = search_version(config, version, key_value).unwrap_or_else(|e| {
                warn!("Search of {} failed: {}", version, e);
                Vec::new()
            });
            VersionResult {
                version: version.clone(),
                rows,
            }
        })
        .collect()
}

// Keys end up in filenames; anything but [A-Za-z0-9_-] becomes '_'.
fn key_for_filename(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Extract a user's rows from their bucket's master workbook
///
/// The key is read from `config.key_cell` of the user's own upload. The
/// extract holds the master's rows above `data_start_row` followed by every
/// matching data row, and is written to the bucket's exports directory as
/// `filtered_for_<key>.xlsx`.
///
/// # Errors
/// * [`Error::InvalidFilename`] for names that could leave the bucket
/// * [`Error::SourceNotFound`] when the master or the user's file is absent
/// * [`Error::MissingKey`] when the key cell is blank
/// * [`Error::MalformedSource`] when either workbook cannot be parsed
pub fn extract_for_upload(config: &Config, version: &str, filename: &str) -> Result<Extract> {
    let filename = validate_filename(filename)?;
    let bucket = config.bucket_dir(version)?;
    let master_path = bucket.join(&config.master_filename);
    let user_path = bucket.join(filename);

    let master = load_source(&master_path)?;
    let user = load_source(&user_path)?;

    let cell = config.key_cell;
    let key = user
        .row(cell.row)
        .and_then(|row| row.get(cell.column))
        .filter(|value| !value.is_empty())
        .map(CellValue::key_string)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| Error::MissingKey {
            path: user_path.clone(),
            cell: cell.a1(),
        })?;

    let data_start_row = config.search.data_start_row;
    let matches = filter_by_key(&master, config.search.key_column, data_start_row, &key);

    let mut extract = Workbook::new();
    for row in master.rows().iter().take(data_start_row.saturating_sub(1)) {
        extract.append_row(row.clone());
    }
    let rows_matched = matches.len();
    for row in matches {
        extract.append_row(row);
    }

    let exports = config.exports_dir(version)?;
    std::fs::create_dir_all(&exports)?;
    let path = exports.join(format!("filtered_for_{}.xlsx", key_for_filename(&key)));
    extract.save(&path)?;

    debug!(
        "Extracted {} rows for key '{}' into {}",
        rows_matched,
        key,
        path.display()
    );
    Ok(Extract {
        key,
        path,
        rows_matched,
    })
}
