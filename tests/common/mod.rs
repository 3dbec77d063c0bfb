#![allow(dead_code)]

use sheetmerge::{CellValue, Config, Row, Workbook};
use std::path::Path;
use tempfile::TempDir;

pub fn t(value: &str) -> CellValue {
    CellValue::Text(value.to_string())
}

pub fn n(value: f64) -> CellValue {
    CellValue::Number(value)
}

pub fn write_xlsx(path: &Path, rows: Vec<Row>) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    Workbook::from_rows(rows).save(path).unwrap();
}

/// Config rooted in a fresh temp dir, header at row 1, data from row 2,
/// trusting proxy headers.
pub fn temp_config() -> (TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.uploads_dir = dir.path().join("uploads");
    config.static_dir = dir.path().join("static");
    config.ownership_file = dir.path().join("uploads").join("owners.json");
    config.merge.header_row = 1;
    config.search.data_start_row = 2;
    // Requests in tests carry their address in X-Forwarded-For
    config.access.trust_proxy_headers = true;
    config.ensure_dirs().unwrap();
    (dir, config)
}

pub fn header() -> Row {
    vec![t("ID"), t("Name"), t("Amount")]
}

/// Row without its trailing blank cells; the reader pads rows to the used range.
pub fn trimmed(row: &Row) -> Row {
    let end = row.iter().rposition(|c| !c.is_empty()).map_or(0, |i| i + 1);
    row[..end].to_vec()
}
