use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Application configuration
///
/// Every directory, filename and sheet-layout position the engine relies on.
/// Handlers and tests build one of these and pass it down instead of reading
/// module-level constants, so a test can point the whole tree at a temp dir.
///
/// Missing fields fall back to the values of [`Config::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the uploads tree (`template.xlsx` plus one directory per version)
    pub uploads_dir: PathBuf,

    /// Directory served under `/static`
    pub static_dir: PathBuf,

    /// Address the web server listens on
    pub bind_addr: String,

    /// Shared template, stored directly in `uploads_dir`
    pub template_filename: String,

    /// Per-bucket master workbook used for per-user extraction
    pub master_filename: String,

    /// Sub-directory of a bucket holding uploaded result workbooks
    pub results_dir_name: String,

    /// Result workbooks must start with this prefix to be searched
    pub result_prefix: String,

    /// Sub-directory of a bucket receiving per-user extracts
    pub exports_dir_name: String,

    /// Known version buckets
    pub versions: Vec<String>,

    pub merge: MergeLayout,

    pub search: SearchLayout,

    /// Cell of a user's own upload that carries their key
    pub key_cell: CellRef,

    pub access: AccessConfig,

    /// JSON file backing the ownership store
    pub ownership_file: PathBuf,

    /// Upper bound on a single multipart upload
    pub max_upload_bytes: usize,
}

/// Where the header sits in the template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeLayout {
    /// 1-based row of the template's header
    pub header_row: usize,
}

/// Where keys and data sit in searchable workbooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchLayout {
    /// 0-based key column
    pub key_column: usize,
    /// 1-based first data row
    pub data_start_row: usize,
}

/// A single cell position: 1-based row, 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Clients allowed to use the application; empty allows everyone
    pub allowed_ips: Vec<String>,

    /// Take the client address from `X-Forwarded-For`/`X-Real-IP`. Only safe
    /// behind a reverse proxy that overwrites those headers.
    pub trust_proxy_headers: bool,

    /// Display names keyed by client IP
    pub user_names: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            uploads_dir: PathBuf::from("uploads"),
            static_dir: PathBuf::from("static"),
            bind_addr: "127.0.0.1:3000".to_string(),
            template_filename: "template.xlsx".to_string(),
            master_filename: "master.xlsx".to_string(),
            results_dir_name: "results".to_string(),
            result_prefix: "result".to_string(),
            exports_dir_name: "exports".to_string(),
            versions: vec!["ver1".to_string(), "ver2".to_string()],
            merge: MergeLayout::default(),
            search: SearchLayout::default(),
            key_cell: CellRef { row: 6, column: 1 },
            access: AccessConfig::default(),
            ownership_file: PathBuf::from("uploads/owners.json"),
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Default for MergeLayout {
    fn default() -> Self {
        MergeLayout { header_row: 5 }
    }
}

impl Default for SearchLayout {
    fn default() -> Self {
        SearchLayout {
            key_column: 1,
            data_start_row: 5,
        }
    }
}

impl CellRef {
    /// A1-style name of the cell, used in error messages.
    pub fn a1(&self) -> String {
        format!("{}{}", column_to_letter(self.column as u32 + 1), self.row)
    }
}

/// Convert column number to letter (A=1, B=2, etc.)
fn column_to_letter(col: u32) -> String {
    let mut name = String::new();
    let mut n = col;

    while n > 0 {
        n -= 1;
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }

    name
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// # Errors
    /// * I/O errors opening the file, JSON errors parsing it, and
    ///   [`Error::Config`] when the layout positions are unusable
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject layouts that can never match anything.
    pub fn validate(&self) -> Result<()> {
        if self.merge.header_row == 0 {
            return Err(Error::Config("merge.header_row is 1-based".to_string()));
        }
        if self.search.data_start_row == 0 {
            return Err(Error::Config(
                "search.data_start_row is 1-based".to_string(),
            ));
        }
        if self.key_cell.row == 0 {
            return Err(Error::Config("key_cell.row is 1-based".to_string()));
        }
        if self.versions.is_empty() {
            return Err(Error::Config("at least one version is required".to_string()));
        }
        for version in &self.versions {
            validate_filename(version).map_err(|_| {
                Error::Config(format!("version '{}' is not a valid directory name", version))
            })?;
        }
        Ok(())
    }

    pub fn template_path(&self) -> PathBuf {
        self.uploads_dir.join(&self.template_filename)
    }

    /// Directory of a version bucket; unknown versions are rejected.
    pub fn bucket_dir(&self, version: &str) -> Result<PathBuf> {
        if !self.versions.iter().any(|v| v == version) {
            return Err(Error::UnknownVersion(version.to_string()));
        }
        Ok(self.uploads_dir.join(version))
    }

    pub fn results_dir(&self, version: &str) -> Result<PathBuf> {
        Ok(self.bucket_dir(version)?.join(&self.results_dir_name))
    }

    pub fn exports_dir(&self, version: &str) -> Result<PathBuf> {
        Ok(self.bucket_dir(version)?.join(&self.exports_dir_name))
    }

    /// Name of the merged workbook written into a bucket.
    pub fn output_filename(&self, version: &str) -> String {
        format!("merged_output_{}.xlsx", version)
    }

    /// Files in a bucket that are never treated as merge input.
    pub fn merge_exclusions(&self, version: &str) -> Vec<String> {
        vec![
            self.template_filename.clone(),
            self.output_filename(version),
            self.master_filename.clone(),
        ]
    }

    /// Create the uploads tree for every configured version.
    pub fn ensure_dirs(&self) -> Result<()> {
        create_dir_all(&self.uploads_dir)?;
        for version in &self.versions {
            create_dir_all(self.results_dir(version)?)?;
            create_dir_all(self.exports_dir(version)?)?;
        }
        Ok(())
    }
}

/// Reject filenames that could escape their directory.
///
/// Checked before any filesystem operation on a caller-supplied name.
pub fn validate_filename(name: &str) -> Result<&str> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');

    if invalid {
        return Err(Error::InvalidFilename(name.to_string()));
    }
    Ok(name)
}
