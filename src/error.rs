use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the merge and search engine and by the stores around it.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Template file '{}' not found", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("Template has no header values at row {row}")]
    MissingTemplateHeader { row: usize },

    #[error("Cannot read workbook '{}': {reason}", .path.display())]
    UnreadableFile { path: PathBuf, reason: String },

    #[error("Malformed source workbook '{}': {reason}", .path.display())]
    MalformedSource { path: PathBuf, reason: String },

    #[error("Source workbook not found: '{}'", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Header not found in '{}'", .0.display())]
    HeaderNotMatched(PathBuf),

    #[error("No key value in cell {cell} of '{}'", .path.display())]
    MissingKey { path: PathBuf, cell: String },

    #[error("Invalid filename '{0}'")]
    InvalidFilename(String),

    #[error("Unknown version '{0}'")]
    UnknownVersion(String),

    #[error("Workbook exceeds the sheet limits: {0}")]
    SheetLimit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),
}

pub type Result<T> = std::result::Result<T, Error>;
