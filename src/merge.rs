//! Header-aligned merging of a version bucket into one workbook.
//!
//! Uploaded files carry an unpredictable amount of preamble above their
//! header, so each file is scanned for a row equal to the template's header
//! and only the rows below that match are appended.

use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::saving::{file_name, list_files};
use crate::workbook::{CellValue, Row, Workbook};

/// Everything a merge needs to know about one bucket.
#[derive(Debug, Clone)]
pub struct MergeJob {
    pub version: String,
    pub template_path: PathBuf,
    pub bucket_dir: PathBuf,
    /// 1-based row of the header in the template
    pub header_row: usize,
    /// Filenames in the bucket that are never merged
    pub exclusions: Vec<String>,
    pub output_filename: String,
}

impl MergeJob {
    /// Job for a configured version bucket.
    pub fn for_version(config: &Config, version: &str) -> Result<MergeJob> {
        Ok(MergeJob {
            version: version.to_string(),
            template_path: config.template_path(),
            bucket_dir: config.bucket_dir(version)?,
            header_row: config.merge.header_row,
            exclusions: config.merge_exclusions(version),
            output_filename: config.output_filename(version),
        })
    }
}

/// A bucket file left out of the merge, and why.
#[derive(Debug)]
pub struct SkippedFile {
    pub filename: String,
    pub reason: Error,
}

/// Outcome of a merge.
#[derive(Debug)]
pub struct MergeReport {
    pub output_path: PathBuf,
    pub merged_files: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    pub rows_appended: usize,
}

// Trailing blank cells differ between writers, so they don't take part in row equality.
fn trim_trailing_empty(row: &[CellValue]) -> &[CellValue] {
    let end = row
        .iter()
        .rposition(|cell| !cell.is_empty())
        .map_or(0, |i| i + 1);
    &row[..end]
}

/// 1-based index of the first row exactly equal to `header`, if any
///
/// Values compare by type as well as content: the number `1` does not match
/// the text `"1"`.
pub fn find_header<'a, I>(rows: I, header: &[CellValue]) -> Option<usize>
where
    I: IntoIterator<Item = &'a Row>,
{
    let header = trim_trailing_empty(header);
    rows.into_iter()
        .position(|row| trim_trailing_empty(row) == header)
        .map(|i| i + 1)
}

/// Append every row with at least one non-empty cell to `target`
///
/// Rows keep their cell order; trailing blank cells are dropped. Width is not
/// checked against the target. Returns the number of rows appended.
pub fn append_matching<'a, I>(target: &mut Workbook, rows: I) -> usize
where
    I: IntoIterator<Item = &'a Row>,
{
    let mut appended = 0;
    for row in rows {
        let cells = trim_trailing_empty(row);
        if cells.is_empty() {
            continue;
        }
        target.append_row(cells.to_vec());
        appended += 1;
    }
    appended
}

fn is_eligible(path: &Path, job: &MergeJob) -> bool {
    let name = file_name(path);
    // Office lock files ("~$book.xlsx") sit next to open workbooks
    !name.starts_with("~$")
        && name != job.output_filename
        && !job.exclusions.iter().any(|excluded| excluded == name)
}

fn merge_file(accumulator: &mut Workbook, path: &Path, header: &[CellValue]) -> Result<usize> {
    let source = Workbook::load(path)?;
    let matched = find_header(source.rows(), header)
        .ok_or_else(|| Error::HeaderNotMatched(path.to_path_buf()))?;
    debug!("Header of {} found at row {}", path.display(), matched);

    Ok(append_matching(accumulator, source.rows_from(matched + 1)))
}

/// Merge every eligible workbook of a bucket into a copy of the template
///
/// Files are processed in filename order. A file that cannot be read or has
/// no row matching the template header is skipped with a warning; the merge
/// continues with the rest. The result is written to
/// `bucket_dir/output_filename`, replacing any earlier output.
///
/// # Errors
/// * [`Error::TemplateNotFound`] when the template file is absent
/// * [`Error::MissingTemplateHeader`] when the template's header row is blank
/// * I/O and write errors listing the bucket or saving the output; a missing
///   bucket directory is created and merged as empty
pub fn merge(job: &MergeJob) -> Result<MergeReport> {
    if !job.template_path.is_file() {
        return Err(Error::TemplateNotFound(job.template_path.clone()));
    }

    let template = Workbook::load(&job.template_path)?;
    let header = template
        .row(job.header_row)
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .cloned()
        .ok_or(Error::MissingTemplateHeader {
            row: job.header_row,
        })?;

    let mut accumulator = template;
    let mut report = MergeReport {
        output_path: job.bucket_dir.join(&job.output_filename),
        merged_files: Vec::new(),
        skipped: Vec::new(),
        rows_appended: 0,
    };

    // A bucket nobody has uploaded to yet merges as an empty one
    let sources = match list_files(&job.bucket_dir, "xlsx") {
        Ok(sources) => sources,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    for path in sources.iter().filter(|path| is_eligible(path, job)) {
        let filename = file_name(path).to_string();
        match merge_file(&mut accumulator, path, &header) {
            Ok(appended) => {
                debug!("Appended {} rows from {}", appended, filename);
                report.rows_appended += appended;
                report.merged_files.push(filename);
            }
            Err(reason) => {
                warn!("Skipping {} while merging {}: {}", filename, job.version, reason);
                report.skipped.push(SkippedFile { filename, reason });
            }
        }
    }

    fs::create_dir_all(&job.bucket_dir)?;
    accumulator.save(&report.output_path)?;
    info!(
        "Merged {} into {}: {} files, {} skipped, {} rows",
        job.version,
        report.output_path.display(),
        report.merged_files.len(),
        report.skipped.len(),
        report.rows_appended
    );

    Ok(report)
}
