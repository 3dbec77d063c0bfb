use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{Error, Result};
use crate::saving;

/// A single cell value of the active sheet
///
/// Styling and formulas are dropped on load; only the cached value survives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

/// An ordered sequence of cells. Arity varies from row to row.
pub type Row = Vec<CellValue>;

impl CellValue {
    /// Blank cells and empty strings both count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Stringified, trimmed form used for key comparison (`14.0` → `"14"`).
    pub fn key_string(&self) -> String {
        self.to_string().trim().to_string()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Bool(true) => f.write_str("TRUE"),
            CellValue::Bool(false) => f.write_str("FALSE"),
            CellValue::DateTime(dt) if dt.time() == chrono::NaiveTime::MIN => {
                write!(f, "{}", dt.format("%Y-%m-%d"))
            }
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

// Integral values print without a fractional part so "14" matches a cell holding 14.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn from_calamine(data: &calamine::Data) -> CellValue {
    use calamine::Data;

    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) if dt.is_datetime() => match dt.as_datetime() {
            Some(ndt) => CellValue::DateTime(ndt),
            None => CellValue::Number(dt.as_f64()),
        },
        // ISO dates, durations and error cells keep their textual form
        other => CellValue::Text(other.to_string()),
    }
}

/// The active sheet of a spreadsheet, as rows of values
///
/// Loaded workbooks are read-only snapshots; a workbook built with
/// [`Workbook::new`] or [`Workbook::from_rows`] is the mutable target of a merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    sheet_name: Option<String>,
    rows: Vec<Row>,
}

impl Workbook {
    pub fn new() -> Self {
        Workbook::default()
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Workbook {
            sheet_name: None,
            rows,
        }
    }

    /// Load the first sheet of an `.xlsx` file
    ///
    /// Rows keep their absolute sheet positions: blank rows and columns in
    /// front of the used range are filled with [`CellValue::Empty`], so
    /// `row(n)` is always sheet row `n`.
    ///
    /// # Errors
    /// * [`Error::UnreadableFile`] when the path is missing or the bytes are
    ///   not a spreadsheet container
    pub fn load(path: impl AsRef<Path>) -> Result<Workbook> {
        use calamine::{Reader, Xlsx, open_workbook};

        let path = path.as_ref();
        let unreadable = |reason: String| Error::UnreadableFile {
            path: path.to_path_buf(),
            reason,
        };

        let mut workbook: Xlsx<BufReader<File>> =
            open_workbook(path).map_err(|e: calamine::XlsxError| unreadable(e.to_string()))?;

        let sheet_name = workbook.sheet_names().first().cloned();
        let range = match workbook.worksheet_range_at(0) {
            Some(range) => range.map_err(|e| unreadable(e.to_string()))?,
            None => {
                return Ok(Workbook {
                    sheet_name,
                    rows: Vec::new(),
                });
            }
        };

        let Some((start_row, start_col)) = range.start() else {
            return Ok(Workbook {
                sheet_name,
                rows: Vec::new(),
            });
        };

        let mut rows: Vec<Row> = vec![Vec::new(); start_row as usize];
        for cells in range.rows() {
            let mut row: Row = vec![CellValue::Empty; start_col as usize];
            row.extend(cells.iter().map(from_calamine));
            rows.push(row);
        }

        Ok(Workbook { sheet_name, rows })
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row at a 1-based index.
    pub fn row(&self, index: usize) -> Option<&Row> {
        index.checked_sub(1).and_then(|i| self.rows.get(i))
    }

    /// Rows from `start_row` (1-based) to the end of the sheet
    ///
    /// The iterator is `Clone`, so a caller can restart the scan.
    pub fn rows_from(&self, start_row: usize) -> std::slice::Iter<'_, Row> {
        let skip = start_row.saturating_sub(1).min(self.rows.len());
        self.rows[skip..].iter()
    }

    pub fn append_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Serialize the sheet as `.xlsx` bytes
    pub fn to_xlsx(&self) -> Result<Vec<u8>> {
        use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};

        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        let datetime_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

        let mut workbook = XlsxWorkbook::new();
        let worksheet = workbook.add_worksheet();
        if let Some(name) = &self.sheet_name {
            worksheet.set_name(name)?;
        }

        for (r, row) in self.rows.iter().enumerate() {
            let r = u32::try_from(r).map_err(|_| Error::SheetLimit(format!("row {}", r + 1)))?;
            for (c, value) in row.iter().enumerate() {
                let c = u16::try_from(c)
                    .map_err(|_| Error::SheetLimit(format!("column {}", c + 1)))?;
                match value {
                    CellValue::Empty => {}
                    CellValue::Text(s) if s.is_empty() => {}
                    CellValue::Text(s) => {
                        worksheet.write_string(r, c, s.as_str())?;
                    }
                    CellValue::Number(n) => {
                        worksheet.write_number(r, c, *n)?;
                    }
                    CellValue::Bool(b) => {
                        worksheet.write_boolean(r, c, *b)?;
                    }
                    CellValue::DateTime(dt) => {
                        let format = if dt.time() == chrono::NaiveTime::MIN {
                            &date_format
                        } else {
                            &datetime_format
                        };
                        worksheet.write_datetime_with_format(r, c, dt, format)?;
                    }
                }
            }
        }

        let buffer = workbook.save_to_buffer()?;
        Ok(buffer)
    }

    /// Write the sheet to `path`, replacing any existing file atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let buffer = self.to_xlsx()?;
        saving::write_atomic(path.as_ref(), &buffer)
    }
}
