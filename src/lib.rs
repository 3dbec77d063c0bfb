/*!
# Sheet Merge

A small web application where several users upload spreadsheets into
per-version buckets, merge them against a shared template's header layout,
and look rows up by key in the merged or master workbooks.

## Overview

Uploaded workbooks come from many hands: some carry a title block, notes or
blank rows above the real header, and the height of that preamble differs
from file to file. The engine therefore never assumes a header position in
an upload. Only the template's header row is configured; every upload is
scanned for a row exactly equal to it, and just the rows beneath that match
are appended to the merged output.

## Architecture

### Engine
- **Workbook Reader** (`workbook`) - loads the active sheet of an `.xlsx`
  file as rows of values (calamine) and writes sheets back (rust_xlsxwriter)
- **Header Matcher** (`merge::find_header`) - first row equal to the template header
- **Row Appender** (`merge::append_matching`) - appends every non-blank row
- **Merge Orchestrator** (`merge::merge`) - walks a bucket in filename order,
  skips unreadable or unmatched files with a warning, writes
  `merged_output_<version>.xlsx`
- **Key Filter** (`search::filter_by_key`) - rows whose key column equals a
  query value after stringifying and trimming both sides

### Support
- **config** - every path and layout position, loaded from JSON
- **ownership** - who uploaded which bucket file, behind a store trait
- **access** - client IP resolution, whitelist and display names
- **saving** - atomic file writes and sorted directory listings

### Web layer (feature `web`)
- **app** - axum routes for uploads, downloads, merge, search and per-user extracts

## Filesystem layout

```text
uploads/
  template.xlsx
  <version>/
    *.xlsx                      data uploads
    master.xlsx                 master used for per-user extracts
    merged_output_<version>.xlsx
    results/result*.xlsx        searched, latest by filename
    exports/filtered_for_<key>.xlsx
```

## REST API Endpoints

- `POST /merge/{version}` - merged workbook as an attachment (404 without template)
- `GET /search?key={int}&version={v}` - matching rows as JSON
- `POST /upload/{version}`, `/upload_template`, `/upload_result/{version}`,
  `/upload_master/{version}` - multipart uploads
- `GET /download/{version}/{filename}`, `POST /delete/{version}/{filename}`
- `GET /download_my_data/{version}/{filename}` - rows of the master matching
  the key in the caller's own upload
*/

pub mod access;
pub mod config;
pub mod error;
pub mod merge;
pub mod ownership;
pub mod saving;
pub mod search;
pub mod workbook;

#[cfg(feature = "web")]
pub mod app;

pub use config::Config;
pub use error::{Error, Result};
pub use merge::{MergeJob, MergeReport, append_matching, find_header, merge};
pub use search::{extract_for_upload, filter_by_key, search_all, search_version};
pub use workbook::{CellValue, Row, Workbook};
