//! Report rows and their serialization to delimited text.

use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column titles of the first row
pub const HEADER: [&str; 7] = [
    "Namespace",
    "Class",
    "Type",
    "Name",
    "Parameters",
    "Return",
    "Access",
];

/// Timestamp suffix of report file names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One line of the report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportRow {
    /// Namespace of the type
    pub namespace: String,
    /// Full name of the type
    pub class: String,
    /// Member kind label
    pub kind: String,
    /// Member name
    pub name: String,
    /// Formatted parameter list, methods only
    pub parameters: String,
    /// Return type for methods, property type for properties
    pub return_type: String,
    /// `get`, `set` or `get/set`, properties only
    pub access: String,
}

impl ReportRow {
    /// A separator row with every field empty
    pub fn blank() -> Self {
        Self::default()
    }

    /// Returns true if every field is empty
    pub fn is_blank(&self) -> bool {
        self.fields().iter().all(|f| f.is_empty())
    }

    /// Fields in column order
    pub fn fields(&self) -> [&str; 7] {
        [
            self.namespace.as_str(),
            self.class.as_str(),
            self.kind.as_str(),
            self.name.as_str(),
            self.parameters.as_str(),
            self.return_type.as_str(),
            self.access.as_str(),
        ]
    }

    /// Applies `f` to every field
    pub fn map_fields(self, f: impl Fn(&str) -> String) -> Self {
        Self {
            namespace: f(&self.namespace),
            class: f(&self.class),
            kind: f(&self.kind),
            name: f(&self.name),
            parameters: f(&self.parameters),
            return_type: f(&self.return_type),
            access: f(&self.access),
        }
    }
}

/// Writes report rows as `;`-separated text
#[derive(Debug, Clone)]
pub struct ReportWriter {
    delimiter: u8,
}

impl Default for ReportWriter {
    fn default() -> Self {
        Self { delimiter: b';' }
    }
}

impl ReportWriter {
    /// Creates a writer using `;` as delimiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the field delimiter
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Writes the header row followed by `rows`
    pub fn write_to<W: io::Write>(&self, rows: &[ReportRow], out: W) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .terminator(csv::Terminator::CRLF)
            .from_writer(out);

        writer.write_record(HEADER)?;
        for row in rows {
            writer.write_record(row.fields())?;
        }
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    /// Creates or truncates `path` and writes the report into it
    pub fn write_file(&self, rows: &[ReportRow], path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::file_write(path, e))?;
        self.write_to(rows, file)?;
        debug!("Wrote {} rows to {}", rows.len() + 1, path.display());
        Ok(())
    }
}

/// File name of the library without directories or extension.
///
/// Both `/` and `\` separate directories so that Windows paths are handled on
/// any host.
pub fn library_base_name(library: &Path) -> String {
    let full = library.to_string_lossy();
    let file = full.rsplit(['/', '\\']).next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file.to_string(),
    }
}

/// `<base>_<YYYYMMDD_HHMMSS>.csv`
pub fn file_name(library: &Path, timestamp: NaiveDateTime) -> String {
    format!(
        "{}_{}.csv",
        library_base_name(library),
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// Full path of the report for `library` inside `dir`
pub fn output_path(dir: &Path, library: &Path, timestamp: NaiveDateTime) -> PathBuf {
    dir.join(file_name(library, timestamp))
}
