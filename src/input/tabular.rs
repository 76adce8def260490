use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecordsIntoIter};
use log::debug;

use super::layout::Layout;
use super::VariantIterator;
use crate::error::{Result, VariantStoreError};
use crate::header::VariantHeader;
use crate::variant::VariantRecord;

/// Lazily reads a delimited variant file through a column [`Layout`].
///
/// The open file lives inside `rows`; it is dropped on exhaustion or on
/// the first malformed row, after which the iterator is fused.
pub struct TabularIterator {
    path: PathBuf,
    header: VariantHeader,
    layout: &'static Layout,
    rows: Option<StringRecordsIntoIter<File>>,
    rows_read: u64,
}

impl TabularIterator {
    pub fn open(path: &Path, header: VariantHeader, layout: &'static Layout) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(layout.delimiter)
            .quoting(layout.quoting)
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| VariantStoreError::ingestion(path, 0, e.to_string()))?;

        let columns = reader
            .headers()
            .map_err(|e| VariantStoreError::ingestion(path, 1, e.to_string()))?
            .len();
        if columns != layout.columns.len() {
            return Err(VariantStoreError::ingestion(
                path,
                1,
                format!(
                    "header has {} columns, {} expects {}",
                    columns,
                    layout.format,
                    layout.columns.len()
                ),
            ));
        }
        debug!("opened {} as {}", path.display(), layout.format);

        Ok(TabularIterator {
            path: path.to_path_buf(),
            header,
            layout,
            rows: Some(reader.into_records()),
            rows_read: 0,
        })
    }

    fn fail(&mut self, line: u64, message: String) -> Option<Result<VariantRecord>> {
        self.rows = None;
        Some(Err(VariantStoreError::ingestion(&self.path, line, message)))
    }
}

impl Iterator for TabularIterator {
    type Item = Result<VariantRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let rows = self.rows.as_mut()?;
        match rows.next() {
            None => {
                debug!("{}: read {} rows", self.path.display(), self.rows_read);
                self.rows = None;
                None
            }
            Some(Err(e)) => {
                let line = e.position().map_or(self.rows_read + 2, |p| p.line());
                self.fail(line, e.to_string())
            }
            Some(Ok(row)) => {
                self.rows_read += 1;
                let line = row.position().map_or(self.rows_read + 1, |p| p.line());
                match self.layout.parse(&row) {
                    Ok(record) => Some(Ok(record)),
                    Err(message) => self.fail(line, message),
                }
            }
        }
    }
}

impl VariantIterator for TabularIterator {
    fn header(&self) -> &VariantHeader {
        &self.header
    }
}
