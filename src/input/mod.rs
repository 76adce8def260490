//! Adapters turning variant files into lazy sequences of [`VariantRecord`]s.

pub mod layout;
pub mod tabular;
pub mod vcf;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::debug;

use crate::error::{Result, VariantStoreError};
use crate::header::{InputFormat, VariantHeader};
use crate::variant::VariantRecord;
use layout::{Layout, TABULAR_LAYOUTS};
use tabular::TabularIterator;
use vcf::VcfIterator;

/// A finite, single-pass sequence of records from one file.
///
/// Implementors own their file handle and release it once exhausted or after
/// the first error; later calls to `next` return `None`.
pub trait VariantIterator: Iterator<Item = Result<VariantRecord>> {
    fn header(&self) -> &VariantHeader;

    /// Like `next`, but an exhausted iterator is an error.
    fn next_record(&mut self) -> Result<VariantRecord> {
        self.next().unwrap_or(Err(VariantStoreError::EndOfSequence))
    }
}

impl InputFormat {
    /// Pick a format from the file extension, falling back to the first line.
    pub fn detect(path: &Path) -> Result<InputFormat> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".vcf") || name.ends_with(".vcf.gz") || name.ends_with(".bcf") {
            return Ok(InputFormat::Vcf);
        }
        if name.ends_with(".tsv") {
            return Ok(InputFormat::ExomiserTsv);
        }
        if name.ends_with(".csv") {
            return Ok(InputFormat::FlatCsv);
        }
        InputFormat::sniff(path)
    }

    fn sniff(path: &Path) -> Result<InputFormat> {
        let file = File::open(path).map_err(|e| VariantStoreError::ingestion(path, 0, e.to_string()))?;
        let mut line = String::new();
        BufReader::new(file)
            .read_line(&mut line)
            .map_err(|e| VariantStoreError::ingestion(path, 1, e.to_string()))?;
        if line.starts_with("##fileformat=VCF") {
            return Ok(InputFormat::Vcf);
        }
        TABULAR_LAYOUTS
            .iter()
            .find(|l| l.recognizes(&line))
            .map(|l| l.format)
            .ok_or_else(|| VariantStoreError::UnsupportedFormat(path.to_path_buf()))
    }
}

/// Open the adapter matching `header.format` for `path`.
pub fn open_iterator(path: &Path, header: VariantHeader) -> Result<Box<dyn VariantIterator>> {
    debug!(
        "opening {} for individual {} as {}",
        path.display(),
        header.individual_id,
        header.format
    );
    match header.format {
        InputFormat::Vcf => Ok(Box::new(VcfIterator::open(path, header)?)),
        format => {
            let layout = Layout::for_format(format)
                .ok_or_else(|| VariantStoreError::UnsupportedFormat(path.to_path_buf()))?;
            Ok(Box::new(TabularIterator::open(path, header, layout)?))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::io::Write;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(InputFormat::detect(Path::new("a/P1.vcf.gz")).unwrap(), InputFormat::Vcf);
        assert_eq!(InputFormat::detect(Path::new("P1.BCF")).unwrap(), InputFormat::Vcf);
        assert_eq!(
            InputFormat::detect(Path::new("P1.variants.tsv")).unwrap(),
            InputFormat::ExomiserTsv
        );
        assert_eq!(InputFormat::detect(Path::new("P1.csv")).unwrap(), InputFormat::FlatCsv);
    }

    #[test]
    fn test_detect_by_header() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "{}", exomiser_header()).unwrap();
        file.flush().unwrap();
        assert_eq!(InputFormat::detect(file.path()).unwrap(), InputFormat::ExomiserTsv);

        let mut vcf = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(vcf, "##fileformat=VCFv4.2").unwrap();
        vcf.flush().unwrap();
        assert_eq!(InputFormat::detect(vcf.path()).unwrap(), InputFormat::Vcf);

        let mut other = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(other, "hello,world").unwrap();
        other.flush().unwrap();
        assert!(matches!(
            InputFormat::detect(other.path()),
            Err(VariantStoreError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_open_iterator_dispatches() {
        let file = exomiser_file(&[exomiser_row("1", 5, "A", "0/1", ["."; 7])]);
        let header = VariantHeader::new("P1", true, InputFormat::ExomiserTsv);
        let mut it = open_iterator(file.path(), header).unwrap();
        assert_eq!(it.header().individual_id, "P1");
        assert_eq!(it.next_record().unwrap().start, 5);
        assert!(matches!(it.next_record(), Err(VariantStoreError::EndOfSequence)));
    }
}
