use std::path::{Path, PathBuf};

use log::debug;
use rust_htslib::bcf::record::{GenotypeAllele, Numeric};
use rust_htslib::bcf::{self, Read};

use super::VariantIterator;
use crate::error::{Result, VariantStoreError};
use crate::genotypes::Genotype;
use crate::header::VariantHeader;
use crate::variant::{Call, CallInfoField, VariantInfoField, VariantRecord};

/// Index of the effect and gene name within one `ANN` entry.
const ANN_EFFECT: usize = 1;
const ANN_GENE: usize = 3;

/// Reads an annotated single-sample VCF/BCF.
///
/// Gene and effect come from the first `ANN` entry; a float `EXAC_AF` INFO
/// tag, when declared, becomes the population frequency (max over values).
/// Positions are reported 1-based like the tabular formats.
pub struct VcfIterator {
    path: PathBuf,
    header: VariantHeader,
    reader: Option<bcf::Reader>,
    records_read: u64,
}

fn lossy(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}

impl VcfIterator {
    pub fn open(path: &Path, header: VariantHeader) -> Result<Self> {
        let reader = bcf::Reader::from_path(path)
            .map_err(|e| VariantStoreError::ingestion(path, 0, e.to_string()))?;
        let samples = reader.header().sample_count();
        if samples != 1 {
            return Err(VariantStoreError::ingestion(
                path,
                0,
                format!("expected a single-sample file, found {} samples", samples),
            ));
        }
        debug!("opened {} as vcf", path.display());
        Ok(VcfIterator {
            path: path.to_path_buf(),
            header,
            reader: Some(reader),
            records_read: 0,
        })
    }

    fn convert(record: &bcf::Record) -> std::result::Result<VariantRecord, String> {
        let hv = record.header();
        let rid = record.rid().ok_or("record has no contig")?;
        let chrom = hv.rid2name(rid).map(lossy).map_err(|e| e.to_string())?;
        let alleles = record.alleles();
        let reference = alleles
            .first()
            .map(|a| lossy(a))
            .ok_or("record has no reference allele")?;
        let alts: Vec<String> = alleles[1..]
            .iter()
            .map(|a| lossy(a))
            .filter(|a| a != ".")
            .collect();

        let genotypes = record.genotypes().map_err(|e| e.to_string())?;
        let gt = genotypes.get(0);
        if gt.len() != 2 {
            return Err(format!("expected a diploid genotype, found {} alleles", gt.len()));
        }
        let allele = |a: GenotypeAllele| a.index().ok_or_else(|| "missing genotype allele".to_string());
        let phased = matches!(gt[1], GenotypeAllele::Phased(_) | GenotypeAllele::PhasedMissing);
        let genotype = Genotype::new(allele(gt[0])?, allele(gt[1])?, phased);

        let mut call = Call::new(genotype);
        let qual = record.qual();
        call.info.set(
            CallInfoField::Quality,
            if qual.is_missing() { ".".to_string() } else { qual.to_string() },
        );
        let filters: Vec<String> = record.filters().map(|id| lossy(&hv.id_to_name(id))).collect();
        call.info.set(
            CallInfoField::Filter,
            if filters.is_empty() { ".".to_string() } else { filters.join(";") },
        );

        let ann = match record.info(b"ANN").string() {
            Ok(Some(values)) => values.first().map(|v| lossy(v)),
            _ => None,
        }
        .ok_or("missing ANN annotation")?;
        let fields: Vec<&str> = ann.split('|').collect();
        if fields.len() <= ANN_GENE {
            return Err(format!("ANN entry '{}' has too few fields", ann));
        }

        let pos = u64::try_from(record.pos())
            .ok()
            .and_then(|p| p.checked_add(1))
            .ok_or_else(|| format!("invalid position {}", record.pos()))?;
        let mut variant = VariantRecord::new(chrom, pos, reference, alts, call).map_err(|e| e.to_string())?;
        variant.info.set(VariantInfoField::GeneEffect, fields[ANN_EFFECT]);
        variant.info.set(VariantInfoField::Gene, fields[ANN_GENE]);

        if let Ok(Some(afs)) = record.info(b"EXAC_AF").float() {
            let max = afs
                .iter()
                .filter(|v| !v.is_missing() && !v.is_vector_end() && v.is_finite())
                .copied()
                .fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |a| a.max(v))));
            if let Some(af) = max {
                variant.info.set(VariantInfoField::ExacAf, af.to_string());
            }
        }
        Ok(variant)
    }
}

impl Iterator for VcfIterator {
    type Item = Result<VariantRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let mut record = reader.empty_record();
        match reader.read(&mut record) {
            None => {
                debug!("{}: read {} records", self.path.display(), self.records_read);
                self.reader = None;
                None
            }
            Some(Err(e)) => {
                self.reader = None;
                Some(Err(VariantStoreError::ingestion(
                    &self.path,
                    self.records_read + 1,
                    e.to_string(),
                )))
            }
            Some(Ok(())) => {
                self.records_read += 1;
                match VcfIterator::convert(&record) {
                    Ok(v) => Some(Ok(v)),
                    Err(message) => {
                        self.reader = None;
                        Some(Err(VariantStoreError::ingestion(
                            &self.path,
                            self.records_read,
                            message,
                        )))
                    }
                }
            }
        }
    }
}

impl VariantIterator for VcfIterator {
    fn header(&self) -> &VariantHeader {
        &self.header
    }
}
