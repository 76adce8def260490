//! Field-for-field mapping between [`VariantRecord`] and backend documents.

use crate::error::{Result, VariantStoreError};
use crate::genotypes::Genotype;
use crate::header::VariantHeader;
use crate::input::layout::parse_alts;
use crate::variant::{Call, CallInfoField, VariantInfoField, VariantRecord};

pub const INDIVIDUAL_ID: &str = "individual_id";
pub const IS_PUBLIC: &str = "is_public";
pub const CHROM: &str = "chrom";
pub const POS: &str = "pos";
pub const REF: &str = "reference";
pub const ALTS: &str = "alts";
pub const GENOTYPE: &str = "genotype";
pub const GENE: &str = "gene";
pub const GENE_EFFECT: &str = "gene_effect";
pub const EXAC_AF: &str = "exac_af";
pub const QUAL: &str = "quality";
pub const FILTER: &str = "filter";
pub const EXOMISER_VARIANT_SCORE: &str = "exomiser_variant_score";
pub const EXOMISER_GENE_PHENO_SCORE: &str = "exomiser_gene_pheno_score";
pub const EXOMISER_GENE_VARIANT_SCORE: &str = "exomiser_gene_variant_score";
pub const EXOMISER_GENE_COMBINED_SCORE: &str = "exomiser_gene_combined_score";

/// Column order used for inserts and selects.
pub const COLUMNS: [&str; 16] = [
    INDIVIDUAL_ID,
    IS_PUBLIC,
    CHROM,
    POS,
    REF,
    ALTS,
    GENOTYPE,
    GENE,
    GENE_EFFECT,
    EXAC_AF,
    QUAL,
    FILTER,
    EXOMISER_VARIANT_SCORE,
    EXOMISER_GENE_PHENO_SCORE,
    EXOMISER_GENE_VARIANT_SCORE,
    EXOMISER_GENE_COMBINED_SCORE,
];

/// One stored (individual, variant) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDocument {
    pub individual_id: String,
    pub is_public: bool,
    pub chrom: String,
    pub pos: i64,
    pub reference: String,
    pub alts: Vec<String>,
    pub genotype: String,
    pub gene: String,
    pub gene_effect: String,
    pub exac_af: Option<f64>,
    pub quality: String,
    pub filter: String,
    /// Scores in [`CallInfoField::SCORES`] order.
    pub scores: [Option<f64>; 4],
}

fn required<'a>(value: Option<&'a str>, name: &str, record: &VariantRecord) -> Result<&'a str> {
    value.ok_or_else(|| VariantStoreError::mapping(format!("{} has no {}", record, name)))
}

impl VariantDocument {
    pub fn from_record(header: &VariantHeader, record: &VariantRecord) -> Result<Self> {
        let call = match record.calls.as_slice() {
            [call] => call,
            calls => {
                return Err(VariantStoreError::mapping(format!(
                    "{} has {} calls, expected one",
                    record,
                    calls.len()
                )))
            }
        };
        if record.alternate_bases.iter().any(|a| a.contains(',')) {
            return Err(VariantStoreError::mapping(format!(
                "{} has an alternate allele containing ','",
                record
            )));
        }
        let pos = i64::try_from(record.start)
            .map_err(|_| VariantStoreError::mapping(format!("{} position out of range", record)))?;

        let mut scores = [None; 4];
        for (slot, field) in scores.iter_mut().zip(CallInfoField::SCORES) {
            *slot = call.info.get_f64(field)?;
        }

        Ok(VariantDocument {
            individual_id: header.individual_id.clone(),
            is_public: header.is_public,
            chrom: record.reference_name.clone(),
            pos,
            reference: record.reference_bases.clone(),
            alts: record.alternate_bases.clone(),
            genotype: call.genotype.to_string(),
            gene: required(record.info.get(VariantInfoField::Gene), "gene", record)?.to_string(),
            gene_effect: required(record.info.get(VariantInfoField::GeneEffect), "gene effect", record)?
                .to_string(),
            exac_af: record.info.get_f64(VariantInfoField::ExacAf)?,
            quality: required(call.info.get(CallInfoField::Quality), "quality", record)?.to_string(),
            filter: required(call.info.get(CallInfoField::Filter), "filter", record)?.to_string(),
            scores,
        })
    }

    pub fn into_record(self) -> Result<VariantRecord> {
        let genotype: Genotype = self.genotype.parse().map_err(VariantStoreError::Mapping)?;
        let start = u64::try_from(self.pos)
            .map_err(|_| VariantStoreError::mapping(format!("negative position {}", self.pos)))?;

        let mut call = Call::new(genotype);
        call.info.set(CallInfoField::Quality, self.quality);
        call.info.set(CallInfoField::Filter, self.filter);
        for (score, field) in self.scores.into_iter().zip(CallInfoField::SCORES) {
            if let Some(score) = score {
                call.info.set(field, score.to_string());
            }
        }

        let mut record = VariantRecord::new(self.chrom, start, self.reference, self.alts, call)?;
        record.info.set(VariantInfoField::Gene, self.gene);
        record.info.set(VariantInfoField::GeneEffect, self.gene_effect);
        if let Some(af) = self.exac_af {
            record.info.set(VariantInfoField::ExacAf, af.to_string());
        }
        Ok(record)
    }

    pub fn alts_text(&self) -> String {
        self.alts.join(",")
    }

    pub fn alts_from_text(text: &str) -> Vec<String> {
        parse_alts(text)
    }
}
