//! Positional column layouts for delimited variant files.
//!
//! Each supported producer is described by a static [`Layout`]: the column at
//! index `i` is handled by `columns[i].set`. Supporting a new producer means
//! adding a table here, not new parsing branches.

use csv::StringRecord;

use crate::genotypes::Genotype;
use crate::header::InputFormat;
use crate::variant::{Call, CallInfoField, Info, VariantInfoField, VariantRecord};

/// Token used by producers for a missing value.
pub const MISSING: &str = ".";

pub type Setter = fn(&mut RecordBuilder, &str) -> Result<(), String>;

pub struct ColumnSpec {
    pub name: &'static str,
    pub set: Setter,
}

const fn col(name: &'static str, set: Setter) -> ColumnSpec {
    ColumnSpec { name, set }
}

pub struct Layout {
    pub format: InputFormat,
    pub delimiter: u8,
    pub quoting: bool,
    pub columns: &'static [ColumnSpec],
}

/// Accumulates the fields of one row before it becomes a [`VariantRecord`].
#[derive(Default)]
pub struct RecordBuilder {
    chrom: Option<String>,
    pos: Option<u64>,
    reference: Option<String>,
    alts: Option<Vec<String>>,
    genotype: Option<Genotype>,
    exac_af: Option<f64>,
    variant_info: Info<VariantInfoField>,
    call_info: Info<CallInfoField>,
}

impl RecordBuilder {
    pub fn build(self) -> Result<VariantRecord, String> {
        let chrom = self.chrom.ok_or("no chromosome column")?;
        let pos = self.pos.ok_or("no position column")?;
        let reference = self.reference.ok_or("no reference column")?;
        let alts = self.alts.ok_or("no alternate column")?;
        let genotype = self.genotype.ok_or("no genotype column")?;

        let mut call = Call::new(genotype);
        call.info = self.call_info;
        let mut record = VariantRecord::new(chrom, pos, reference, alts, call).map_err(|e| e.to_string())?;
        record.info = self.variant_info;
        if let Some(af) = self.exac_af {
            record.info.set(VariantInfoField::ExacAf, af.to_string());
        }
        Ok(record)
    }
}

fn set_chrom(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    if field.is_empty() {
        return Err("empty chromosome".to_string());
    }
    b.chrom = Some(field.to_string());
    Ok(())
}

/// Largest position the backend can hold.
pub const MAX_POSITION: u64 = i64::MAX as u64;

fn set_pos(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    let pos = field
        .parse::<u64>()
        .map_err(|_| format!("position '{}' is not a non-negative integer", field))?;
    if pos > MAX_POSITION {
        return Err(format!("position {} is larger than {}", pos, MAX_POSITION));
    }
    b.pos = Some(pos);
    Ok(())
}

fn set_ref(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    if field.is_empty() || field == MISSING {
        return Err("missing reference bases".to_string());
    }
    b.reference = Some(field.to_string());
    Ok(())
}

pub(crate) fn parse_alts(field: &str) -> Vec<String> {
    if field.is_empty() || field == MISSING {
        return Vec::new();
    }
    field.split(',').map(|s| s.to_string()).collect()
}

fn set_alts(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    b.alts = Some(parse_alts(field));
    Ok(())
}

fn set_genotype(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    b.genotype = Some(field.parse::<Genotype>()?);
    Ok(())
}

fn set_quality(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    b.call_info.set(CallInfoField::Quality, field);
    Ok(())
}

fn set_filter(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    b.call_info.set(CallInfoField::Filter, field);
    Ok(())
}

fn set_gene(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    b.variant_info.set(VariantInfoField::Gene, field);
    Ok(())
}

fn set_gene_effect(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    b.variant_info.set(VariantInfoField::GeneEffect, field);
    Ok(())
}

fn finite(field: &str, what: &str) -> Result<f64, String> {
    match field.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("{} '{}' is not a finite number", what, field)),
    }
}

/// Population frequency columns fold into one value: the maximum of the present ones.
fn max_exac_freq(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    if field == MISSING {
        return Ok(());
    }
    let af = finite(field, "allele frequency")?;
    b.exac_af = Some(b.exac_af.map_or(af, |cur| cur.max(af)));
    Ok(())
}

fn optional_score(b: &mut RecordBuilder, key: CallInfoField, field: &str) -> Result<(), String> {
    if field == MISSING || field.is_empty() {
        return Ok(());
    }
    finite(field, "score")?;
    b.call_info.set(key, field);
    Ok(())
}

fn set_variant_score(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    optional_score(b, CallInfoField::ExomiserVariantScore, field)
}

fn set_gene_pheno_score(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    optional_score(b, CallInfoField::ExomiserGenePhenoScore, field)
}

fn set_gene_variant_score(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    optional_score(b, CallInfoField::ExomiserGeneVariantScore, field)
}

fn set_gene_combined_score(b: &mut RecordBuilder, field: &str) -> Result<(), String> {
    optional_score(b, CallInfoField::ExomiserGeneCombinedScore, field)
}

fn skip(_: &mut RecordBuilder, _: &str) -> Result<(), String> {
    Ok(())
}

pub static EXOMISER_TSV: Layout = Layout {
    format: InputFormat::ExomiserTsv,
    delimiter: b'\t',
    quoting: false,
    columns: &[
        col("#CHROM", set_chrom),
        col("POS", set_pos),
        col("REF", set_ref),
        col("ALT", set_alts),
        col("QUAL", set_quality),
        col("FILTER", set_filter),
        col("GENOTYPE", set_genotype),
        col("COVERAGE", skip),
        col("FUNCTIONAL_CLASS", set_gene_effect),
        col("HGVS", skip),
        col("EXOMISER_GENE", set_gene),
        col("CADD(>0.483)", skip),
        col("POLYPHEN(>0.956|>0.446)", skip),
        col("MUTATIONTASTER(>0.94)", skip),
        col("SIFT(<0.06)", skip),
        col("REMM", skip),
        col("DBSNP_ID", skip),
        col("MAX_FREQUENCY", skip),
        col("DBSNP_FREQUENCY", skip),
        col("EVS_EA_FREQUENCY", skip),
        col("EVS_AA_FREQUENCY", skip),
        col("EXAC_AFR_FREQ", max_exac_freq),
        col("EXAC_AMR_FREQ", max_exac_freq),
        col("EXAC_EAS_FREQ", max_exac_freq),
        col("EXAC_FIN_FREQ", max_exac_freq),
        col("EXAC_NFE_FREQ", max_exac_freq),
        col("EXAC_SAS_FREQ", max_exac_freq),
        col("EXAC_OTH_FREQ", max_exac_freq),
        col("EXOMISER_VARIANT_SCORE", set_variant_score),
        col("EXOMISER_GENE_PHENO_SCORE", set_gene_pheno_score),
        col("EXOMISER_GENE_VARIANT_SCORE", set_gene_variant_score),
        col("EXOMISER_GENE_COMBINED_SCORE", set_gene_combined_score),
        col("CONTRIBUTING_VARIANT", skip),
    ],
};

pub static FLAT_CSV: Layout = Layout {
    format: InputFormat::FlatCsv,
    delimiter: b',',
    quoting: true,
    columns: &[
        col("CHROM", set_chrom),
        col("POS", set_pos),
        col("REF", set_ref),
        col("ALT", set_alts),
        col("GT", set_genotype),
        col("QUAL", set_quality),
        col("FILTER", set_filter),
        col("GENE", set_gene),
        col("FUNCTIONAL_CLASS", set_gene_effect),
        col("AF_AFR", max_exac_freq),
        col("AF_AMR", max_exac_freq),
        col("AF_EAS", max_exac_freq),
        col("AF_NFE", max_exac_freq),
        col("VARIANT_SCORE", set_variant_score),
        col("GENE_PHENO_SCORE", set_gene_pheno_score),
        col("GENE_VARIANT_SCORE", set_gene_variant_score),
        col("GENE_COMBINED_SCORE", set_gene_combined_score),
    ],
};

pub static TABULAR_LAYOUTS: [&Layout; 2] = [&EXOMISER_TSV, &FLAT_CSV];

impl Layout {
    pub fn for_format(format: InputFormat) -> Option<&'static Layout> {
        TABULAR_LAYOUTS.iter().copied().find(|l| l.format == format)
    }

    /// True if `line` is the header row this layout expects.
    pub fn recognizes(&self, line: &str) -> bool {
        let names: Vec<&str> = line
            .trim_end_matches(&['\r', '\n'][..])
            .split(self.delimiter as char)
            .map(|n| n.trim().trim_matches('"'))
            .collect();
        names.len() == self.columns.len()
            && names.iter().zip(self.columns).all(|(n, c)| *n == c.name)
    }

    /// Interpret one data row through the column table.
    pub fn parse(&self, row: &StringRecord) -> Result<VariantRecord, String> {
        if row.len() != self.columns.len() {
            return Err(format!(
                "expected {} columns, found {}",
                self.columns.len(),
                row.len()
            ));
        }
        let mut builder = RecordBuilder::default();
        for (spec, field) in self.columns.iter().zip(row.iter()) {
            (spec.set)(&mut builder, field.trim()).map_err(|e| format!("{}: {}", spec.name, e))?;
        }
        builder.build()
    }
}
