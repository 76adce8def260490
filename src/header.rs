use std::fmt;
use std::str::FromStr;

/// Supported producers of variant files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFormat {
    /// Tab-delimited variant output of Exomiser.
    ExomiserTsv,
    /// Comma-delimited flattened call set.
    FlatCsv,
    /// Annotated single-sample VCF or BCF.
    Vcf,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::ExomiserTsv => "exomiser-tsv",
            InputFormat::FlatCsv => "flat-csv",
            InputFormat::Vcf => "vcf",
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exomiser-tsv" | "tsv" => Ok(InputFormat::ExomiserTsv),
            "flat-csv" | "csv" => Ok(InputFormat::FlatCsv),
            "vcf" | "bcf" => Ok(InputFormat::Vcf),
            _ => Err(format!("unknown input format '{}'", s)),
        }
    }
}

/// Per-file metadata shared by every record an iterator yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantHeader {
    pub individual_id: String,
    /// Whether the individual takes part in aggregate queries.
    pub is_public: bool,
    pub format: InputFormat,
}

impl VariantHeader {
    pub fn new(individual_id: impl Into<String>, is_public: bool, format: InputFormat) -> Self {
        VariantHeader {
            individual_id: individual_id.into(),
            is_public,
            format,
        }
    }
}
