use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, VariantStoreError};
use crate::genotypes::Genotype;

/// Keys allowed in the INFO mapping of a [`VariantRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariantInfoField {
    Gene,
    GeneEffect,
    /// Maximum population allele frequency across the ExAC subpopulations.
    ExacAf,
}

/// Keys allowed in the INFO mapping of a [`Call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallInfoField {
    Quality,
    Filter,
    ExomiserVariantScore,
    ExomiserGenePhenoScore,
    ExomiserGeneVariantScore,
    ExomiserGeneCombinedScore,
}

pub trait InfoKey: Copy + Ord + fmt::Debug {
    fn as_str(&self) -> &'static str;
}

impl InfoKey for VariantInfoField {
    fn as_str(&self) -> &'static str {
        match self {
            VariantInfoField::Gene => "GENE",
            VariantInfoField::GeneEffect => "GENE_EFFECT",
            VariantInfoField::ExacAf => "EXAC_AF",
        }
    }
}

impl InfoKey for CallInfoField {
    fn as_str(&self) -> &'static str {
        match self {
            CallInfoField::Quality => "QUALITY",
            CallInfoField::Filter => "FILTER",
            CallInfoField::ExomiserVariantScore => "EXOMISER_VARIANT_SCORE",
            CallInfoField::ExomiserGenePhenoScore => "EXOMISER_GENE_PHENO_SCORE",
            CallInfoField::ExomiserGeneVariantScore => "EXOMISER_GENE_VARIANT_SCORE",
            CallInfoField::ExomiserGeneCombinedScore => "EXOMISER_GENE_COMBINED_SCORE",
        }
    }
}

impl CallInfoField {
    pub const SCORES: [CallInfoField; 4] = [
        CallInfoField::ExomiserVariantScore,
        CallInfoField::ExomiserGenePhenoScore,
        CallInfoField::ExomiserGeneVariantScore,
        CallInfoField::ExomiserGeneCombinedScore,
    ];

    /// Look up a score field by its INFO key, case-insensitively.
    pub fn score_from_name(name: &str) -> Option<CallInfoField> {
        CallInfoField::SCORES
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(name))
    }
}

/// An INFO mapping restricted to one enumerated key set.
#[derive(Debug, Clone, PartialEq)]
pub struct Info<K: InfoKey>(BTreeMap<K, Vec<String>>);

impl<K: InfoKey> Default for Info<K> {
    fn default() -> Self {
        Info(BTreeMap::new())
    }
}

impl<K: InfoKey> Info<K> {
    /// Append a value under `key`.
    pub fn add(&mut self, key: K, value: impl Into<String>) {
        self.0.entry(key).or_default().push(value.into());
    }

    /// Replace all values under `key` with a single value.
    pub fn set(&mut self, key: K, value: impl Into<String>) {
        self.0.insert(key, vec![value.into()]);
    }

    pub fn remove(&mut self, key: K) -> Option<Vec<String>> {
        self.0.remove(&key)
    }

    /// First value stored under `key`.
    pub fn get(&self, key: K) -> Option<&str> {
        self.0
            .get(&key)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// First value under `key` parsed as a finite number. Absent stays absent.
    pub fn get_f64(&self, key: K) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => match v.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(Some(n)),
                _ => Err(VariantStoreError::mapping(format!(
                    "{} value '{}' is not a finite number",
                    key.as_str(),
                    v
                ))),
            },
        }
    }

    pub fn contains(&self, key: K) -> bool {
        self.0.contains_key(&key)
    }
}

/// Genotype and metrics of one individual for one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub genotype: Genotype,
    pub info: Info<CallInfoField>,
}

impl Call {
    pub fn new(genotype: Genotype) -> Self {
        Call {
            genotype,
            info: Info::default(),
        }
    }
}

/// One variant call and its annotations, as produced by every input adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    pub reference_bases: String,
    pub alternate_bases: Vec<String>,
    pub calls: Vec<Call>,
    pub info: Info<VariantInfoField>,
}

impl VariantRecord {
    /// Build a record with a single call; `end` is derived from the reference length.
    ///
    /// Fails with a mapping error if `end` does not fit in a `u64`.
    pub fn new(
        reference_name: impl Into<String>,
        start: u64,
        reference_bases: impl Into<String>,
        alternate_bases: Vec<String>,
        call: Call,
    ) -> Result<Self> {
        let reference_bases = reference_bases.into();
        let end = start
            .checked_add(reference_bases.len() as u64)
            .ok_or_else(|| {
                VariantStoreError::mapping(format!(
                    "position {} overflows with a {} base reference",
                    start,
                    reference_bases.len()
                ))
            })?;
        Ok(VariantRecord {
            reference_name: reference_name.into(),
            start,
            end,
            reference_bases,
            alternate_bases,
            calls: vec![call],
            info: Info::default(),
        })
    }

    /// The call of a single-sample record.
    pub fn call(&self) -> Option<&Call> {
        self.calls.first()
    }

    pub fn call_mut(&mut self) -> Option<&mut Call> {
        self.calls.first_mut()
    }

    pub fn gene(&self) -> Option<&str> {
        self.info.get(VariantInfoField::Gene)
    }

    pub fn gene_effect(&self) -> Option<&str> {
        self.info.get(VariantInfoField::GeneEffect)
    }

    /// A non-numeric stored frequency reads as absent here; mapping reports it instead.
    pub fn exac_af(&self) -> Option<f64> {
        self.info.get_f64(VariantInfoField::ExacAf).ok().flatten()
    }

    pub fn call_info(&self, key: CallInfoField) -> Option<&str> {
        self.call().and_then(|c| c.info.get(key))
    }

    pub fn score(&self, key: CallInfoField) -> Option<f64> {
        self.call()
            .and_then(|c| c.info.get_f64(key).ok())
            .flatten()
    }
}

impl fmt::Display for VariantRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}>{}",
            self.reference_name,
            self.start,
            self.reference_bases,
            self.alternate_bases.join(",")
        )
    }
}
