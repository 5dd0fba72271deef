use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt;

use polars::prelude::PolarsError;
use serde::Serialize;

/// Wraps any foreign error so it can travel through `PolarsResult`.
pub fn polars_err(e: Box<dyn Error>) -> PolarsError {
    PolarsError::ComputeError(format!("{}", e).into())
}

/// A file-backed input that is read once and consumed read-only afterwards.
pub trait Dataset {
    type Output;

    fn load(&self) -> anyhow::Result<Self::Output>;
}

/// One row of the Entrez <-> Ensembl crosswalk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrosswalkEntry {
    pub entrez: i64,
    pub ensembl: Option<String>,
    pub hgnc_symbol: Option<String>,
    pub chrom: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// One gene of a MAGMA `.genes.annot` file.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub entrez: i64,
    /// MAGMA `chr:start:end`
    pub locus: String,
    pub snps: Vec<String>,
}

/// An annotation row after translation to the Ensembl namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct RemappedAnnotation {
    pub ensembl: String,
    pub entrez: i64,
    pub locus: String,
    pub snps: Vec<String>,
    pub hgnc_symbol: Option<String>,
    pub chrom: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// Which annotation method and which drug-gene interaction source a result
/// table was produced from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResultKey {
    pub source: String,
    pub annotation: String,
}

impl ResultKey {
    pub fn new(source: &str, annotation: &str) -> Self {
        Self {
            source: source.to_string(),
            annotation: annotation.to_string(),
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.annotation, self.source)
    }
}

/// One tested entity (drug, gene set or pathway) of a MAGMA gene-set analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub entity: String,
    pub n_genes: u32,
    pub beta: f64,
    pub beta_std: f64,
    pub se: f64,
    pub p: f64,
    pub z: f64,
    pub q: f64,
    pub is_treatment: bool,
}

impl ResultRecord {
    /// `z` and `q` start neutral and are filled in by the loader once the
    /// table has been filtered.
    pub fn new(entity: String, n_genes: u32, beta: f64, beta_std: f64, se: f64, p: f64) -> Self {
        Self {
            entity,
            n_genes,
            beta,
            beta_std,
            se,
            p,
            z: 0.0,
            q: 1.0,
            is_treatment: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultTable {
    pub key: ResultKey,
    pub records: Vec<ResultRecord>,
}

impl ResultTable {
    #[cfg(test)]
    pub fn get(&self, entity: &str) -> Option<&ResultRecord> {
        self.records.iter().find(|r| r.entity == entity)
    }

    pub fn by_entity(&self) -> BTreeMap<&str, &ResultRecord> {
        self.records.iter().map(|r| (r.entity.as_str(), r)).collect()
    }
}

pub type ResultCollection = BTreeMap<ResultKey, ResultTable>;

/// Which significance measure a threshold is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignificanceColumn {
    P,
    Q,
}

impl SignificanceColumn {
    pub fn value(&self, record: &ResultRecord) -> f64 {
        match self {
            SignificanceColumn::P => record.p,
            SignificanceColumn::Q => record.q,
        }
    }
}

impl fmt::Display for SignificanceColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignificanceColumn::P => write!(f, "P"),
            SignificanceColumn::Q => write!(f, "Q"),
        }
    }
}

/// One gene of a MAGMA gene analysis (`.genes.out`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneResult {
    pub gene: String,
    pub chrom: String,
    pub start: i64,
    pub stop: i64,
    pub n_snps: u32,
    pub n_param: u32,
    pub n: f64,
    pub z_stat: f64,
    pub p: f64,
    pub p_multi: Option<f64>,
    pub permp_multi: Option<f64>,
}

impl GeneResult {
    /// Multi-model p-value when MAGMA produced one.
    pub fn best_p(&self) -> f64 {
        self.p_multi.unwrap_or(self.p)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneSet {
    pub name: String,
    pub genes: Vec<String>,
}

pub type GeneSetLibrary = BTreeMap<String, GeneSet>;

/// Entities treated as ground truth positives, e.g. drugs known to treat the
/// study's disease.
pub type KnownPositives = HashSet<String>;
