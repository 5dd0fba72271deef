//! Entrez -> Ensembl translation of MAGMA gene annotation files.
//!
//! A `.genes.annot` row is `entrez<TAB>chr:start:end<TAB>snp<TAB>snp...`, so
//! the column count varies with the SNP list. Only the first two delimiters
//! separate columns; everything after them is one free-text SNP field.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use polars::prelude::*;
use regex::Regex;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

use crate::data_handling::crosswalk::Crosswalk;
use crate::helper_functions::dataframe_to_tsv;
use crate::models::{AnnotationRecord, Dataset, RemappedAnnotation};

pub const ANNOT_DELIMITER: char = '\t';
pub const SAFE_SEPARATOR: char = ';';
/// Delimiters that separate real columns: entrez | locus | snplist
pub const LEADING_COLUMNS: usize = 2;

const LOCUS_PATTERN: &str = r"^[0-9A-Za-z_.]+:\d+:\d+$";

/// Replace only the first `n` occurrences of `from` with `to`.
pub fn normalize_leading_delimiters(line: &str, from: char, to: char, n: usize) -> String {
    let mut out = String::with_capacity(line.len());
    let mut replaced = 0;
    for c in line.chars() {
        if c == from && replaced < n {
            out.push(to);
            replaced += 1;
        } else {
            out.push(c);
        }
    }
    out
}

/// Parses one annotation line. Comments and blank lines yield `None`.
pub fn parse_annotation_line(
    line: &str,
    line_no: usize,
    locus_re: &Regex,
) -> Result<Option<AnnotationRecord>> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let normalized =
        normalize_leading_delimiters(line, ANNOT_DELIMITER, SAFE_SEPARATOR, LEADING_COLUMNS);
    let mut parts = normalized.splitn(LEADING_COLUMNS + 1, SAFE_SEPARATOR);
    let (Some(entrez), Some(locus)) = (parts.next(), parts.next()) else {
        bail!(
            "line {}: malformed annotation row, expected at least 2 columns: {:?}",
            line_no,
            line
        );
    };
    let entrez: i64 = entrez
        .trim()
        .parse()
        .with_context(|| format!("line {}: bad Entrez ID {:?}", line_no, entrez))?;
    let locus = locus.trim();
    if !locus_re.is_match(locus) {
        bail!("line {}: bad locus {:?}, expected chr:start:end", line_no, locus);
    }
    // inner tabs of the SNP list collapse to single spaces
    let snps = parts
        .next()
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    Ok(Some(AnnotationRecord {
        entrez,
        locus: locus.to_string(),
        snps,
    }))
}

/// A MAGMA `.genes.annot` file keyed by Entrez ID.
pub struct AnnotationFile {
    pub path: PathBuf,
}

impl Dataset for AnnotationFile {
    type Output = Vec<AnnotationRecord>;

    fn load(&self) -> Result<Vec<AnnotationRecord>> {
        info!("Reading gene annotation from {:?}", self.path);
        let locus_re = Regex::new(LOCUS_PATTERN)?;
        let file = File::open(&self.path).with_context(|| format!("opening {:?}", self.path))?;

        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("reading {:?}", self.path))?;
            if let Some(record) = parse_annotation_line(&line, i + 1, &locus_re)
                .with_context(|| format!("parsing {:?}", self.path))?
            {
                records.push(record);
            }
        }
        info!("number of genes: {}", records.len());
        Ok(records)
    }
}

/// Row counts through each step of the remap. The input/output comparison is
/// the only diagnostic for crosswalk misses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemapReport {
    pub input_rows: usize,
    pub crosswalk_rows: usize,
    pub duplicate_crosswalk_rows: usize,
    pub unmatched_rows: usize,
    pub joined_rows: usize,
    pub null_target_rows: usize,
    pub ambiguous_target_ids: usize,
    pub ambiguous_rows_dropped: usize,
    pub output_rows: usize,
}

impl RemapReport {
    /// More output than input rows means some Entrez IDs fanned out to
    /// several Ensembl IDs.
    pub fn output_exceeds_input(&self) -> bool {
        self.output_rows > self.input_rows
    }
}

/// Inner join of `records` with `crosswalk` on Entrez ID.
///
/// Join candidates without an Ensembl ID are excluded, and every Ensembl ID
/// produced more than once is dropped entirely: no row is kept for an
/// ambiguous target. Output is sorted by Ensembl ID.
pub fn remap_annotations(
    records: &[AnnotationRecord],
    crosswalk: &Crosswalk,
) -> (Vec<RemappedAnnotation>, RemapReport) {
    let index = crosswalk.by_entrez();
    let mut report = RemapReport {
        input_rows: records.len(),
        crosswalk_rows: crosswalk.len(),
        duplicate_crosswalk_rows: crosswalk.duplicate_rows,
        ..RemapReport::default()
    };

    let mut candidates = Vec::new();
    for record in records {
        let Some(entries) = index.get(&record.entrez) else {
            report.unmatched_rows += 1;
            continue;
        };
        for entry in entries {
            report.joined_rows += 1;
            let Some(ensembl) = &entry.ensembl else {
                report.null_target_rows += 1;
                continue;
            };
            candidates.push(RemappedAnnotation {
                ensembl: ensembl.clone(),
                entrez: record.entrez,
                locus: record.locus.clone(),
                snps: record.snps.clone(),
                hgnc_symbol: entry.hgnc_symbol.clone(),
                chrom: entry.chrom.clone(),
                start: entry.start,
                end: entry.end,
            });
        }
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for c in &candidates {
        *counts.entry(c.ensembl.clone()).or_default() += 1;
    }
    report.ambiguous_target_ids = counts.values().filter(|&&n| n > 1).count();

    let mut remapped: Vec<RemappedAnnotation> = candidates
        .into_iter()
        .filter(|c| counts.get(&c.ensembl).copied() == Some(1))
        .collect();
    remapped.sort_by(|a, b| a.ensembl.cmp(&b.ensembl));

    report.ambiguous_rows_dropped = report.joined_rows - report.null_target_rows - remapped.len();
    report.output_rows = remapped.len();

    info!(
        "Remapped {} of {} genes ({} unmatched, {} without Ensembl ID, \
         {} rows dropped for {} ambiguous Ensembl IDs)",
        report.output_rows,
        report.input_rows,
        report.unmatched_rows,
        report.null_target_rows,
        report.ambiguous_rows_dropped,
        report.ambiguous_target_ids
    );
    if report.output_exceeds_input() {
        warn!(
            "Remapped table has more rows ({}) than the input annotation ({})",
            report.output_rows, report.input_rows
        );
    }

    (remapped, report)
}

pub fn remapped_to_frame(rows: &[RemappedAnnotation]) -> PolarsResult<DataFrame> {
    let ensembl: Vec<&str> = rows.iter().map(|r| r.ensembl.as_str()).collect();
    let entrez: Vec<i64> = rows.iter().map(|r| r.entrez).collect();
    let locus: Vec<&str> = rows.iter().map(|r| r.locus.as_str()).collect();
    let snplist: Vec<String> = rows.iter().map(|r| r.snps.join(" ")).collect();
    let hgnc: Vec<Option<&str>> = rows.iter().map(|r| r.hgnc_symbol.as_deref()).collect();
    let chrom: Vec<Option<&str>> = rows.iter().map(|r| r.chrom.as_deref()).collect();
    let start: Vec<Option<i64>> = rows.iter().map(|r| r.start).collect();
    let end: Vec<Option<i64>> = rows.iter().map(|r| r.end).collect();

    DataFrame::new(vec![
        Column::from(Series::new("Ensembl".into(), ensembl)),
        Column::from(Series::new("Entrez ID".into(), entrez)),
        Column::from(Series::new("chr:start:end".into(), locus)),
        Column::from(Series::new("snplist".into(), snplist)),
        Column::from(Series::new("HGNC symbol".into(), hgnc)),
        Column::from(Series::new("chrom".into(), chrom)),
        Column::from(Series::new("chromStart".into(), start)),
        Column::from(Series::new("chromEnd".into(), end)),
    ])
}

/// Persists the remapped annotation as a headerless TSV, with the row-count
/// report next to it as `<output>.report.json`.
pub fn write_remapped(
    path: &Path,
    rows: &[RemappedAnnotation],
    report: &RemapReport,
) -> Result<()> {
    let mut df = remapped_to_frame(rows)?;
    debug!("Remapped head: {:?}", df.head(Some(5)));
    dataframe_to_tsv(&mut df, path, false).with_context(|| format!("writing {:?}", path))?;

    let report_path = PathBuf::from(format!("{}.report.json", path.display()));
    serde_json::to_writer_pretty(File::create(&report_path)?, report)
        .with_context(|| format!("writing {:?}", report_path))?;
    info!("Wrote {} remapped genes to {:?}", rows.len(), path);
    Ok(())
}

/// SNPs per gene across a remapped annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnpCountSummary {
    pub genes: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

pub fn snp_count_summary(rows: &[RemappedAnnotation]) -> Option<SnpCountSummary> {
    if rows.is_empty() {
        return None;
    }
    let counts: Vec<f64> = rows.iter().map(|r| r.snps.len() as f64).collect();
    Some(SnpCountSummary {
        genes: counts.len(),
        mean: counts.iter().mean(),
        // NaN for a single gene
        std_dev: counts.iter().std_dev(),
        min: counts.iter().cloned().fold(f64::INFINITY, f64::min),
        max: counts.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    })
}
