//! The run: remap -> (MAGMA) -> load -> compare. Each stage reads its inputs
//! fresh and writes fresh outputs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::analysis::comparison::{
    classify, compare_gene_results, gene_count_regression, paired_regression, set_difference,
    Classification, SetDifference,
};
use crate::analysis::summary::{
    write_classification_table, write_regressions, write_roc_points, write_set_differences,
    write_significant_summary, RegressionRow,
};
use crate::config::{MagmaConfig, RemapConfig, RunConfig};
use crate::data_handling::annotation::{
    remap_annotations, snp_count_summary, write_remapped, AnnotationFile, RemapReport,
};
use crate::data_handling::crosswalk::CrosswalkTable;
use crate::data_handling::gene_sets::{GeneLocFile, GeneSetFile, HgncTable, KnownPositiveFile};
use crate::data_handling::results::{label_known_positives, load_collection, load_gene_results};
use crate::helper_functions::fmt_opt;
use crate::magma_processing::{annotate_command, run_magma, MagmaOptions};
use crate::models::{
    Dataset, GeneSetLibrary, KnownPositives, ResultCollection, ResultKey, ResultTable,
    SignificanceColumn,
};

pub fn run(cfg: &RunConfig) -> Result<()> {
    if let Some(magma) = &cfg.magma {
        run_annotate_stage(magma)?;
    }
    if let Some(remap) = &cfg.remap {
        run_remap_stage(remap)?;
    }
    let report = run_report_stage(cfg)?;
    log_report(&report);
    if cfg.compare_gene_results {
        let rows = run_gene_comparison_stage(cfg)?;
        info!("{} gene level comparisons written", rows.len());
    }
    info!("Pipeline finished");
    Ok(())
}

fn log_report(report: &Report) {
    info!("Report over {} result tables", report.collection.len());
    for c in &report.classifications {
        info!(
            "{}: {} significant at {} < {}, AUC {}",
            c.key,
            c.significant().len(),
            c.column,
            c.threshold,
            fmt_opt(c.auc())
        );
    }
    for d in &report.set_differences {
        info!(
            "{} vs {} ({}): {} only in first, {} only in second",
            d.first,
            d.second,
            d.column,
            d.only_first.len(),
            d.only_second.len()
        );
    }
    let fitted = report.regressions.iter().filter(|r| r.fit.is_some()).count();
    info!("{} of {} regressions computable", fitted, report.regressions.len());
}

/// Positional SNP -> gene annotation with MAGMA.
pub fn run_annotate_stage(magma: &MagmaConfig) -> Result<()> {
    info!("Annotating SNPs to genes");
    let opts = MagmaOptions::resolve(&magma.path, magma.window_up_kb, magma.window_down_kb)?;
    run_magma(annotate_command(&opts, &magma.snp_loc, &magma.gene_loc, &magma.out_prefix))
}

pub fn run_remap_stage(remap: &RemapConfig) -> Result<RemapReport> {
    info!("Translating {:?} to Ensembl IDs", remap.annot);
    let records = AnnotationFile {
        path: remap.annot.clone(),
    }
    .load()?;
    let crosswalk = CrosswalkTable {
        path: remap.crosswalk.clone(),
    }
    .load()?;

    let (rows, report) = remap_annotations(&records, &crosswalk);
    if let Some(summary) = snp_count_summary(&rows) {
        info!(
            "SNPs per gene over {} genes: mean {:.2}, std {:.2}, min {}, max {}",
            summary.genes, summary.mean, summary.std_dev, summary.min, summary.max
        );
    }
    write_remapped(&remap.output, &rows, &report)?;
    Ok(report)
}

fn summary_file(cfg: &RunConfig, name: &str) -> PathBuf {
    cfg.summary_dir.join(format!("magma_{}_{}.tsv", cfg.study, name))
}

fn load_known_positives(cfg: &RunConfig) -> Result<KnownPositives> {
    match &cfg.known_positives {
        Some(path) => KnownPositiveFile { path: path.clone() }.load(),
        None => {
            warn!("No known positive list configured, classification metrics will be NA");
            Ok(KnownPositives::new())
        }
    }
}

fn lookup<'a>(
    collection: &'a ResultCollection,
    source: &str,
    annotation: &str,
) -> Result<&'a ResultTable> {
    collection
        .get(&ResultKey::new(source, annotation))
        .with_context(|| format!("no {} {} results loaded", annotation, source))
}

/// Everything the report stage produced, for the caller to inspect.
#[derive(Debug)]
pub struct Report {
    pub collection: ResultCollection,
    pub classifications: Vec<Classification>,
    pub set_differences: Vec<SetDifference>,
    pub regressions: Vec<RegressionRow>,
}

pub fn run_report_stage(cfg: &RunConfig) -> Result<Report> {
    let positives = load_known_positives(cfg)?;
    let library: Option<GeneSetLibrary> = cfg
        .gene_sets
        .as_ref()
        .map(|path| GeneSetFile { path: path.clone() }.load())
        .transpose()?;
    let hgnc: Option<HgncTable> = cfg
        .gene_loc
        .as_ref()
        .map(|path| GeneLocFile { path: path.clone() }.load())
        .transpose()?;

    let collection: ResultCollection = load_collection(cfg)?
        .into_iter()
        .map(|(key, table)| (key, label_known_positives(table, &positives)))
        .collect();

    let mut classifications = Vec::with_capacity(collection.len());
    for table in collection.values() {
        write_significant_summary(table, cfg, library.as_ref(), hgnc.as_ref())?;
        classifications.push(classify(
            table,
            &positives,
            SignificanceColumn::Q,
            cfg.signif_thresh,
        ));
    }
    write_classification_table(&classifications, &summary_file(cfg, "classification"))?;
    write_roc_points(&classifications, &summary_file(cfg, "roc"))?;

    let mut set_differences = Vec::new();
    let mut regressions = Vec::new();
    if let Some((first, second)) = &cfg.compare_sources {
        for annotation in &cfg.annotations {
            let a = lookup(&collection, first, annotation)?;
            let b = lookup(&collection, second, annotation)?;
            for column in [SignificanceColumn::P, SignificanceColumn::Q] {
                set_differences.push(set_difference(a, b, column, cfg.signif_thresh));
            }
            regressions.push(RegressionRow {
                first: a.key.to_string(),
                second: b.key.to_string(),
                metric: cfg.regression_metric.to_string(),
                fit: paired_regression(a, b, cfg.regression_metric),
            });
        }
        write_set_differences(&set_differences, &summary_file(cfg, "set_differences"))?;
    }

    // every annotation method against every other, per source
    for source in &cfg.sources {
        for (i, first) in cfg.annotations.iter().enumerate() {
            for second in &cfg.annotations[i + 1..] {
                let a = lookup(&collection, source, first)?;
                let b = lookup(&collection, source, second)?;
                regressions.push(RegressionRow {
                    first: a.key.to_string(),
                    second: b.key.to_string(),
                    metric: cfg.regression_metric.to_string(),
                    fit: paired_regression(a, b, cfg.regression_metric),
                });
                regressions.push(RegressionRow {
                    first: a.key.to_string(),
                    second: b.key.to_string(),
                    metric: "delta -log10(Q) ~ delta NGENES".to_string(),
                    fit: gene_count_regression(a, b),
                });
            }
        }
    }
    if !regressions.is_empty() {
        write_regressions(&regressions, &summary_file(cfg, "regressions"))?;
    }

    Ok(Report {
        collection,
        classifications,
        set_differences,
        regressions,
    })
}

/// Gene analysis of every annotation method regressed against every other.
pub fn run_gene_comparison_stage(cfg: &RunConfig) -> Result<Vec<RegressionRow>> {
    let mut gene_results = Vec::with_capacity(cfg.annotations.len());
    for annotation in &cfg.annotations {
        gene_results.push((annotation, load_gene_results(cfg, annotation)?));
    }

    let mut rows = Vec::new();
    for (i, (first, a)) in gene_results.iter().enumerate() {
        for (second, b) in &gene_results[i + 1..] {
            let fit = compare_gene_results(a, b);
            if fit.is_none() {
                warn!("{} vs {}: gene level regression not computable", first, second);
            }
            rows.push(RegressionRow {
                first: first.to_string(),
                second: second.to_string(),
                metric: "-log10(P_MULTI)".to_string(),
                fit,
            });
        }
    }
    let path = summary_file(cfg, "gene_regressions");
    write_regressions(&rows, &path).with_context(|| format!("writing {:?}", path))?;
    Ok(rows)
}
