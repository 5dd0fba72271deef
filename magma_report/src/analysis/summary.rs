use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use tracing::{debug, info};

use crate::analysis::comparison::{Classification, SetDifference};
use crate::analysis::stats::Regression;
use crate::config::RunConfig;
use crate::data_handling::gene_sets::HgncTable;
use crate::helper_functions::{dataframe_to_tsv, fmt_opt};
use crate::models::{GeneSetLibrary, ResultKey, ResultRecord, ResultTable};

/// Member genes listed per significant set.
pub const MAX_LISTED_GENES: usize = 50;

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
        }
    }
    let wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("creating {:?}", path))?;
    debug!("TSV writer initialized for {:?}", path);
    Ok(wtr)
}

pub fn significant_summary_path(cfg: &RunConfig, key: &ResultKey) -> PathBuf {
    cfg.summary_dir.join(format!(
        "magma_{}_{}_{}_significant.tsv",
        cfg.study, key.annotation, key.source
    ))
}

/// Up to `MAX_LISTED_GENES` members of `set`, as HGNC symbols where known.
fn member_list(entity: &str, library: Option<&GeneSetLibrary>, hgnc: Option<&HgncTable>) -> String {
    let Some(set) = library.and_then(|l| l.get(entity)) else {
        return String::new();
    };
    set.genes
        .iter()
        .take(MAX_LISTED_GENES)
        .map(|g| match hgnc {
            Some(table) => table.symbol_or_id(g),
            None => g.as_str(),
        })
        .collect::<Vec<&str>>()
        .join(",")
}

fn f64_column(name: &str, rows: &[&ResultRecord], value: impl Fn(&ResultRecord) -> f64) -> Column {
    Column::new(name.into(), rows.iter().map(|r| value(r)).collect::<Vec<f64>>())
}

/// Entities with `q < threshold`, sorted by q.
pub fn significant_summary_frame(
    table: &ResultTable,
    threshold: f64,
    library: Option<&GeneSetLibrary>,
    hgnc: Option<&HgncTable>,
) -> PolarsResult<DataFrame> {
    let mut rows: Vec<_> = table.records.iter().filter(|r| r.q < threshold).collect();
    rows.sort_by(|a, b| a.q.total_cmp(&b.q).then_with(|| a.entity.cmp(&b.entity)));

    DataFrame::new(vec![
        Column::new(
            "entity".into(),
            rows.iter().map(|r| r.entity.as_str()).collect::<Vec<_>>(),
        ),
        Column::new(
            "NGENES".into(),
            rows.iter().map(|r| r.n_genes).collect::<Vec<u32>>(),
        ),
        f64_column("BETA", &rows, |r| r.beta),
        f64_column("BETA_STD", &rows, |r| r.beta_std),
        f64_column("SE", &rows, |r| r.se),
        f64_column("P", &rows, |r| r.p),
        f64_column("Q", &rows, |r| r.q),
        f64_column("Z", &rows, |r| r.z),
        Column::new(
            "treatment".into(),
            rows.iter().map(|r| r.is_treatment).collect::<Vec<bool>>(),
        ),
        Column::new(
            "genes".into(),
            rows.iter()
                .map(|r| member_list(&r.entity, library, hgnc))
                .collect::<Vec<String>>(),
        ),
    ])
}

pub fn write_significant_summary(
    table: &ResultTable,
    cfg: &RunConfig,
    library: Option<&GeneSetLibrary>,
    hgnc: Option<&HgncTable>,
) -> Result<PathBuf> {
    let path = significant_summary_path(cfg, &table.key);
    let mut df = significant_summary_frame(table, cfg.signif_thresh, library, hgnc)?;
    dataframe_to_tsv(&mut df, &path, true).with_context(|| format!("writing {:?}", path))?;
    info!("{}: {} significant entities written to {:?}", table.key, df.height(), path);
    Ok(path)
}

pub fn write_classification_table(rows: &[Classification], path: &Path) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record([
        "annotation",
        "source",
        "column",
        "threshold",
        "TP",
        "FP",
        "TN",
        "FN",
        "sensitivity",
        "specificity",
        "mann_whitney_p",
        "fisher_p",
        "auc",
    ])?;
    for c in rows {
        let [tp, fp, tn, fn_] = c.counts();
        wtr.write_record(&[
            c.key.annotation.clone(),
            c.key.source.clone(),
            c.column.to_string(),
            c.threshold.to_string(),
            tp.to_string(),
            fp.to_string(),
            tn.to_string(),
            fn_.to_string(),
            fmt_opt(c.sensitivity),
            fmt_opt(c.specificity),
            fmt_opt(c.mann_whitney_p),
            fmt_opt(c.fisher_p),
            fmt_opt(c.auc()),
        ])?;
    }
    wtr.flush()?;
    info!("Classification table with {} rows written to {:?}", rows.len(), path);
    Ok(())
}

/// Long format, one row per curve point. Combinations without a curve are
/// left out.
pub fn write_roc_points(rows: &[Classification], path: &Path) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["annotation", "source", "fpr", "tpr", "threshold"])?;
    for c in rows {
        let Some(roc) = &c.roc else { continue };
        for ((fpr, tpr), threshold) in roc.fprs.iter().zip(&roc.tprs).zip(&roc.thresholds) {
            wtr.write_record(&[
                c.key.annotation.clone(),
                c.key.source.clone(),
                fpr.to_string(),
                tpr.to_string(),
                threshold.to_string(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Long format: which table(s) each significant entity belongs to.
pub fn write_set_differences(diffs: &[SetDifference], path: &Path) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["first", "second", "column", "threshold", "membership", "entity"])?;
    for d in diffs {
        let groups = [
            ("first_only", &d.only_first),
            ("second_only", &d.only_second),
            ("both", &d.both),
        ];
        for (membership, entities) in groups {
            for entity in entities {
                wtr.write_record(&[
                    d.first.to_string(),
                    d.second.to_string(),
                    d.column.to_string(),
                    d.threshold.to_string(),
                    membership.to_string(),
                    entity.clone(),
                ])?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// One fitted (or not computable) comparison between two results.
#[derive(Debug, Clone)]
pub struct RegressionRow {
    pub first: String,
    pub second: String,
    pub metric: String,
    pub fit: Option<Regression>,
}

pub fn write_regressions(rows: &[RegressionRow], path: &Path) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record([
        "first",
        "second",
        "metric",
        "n",
        "slope",
        "intercept",
        "r_value",
        "p_value",
        "std_err",
    ])?;
    for row in rows {
        let fit = row.fit.as_ref();
        wtr.write_record(&[
            row.first.clone(),
            row.second.clone(),
            row.metric.clone(),
            fit.map(|f| f.n.to_string()).unwrap_or_else(|| "NA".to_string()),
            fmt_opt(fit.map(|f| f.slope)),
            fmt_opt(fit.map(|f| f.intercept)),
            fmt_opt(fit.map(|f| f.r_value)),
            fmt_opt(fit.map(|f| f.p_value)),
            fmt_opt(fit.map(|f| f.std_err)),
        ])?;
    }
    wtr.flush()?;
    info!("{} regressions written to {:?}", rows.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::comparison::{classify, set_difference};
    use crate::models::{GeneSet, KnownPositives, ResultRecord, SignificanceColumn};

    fn table() -> ResultTable {
        let mut records = Vec::new();
        for (entity, q) in [("N06AB03", 0.001), ("N05AH02", 0.2), ("N06AX11", 0.01)] {
            let mut r = ResultRecord::new(entity.to_string(), 10, 0.1, 0.01, 0.05, q);
            r.q = q;
            records.push(r);
        }
        ResultTable {
            key: ResultKey::new("duggie", "prox"),
            records,
        }
    }

    #[test]
    fn significant_summary_sorted_and_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RunConfig {
            summary_dir: dir.path().join("summaries"),
            ..RunConfig::default()
        };
        let mut library = GeneSetLibrary::new();
        let genes: Vec<String> = (0..60).map(|i| format!("ENSG{}", i)).collect();
        library.insert(
            "N06AB03".to_string(),
            GeneSet {
                name: "N06AB03".to_string(),
                genes,
            },
        );
        let hgnc = HgncTable::from_pairs([("ENSG0".to_string(), "SLC6A4".to_string())]);

        let path = write_significant_summary(&table(), &cfg, Some(&library), Some(&hgnc)).unwrap();
        assert!(path.ends_with("magma_MDD_prox_duggie_significant.tsv"));
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("entity\tNGENES"));
        assert!(lines[1].starts_with("N06AB03\t"));
        assert!(lines[2].starts_with("N06AX11\t"));

        let members = lines[1].rsplit('\t').next().unwrap();
        assert!(members.starts_with("SLC6A4,ENSG1,"));
        assert_eq!(members.split(',').count(), MAX_LISTED_GENES);
    }

    #[test]
    fn not_computable_metrics_render_as_na() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classification.tsv");
        let c = classify(&table(), &KnownPositives::new(), SignificanceColumn::Q, 0.05);
        write_classification_table(&[c], &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let row: Vec<&str> = text.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(&row[..3], &["prox", "duggie", "Q"]);
        assert_eq!(&row[4..8], &["0", "2", "1", "0"]);
        assert_eq!(&row[8..], &["NA", "0.333333", "NA", "NA", "NA"]);
    }

    #[test]
    fn roc_points_and_differences() {
        let dir = tempfile::tempdir().unwrap();
        let positives: KnownPositives = ["N06AB03".to_string()].into_iter().collect();
        let c = classify(&table(), &positives, SignificanceColumn::Q, 0.05);
        let roc_path = dir.path().join("roc.tsv");
        write_roc_points(&[c], &roc_path).unwrap();
        let text = std::fs::read_to_string(&roc_path).unwrap();
        // header, origin and one point per distinct score
        assert_eq!(text.lines().count(), 5);

        let diff = set_difference(&table(), &table(), SignificanceColumn::Q, 0.05);
        let diff_path = dir.path().join("diff.tsv");
        write_set_differences(&[diff], &diff_path).unwrap();
        let text = std::fs::read_to_string(&diff_path).unwrap();
        assert_eq!(text.lines().filter(|l| l.contains("\tboth\t")).count(), 2);
    }

    #[test]
    fn regressions_with_missing_fit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regressions.tsv");
        let rows = vec![RegressionRow {
            first: "prox duggie".to_string(),
            second: "prox stitch".to_string(),
            metric: "-log10(Q)".to_string(),
            fit: None,
        }];
        write_regressions(&rows, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with("NA\tNA\tNA\tNA\tNA\tNA"));
    }
}
