use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::analysis::stats::{q_values, z_scores};
use crate::config::RunConfig;
use crate::magma_processing::{parse_gene_results, parse_gene_set_results};
use crate::models::{
    GeneResult, KnownPositives, ResultCollection, ResultKey, ResultRecord, ResultTable,
};

/// `{results_dir}/{study}/{run_id}/magma_{study}_{annotation}_{source}.{gsa.out|sets.out}`
pub fn result_file_path(cfg: &RunConfig, annotation: &str, source: &str) -> PathBuf {
    cfg.run_dir().join(format!(
        "magma_{}_{}_{}.{}",
        cfg.study,
        annotation,
        source,
        cfg.gene_set_extension()
    ))
}

pub fn gene_result_file_path(cfg: &RunConfig, annotation: &str) -> PathBuf {
    cfg.run_dir()
        .join(format!("magma_{}_{}.genes.out", cfg.study, annotation))
}

/// Drops entities tested on fewer than `min_genes` genes, then fills in `z`
/// and the BH `q` over what is left.
pub fn attach_statistics(
    records: Vec<ResultRecord>,
    min_genes: u32,
) -> Result<Vec<ResultRecord>> {
    let total = records.len();
    let mut kept: Vec<ResultRecord> = records
        .into_iter()
        .filter(|r| r.n_genes >= min_genes)
        .collect();
    if kept.len() < total {
        info!(
            "Dropped {} entities with fewer than {} genes",
            total - kept.len(),
            min_genes
        );
    }

    let ps: Vec<f64> = kept.iter().map(|r| r.p).collect();
    let zs = z_scores(&ps)?;
    let qs = q_values(&ps);
    for ((record, z), q) in kept.iter_mut().zip(zs).zip(qs) {
        record.z = z;
        record.q = q;
    }
    Ok(kept)
}

pub fn load_result_table(cfg: &RunConfig, annotation: &str, source: &str) -> Result<ResultTable> {
    let path = result_file_path(cfg, annotation, source);
    info!("Loading {} {} results from {:?}", annotation, source, path);
    if !path.exists() {
        bail!("MAGMA result file {:?} does not exist", path);
    }
    let records = parse_gene_set_results(&path).with_context(|| format!("loading {:?}", path))?;
    let records = attach_statistics(records, cfg.min_genes)?;
    if records.is_empty() {
        warn!("No {} {} entity has at least {} genes", annotation, source, cfg.min_genes);
    }
    Ok(ResultTable {
        key: ResultKey::new(source, annotation),
        records,
    })
}

/// One table for every configured (source, annotation) pair.
pub fn load_collection(cfg: &RunConfig) -> Result<ResultCollection> {
    let mut collection = ResultCollection::new();
    for source in &cfg.sources {
        for annotation in &cfg.annotations {
            let table = load_result_table(cfg, annotation, source)?;
            collection.insert(table.key.clone(), table);
        }
    }
    info!("Loaded {} result tables", collection.len());
    Ok(collection)
}

pub fn load_gene_results(cfg: &RunConfig, annotation: &str) -> Result<Vec<GeneResult>> {
    let path = gene_result_file_path(cfg, annotation);
    info!("Loading {} gene analysis results from {:?}", annotation, path);
    parse_gene_results(&path).with_context(|| format!("loading {:?}", path))
}

/// Returns `table` with `is_treatment` set for every entity in `positives`.
pub fn label_known_positives(table: ResultTable, positives: &KnownPositives) -> ResultTable {
    let records: Vec<ResultRecord> = table
        .records
        .into_iter()
        .map(|r| ResultRecord {
            is_treatment: positives.contains(&r.entity),
            ..r
        })
        .collect();
    let labelled = records.iter().filter(|r| r.is_treatment).count();
    info!("{}: {} of {} entities are known positives", table.key, labelled, records.len());
    ResultTable {
        key: table.key,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::path::Path;

    const GSA_HEADER: &str = "VARIABLE TYPE NGENES BETA BETA_STD SE P FULL_NAME";

    fn write_gsa(dir: &Path, rows: &[&str]) {
        std::fs::create_dir_all(dir).unwrap();
        let mut body = String::from("# MEAN_SAMPLE_SIZE = 500199\n# TOTAL_GENES = 18201\n");
        body.push_str(GSA_HEADER);
        body.push('\n');
        for row in rows {
            body.push_str(row);
            body.push('\n');
        }
        std::fs::write(dir.join("magma_MDD_prox_duggie.gsa.out"), body).unwrap();
    }

    fn cfg(root: &Path) -> RunConfig {
        RunConfig {
            results_dir: root.to_path_buf(),
            sources: vec!["duggie".to_string()],
            annotations: vec!["prox".to_string()],
            ..RunConfig::default()
        }
    }

    #[test]
    fn file_naming_follows_magma_version() {
        let mut cfg = cfg(Path::new("/res"));
        assert_eq!(
            result_file_path(&cfg, "prox", "stitch"),
            PathBuf::from("/res/MDD/ch5/magma_MDD_prox_stitch.gsa.out")
        );
        cfg.magma_version = 107;
        assert_eq!(
            result_file_path(&cfg, "prox", "stitch"),
            PathBuf::from("/res/MDD/ch5/magma_MDD_prox_stitch.sets.out")
        );
        assert_eq!(
            gene_result_file_path(&cfg, "allbrain"),
            PathBuf::from("/res/MDD/ch5/magma_MDD_allbrain.genes.out")
        );
    }

    #[test]
    fn loads_filters_and_derives() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        write_gsa(
            &cfg.run_dir(),
            &[
                "N06AB0 SET 12 0.2 0.01 0.05 0.01 N06AB03",
                "N05AH0 SET 3 0.1 0.01 0.05 0.001 N05AH02",
                "N06AX1 SET 8 -0.1 -0.01 0.05 1 N06AX11",
                "A10BA0 SET 4 0.05 0.01 0.05 0.5 A10BA02",
            ],
        );
        let collection = load_collection(&cfg).unwrap();
        let table = &collection[&ResultKey::new("duggie", "prox")];

        assert_eq!(table.records.len(), 3);
        assert!(table.get("N05AH02").is_none());
        let top = table.get("N06AB03").unwrap();
        assert!(top.z > 2.0);
        assert_relative_eq!(top.q, 0.03, epsilon = 1e-12);
        assert_eq!(table.get("N06AX11").unwrap().z, 0.0);
    }

    #[test]
    fn missing_result_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_collection(&cfg(dir.path())).is_err());
    }

    #[test]
    fn duplicate_entity_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        write_gsa(
            &cfg.run_dir(),
            &[
                "N06AB0 SET 12 0.2 0.01 0.05 0.01 N06AB03",
                "N06AB0 SET 10 0.1 0.01 0.05 0.40 N06AB03",
            ],
        );
        let err = format!("{:#}", load_collection(&cfg).unwrap_err());
        assert!(err.contains("N06AB03"), "{}", err);
    }

    #[test]
    fn labelling_returns_a_new_table() {
        let table = ResultTable {
            key: ResultKey::new("duggie", "prox"),
            records: vec![
                ResultRecord::new("A".into(), 5, 0.0, 0.0, 0.1, 0.01),
                ResultRecord::new("B".into(), 5, 0.0, 0.0, 0.1, 0.2),
            ],
        };
        let positives: KnownPositives = ["A".to_string()].into_iter().collect();
        let labelled = label_known_positives(table, &positives);
        assert!(labelled.get("A").unwrap().is_treatment);
        assert!(!labelled.get("B").unwrap().is_treatment);
    }

    #[test]
    fn empty_table_after_filter() {
        let records = vec![ResultRecord::new("A".into(), 1, 0.0, 0.0, 0.1, 0.01)];
        assert!(attach_statistics(records, 4).unwrap().is_empty());
    }
}
