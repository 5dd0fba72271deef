use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::comparison::Metric;

pub const DEFAULT_CONFIG_FILE: &str = "magma_report.json";

/// Everything a pipeline run needs to know. Read once at start-up and passed
/// by reference to each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// GWAS / disease identifier, part of every MAGMA output file name
    pub study: String,
    pub run_id: String,
    /// MAGMA release without dots, e.g. 109 for v1.09
    pub magma_version: u32,
    pub min_genes: u32,
    pub signif_thresh: f64,
    pub annotations: Vec<String>,
    pub sources: Vec<String>,
    pub results_dir: PathBuf,
    pub summary_dir: PathBuf,
    pub known_positives: Option<PathBuf>,
    pub gene_sets: Option<PathBuf>,
    pub gene_loc: Option<PathBuf>,
    /// Two sources compared against each other for every annotation method
    pub compare_sources: Option<(String, String)>,
    /// Value regressed between paired result tables
    pub regression_metric: Metric,
    /// Regress gene analysis results between every pair of annotation methods
    pub compare_gene_results: bool,
    pub remap: Option<RemapConfig>,
    pub magma: Option<MagmaConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            study: "MDD".to_string(),
            run_id: "ch5".to_string(),
            magma_version: 109,
            min_genes: 4,
            signif_thresh: 0.05,
            annotations: vec!["prox".to_string()],
            sources: vec!["duggie".to_string(), "stitch".to_string()],
            results_dir: PathBuf::from("./data/magma_analysis/magma_results"),
            summary_dir: PathBuf::from("./data/summaries"),
            known_positives: None,
            gene_sets: None,
            gene_loc: None,
            compare_sources: None,
            regression_metric: Metric::NegLog10Q,
            compare_gene_results: false,
            remap: None,
            magma: None,
        }
    }
}

/// Inputs and output of the Entrez -> Ensembl annotation translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemapConfig {
    pub annot: PathBuf,
    pub crosswalk: PathBuf,
    pub output: PathBuf,
}

/// How to call MAGMA for the positional annotation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MagmaConfig {
    pub path: String,
    pub window_up_kb: u32,
    pub window_down_kb: u32,
    pub snp_loc: PathBuf,
    pub gene_loc: PathBuf,
    pub out_prefix: PathBuf,
}

impl Default for MagmaConfig {
    fn default() -> Self {
        Self {
            path: "magma".to_string(),
            window_up_kb: 10,
            window_down_kb: 10,
            snp_loc: PathBuf::from("./data/gwas/snps.loc"),
            gene_loc: PathBuf::from("./data/magma_auxiliary_files/NCBI37.3.gene.loc"),
            out_prefix: PathBuf::from("./data/gwas/magma.prox"),
        }
    }
}

impl RunConfig {
    /// Loads the JSON config at `path`. A missing file at the default
    /// location falls back to the built-in defaults.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        if !path.exists() {
            if explicit {
                bail!("config file {:?} does not exist", path);
            }
            warn!("No config at {:?}, using defaults", path);
            let cfg = Self::default();
            cfg.validate()?;
            return Ok(cfg);
        }

        info!("Reading run config from {:?}", path);
        let file = File::open(path).with_context(|| format!("opening config {:?}", path))?;
        let cfg: RunConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing config {:?}", path))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.signif_thresh > 0.0 && self.signif_thresh <= 1.0) {
            bail!("signif_thresh must be in (0, 1], got {}", self.signif_thresh);
        }
        if self.annotations.is_empty() {
            bail!("no annotation methods configured");
        }
        if self.sources.is_empty() {
            bail!("no interaction sources configured");
        }
        if let Some((a, b)) = &self.compare_sources {
            for s in [a, b] {
                if !self.sources.contains(s) {
                    bail!("compare_sources names unknown source '{}'", s);
                }
            }
        }
        Ok(())
    }

    /// Gene-set analysis output extension. MAGMA renamed `.sets.out` to
    /// `.gsa.out` in v1.08.
    pub fn gene_set_extension(&self) -> &'static str {
        if self.magma_version >= 108 {
            "gsa.out"
        } else {
            "sets.out"
        }
    }

    pub fn run_dir(&self) -> PathBuf {
        self.results_dir.join(&self.study).join(&self.run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = RunConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.min_genes, 4);
        assert_eq!(cfg.gene_set_extension(), "gsa.out");
    }

    #[test]
    fn old_magma_uses_sets_out() {
        let cfg = RunConfig {
            magma_version: 107,
            ..RunConfig::default()
        };
        assert_eq!(cfg.gene_set_extension(), "sets.out");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let mut f = File::create(&path).unwrap();
        write!(
            f,
            r#"{{"study": "SCZ", "annotations": ["prox", "allbrain"], "signif_thresh": 0.1}}"#
        )
        .unwrap();
        drop(f);

        let cfg = RunConfig::load(&path, true).unwrap();
        assert_eq!(cfg.study, "SCZ");
        assert_eq!(cfg.annotations.len(), 2);
        assert_eq!(cfg.sources, vec!["duggie", "stitch"]);
        assert_eq!(cfg.min_genes, 4);
        assert_eq!(cfg.regression_metric, Metric::NegLog10Q);
    }

    #[test]
    fn metric_by_name() {
        let cfg: RunConfig = serde_json::from_str(r#"{"regression_metric": "z"}"#).unwrap();
        assert_eq!(cfg.regression_metric, Metric::Z);
    }

    #[test]
    fn rejects_bad_threshold_and_unknown_pair() {
        let cfg = RunConfig {
            signif_thresh: 0.0,
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = RunConfig {
            compare_sources: Some(("duggie".into(), "drugbank".into())),
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunConfig::load(&dir.path().join("nope.json"), true).is_err());
        assert!(RunConfig::load(&dir.path().join("nope.json"), false).is_ok());
    }
}
