use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, error, info};

use crate::models::{GeneResult, ResultRecord};

/// Holds user-defined parameters to run MAGMA.
#[derive(Debug, Clone)]
pub struct MagmaOptions {
    /// Path to the `magma` binary.
    pub magma_path: PathBuf,
    /// Annotation window upstream of the gene, in kb.
    pub window_up_kb: u32,
    /// Annotation window downstream of the gene, in kb.
    pub window_down_kb: u32,
}

impl MagmaOptions {
    /// A bare program name is looked up on `PATH`.
    pub fn resolve(magma: &str, window_up_kb: u32, window_down_kb: u32) -> Result<Self> {
        let magma_path = if magma.contains(std::path::MAIN_SEPARATOR) {
            PathBuf::from(magma)
        } else {
            which::which(magma).with_context(|| format!("locating '{}' on PATH", magma))?
        };
        Ok(Self {
            magma_path,
            window_up_kb,
            window_down_kb,
        })
    }
}

/// `magma --annotate window=U,D --snp-loc .. --gene-loc .. --out ..`
pub fn annotate_command(
    opts: &MagmaOptions,
    snp_loc: &Path,
    gene_loc: &Path,
    out_prefix: &Path,
) -> Command {
    let mut cmd = Command::new(&opts.magma_path);
    cmd.arg("--annotate")
        .arg(format!("window={},{}", opts.window_up_kb, opts.window_down_kb))
        .arg("--snp-loc")
        .arg(snp_loc)
        .arg("--gene-loc")
        .arg(gene_loc)
        .arg("--out")
        .arg(out_prefix);
    cmd
}

pub fn run_magma(mut cmd: Command) -> Result<()> {
    info!("Running MAGMA: {:?}", cmd);
    let output = cmd.output().context("spawning MAGMA")?;
    if !output.status.success() {
        error!("MAGMA failed. Stderr:\n{}", String::from_utf8_lossy(&output.stderr));
        bail!("MAGMA exited with status {:?}", output.status);
    }
    debug!("MAGMA completed successfully. Stdout:\n{}", String::from_utf8_lossy(&output.stdout));
    Ok(())
}

/// Column positions of a whitespace aligned MAGMA output header.
struct Header {
    columns: HashMap<String, usize>,
    /// Token count of the header line, repeated names included
    width: usize,
}

impl Header {
    fn parse(line: &str) -> Self {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let columns = tokens
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        Self {
            columns,
            width: tokens.len(),
        }
    }

    fn require(&self, name: &str, path: &Path) -> Result<usize> {
        self.columns
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("{:?}: missing required column '{}'", path, name))
    }

    fn optional(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    fn len(&self) -> usize {
        self.width
    }
}

fn field<T>(fields: &[&str], idx: usize, name: &str, path: &Path, line_no: usize) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    fields[idx]
        .parse::<T>()
        .with_context(|| format!("{:?}:{}: bad {} value '{}'", path, line_no, name, fields[idx]))
}

fn probability(
    fields: &[&str],
    idx: usize,
    name: &str,
    path: &Path,
    line_no: usize,
) -> Result<f64> {
    let p: f64 = field(fields, idx, name, path, line_no)?;
    if !(0.0..=1.0).contains(&p) {
        bail!("{:?}:{}: {} value {} is not a probability", path, line_no, name, p);
    }
    Ok(p)
}

/// Fails on the second row that uses an already seen ID.
fn check_unique<'a>(
    seen: &mut HashMap<&'a str, usize>,
    id: &'a str,
    kind: &str,
    path: &Path,
    line_no: usize,
) -> Result<()> {
    if let Some(first) = seen.insert(id, line_no) {
        bail!(
            "{:?}:{}: {} '{}' already appears on line {}",
            path,
            line_no,
            kind,
            id,
            first
        );
    }
    Ok(())
}

/// Reads the header and data rows of a MAGMA output file, skipping `#`
/// comments and blank lines. Each row comes back with its 1-based line number.
fn read_table(path: &Path) -> Result<(Header, Vec<(usize, String)>)> {
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let reader = BufReader::new(file);

    let mut header = None;
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {:?}", path))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if header.is_none() {
            debug!("MAGMA header in {:?}: {}", path, trimmed);
            header = Some(Header::parse(trimmed));
        } else {
            rows.push((i + 1, trimmed.to_string()));
        }
    }
    let header = header.ok_or_else(|| anyhow!("{:?}: no header line", path))?;
    Ok((header, rows))
}

/// Parse a MAGMA gene-set analysis result (`.gsa.out` or `.sets.out`).
///
/// `FULL_NAME` is preferred over the possibly truncated `VARIABLE` as the
/// entity ID when present. Each entity ID must be unique within the file.
pub fn parse_gene_set_results(path: &Path) -> Result<Vec<ResultRecord>> {
    let (header, rows) = read_table(path)?;
    let variable = header.require("VARIABLE", path)?;
    let n_genes = header.require("NGENES", path)?;
    let beta = header.require("BETA", path)?;
    let beta_std = header.require("BETA_STD", path)?;
    let se = header.require("SE", path)?;
    let p = header.require("P", path)?;
    let full_name = header.optional("FULL_NAME");

    let mut records = Vec::with_capacity(rows.len());
    let mut seen = HashMap::with_capacity(rows.len());
    for (line_no, row) in &rows {
        let fields: Vec<&str> = row.split_whitespace().collect();
        if fields.len() < header.len() {
            bail!(
                "{:?}:{}: expected {} columns, found {}",
                path,
                line_no,
                header.len(),
                fields.len()
            );
        }
        let entity = match full_name {
            Some(idx) => fields[idx],
            None => fields[variable],
        };
        check_unique(&mut seen, entity, "entity", path, *line_no)?;
        records.push(ResultRecord::new(
            entity.to_string(),
            field(&fields, n_genes, "NGENES", path, *line_no)?,
            field(&fields, beta, "BETA", path, *line_no)?,
            field(&fields, beta_std, "BETA_STD", path, *line_no)?,
            field(&fields, se, "SE", path, *line_no)?,
            probability(&fields, p, "P", path, *line_no)?,
        ));
    }

    debug!("Parsed {} gene sets from {:?}", records.len(), path);
    Ok(records)
}

/// Parse a MAGMA gene analysis result (`.genes.out`). Multi-model runs write
/// `P_MULTI` instead of `P`.
pub fn parse_gene_results(path: &Path) -> Result<Vec<GeneResult>> {
    let (header, rows) = read_table(path)?;
    let gene = header.require("GENE", path)?;
    let chrom = header.require("CHR", path)?;
    let start = header.require("START", path)?;
    let stop = header.require("STOP", path)?;
    let n_snps = header.require("NSNPS", path)?;
    let n_param = header.require("NPARAM", path)?;
    let n = header.require("N", path)?;
    let z_stat = header.require("ZSTAT", path)?;
    let p_single = header.optional("P");
    let p_multi = header.optional("P_MULTI");
    let permp_multi = header.optional("PERMP_MULTI");
    if p_single.is_none() && p_multi.is_none() {
        bail!("{:?}: neither P nor P_MULTI column present", path);
    }

    let mut genes = Vec::with_capacity(rows.len());
    let mut seen = HashMap::with_capacity(rows.len());
    for (line_no, row) in &rows {
        let fields: Vec<&str> = row.split_whitespace().collect();
        if fields.len() < header.len() {
            bail!(
                "{:?}:{}: expected {} columns, found {}",
                path,
                line_no,
                header.len(),
                fields.len()
            );
        }
        check_unique(&mut seen, fields[gene], "gene", path, *line_no)?;
        let p_multi = p_multi
            .map(|idx| probability(&fields, idx, "P_MULTI", path, *line_no))
            .transpose()?;
        let p = match p_single {
            Some(idx) => probability(&fields, idx, "P", path, *line_no)?,
            // checked above that one of the two exists
            None => p_multi.unwrap_or(1.0),
        };
        genes.push(GeneResult {
            gene: fields[gene].to_string(),
            chrom: fields[chrom].to_string(),
            start: field(&fields, start, "START", path, *line_no)?,
            stop: field(&fields, stop, "STOP", path, *line_no)?,
            n_snps: field(&fields, n_snps, "NSNPS", path, *line_no)?,
            n_param: field(&fields, n_param, "NPARAM", path, *line_no)?,
            n: field(&fields, n, "N", path, *line_no)?,
            z_stat: field(&fields, z_stat, "ZSTAT", path, *line_no)?,
            p,
            p_multi,
            permp_multi: permp_multi
                .map(|idx| probability(&fields, idx, "PERMP_MULTI", path, *line_no))
                .transpose()?,
        });
    }

    debug!("Parsed {} genes from {:?}", genes.len(), path);
    Ok(genes)
}
