use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::helper_functions::read_tsv_as_strings;
use crate::models::{Dataset, GeneSet, GeneSetLibrary, KnownPositives};

fn data_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let mut lines = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {:?}", path))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push((i + 1, trimmed.to_string()));
    }
    Ok(lines)
}

/// MAGMA set annotation: one set per line, the set name followed by its
/// member genes.
pub struct GeneSetFile {
    pub path: PathBuf,
}

impl Dataset for GeneSetFile {
    type Output = GeneSetLibrary;

    fn load(&self) -> Result<GeneSetLibrary> {
        info!("Reading gene sets from {:?}", self.path);
        let mut library = GeneSetLibrary::new();
        for (line_no, line) in data_lines(&self.path)? {
            let mut fields = line.split_whitespace();
            let Some(name) = fields.next() else { continue };
            let genes: Vec<String> = fields.map(str::to_string).collect();
            if genes.is_empty() {
                warn!("Gene set '{}' on line {} has no members", name, line_no);
            }
            if library.contains_key(name) {
                bail!("{:?} line {}: gene set '{}' defined twice", self.path, line_no, name);
            }
            library.insert(
                name.to_string(),
                GeneSet {
                    name: name.to_string(),
                    genes,
                },
            );
        }
        info!("Loaded {} gene sets", library.len());
        Ok(library)
    }
}

/// Entity IDs known to treat the study's disease, one per line.
pub struct KnownPositiveFile {
    pub path: PathBuf,
}

impl Dataset for KnownPositiveFile {
    type Output = KnownPositives;

    fn load(&self) -> Result<KnownPositives> {
        info!("Reading known positives from {:?}", self.path);
        let positives: KnownPositives = data_lines(&self.path)?
            .into_iter()
            .filter_map(|(_, line)| line.split_whitespace().next().map(str::to_string))
            .collect();
        if positives.is_empty() {
            warn!("Known positive list {:?} is empty", self.path);
        }
        info!("Loaded {} known positives", positives.len());
        Ok(positives)
    }
}

/// Ensembl gene locus file (`NCBI37.3.ensembl.gene.loc`), headerless:
/// Ensembl, Entrez, chrom, start, end, HGNC symbol.
pub struct GeneLocFile {
    pub path: PathBuf,
}

const GENE_LOC_COLUMNS: [&str; 6] = [
    "Ensembl",
    "Entrez",
    "chrom",
    "chromStart",
    "chromEnd",
    "HGNC",
];

/// Ensembl ID -> HGNC symbol for display.
#[derive(Debug, Clone, Default)]
pub struct HgncTable {
    symbols: HashMap<String, String>,
}

impl HgncTable {
    pub fn from_pairs<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        Self {
            symbols: pairs.into_iter().collect(),
        }
    }

    pub fn symbol(&self, gene: &str) -> Option<&str> {
        self.symbols.get(gene).map(String::as_str)
    }

    /// Falls back to the gene ID itself when no symbol is known.
    pub fn symbol_or_id<'a>(&'a self, gene: &'a str) -> &'a str {
        self.symbol(gene).unwrap_or(gene)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }
}

impl Dataset for GeneLocFile {
    type Output = HgncTable;

    fn load(&self) -> Result<HgncTable> {
        info!("Reading gene locations from {:?}", self.path);
        let mut df = read_tsv_as_strings(&self.path, false)
            .with_context(|| format!("reading gene locations {:?}", self.path))?;
        if df.width() < GENE_LOC_COLUMNS.len() {
            bail!(
                "{:?} has {} columns, expected {}",
                self.path,
                df.width(),
                GENE_LOC_COLUMNS.len()
            );
        }
        let names: Vec<String> = (0..df.width())
            .map(|i| match GENE_LOC_COLUMNS.get(i) {
                Some(name) => name.to_string(),
                None => format!("extra_{}", i),
            })
            .collect();
        df.set_column_names(names)?;

        let ensembl = df.column("Ensembl")?.str()?;
        let hgnc = df.column("HGNC")?.str()?;
        let pairs = ensembl
            .into_iter()
            .zip(hgnc)
            .filter_map(|(e, h)| match (e.map(str::trim), h.map(str::trim)) {
                (Some(e), Some(h)) if !e.is_empty() && !h.is_empty() => {
                    Some((e.to_string(), h.to_string()))
                }
                _ => None,
            });
        let table = HgncTable::from_pairs(pairs);
        info!("Loaded {} HGNC symbols", table.len());
        Ok(table)
    }
}
