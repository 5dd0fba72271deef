use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::helper_functions::{has_column, read_tsv_as_strings};
use crate::models::{CrosswalkEntry, Dataset};

pub const ENSEMBL_COL: &str = "Ensembl";
pub const ENTREZ_COL: &str = "Entrez ID";
pub const HGNC_COL: &str = "HGNC symbol";
pub const CHROM_COL: &str = "chrom";
pub const START_COL: &str = "chromStart";
pub const END_COL: &str = "chromEnd";

/// Tab separated Entrez <-> Ensembl translation table with a header row.
pub struct CrosswalkTable {
    pub path: PathBuf,
}

/// A crosswalk with exact duplicate rows removed. Many-to-one and
/// one-to-many mappings are kept; the remapper decides what to do with them.
#[derive(Debug, Clone, Default)]
pub struct Crosswalk {
    pub entries: Vec<CrosswalkEntry>,
    pub duplicate_rows: usize,
}

impl Crosswalk {
    pub fn from_entries(raw: Vec<CrosswalkEntry>) -> Self {
        let total = raw.len();
        let mut seen = HashSet::with_capacity(total);
        let entries: Vec<CrosswalkEntry> = raw
            .into_iter()
            .filter(|e| seen.insert(e.clone()))
            .collect();
        let duplicate_rows = total - entries.len();
        if duplicate_rows > 0 {
            info!("Dropped {} exact duplicate crosswalk rows", duplicate_rows);
        }
        Self {
            entries,
            duplicate_rows,
        }
    }

    /// Number of distinct non-null Ensembl IDs; an upper bound on the size of
    /// any remapped table.
    pub fn distinct_targets(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|e| e.ensembl.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Entrez ID -> every crosswalk row for it, in file order.
    pub fn by_entrez(&self) -> HashMap<i64, Vec<&CrosswalkEntry>> {
        let mut index: HashMap<i64, Vec<&CrosswalkEntry>> = HashMap::new();
        for entry in &self.entries {
            index.entry(entry.entrez).or_default().push(entry);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Normalises the raw string frame: Entrez IDs written as `1234.0` become
/// integers, coordinates become integers, unparsable values become null.
fn normalise_columns(df: DataFrame) -> PolarsResult<DataFrame> {
    let mut exprs = vec![col(ENTREZ_COL)
        .cast(DataType::Float64)
        .cast(DataType::Int64)
        .alias(ENTREZ_COL)];
    for coord in [START_COL, END_COL] {
        if has_column(&df, coord) {
            exprs.push(col(coord).cast(DataType::Float64).cast(DataType::Int64).alias(coord));
        }
    }
    df.lazy()
        .with_columns(exprs)
        .filter(col(ENTREZ_COL).is_not_null())
        .collect()
}

pub fn entries_from_frame(df: &DataFrame) -> PolarsResult<Vec<CrosswalkEntry>> {
    let entrez_col = df.column(ENTREZ_COL)?.i64()?;
    let ensembl_col = df.column(ENSEMBL_COL)?.str()?;
    let hgnc_col = if has_column(df, HGNC_COL) {
        Some(df.column(HGNC_COL)?.str()?)
    } else {
        None
    };
    let chrom_col = if has_column(df, CHROM_COL) {
        Some(df.column(CHROM_COL)?.str()?)
    } else {
        None
    };
    let start_col = if has_column(df, START_COL) {
        Some(df.column(START_COL)?.i64()?)
    } else {
        None
    };
    let end_col = if has_column(df, END_COL) {
        Some(df.column(END_COL)?.i64()?)
    } else {
        None
    };

    let mut entries = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let Some(entrez) = entrez_col.get(i) else { continue };
        entries.push(CrosswalkEntry {
            entrez,
            ensembl: non_empty(ensembl_col.get(i)),
            hgnc_symbol: non_empty(hgnc_col.and_then(|c| c.get(i))),
            chrom: non_empty(chrom_col.and_then(|c| c.get(i))),
            start: start_col.and_then(|c| c.get(i)),
            end: end_col.and_then(|c| c.get(i)),
        });
    }
    Ok(entries)
}

impl Dataset for CrosswalkTable {
    type Output = Crosswalk;

    fn load(&self) -> Result<Crosswalk> {
        info!("Reading ID crosswalk from {:?}", self.path);
        let raw = read_tsv_as_strings(&self.path, true)
            .with_context(|| format!("reading crosswalk {:?}", self.path))?;
        for required in [ENSEMBL_COL, ENTREZ_COL] {
            if !has_column(&raw, required) {
                bail!("crosswalk {:?} has no '{}' column", self.path, required);
            }
        }
        let raw_rows = raw.height();
        let df = normalise_columns(raw)?;
        if df.height() < raw_rows {
            warn!("{} crosswalk rows have no usable Entrez ID", raw_rows - df.height());
        }
        debug!("Crosswalk head: {:?}", df.head(Some(5)));

        let crosswalk = Crosswalk::from_entries(entries_from_frame(&df)?);
        info!(
            "Crosswalk has {} rows, {} distinct Ensembl IDs",
            crosswalk.len(),
            crosswalk.distinct_targets()
        );
        Ok(crosswalk)
    }
}
