use std::env;
use std::fs::{create_dir_all, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use polars::prelude::*;
use tracing::debug;

use crate::models::polars_err;

/// Directory the default `magma_report.json` is looked up in: `PROJECT_ROOT`,
/// else the working directory.
pub fn project_root() -> PathBuf {
    env::var_os("PROJECT_ROOT")
        .map(PathBuf::from)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Reads a tab separated file with every column typed as String.
///
/// Chromosome names like `X` and Entrez IDs written as `1234.0` break schema
/// inference, so callers cast the columns they need themselves.
pub fn read_tsv_as_strings(path: &Path, has_header: bool) -> PolarsResult<DataFrame> {
    let n_fields = {
        let file = File::open(path).map_err(|e| polars_err(Box::new(e)))?;
        let mut rdr = BufReader::new(file);
        let mut first = String::new();
        rdr.read_line(&mut first).map_err(|e| polars_err(Box::new(e)))?;
        first.trim_end_matches(['\n', '\r']).split('\t').count()
    };
    let dtype_override: Arc<Vec<DataType>> = Arc::new(vec![DataType::String; n_fields]);

    let df = CsvReadOptions::default()
        .with_has_header(has_header)
        .with_dtype_overwrite(Some(dtype_override))
        .map_parse_options(|mut o| {
            o.separator = b'\t';
            o.quote_char = None;
            o.encoding = CsvEncoding::LossyUtf8;
            o.truncate_ragged_lines = true;
            o
        })
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    debug!("Read {:?} with shape {:?}", path, df.shape());
    Ok(df)
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Writes `df` tab separated, creating the parent directory if needed.
pub fn dataframe_to_tsv(df: &mut DataFrame, path: &Path, include_header: bool) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
        }
    }
    let mut file = File::create(path).map_err(|e| polars_err(Box::new(e)))?;
    CsvWriter::new(&mut file)
        .include_header(include_header)
        .with_separator(b'\t')
        .finish(df)?;
    debug!("Wrote {} rows to {:?}", df.height(), path);
    Ok(())
}

/// Formats a metric that may be undefined.
pub fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.6}", v),
        None => "NA".to_string(),
    }
}
