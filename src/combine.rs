// src/combine.rs
//! Bulk combine: turn per-sample raw counts into the root-level artifacts a
//! branch is built on.
//!
//! Two mutually exclusive input modes:
//! - a sample metadata table with `path_<assay>` columns pointing at
//!   per-sample input directories; every metadata row is replicated once per
//!   cell its sample contributes, and the replicated table becomes the root
//!   `meta.tsv`,
//! - an explicit list of input directories plus an assay label.
//!
//! Cell ids are suffixed `-1`, `-2`, ... per input directory, cellranger-aggr
//! style, to keep them unique across samples.

use anyhow::{Context, Result, bail};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::{ASSAY_OPTIONS, BranchConfig};
use crate::counts::CountsMatrix;
use crate::error::BranchError;
use crate::paths::PathMap;
use crate::table::MetadataTable;

const PATH_COLUMN_PREFIX: &str = "path_";

#[derive(Debug, Clone)]
pub enum MetadataSource {
    Path(PathBuf),
    Table(MetadataTable),
}

#[derive(Debug, Clone, Default)]
pub struct CombineRequest {
    pub metadata: Option<MetadataSource>,
    pub input_dirs: Option<Vec<PathBuf>>,
    /// Assay label for `input_dirs` mode; defaults to the configured assay.
    pub assay: Option<String>,
}

/// Combine per-sample inputs into root artifacts under `root_dir`. Exactly
/// one of `metadata` and `input_dirs` must be supplied.
pub fn combine_datasets(root_dir: &Path, request: CombineRequest) -> Result<()> {
    let config = BranchConfig::load(root_dir)?;
    match (request.metadata, request.input_dirs) {
        (Some(_), Some(_)) | (None, None) => Err(BranchError::AmbiguousCombineInput.into()),
        (Some(source), None) => {
            let table = match source {
                MetadataSource::Path(path) => MetadataTable::read_tsv(&path)?,
                MetadataSource::Table(table) => table,
            };
            let assays = path_column_assays(&table)?;
            for assay in &assays {
                let dirs: Vec<PathBuf> = table
                    .column(&format!("{PATH_COLUMN_PREFIX}{assay}"))?
                    .iter()
                    .map(PathBuf::from)
                    .collect();
                merge_assay(&dirs, assay, Some(&table), root_dir, &config)?;
            }
            Ok(())
        }
        (None, Some(dirs)) => {
            let assay = request
                .assay
                .unwrap_or_else(|| config.data.default_assay.clone());
            merge_assay(&dirs, &assay, None, root_dir, &config)
        }
    }
}

fn path_column_assays(table: &MetadataTable) -> Result<Vec<String>> {
    let assays: Vec<String> = table
        .columns()
        .iter()
        .filter_map(|c| c.strip_prefix(PATH_COLUMN_PREFIX))
        .map(str::to_string)
        .collect();
    if assays.is_empty() {
        bail!(
            "metadata must contain at least one column named `{}<assay>`, \
             with one of the following assays as a suffix: {:?}",
            PATH_COLUMN_PREFIX,
            *ASSAY_OPTIONS
        );
    }
    for assay in &assays {
        if !ASSAY_OPTIONS.contains(assay.as_str()) {
            bail!("unknown assay `{}`; known assays: {:?}", assay, *ASSAY_OPTIONS);
        }
    }
    Ok(assays)
}

/// Merge one assay's per-sample counts artifacts into a single root artifact
/// and, when sample metadata is given, write the cell-replicated root
/// metadata table alongside it.
pub fn merge_assay(
    input_dirs: &[PathBuf],
    assay: &str,
    sample_meta: Option<&MetadataTable>,
    root_dir: &Path,
    config: &BranchConfig,
) -> Result<()> {
    if input_dirs.is_empty() {
        bail!("no input directories for assay `{}`", assay);
    }
    if let Some(meta) = sample_meta {
        if meta.n_rows() != input_dirs.len() {
            bail!(
                "metadata has {} rows for {} input directories",
                meta.n_rows(),
                input_dirs.len()
            );
        }
    }

    let mut parts = Vec::with_capacity(input_dirs.len());
    for (i, dir) in input_dirs.iter().enumerate() {
        let path = dir.join(format!("{assay}.counts.json"));
        let part = CountsMatrix::load(&path)
            .with_context(|| format!("loading sample input {}", dir.display()))?;
        parts.push(part.with_suffixed_cells(&format!("-{}", i + 1)));
    }
    let combined = CountsMatrix::vstack(&parts)?;

    let paths = PathMap::new(root_dir, &config.data);
    combined.save(&paths.root_counts(assay))?;
    tracing::info!(
        "combined {} samples into {} ({} cells, {} features)",
        parts.len(),
        paths.root_counts(assay).display(),
        combined.shape().0,
        combined.shape().1
    );

    if let Some(meta) = sample_meta {
        let replicated = replicate_per_cell(meta, &parts, &config.data.index_name)?;
        replicated.write_tsv(&paths.root_meta())?;
        tracing::info!(
            "wrote cell-level metadata ({} rows) to {}",
            replicated.n_rows(),
            paths.root_meta().display()
        );
    }
    Ok(())
}

/// Expand a sample-level table to one row per cell: row `i` of `meta`
/// repeats once per cell id in `parts[i]`. The sample table's own index is
/// kept as a regular column; `path_` columns are dropped.
fn replicate_per_cell(
    meta: &MetadataTable,
    parts: &[CountsMatrix],
    index_name: &str,
) -> Result<MetadataTable> {
    let cell_ids: Vec<String> = parts
        .iter()
        .flat_map(|p| p.cell_ids().iter().cloned())
        .collect();
    let mut out = MetadataTable::with_index(index_name, cell_ids)?;

    let sample_ids: Vec<String> = meta
        .index()
        .iter()
        .zip(parts)
        .flat_map(|(id, p)| std::iter::repeat_n(id.clone(), p.cell_ids().len()))
        .collect();
    out.push_column(meta.index_name(), sample_ids)?;

    let path_columns: BTreeSet<&str> = meta
        .columns()
        .iter()
        .filter(|c| c.starts_with(PATH_COLUMN_PREFIX))
        .map(|c| c.as_str())
        .collect();
    for column in meta.columns() {
        if path_columns.contains(column.as_str()) {
            continue;
        }
        let values = meta.column(column)?;
        let replicated: Vec<String> = values
            .iter()
            .zip(parts)
            .flat_map(|(v, p)| std::iter::repeat_n(v.clone(), p.cell_ids().len()))
            .collect();
        out.push_column(column, replicated)?;
    }
    Ok(out)
}
