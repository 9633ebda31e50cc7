// src/lib.rs
//! Cellgrove: lineage-aware branches over single-cell experiment data.
//!
//! A [`CellBranch`] addresses one position in a versioned process hierarchy
//! over a single dataset root. It exposes two coupled, lazily cached views —
//! a per-cell metadata table and a sparse counts matrix — that are kept
//! index-synchronized by construction: the counts cache is revalidated
//! against the metadata index on every access rather than through explicit
//! invalidation flags.
//!
//! Typical flow: initialize a root directory once with [`from_metadata`] or
//! [`from_input_dirs`], then open branches at positions of interest with
//! [`load`] and a [`ProcessSpec`].

pub mod assemble;
pub mod branch;
pub mod combine;
pub mod config;
pub mod counts;
pub mod error;
pub mod partition;
pub mod paths;
pub mod spec;
pub mod table;

pub use branch::{CellBranch, CopyOverrides, Provenance};
pub use combine::{CombineRequest, MetadataSource, combine_datasets};
pub use counts::CountsMatrix;
pub use error::BranchError;
pub use spec::{ProcessSpec, ProcessStage, SubsetValue};
pub use table::MetadataTable;

use anyhow::Result;
use std::path::PathBuf;

/// Open a branch over an already-initialized root directory.
pub fn load(root_dir: impl Into<PathBuf>, spec: Option<ProcessSpec>) -> Result<CellBranch> {
    match spec {
        Some(spec) => CellBranch::with_spec(root_dir, spec),
        None => CellBranch::load(root_dir),
    }
}

/// Initialize `root_dir` from a sample metadata table carrying `path_<assay>`
/// columns, then open a branch over it.
pub fn from_metadata(
    root_dir: impl Into<PathBuf>,
    metadata: MetadataSource,
    spec: Option<ProcessSpec>,
) -> Result<CellBranch> {
    let root_dir = root_dir.into();
    combine_datasets(
        &root_dir,
        CombineRequest {
            metadata: Some(metadata),
            ..CombineRequest::default()
        },
    )?;
    load(root_dir, spec)
}

/// Initialize `root_dir` from an explicit list of per-sample input
/// directories, then open a branch over it.
pub fn from_input_dirs(
    root_dir: impl Into<PathBuf>,
    input_dirs: Vec<PathBuf>,
    assay: Option<String>,
    spec: Option<ProcessSpec>,
) -> Result<CellBranch> {
    let root_dir = root_dir.into();
    combine_datasets(
        &root_dir,
        CombineRequest {
            input_dirs: Some(input_dirs),
            assay,
            ..CombineRequest::default()
        },
    )?;
    load(root_dir, spec)
}
