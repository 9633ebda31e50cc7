// src/error.rs
//! Error taxonomy for branch operations.
//!
//! Most functions in this crate return `anyhow::Result`; the conditions a
//! caller may want to react to programmatically are raised as `BranchError`
//! values and can be recovered with `err.downcast_ref::<BranchError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BranchError {
    /// Neither a root metadata table nor a root counts artifact exists.
    /// Fatal: there is nothing to build a branch from.
    #[error("no root metadata or counts artifact under {root}")]
    MissingRootData { root: PathBuf },

    /// The counts artifact expected for the current process (or the root
    /// fallback) does not exist. The branch itself remains usable; the
    /// usual cause is that the root directory was never initialized via
    /// `from_metadata` or `from_input_dirs`.
    #[error(
        "counts artifact not found: {path}. Ensure the root directory was \
         initialized with `from_metadata` or `from_input_dirs`"
    )]
    CountsArtifactNotFound { path: PathBuf },

    /// Bulk combine called with both or neither of `metadata` and
    /// `input_dirs`. Caller-side precondition violation.
    #[error("must supply exactly one of `metadata` or `input_dirs`")]
    AmbiguousCombineInput,

    /// Precursor resolution was requested for a stage name that is not part
    /// of the spec.
    #[error("process `{0}` is not defined in the spec")]
    InvalidHierarchyPosition(String),
}
