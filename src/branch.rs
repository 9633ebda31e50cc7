// src/branch.rs
//! CellBranch: the addressable unit of this crate.
//!
//! A branch is a root data directory plus a position in the process
//! hierarchy (its spec). It exposes two lazily cached, read-only views that
//! must stay index-synchronized:
//! - `meta()`: the assembled metadata table,
//! - `counts()`: the sparse counts matrix for the current process.
//!
//! There is no dirty flag anywhere. The counts cache is revalidated on every
//! access by comparing its row index against the metadata index; any code
//! path that replaces the metadata view (stage transition, spec change, copy
//! with injected metadata) therefore triggers resynchronization on the next
//! counts access for free.

use anyhow::{Context, Result, anyhow, bail};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::assemble::LineageAssembler;
use crate::config::BranchConfig;
use crate::counts::CountsMatrix;
use crate::error::BranchError;
use crate::partition::label_partitions;
use crate::paths::PathMap;
use crate::spec::{ProcessSpec, SubsetValue};
use crate::table::MetadataTable;

/// Whether a branch's metadata is fully reproducible from its stored spec
/// (`Versioned`) or contains externally injected data (`Unversioned`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Versioned,
    Unversioned,
}

/// Override set for `copy()`. Every supplied value is bound by move, so the
/// derived branch can never observe mutation through the source (or vice
/// versa).
#[derive(Debug, Clone, Default)]
pub struct CopyOverrides {
    pub spec: Option<ProcessSpec>,
    pub meta: Option<MetadataTable>,
    pub unversioned: Option<bool>,
}

impl CopyOverrides {
    fn is_empty(&self) -> bool {
        self.spec.is_none() && self.meta.is_none() && self.unversioned.is_none()
    }
}

#[derive(Debug)]
pub struct CellBranch {
    root_dir: PathBuf,
    config: BranchConfig,
    spec: ProcessSpec,
    provenance: Provenance,
    /// Cached metadata view. Shared by `Arc` across copies made without
    /// overrides; treated as immutable and only ever replaced wholesale.
    meta: Option<Arc<MetadataTable>>,
    /// Cached counts view. Exclusively owned; never shared across branches.
    counts: Option<CountsMatrix>,
    storage_reads: Cell<u64>,
}

impl CellBranch {
    /// Root-state branch: no processing applied yet.
    pub fn load(root_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_spec(root_dir, ProcessSpec::default())
    }

    pub fn with_spec(root_dir: impl Into<PathBuf>, spec: ProcessSpec) -> Result<Self> {
        let root_dir = root_dir.into();
        let config = BranchConfig::load(&root_dir)?;
        Ok(Self {
            root_dir,
            config,
            spec,
            provenance: Provenance::Versioned,
            meta: None,
            counts: None,
            storage_reads: Cell::new(0),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Terminal stage of the resolved path, or `None` in the root state.
    pub fn current_process(&self) -> Option<&str> {
        self.spec.current_process()
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn is_unversioned(&self) -> bool {
        self.provenance == Provenance::Unversioned
    }

    /// Artifact reads performed by this instance so far. Copies made without
    /// overrides share the metadata cache and start at zero.
    pub fn storage_reads(&self) -> u64 {
        self.storage_reads.get()
    }

    /// The assembled metadata view. Assembled from storage on first access,
    /// then cached until replaced wholesale.
    pub fn meta(&mut self) -> Result<&MetadataTable> {
        if self.meta.is_none() {
            let position = self.spec.current_process().map(str::to_string);
            let table = LineageAssembler::new(
                &self.root_dir,
                &self.spec,
                &self.config.data,
                &self.storage_reads,
            )
            .assemble(position.as_deref())?;
            self.meta = Some(Arc::new(table));
        }
        self.meta
            .as_deref()
            .ok_or_else(|| anyhow!("metadata cache unexpectedly empty"))
    }

    /// The counts view for the current process. Revalidated against the
    /// metadata index on every call: a row-index mismatch reloads the
    /// artifact, and a mismatch after reload realigns by selecting the
    /// metadata's rows, in metadata order. The metadata index is always
    /// authoritative.
    pub fn counts(&mut self) -> Result<&CountsMatrix> {
        self.meta()?;
        let meta = self
            .meta
            .clone()
            .ok_or_else(|| anyhow!("metadata cache unexpectedly empty"))?;

        let stale = match &self.counts {
            Some(c) => c.cell_ids() != meta.index(),
            None => true,
        };
        if stale {
            let path = self.counts_path()?;
            if !path.exists() {
                return Err(BranchError::CountsArtifactNotFound { path }.into());
            }
            self.verify_stage_manifest()?;
            self.storage_reads.set(self.storage_reads.get() + 1);
            let loaded = CountsMatrix::load(&path)?;
            tracing::debug!(
                "loaded counts artifact {} ({} cells)",
                path.display(),
                loaded.cell_ids().len()
            );
            self.counts = Some(loaded);
        }

        let misaligned = self
            .counts
            .as_ref()
            .map(|c| c.cell_ids() != meta.index())
            .unwrap_or(false);
        if misaligned {
            let loaded = self
                .counts
                .take()
                .ok_or_else(|| anyhow!("counts cache unexpectedly empty"))?;
            let realigned = loaded
                .select_cells(meta.index())
                .context("realigning counts to the metadata index")?;
            tracing::debug!("realigned counts to {} metadata rows", meta.n_rows());
            self.counts = Some(realigned);
        }
        self.counts
            .as_ref()
            .ok_or_else(|| anyhow!("counts cache unexpectedly empty"))
    }

    fn counts_path(&self) -> Result<PathBuf> {
        let paths = PathMap::new(&self.root_dir, &self.config.data);
        match self.spec.current_process() {
            Some(process) => paths.stage_counts(&self.spec, process, &self.config.data.default_assay),
            None => Ok(paths.root_counts(&self.config.data.default_assay)),
        }
    }

    /// Stage dirs are keyed by spec hash, so a hash mismatch here means the
    /// directory was tampered with or produced by other tooling. Missing
    /// manifests are tolerated with a warning.
    fn verify_stage_manifest(&self) -> Result<()> {
        let Some(process) = self.spec.current_process() else {
            return Ok(());
        };
        let paths = PathMap::new(&self.root_dir, &self.config.data);
        match paths.read_manifest(&self.spec, process)? {
            Some(manifest) => {
                let expected = self.spec.hash_through(process)?;
                if manifest.spec_hash != expected {
                    bail!(
                        "stage `{}` artifacts were produced under a different spec \
                         (manifest hash {}, expected {})",
                        process,
                        manifest.spec_hash,
                        expected
                    );
                }
            }
            None => {
                tracing::warn!("stage `{}` has no run manifest", process);
            }
        }
        Ok(())
    }

    /// Derive a new branch from this one.
    ///
    /// - No overrides: the cached metadata is shared by `Arc`, so the copy
    ///   costs no storage reads and no recompute.
    /// - `overrides.meta`: the copy is `Unversioned` regardless of any
    ///   requested flag, since its metadata can no longer be reproduced from
    ///   the stored spec.
    /// - `overrides.spec`: the metadata cache is reset and reassembled on
    ///   next access.
    /// - `reset`: all overrides are discarded; the result is equivalent to a
    ///   brand-new root-state branch for the same root dir.
    ///
    /// The counts cache is never carried over; the index check on the next
    /// `counts()` access resynchronizes it.
    pub fn copy(&self, reset: bool, overrides: CopyOverrides) -> Result<CellBranch> {
        if reset {
            return CellBranch::load(&self.root_dir);
        }
        let share_meta = overrides.is_empty();
        let CopyOverrides {
            spec,
            meta,
            unversioned,
        } = overrides;

        let mut branch = CellBranch {
            root_dir: self.root_dir.clone(),
            config: self.config.clone(),
            spec: spec.unwrap_or_else(|| self.spec.clone()),
            provenance: self.provenance,
            meta: None,
            counts: None,
            storage_reads: Cell::new(0),
        };
        if let Some(flag) = unversioned {
            branch.provenance = if flag {
                Provenance::Unversioned
            } else {
                Provenance::Versioned
            };
        }
        if let Some(meta) = meta {
            // injected metadata is untraceable to the stored hierarchy
            branch.provenance = Provenance::Unversioned;
            branch.meta = Some(Arc::new(meta));
        } else if share_meta {
            branch.meta = self.meta.clone();
        }
        Ok(branch)
    }

    /// Re-label the cached metadata view with the partition columns declared
    /// on a single spec node: the named process, or the root block when
    /// `process` is `None`. Assembly already labels with the union of all
    /// resolved partition declarations; this narrows the labels to one node,
    /// on demand, without reassembling. A node with no partition columns
    /// leaves the view untouched.
    pub fn set_partition(&mut self, process: Option<&str>, encodings: bool) -> Result<()> {
        let columns = match process {
            Some(name) => {
                let stage = self.spec.get(name).ok_or_else(|| {
                    anyhow::Error::from(BranchError::InvalidHierarchyPosition(name.to_string()))
                })?;
                stage.partition.clone()
            }
            None => self.spec.partition.clone(),
        };
        if columns.is_empty() {
            return Ok(());
        }
        self.meta()?;
        let mut table = self
            .meta
            .as_deref()
            .cloned()
            .ok_or_else(|| anyhow!("metadata cache unexpectedly empty"))?;
        label_partitions(&mut table, &columns, encodings)
            .with_context(|| format!("labeling partitions for `{}`", process.unwrap_or("root")))?;
        self.meta = Some(Arc::new(table));
        Ok(())
    }

    /// Derive a branch whose spec gains root-level subset predicates.
    pub fn subset(&self, predicates: BTreeMap<String, SubsetValue>) -> Result<CellBranch> {
        let spec = self.spec.with_subset(predicates);
        CellBranch::with_spec(self.root_dir.clone(), spec)
    }

    /// Group by one or more metadata columns, yielding one derived branch
    /// per distinct key combination in first-appearance order. The sequence
    /// is finite and consumed once; regrouping recomputes the partition.
    pub fn groupby(
        &mut self,
        by: &[&str],
    ) -> Result<impl Iterator<Item = (Vec<String>, CellBranch)> + use<>> {
        let keys = self.meta()?.distinct_groups(by)?;
        let mut groups = Vec::with_capacity(keys.len());
        for key in keys {
            let predicates: BTreeMap<String, SubsetValue> = by
                .iter()
                .zip(&key)
                .map(|(column, value)| {
                    (
                        column.to_string(),
                        SubsetValue::One(serde_json::Value::String(value.clone())),
                    )
                })
                .collect();
            let branch = self.subset(predicates)?;
            groups.push((key, branch));
        }
        Ok(groups.into_iter())
    }
}
