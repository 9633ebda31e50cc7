// src/paths.rs
//! Artifact locations under a branch root.
//!
//! Layout:
//! - `<root>/meta.tsv`                       root metadata table
//! - `<root>/<assay>.counts.json`            root counts artifact
//! - `<root>/<stage>-<hash8>/`               stage-local artifact dir
//!     - `stage_meta.tsv`                    stage-produced metadata (optional)
//!     - `<assay>.counts.json`               stage-produced counts
//!     - `run.json`                          manifest: full spec hash + timestamp
//!
//! `hash8` is the first 8 hex chars of the spec content hash through the
//! stage, so output produced under different params lands in (and is read
//! from) a different directory. The manifest carries the full hash for
//! verification on load.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::DataConfig;
use crate::counts::CountsMatrix;
use crate::spec::ProcessSpec;
use crate::table::MetadataTable;

pub const MANIFEST_FILE: &str = "run.json";

#[derive(Debug, Clone)]
pub struct PathMap<'a> {
    root: &'a Path,
    config: &'a DataConfig,
}

/// Written next to every published stage artifact; read back to verify that
/// a stage dir really was produced under the spec now being resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub process: String,
    pub spec_hash: String,
    pub written_at: String,
}

impl<'a> PathMap<'a> {
    pub fn new(root: &'a Path, config: &'a DataConfig) -> Self {
        Self { root, config }
    }

    pub fn root_meta(&self) -> PathBuf {
        self.root.join(&self.config.root_meta_file)
    }

    pub fn root_counts(&self, assay: &str) -> PathBuf {
        self.root.join(counts_file(assay))
    }

    pub fn stage_dir(&self, spec: &ProcessSpec, process: &str) -> Result<PathBuf> {
        let hash = spec.hash_through(process)?;
        Ok(self.root.join(format!("{}-{}", process, &hash[..8])))
    }

    pub fn stage_meta(&self, spec: &ProcessSpec, process: &str) -> Result<PathBuf> {
        Ok(self.stage_dir(spec, process)?.join(&self.config.stage_meta_file))
    }

    pub fn stage_counts(&self, spec: &ProcessSpec, process: &str, assay: &str) -> Result<PathBuf> {
        Ok(self.stage_dir(spec, process)?.join(counts_file(assay)))
    }

    pub fn stage_manifest(&self, spec: &ProcessSpec, process: &str) -> Result<PathBuf> {
        Ok(self.stage_dir(spec, process)?.join(MANIFEST_FILE))
    }

    /// Writer-side entry point for stage-produced counts: creates the stage
    /// dir, writes the artifact, and records the run manifest.
    pub fn publish_stage_counts(
        &self,
        spec: &ProcessSpec,
        process: &str,
        assay: &str,
        counts: &CountsMatrix,
    ) -> Result<PathBuf> {
        let path = self.stage_counts(spec, process, assay)?;
        counts.save(&path)?;
        self.write_manifest(spec, process)?;
        tracing::info!("published stage counts at {}", path.display());
        Ok(path)
    }

    /// Writer-side entry point for stage-produced metadata.
    pub fn publish_stage_meta(
        &self,
        spec: &ProcessSpec,
        process: &str,
        table: &MetadataTable,
    ) -> Result<PathBuf> {
        let path = self.stage_meta(spec, process)?;
        table.write_tsv(&path)?;
        self.write_manifest(spec, process)?;
        tracing::info!("published stage metadata at {}", path.display());
        Ok(path)
    }

    fn write_manifest(&self, spec: &ProcessSpec, process: &str) -> Result<()> {
        let manifest = RunManifest {
            process: process.to_string(),
            spec_hash: spec.hash_through(process)?,
            written_at: Utc::now().to_rfc3339(),
        };
        let path = self.stage_manifest(spec, process)?;
        write_atomic(&path, &serde_json::to_vec_pretty(&manifest)?)
            .with_context(|| format!("writing manifest {}", path.display()))
    }

    pub fn read_manifest(&self, spec: &ProcessSpec, process: &str) -> Result<Option<RunManifest>> {
        let path = self.stage_manifest(spec, process)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("reading manifest {}", path.display()))?;
        let manifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        Ok(Some(manifest))
    }
}

fn counts_file(assay: &str) -> String {
    format!("{assay}.counts.json")
}

/// Atomically write bytes to a file.
/// Uses a `.tmp` file then renames for crash-safety.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create_dir_all({:?})", parent))?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f =
            fs::File::create(&tmp).with_context(|| format!("open temp file {:?}", tmp))?;
        f.write_all(bytes)?;
        f.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;
    Ok(())
}
