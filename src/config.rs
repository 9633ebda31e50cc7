// src/config.rs
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing;

/// Assay names the combine entry point recognizes in `path_<assay>` columns.
pub static ASSAY_OPTIONS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    BTreeSet::from([
        "rna", "vdj", "surface", "antigen", "cnv", "atac", "spatial", "crispr",
    ])
});

#[derive(Debug, Clone, Deserialize)]
pub struct BranchConfig {
    #[serde(default)]
    pub data: DataConfig,
}

impl BranchConfig {
    /// Load `config.toml` from the branch root, falling back to defaults when
    /// the file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<BranchConfig>(&text)
                .with_context(|| format!("parsing config file {}", path.display()))
        } else {
            tracing::info!(
                "No config file found at {}. Using BranchConfig::default().",
                path.display()
            );
            Ok(BranchConfig::default())
        }
    }
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// File name of the root metadata table, relative to the root dir.
    #[serde(default = "DataConfig::default_root_meta_file")]
    pub root_meta_file: String,
    /// File name of a stage's produced metadata, relative to the stage dir.
    #[serde(default = "DataConfig::default_stage_meta_file")]
    pub stage_meta_file: String,
    /// Assay whose counts artifact backs the branch's counts view.
    #[serde(default = "DataConfig::default_assay")]
    pub default_assay: String,
    /// Name of the cell-id index column used when synthesizing metadata.
    #[serde(default = "DataConfig::default_index_name")]
    pub index_name: String,
}

impl DataConfig {
    fn default_root_meta_file() -> String {
        "meta.tsv".to_string()
    }

    fn default_stage_meta_file() -> String {
        "stage_meta.tsv".to_string()
    }

    fn default_assay() -> String {
        "rna".to_string()
    }

    fn default_index_name() -> String {
        "cell_id".to_string()
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root_meta_file: Self::default_root_meta_file(),
            stage_meta_file: Self::default_stage_meta_file(),
            default_assay: Self::default_assay(),
            index_name: Self::default_index_name(),
        }
    }
}
