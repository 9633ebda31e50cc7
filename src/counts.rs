// src/counts.rs
//! Sparse cell-by-feature counts matrix.
//!
//! CSR layout (`indptr`/`indices`/`data`) with cells addressable by id, the
//! same id space as the metadata index. Persisted as a serde JSON artifact;
//! the matrix is an opaque blob to everything outside this module.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::paths::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountsMatrix {
    cell_ids: Vec<String>,
    feature_ids: Vec<String>,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CountsMatrix {
    /// Build from (cell position, feature position, value) triplets.
    /// Triplets may arrive in any order; zero values are kept as stored.
    pub fn from_triplets(
        cell_ids: Vec<String>,
        feature_ids: Vec<String>,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self> {
        check_unique(&cell_ids, "cell id")?;
        check_unique(&feature_ids, "feature id")?;
        let mut sorted = triplets.to_vec();
        sorted.sort_by_key(|&(r, c, _)| (r, c));
        let mut indptr = Vec::with_capacity(cell_ids.len() + 1);
        let mut indices = Vec::with_capacity(sorted.len());
        let mut data = Vec::with_capacity(sorted.len());
        indptr.push(0);
        let mut next = sorted.iter().peekable();
        for row in 0..cell_ids.len() {
            while let Some(&&(r, c, v)) = next.peek() {
                if r != row {
                    break;
                }
                if c >= feature_ids.len() {
                    bail!("triplet feature position {} out of range", c);
                }
                indices.push(c);
                data.push(v);
                next.next();
            }
            indptr.push(indices.len());
        }
        if next.peek().is_some() {
            bail!("triplet cell position out of range");
        }
        Ok(Self {
            cell_ids,
            feature_ids,
            indptr,
            indices,
            data,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("reading counts artifact {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing counts artifact {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self).context("serializing counts artifact")?;
        write_atomic(path, &bytes)
            .with_context(|| format!("writing counts artifact {}", path.display()))
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// (cells, features)
    pub fn shape(&self) -> (usize, usize) {
        (self.cell_ids.len(), self.feature_ids.len())
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Stored value at (cell id, feature id); absent entries read as 0.
    pub fn get(&self, cell_id: &str, feature_id: &str) -> Option<f64> {
        let row = self.cell_ids.iter().position(|c| c == cell_id)?;
        let col = self.feature_ids.iter().position(|f| f == feature_id)?;
        let slice = &self.indices[self.indptr[row]..self.indptr[row + 1]];
        match slice.binary_search(&col) {
            Ok(i) => Some(self.data[self.indptr[row] + i]),
            Err(_) => Some(0.0),
        }
    }

    /// New matrix containing exactly `ids`, in `ids` order. Every id must be
    /// present in this matrix.
    pub fn select_cells(&self, ids: &[String]) -> Result<CountsMatrix> {
        let pos: HashMap<&str, usize> = self
            .cell_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut indptr = Vec::with_capacity(ids.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for id in ids {
            let Some(&row) = pos.get(id.as_str()) else {
                bail!("cell id `{}` not present in counts matrix", id);
            };
            let (lo, hi) = (self.indptr[row], self.indptr[row + 1]);
            indices.extend_from_slice(&self.indices[lo..hi]);
            data.extend_from_slice(&self.data[lo..hi]);
            indptr.push(indices.len());
        }
        Ok(CountsMatrix {
            cell_ids: ids.to_vec(),
            feature_ids: self.feature_ids.clone(),
            indptr,
            indices,
            data,
        })
    }

    /// Copy with every cell id suffixed, cellranger-aggr style (`-1`, `-2`,
    /// ... per input sample).
    pub fn with_suffixed_cells(&self, suffix: &str) -> CountsMatrix {
        let mut out = self.clone();
        for id in &mut out.cell_ids {
            id.push_str(suffix);
        }
        out
    }

    /// Stack matrices row-wise. Features are aligned on the union of all
    /// feature ids, in first-appearance order; cell ids must stay unique
    /// across all parts.
    pub fn vstack(parts: &[CountsMatrix]) -> Result<CountsMatrix> {
        if parts.is_empty() {
            bail!("vstack of zero matrices");
        }
        let mut feature_ids: Vec<String> = Vec::new();
        let mut feature_pos: HashMap<String, usize> = HashMap::new();
        for part in parts {
            for f in &part.feature_ids {
                if !feature_pos.contains_key(f) {
                    feature_pos.insert(f.clone(), feature_ids.len());
                    feature_ids.push(f.clone());
                }
            }
        }
        let mut cell_ids = Vec::new();
        let mut indptr = vec![0];
        let mut indices = Vec::new();
        let mut data = Vec::new();
        for part in parts {
            let remap: Vec<usize> = part
                .feature_ids
                .iter()
                .map(|f| feature_pos[f])
                .collect();
            for row in 0..part.cell_ids.len() {
                let (lo, hi) = (part.indptr[row], part.indptr[row + 1]);
                let mut entries: Vec<(usize, f64)> = part.indices[lo..hi]
                    .iter()
                    .map(|&c| remap[c])
                    .zip(part.data[lo..hi].iter().copied())
                    .collect();
                entries.sort_by_key(|&(c, _)| c);
                for (c, v) in entries {
                    indices.push(c);
                    data.push(v);
                }
                indptr.push(indices.len());
            }
            cell_ids.extend(part.cell_ids.iter().cloned());
        }
        check_unique(&cell_ids, "cell id")?;
        Ok(CountsMatrix {
            cell_ids,
            feature_ids,
            indptr,
            indices,
            data,
        })
    }
}

fn check_unique(ids: &[String], what: &str) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            bail!("duplicate {} `{}`", what, id);
        }
    }
    Ok(())
}
