// src/assemble.rs
//! Lineage metadata assembly.
//!
//! Resolves the precursor chain for a hierarchy position and builds the
//! branch's metadata table:
//! - root metadata from `meta.tsv`, or a synthesized index-only table from
//!   the root counts artifact when no root metadata exists,
//! - each precursor's stage-local metadata merged in resolution order by
//!   inner join, with already-present columns dropped from the precursor
//!   side first (first-resolved-wins),
//! - space→underscore value normalization,
//! - subset/filter predicate application,
//! - partition labeling over the union of partition columns on the path.
//!
//! A stage that has not produced metadata yet is skipped silently; only a
//! root with neither metadata nor counts is fatal.

use anyhow::{Context, Result};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::DataConfig;
use crate::counts::CountsMatrix;
use crate::error::BranchError;
use crate::partition::label_partitions;
use crate::paths::PathMap;
use crate::spec::{ProcessSpec, SubsetValue};
use crate::table::MetadataTable;

pub struct LineageAssembler<'a> {
    root: &'a Path,
    spec: &'a ProcessSpec,
    config: &'a DataConfig,
    reads: &'a Cell<u64>,
}

impl<'a> LineageAssembler<'a> {
    pub fn new(
        root: &'a Path,
        spec: &'a ProcessSpec,
        config: &'a DataConfig,
        reads: &'a Cell<u64>,
    ) -> Self {
        Self {
            root,
            spec,
            config,
            reads,
        }
    }

    pub fn assemble(&self, position: Option<&str>) -> Result<MetadataTable> {
        let paths = PathMap::new(self.root, self.config);
        let mut table = self.load_root_meta(&paths)?;

        if let Some(process) = position {
            for precursor in self.spec.precursors(process, true)? {
                let path = paths.stage_meta(self.spec, precursor)?;
                if !path.exists() {
                    // stage has not produced metadata yet
                    continue;
                }
                self.count_read();
                let mut stage_meta = MetadataTable::read_tsv(&path)?;
                let dup: BTreeSet<String> = stage_meta
                    .columns()
                    .iter()
                    .filter(|c| table.has_column(c))
                    .cloned()
                    .collect();
                stage_meta.drop_columns(&dup);
                table = table.inner_join(&stage_meta)?;
                tracing::debug!(
                    "merged stage metadata from `{}`: {} rows remain",
                    precursor,
                    table.n_rows()
                );
            }
        }

        table.normalize_spaces();

        for predicates in self.spec.subset_chain_through(position)? {
            table = apply_predicates(table, predicates, true)?;
        }
        for predicates in self.spec.filter_chain_through(position)? {
            table = apply_predicates(table, predicates, false)?;
        }

        let partitions = self.spec.partition_union_through(position)?;
        if !partitions.is_empty() {
            label_partitions(&mut table, &partitions, true)?;
        }
        Ok(table)
    }

    fn load_root_meta(&self, paths: &PathMap) -> Result<MetadataTable> {
        let meta_path = paths.root_meta();
        if meta_path.exists() {
            self.count_read();
            return MetadataTable::read_tsv(&meta_path);
        }
        // No root metadata: fall back to the counts artifact's own row ids.
        let counts_path = paths.root_counts(&self.config.default_assay);
        if !counts_path.exists() {
            return Err(BranchError::MissingRootData {
                root: self.root.to_path_buf(),
            }
            .into());
        }
        self.count_read();
        let counts = CountsMatrix::load(&counts_path)?;
        MetadataTable::with_index(&self.config.index_name, counts.cell_ids().to_vec())
            .context("synthesizing metadata from counts row ids")
    }

    fn count_read(&self) {
        self.reads.set(self.reads.get() + 1);
    }
}

/// Keep (`keep = true`, subset) or drop (`keep = false`, filter) the rows
/// matching every predicate in the map.
fn apply_predicates(
    table: MetadataTable,
    predicates: &BTreeMap<String, SubsetValue>,
    keep: bool,
) -> Result<MetadataTable> {
    if predicates.is_empty() {
        return Ok(table);
    }
    let mut mask = vec![true; table.n_rows()];
    for (column, allowed) in predicates {
        let values = table
            .column(column)
            .with_context(|| format!("predicate column `{}`", column))?;
        for (m, v) in mask.iter_mut().zip(values) {
            *m &= allowed.matches(v);
        }
    }
    if !keep {
        for m in mask.iter_mut() {
            *m = !*m;
        }
    }
    table.retain_positions(&mask)
}
