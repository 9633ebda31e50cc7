// src/table.rs
//! Minimal metadata table: rows keyed by a unique cell id, string-valued
//! named columns in insertion order. Just enough tabular surface for the
//! lineage assembler — read/write TSV, inner join on the index, row
//! selection, column drops. Not a general dataframe.

use anyhow::{Context, Result, anyhow, bail};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::paths::write_atomic;

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataTable {
    index_name: String,
    index: Vec<String>,
    columns: Vec<String>,
    /// Column-major cell values, parallel to `columns`; every inner vec has
    /// `index.len()` entries.
    cells: Vec<Vec<String>>,
    row_pos: HashMap<String, usize>,
}

impl MetadataTable {
    /// Table with the given index and no columns. Index values must be
    /// unique.
    pub fn with_index(index_name: &str, index: Vec<String>) -> Result<Self> {
        let row_pos = build_row_pos(&index)?;
        Ok(Self {
            index_name: index_name.to_string(),
            index,
            columns: Vec::new(),
            cells: Vec::new(),
            row_pos,
        })
    }

    /// Read a tab-separated table with a header row; the first column is the
    /// index.
    pub fn read_tsv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("reading table {}", path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("reading header of {}", path.display()))?
            .clone();
        if headers.is_empty() {
            bail!("table {} has an empty header row", path.display());
        }
        let index_name = headers[0].to_string();
        let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        let mut index = Vec::new();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); columns.len()];
        for record in reader.records() {
            // the reader rejects ragged records itself
            let record = record.with_context(|| format!("reading row of {}", path.display()))?;
            index.push(record[0].to_string());
            for (col, field) in cells.iter_mut().zip(record.iter().skip(1)) {
                col.push(field.to_string());
            }
        }
        let row_pos = build_row_pos(&index)
            .with_context(|| format!("index of table {}", path.display()))?;
        Ok(Self {
            index_name,
            index,
            columns,
            cells,
            row_pos,
        })
    }

    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_tsv_string().as_bytes())
            .with_context(|| format!("writing table {}", path.display()))
    }

    /// Canonical TSV rendering; equal tables render byte-identically.
    pub fn to_tsv_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.index_name);
        for col in &self.columns {
            out.push('\t');
            out.push_str(col);
        }
        out.push('\n');
        for (i, id) in self.index.iter().enumerate() {
            out.push_str(id);
            for col in &self.cells {
                out.push('\t');
                out.push_str(&col[i]);
            }
            out.push('\n');
        }
        out
    }

    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Result<&[String]> {
        let pos = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| anyhow!("no column `{}` in table", name))?;
        Ok(&self.cells[pos])
    }

    /// Value at (row id, column name), if both exist.
    pub fn value(&self, row_id: &str, column: &str) -> Option<&str> {
        let row = *self.row_pos.get(row_id)?;
        let col = self.columns.iter().position(|c| c == column)?;
        Some(self.cells[col][row].as_str())
    }

    pub fn push_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if self.has_column(name) {
            bail!("column `{}` already exists", name);
        }
        if values.len() != self.index.len() {
            bail!(
                "column `{}` has {} values for {} rows",
                name,
                values.len(),
                self.index.len()
            );
        }
        self.columns.push(name.to_string());
        self.cells.push(values);
        Ok(())
    }

    pub fn drop_columns(&mut self, names: &BTreeSet<String>) {
        let mut kept_columns = Vec::with_capacity(self.columns.len());
        let mut kept_cells = Vec::with_capacity(self.cells.len());
        for (col, values) in self.columns.drain(..).zip(self.cells.drain(..)) {
            if !names.contains(&col) {
                kept_columns.push(col);
                kept_cells.push(values);
            }
        }
        self.columns = kept_columns;
        self.cells = kept_cells;
    }

    /// Inner join on the index: keeps rows present in both tables, in this
    /// table's row order, and appends `other`'s columns. Column names must
    /// be disjoint.
    pub fn inner_join(&self, other: &MetadataTable) -> Result<MetadataTable> {
        for col in other.columns() {
            if self.has_column(col) {
                bail!("inner_join column collision on `{}`", col);
            }
        }
        let keep: Vec<usize> = (0..self.index.len())
            .filter(|&i| other.row_pos.contains_key(&self.index[i]))
            .collect();
        let index: Vec<String> = keep.iter().map(|&i| self.index[i].clone()).collect();
        let mut columns = self.columns.clone();
        let mut cells: Vec<Vec<String>> = self
            .cells
            .iter()
            .map(|col| keep.iter().map(|&i| col[i].clone()).collect())
            .collect();
        for (col, values) in other.columns.iter().zip(&other.cells) {
            columns.push(col.clone());
            cells.push(
                index
                    .iter()
                    .map(|id| values[other.row_pos[id]].clone())
                    .collect(),
            );
        }
        let row_pos = build_row_pos(&index)?;
        Ok(MetadataTable {
            index_name: self.index_name.clone(),
            index,
            columns,
            cells,
            row_pos,
        })
    }

    /// Rows where `keep[i]` holds, preserving order. `keep` must have one
    /// entry per row.
    pub fn retain_positions(&self, keep: &[bool]) -> Result<MetadataTable> {
        if keep.len() != self.index.len() {
            bail!(
                "retain mask has {} entries for {} rows",
                keep.len(),
                self.index.len()
            );
        }
        let positions: Vec<usize> = (0..self.index.len()).filter(|&i| keep[i]).collect();
        let index: Vec<String> = positions.iter().map(|&i| self.index[i].clone()).collect();
        let cells: Vec<Vec<String>> = self
            .cells
            .iter()
            .map(|col| positions.iter().map(|&i| col[i].clone()).collect())
            .collect();
        let row_pos = build_row_pos(&index)?;
        Ok(MetadataTable {
            index_name: self.index_name.clone(),
            index,
            columns: self.columns.clone(),
            cells,
            row_pos,
        })
    }

    /// Replace literal spaces with underscores in every cell value. The
    /// index is left untouched.
    pub fn normalize_spaces(&mut self) {
        for col in &mut self.cells {
            for v in col.iter_mut() {
                if v.contains(' ') {
                    *v = v.replace(' ', "_");
                }
            }
        }
    }

    /// Distinct value combinations of `by` columns, in first-appearance row
    /// order.
    pub fn distinct_groups(&self, by: &[&str]) -> Result<Vec<Vec<String>>> {
        let cols: Vec<&[String]> = by
            .iter()
            .map(|name| self.column(name))
            .collect::<Result<_>>()?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for i in 0..self.index.len() {
            let key: Vec<String> = cols.iter().map(|c| c[i].clone()).collect();
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
        Ok(out)
    }
}

fn build_row_pos(index: &[String]) -> Result<HashMap<String, usize>> {
    let mut row_pos = HashMap::with_capacity(index.len());
    for (i, id) in index.iter().enumerate() {
        if row_pos.insert(id.clone(), i).is_some() {
            bail!("duplicate row id `{}`", id);
        }
    }
    Ok(row_pos)
}
