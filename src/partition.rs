// src/partition.rs
//! Partition labeling: append group-membership columns derived from a set of
//! metadata columns. Treated as a pure function of the table.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};

use crate::table::MetadataTable;

pub const PARTITION_COLUMN: &str = "partition";
pub const PARTITION_CODE_COLUMN: &str = "partition_code";

/// Append a `partition` label column (the values of `columns`, in sorted
/// column order, joined with `.`) and, with `encodings`, a `partition_code`
/// column assigning each distinct label an integer code in sorted-label
/// order. The two column names are reserved: any existing `partition` or
/// `partition_code` column is replaced. Deterministic for a given table and
/// column set.
pub fn label_partitions(
    table: &mut MetadataTable,
    columns: &BTreeSet<String>,
    encodings: bool,
) -> Result<()> {
    let mut labels: Vec<String> = vec![String::new(); table.n_rows()];
    for (k, name) in columns.iter().enumerate() {
        let values = table
            .column(name)
            .with_context(|| format!("partition column `{}`", name))?;
        for (label, v) in labels.iter_mut().zip(values) {
            if k > 0 {
                label.push('.');
            }
            label.push_str(v);
        }
    }
    let reserved: BTreeSet<String> = [PARTITION_COLUMN, PARTITION_CODE_COLUMN]
        .iter()
        .map(|s| s.to_string())
        .collect();
    table.drop_columns(&reserved);
    table.push_column(PARTITION_COLUMN, labels.clone())?;
    if encodings {
        // codes in sorted-label order, so they don't depend on row order
        let mut codes: BTreeMap<&str, usize> =
            labels.iter().map(|l| (l.as_str(), 0)).collect();
        for (code, slot) in codes.values_mut().enumerate() {
            *slot = code;
        }
        let encoded: Vec<String> = labels.iter().map(|l| codes[l.as_str()].to_string()).collect();
        table.push_column(PARTITION_CODE_COLUMN, encoded)?;
    }
    Ok(())
}
