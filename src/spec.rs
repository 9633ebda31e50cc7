// src/spec.rs
//! Process hierarchy spec.
//!
//! A `ProcessSpec` is an ordered chain of named process stages, each with
//! params, subset/filter predicates, and partition columns, plus root-level
//! subset/filter/partition blocks that apply before any stage. It answers
//! the lineage queries the rest of the crate is built on:
//! - ordered precursor resolution for a stage (inclusive of the stage),
//! - partition-column union through a position,
//! - accumulated subset/filter predicates through a position,
//! - a blake3 content hash of the spec through a position, used to key
//!   stage-local artifact directories so output produced under different
//!   params can never be mistaken for the current spec's output.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::BranchError;

/// A subset/filter predicate value: a single scalar or a list of allowed
/// scalars. Matches the cell-value rendering used in metadata tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubsetValue {
    One(Value),
    Many(Vec<Value>),
}

impl SubsetValue {
    pub fn matches(&self, cell: &str) -> bool {
        match self {
            SubsetValue::One(v) => scalar_to_cell(v) == cell,
            SubsetValue::Many(vs) => vs.iter().any(|v| scalar_to_cell(v) == cell),
        }
    }
}

/// Render a JSON scalar the way it appears in a TSV cell.
pub(crate) fn scalar_to_cell(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A named node in the process hierarchy. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStage {
    pub process: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subset: BTreeMap<String, SubsetValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, SubsetValue>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub partition: BTreeSet<String>,
}

impl ProcessStage {
    pub fn named(process: impl Into<String>) -> Self {
        Self {
            process: process.into(),
            params: BTreeMap::new(),
            subset: BTreeMap::new(),
            filter: BTreeMap::new(),
            partition: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Root-level predicates, applied to every branch of this spec before
    /// any stage predicates. `groupby`-derived branches accumulate their
    /// group bindings here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subset: BTreeMap<String, SubsetValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, SubsetValue>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub partition: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<ProcessStage>,
}

impl ProcessSpec {
    pub fn from_stages(stages: Vec<ProcessStage>) -> Result<Self> {
        let spec = Self {
            stages,
            ..Self::default()
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a spec from JSON: either a bare array of stages (the common
    /// spec-file form) or a full object with root-level blocks.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).context("parsing spec JSON")?;
        let spec = if value.is_array() {
            let stages: Vec<ProcessStage> =
                serde_json::from_value(value).context("parsing spec stage list")?;
            Self {
                stages,
                ..Self::default()
            }
        } else {
            serde_json::from_value(value).context("parsing spec object")?
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.process.as_str()) {
                bail!("duplicate process name in spec: `{}`", stage.process);
            }
        }
        Ok(())
    }

    /// True when the spec describes the root state (no processing applied).
    pub fn is_root(&self) -> bool {
        self.stages.is_empty()
    }

    /// Terminal stage of the resolved path, or `None` in the root state.
    pub fn current_process(&self) -> Option<&str> {
        self.stages.last().map(|s| s.process.as_str())
    }

    pub fn get(&self, process: &str) -> Option<&ProcessStage> {
        self.stages.iter().find(|s| s.process == process)
    }

    fn position_of(&self, process: &str) -> Result<usize> {
        self.stages
            .iter()
            .position(|s| s.process == process)
            .ok_or_else(|| BranchError::InvalidHierarchyPosition(process.to_string()).into())
    }

    /// Ordered precursor stage names leading to `process`, root-first.
    /// With `incl_current`, `process` itself is the last element.
    pub fn precursors(&self, process: &str, incl_current: bool) -> Result<Vec<&str>> {
        let pos = self.position_of(process)?;
        let end = if incl_current { pos + 1 } else { pos };
        Ok(self.stages[..end]
            .iter()
            .map(|s| s.process.as_str())
            .collect())
    }

    /// Union of partition columns declared across the root block and every
    /// stage at or before `position`. Root state unions the root block only.
    pub fn partition_union_through(&self, position: Option<&str>) -> Result<BTreeSet<String>> {
        let mut out = self.partition.clone();
        if let Some(process) = position {
            let pos = self.position_of(process)?;
            for stage in &self.stages[..=pos] {
                out.extend(stage.partition.iter().cloned());
            }
        }
        Ok(out)
    }

    /// Subset predicate maps in application order: root block first, then
    /// each resolved stage through `position`.
    pub fn subset_chain_through(
        &self,
        position: Option<&str>,
    ) -> Result<Vec<&BTreeMap<String, SubsetValue>>> {
        self.predicate_chain(position, |spec| &spec.subset, |stage| &stage.subset)
    }

    /// Filter predicate maps in application order, same shape as subsets.
    pub fn filter_chain_through(
        &self,
        position: Option<&str>,
    ) -> Result<Vec<&BTreeMap<String, SubsetValue>>> {
        self.predicate_chain(position, |spec| &spec.filter, |stage| &stage.filter)
    }

    fn predicate_chain<'a>(
        &'a self,
        position: Option<&str>,
        root: impl Fn(&'a Self) -> &'a BTreeMap<String, SubsetValue>,
        per_stage: impl Fn(&'a ProcessStage) -> &'a BTreeMap<String, SubsetValue>,
    ) -> Result<Vec<&'a BTreeMap<String, SubsetValue>>> {
        let mut out = vec![root(self)];
        if let Some(process) = position {
            let pos = self.position_of(process)?;
            out.extend(self.stages[..=pos].iter().map(per_stage));
        }
        Ok(out)
    }

    /// Derive a spec with additional root-level subset bindings. Later
    /// bindings for the same column replace earlier ones.
    pub fn with_subset(&self, predicates: BTreeMap<String, SubsetValue>) -> Self {
        let mut spec = self.clone();
        spec.subset.extend(predicates);
        spec
    }

    /// Content hash of the spec through `process` (inclusive): blake3 over
    /// the canonical JSON of the root blocks plus the stage slice. Stage
    /// artifact directories are keyed on this, so a param change anywhere on
    /// the resolved path changes where output is read from and written to.
    pub fn hash_through(&self, process: &str) -> Result<String> {
        let pos = self.position_of(process)?;
        let reduced = Self {
            subset: self.subset.clone(),
            filter: self.filter.clone(),
            partition: self.partition.clone(),
            stages: self.stages[..=pos].to_vec(),
        };
        let bytes = serde_json::to_vec(&reduced).context("serializing spec for hashing")?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}
