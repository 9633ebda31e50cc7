// tests/branch_tests.rs
// Cached-view synchronization and copy/derive semantics.

use std::fs;
use std::path::Path;

use cellgrove::config::BranchConfig;
use cellgrove::paths::PathMap;
use cellgrove::{
    BranchError, CellBranch, CopyOverrides, CountsMatrix, MetadataTable, ProcessSpec,
    ProcessStage, Provenance,
};

// ----------------------- fixtures -----------------------

fn cell_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("AAACCTG-{}", i)).collect()
}

fn make_counts(ids: &[String]) -> CountsMatrix {
    let features = vec!["GENE1".to_string(), "GENE2".to_string()];
    let triplets: Vec<(usize, usize, f64)> = (0..ids.len())
        .flat_map(|i| [(i, 0, (i + 1) as f64), (i, 1, 2.0)])
        .collect();
    CountsMatrix::from_triplets(ids.to_vec(), features, &triplets).expect("counts")
}

fn init_root(root: &Path, n: usize) -> Vec<String> {
    let ids = cell_ids(n);
    let mut text = String::from("cell_id\tsample\n");
    for (i, id) in ids.iter().enumerate() {
        text.push_str(&format!("{}\ts{}\n", id, i % 2 + 1));
    }
    fs::write(root.join("meta.tsv"), text).expect("write root meta");
    make_counts(&ids)
        .save(&root.join("rna.counts.json"))
        .expect("save root counts");
    ids
}

fn row_set(ids: &[String]) -> std::collections::BTreeSet<String> {
    ids.iter().cloned().collect()
}

// ----------------------- tests ----------------------------

#[test]
fn counts_rows_equal_meta_rows_after_access() {
    let dir = tempfile::tempdir().expect("tmp");
    init_root(dir.path(), 8);

    let mut branch = CellBranch::load(dir.path()).expect("branch");
    let meta_index = branch.meta().expect("meta").index().to_vec();
    let counts_ids = branch.counts().expect("counts").cell_ids().to_vec();
    assert_eq!(row_set(&counts_ids), row_set(&meta_index));
}

#[test]
fn filtered_meta_triggers_reload_and_realign_in_meta_order() {
    let dir = tempfile::tempdir().expect("tmp");
    let ids = init_root(dir.path(), 8);

    let mut branch = CellBranch::load(dir.path()).expect("branch");
    branch.counts().expect("counts"); // warm the cache with all 8 rows

    // inject metadata filtered to a strict subset, in reversed order
    let mut subset_ids: Vec<String> = ids[2..6].to_vec();
    subset_ids.reverse();
    let injected =
        MetadataTable::with_index("cell_id", subset_ids.clone()).expect("table");
    let mut derived = branch
        .copy(
            false,
            CopyOverrides {
                meta: Some(injected),
                ..CopyOverrides::default()
            },
        )
        .expect("copy");

    let counts = derived.counts().expect("counts");
    // same set AND same order as the injected metadata index
    assert_eq!(counts.cell_ids(), &subset_ids[..]);
    // values follow their rows through the realignment
    assert_eq!(counts.get(&ids[5], "GENE1"), Some(6.0));
}

#[test]
fn copy_without_overrides_shares_meta_and_reads_nothing() {
    let dir = tempfile::tempdir().expect("tmp");
    init_root(dir.path(), 4);

    let mut branch = CellBranch::load(dir.path()).expect("branch");
    let original = branch.meta().expect("meta").to_tsv_string();
    assert!(branch.storage_reads() > 0);

    let mut copied = branch.copy(false, CopyOverrides::default()).expect("copy");
    assert_eq!(copied.meta().expect("meta").to_tsv_string(), original);
    assert_eq!(copied.storage_reads(), 0, "shared cache, no storage access");
    assert_eq!(copied.provenance(), Provenance::Versioned);
}

#[test]
fn copy_with_injected_meta_is_always_unversioned() {
    let dir = tempfile::tempdir().expect("tmp");
    let ids = init_root(dir.path(), 4);

    let branch = CellBranch::load(dir.path()).expect("branch");
    let injected = MetadataTable::with_index("cell_id", ids).expect("table");
    let copied = branch
        .copy(
            false,
            CopyOverrides {
                meta: Some(injected),
                // an explicit versioned request must lose
                unversioned: Some(false),
                ..CopyOverrides::default()
            },
        )
        .expect("copy");
    assert!(copied.is_unversioned());
}

#[test]
fn copy_reset_discards_overrides_and_matches_a_fresh_branch() {
    let dir = tempfile::tempdir().expect("tmp");
    let ids = init_root(dir.path(), 6);

    let branch = CellBranch::load(dir.path()).expect("branch");
    let injected =
        MetadataTable::with_index("cell_id", ids[..2].to_vec()).expect("table");
    let mut reset = branch
        .copy(
            true,
            CopyOverrides {
                meta: Some(injected),
                unversioned: Some(true),
                ..CopyOverrides::default()
            },
        )
        .expect("copy");

    let mut fresh = CellBranch::load(dir.path()).expect("branch");
    assert_eq!(
        reset.meta().expect("meta").to_tsv_string(),
        fresh.meta().expect("meta").to_tsv_string()
    );
    assert_eq!(reset.provenance(), Provenance::Versioned);
    assert!(reset.current_process().is_none());
}

#[test]
fn missing_root_counts_artifact_is_reported_and_recoverable() {
    let dir = tempfile::tempdir().expect("tmp");
    let ids = cell_ids(3);
    let mut text = String::from("cell_id\tsample\n");
    for id in &ids {
        text.push_str(&format!("{}\ts1\n", id));
    }
    fs::write(dir.path().join("meta.tsv"), text).expect("write root meta");

    let mut branch = CellBranch::load(dir.path()).expect("branch");
    let err = branch.counts().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BranchError>(),
        Some(BranchError::CountsArtifactNotFound { .. })
    ));
    // the branch stays usable for metadata access
    assert_eq!(branch.meta().expect("meta").n_rows(), 3);
}

#[test]
fn groupby_yields_one_subset_branch_per_key() {
    let dir = tempfile::tempdir().expect("tmp");
    init_root(dir.path(), 6); // samples alternate s1/s2

    let mut branch = CellBranch::load(dir.path()).expect("branch");
    let groups: Vec<_> = branch.groupby(&["sample"]).expect("groupby").collect();
    assert_eq!(groups.len(), 2);
    // first-appearance key order
    assert_eq!(groups[0].0, ["s1"]);
    assert_eq!(groups[1].0, ["s2"]);

    for (key, mut sub) in groups {
        let meta_index = sub.meta().expect("meta").index().to_vec();
        let samples = sub.meta().expect("meta").column("sample").expect("col").to_vec();
        assert_eq!(meta_index.len(), 3);
        assert!(samples.iter().all(|v| *v == key[0]));
        // the counts view follows the subset metadata
        let counts_ids = sub.counts().expect("counts").cell_ids().to_vec();
        assert_eq!(counts_ids, meta_index);
    }
}

#[test]
fn stage_counts_are_read_from_the_spec_hashed_dir() {
    let dir = tempfile::tempdir().expect("tmp");
    let ids = init_root(dir.path(), 5);

    let spec = ProcessSpec::from_json_str(
        r#"[{"process": "normalize", "params": {"min_genes": 5}}]"#,
    )
    .expect("spec");
    let config = BranchConfig::default();
    PathMap::new(dir.path(), &config.data)
        .publish_stage_counts(&spec, "normalize", "rna", &make_counts(&ids))
        .expect("publish");

    let mut branch = CellBranch::with_spec(dir.path(), spec).expect("branch");
    let counts = branch.counts().expect("counts");
    assert_eq!(counts.cell_ids(), &ids[..]);
}

#[test]
fn changed_spec_params_never_serve_stale_stage_output() {
    // Historically, reloading a branch with modified params over previously
    // processed output produced inconsistent counts. Stage dirs are keyed by
    // spec hash, so the modified spec resolves to an empty dir and reports
    // the artifact as missing instead.
    let dir = tempfile::tempdir().expect("tmp");
    let ids = init_root(dir.path(), 5);

    let original = ProcessSpec::from_json_str(
        r#"[{"process": "normalize", "params": {"min_genes": 5}}]"#,
    )
    .expect("spec");
    let config = BranchConfig::default();
    PathMap::new(dir.path(), &config.data)
        .publish_stage_counts(&original, "normalize", "rna", &make_counts(&ids))
        .expect("publish");

    let modified = ProcessSpec::from_json_str(
        r#"[{"process": "normalize", "params": {"min_genes": 2}}]"#,
    )
    .expect("spec");
    let mut branch = CellBranch::with_spec(dir.path(), modified).expect("branch");
    let err = branch.counts().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BranchError>(),
        Some(BranchError::CountsArtifactNotFound { .. })
    ));
}

#[test]
fn spec_position_change_resynchronizes_the_counts_view() {
    let dir = tempfile::tempdir().expect("tmp");
    let ids = init_root(dir.path(), 6);

    let mut root_branch = CellBranch::load(dir.path()).expect("branch");
    assert_eq!(root_branch.counts().expect("counts").cell_ids(), &ids[..]);

    // stage output drops a cell; a branch moved to that position must see
    // the stage's rows on its next access, with no explicit invalidation
    let spec = ProcessSpec::from_json_str(r#"[{"process": "normalize"}]"#).expect("spec");
    let config = BranchConfig::default();
    let paths = PathMap::new(dir.path(), &config.data);
    paths
        .publish_stage_counts(&spec, "normalize", "rna", &make_counts(&ids[1..]))
        .expect("publish counts");
    let mut stage_meta_tsv = String::from("cell_id\tn_genes\n");
    for id in &ids[1..] {
        stage_meta_tsv.push_str(&format!("{}\t100\n", id));
    }
    let tmp = tempfile::tempdir().expect("tmp");
    let stage_meta_path = tmp.path().join("stage_meta.tsv");
    fs::write(&stage_meta_path, stage_meta_tsv).expect("write");
    let stage_meta = MetadataTable::read_tsv(&stage_meta_path).expect("read");
    paths
        .publish_stage_meta(&spec, "normalize", &stage_meta)
        .expect("publish meta");

    let mut moved = root_branch
        .copy(
            false,
            CopyOverrides {
                spec: Some(spec),
                ..CopyOverrides::default()
            },
        )
        .expect("copy");
    let counts_ids = moved.counts().expect("counts").cell_ids().to_vec();
    let meta_index = moved.meta().expect("meta").index().to_vec();
    assert_eq!(counts_ids, meta_index);
    assert_eq!(counts_ids.len(), 5);
}

#[test]
fn branches_render_with_debug_formatting() {
    let dir = tempfile::tempdir().expect("tmp");
    init_root(dir.path(), 2);

    let branch = CellBranch::load(dir.path()).expect("branch");
    let rendered = format!("{:?}", branch);
    assert!(rendered.contains("CellBranch"));
}

#[test]
fn set_partition_labels_the_cached_view_on_demand() {
    let dir = tempfile::tempdir().expect("tmp");
    let ids = init_root(dir.path(), 4);

    let mut stage = ProcessStage::named("normalize");
    stage.partition.insert("sample".to_string());
    let spec = ProcessSpec::from_stages(vec![stage]).expect("spec");
    let branch = CellBranch::with_spec(dir.path(), spec).expect("branch");

    // hand-built view with no labels of its own
    let mut injected = MetadataTable::with_index("cell_id", ids.clone()).expect("table");
    injected
        .push_column(
            "sample",
            (0..ids.len()).map(|i| format!("s{}", i % 2 + 1)).collect(),
        )
        .expect("column");
    let mut labeled = branch
        .copy(
            false,
            CopyOverrides {
                meta: Some(injected),
                ..CopyOverrides::default()
            },
        )
        .expect("copy");

    labeled.set_partition(Some("normalize"), true).expect("set partition");
    let meta = labeled.meta().expect("meta");
    assert_eq!(meta.value(&ids[0], "partition"), Some("s1"));
    assert_eq!(meta.value(&ids[1], "partition"), Some("s2"));
    assert_eq!(meta.value(&ids[0], "partition_code"), Some("0"));

    let err = labeled
        .set_partition(Some("missing"), true)
        .expect_err("unknown process");
    assert!(matches!(
        err.downcast_ref::<BranchError>(),
        Some(BranchError::InvalidHierarchyPosition(_))
    ));
}
