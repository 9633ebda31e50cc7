// tests/combine_tests.rs
// Bulk-combine entry point: input-mode validation, cell id suffixing,
// feature alignment, and metadata replication.

use std::fs;
use std::path::Path;

use cellgrove::{
    BranchError, CombineRequest, CountsMatrix, MetadataSource, combine_datasets,
};

// ----------------------- fixtures -----------------------

fn write_sample_dir(dir: &Path, cells: &[&str], features: &[&str]) {
    let triplets: Vec<(usize, usize, f64)> = (0..cells.len())
        .map(|i| (i, i % features.len(), (i + 1) as f64))
        .collect();
    let counts = CountsMatrix::from_triplets(
        cells.iter().map(|s| s.to_string()).collect(),
        features.iter().map(|s| s.to_string()).collect(),
        &triplets,
    )
    .expect("counts");
    fs::create_dir_all(dir).expect("mkdir");
    counts
        .save(&dir.join("rna.counts.json"))
        .expect("save sample counts");
}

// ----------------------- tests ----------------------------

#[test]
fn both_and_neither_input_modes_are_ambiguous() {
    let dir = tempfile::tempdir().expect("tmp");

    let err = combine_datasets(dir.path(), CombineRequest::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BranchError>(),
        Some(BranchError::AmbiguousCombineInput)
    ));

    let meta_path = dir.path().join("samples.tsv");
    fs::write(&meta_path, "sample\tpath_rna\ns1\t/nowhere\n").expect("write");
    let err = combine_datasets(
        dir.path(),
        CombineRequest {
            metadata: Some(MetadataSource::Path(meta_path)),
            input_dirs: Some(vec![dir.path().to_path_buf()]),
            assay: None,
        },
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BranchError>(),
        Some(BranchError::AmbiguousCombineInput)
    ));
}

#[test]
fn input_dirs_mode_suffixes_cells_per_sample() {
    let root = tempfile::tempdir().expect("tmp");
    let s1 = root.path().join("in1");
    let s2 = root.path().join("in2");
    write_sample_dir(&s1, &["AAA", "CCC"], &["GENE1", "GENE2"]);
    write_sample_dir(&s2, &["AAA", "GGG", "TTT"], &["GENE1", "GENE2"]);

    let mut branch = cellgrove::from_input_dirs(
        root.path(),
        vec![s1, s2],
        None,
        None,
    )
    .expect("combine");

    // no root meta.tsv was written, so metadata synthesizes from counts rows
    let meta_index = branch.meta().expect("meta").index().to_vec();
    assert_eq!(meta_index, ["AAA-1", "CCC-1", "AAA-2", "GGG-2", "TTT-2"]);
    let counts_ids = branch.counts().expect("counts").cell_ids().to_vec();
    assert_eq!(counts_ids, meta_index);
}

#[test]
fn metadata_mode_replicates_sample_rows_per_cell() {
    let root = tempfile::tempdir().expect("tmp");
    let s1 = root.path().join("in1");
    let s2 = root.path().join("in2");
    write_sample_dir(&s1, &["AAA", "CCC", "GGG"], &["GENE1"]);
    write_sample_dir(&s2, &["AAA"], &["GENE1"]);

    let samples_tsv = format!(
        "sample\tcondition\tpath_rna\ns1\tnaive\t{}\ns2\ttreated\t{}\n",
        s1.display(),
        s2.display()
    );
    let samples_path = root.path().join("samples.tsv");
    fs::write(&samples_path, samples_tsv).expect("write samples");

    let mut branch = cellgrove::from_metadata(
        root.path(),
        MetadataSource::Path(samples_path),
        None,
    )
    .expect("combine");

    let meta = branch.meta().expect("meta");
    assert_eq!(meta.n_rows(), 4);
    assert_eq!(meta.columns(), ["sample", "condition"]);
    assert_eq!(meta.value("AAA-1", "condition"), Some("naive"));
    assert_eq!(meta.value("GGG-1", "sample"), Some("s1"));
    assert_eq!(meta.value("AAA-2", "condition"), Some("treated"));
    // path_ columns never reach the cell-level table
    assert!(!meta.has_column("path_rna"));
}

#[test]
fn unknown_assay_suffix_is_rejected() {
    let root = tempfile::tempdir().expect("tmp");
    let samples_path = root.path().join("samples.tsv");
    fs::write(&samples_path, "sample\tpath_proteomics\ns1\t/nowhere\n").expect("write");

    let err = cellgrove::from_metadata(
        root.path(),
        MetadataSource::Path(samples_path),
        None,
    )
    .unwrap_err();
    assert!(err.to_string().contains("unknown assay"));
}

#[test]
fn metadata_without_path_columns_is_rejected() {
    let root = tempfile::tempdir().expect("tmp");
    let samples_path = root.path().join("samples.tsv");
    fs::write(&samples_path, "sample\tcondition\ns1\tnaive\n").expect("write");

    let err = cellgrove::from_metadata(
        root.path(),
        MetadataSource::Path(samples_path),
        None,
    )
    .unwrap_err();
    assert!(err.to_string().contains("path_"));
}

#[test]
fn vstack_aligns_features_on_their_union() {
    let root = tempfile::tempdir().expect("tmp");
    let s1 = root.path().join("in1");
    let s2 = root.path().join("in2");
    write_sample_dir(&s1, &["AAA"], &["GENE1", "GENE2"]);
    write_sample_dir(&s2, &["CCC"], &["GENE3", "GENE1"]);

    let mut branch =
        cellgrove::from_input_dirs(root.path(), vec![s1, s2], None, None).expect("combine");
    let counts = branch.counts().expect("counts");
    assert_eq!(counts.feature_ids(), ["GENE1", "GENE2", "GENE3"]);
    // sample 2's single entry was written against its local GENE3 column
    assert_eq!(counts.get("CCC-2", "GENE3"), Some(1.0));
    assert_eq!(counts.get("CCC-2", "GENE1"), Some(0.0));
    assert_eq!(counts.get("AAA-1", "GENE1"), Some(1.0));
}
