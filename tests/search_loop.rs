mod common;

use std::fs;
use std::path::Path;
use std::time::Duration;

use common::{payload, ScriptedAdapter, Step};
use recompress::report::SearchManifest;
use recompress::{AlgorithmId, RecompressError, SearchConfig, SearchLoop, StopReason};

fn config(root: &Path) -> SearchConfig {
    let input = root.join("log_huff.bin");
    fs::write(&input, payload(1000)).unwrap();
    let mut cfg = SearchConfig::new(input, AlgorithmId::Gmix);
    cfg.work_dir = root.join("work");
    cfg.final_dir = root.join("final");
    cfg.timeouts.base_secs = 10;
    cfg.timeouts.safety_margin_secs = 0;
    cfg
}

fn csv_rows(path: &Path) -> usize {
    csv::Reader::from_path(path).unwrap().records().count()
}

#[test]
fn stops_at_first_reduction_below_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let adapter = ScriptedAdapter::new(
        AlgorithmId::Gmix,
        &[Step::Reduce(5.0), Step::Reduce(4.0), Step::Reduce(-4.0), Step::Reduce(3.0)],
    );
    let report = SearchLoop::new(&cfg, &adapter).run().unwrap();

    assert_eq!(adapter.calls.get(), 3);
    assert_eq!(report.stop, StopReason::Threshold);
    assert_eq!(report.iterations.len(), 3);
    let best = report.best.as_ref().unwrap();
    assert_eq!((best.iteration, best.copies), (2, 2));
    assert!((best.reduction_pct - 4.0).abs() < 0.1);

    assert_eq!(
        report.final_artifact,
        cfg.final_dir.join("final_container_iter_002_N_0002.gmix")
    );
    assert!(report.final_container.is_file());
    assert_eq!(
        fs::read(&report.final_artifact).unwrap(),
        fs::read(&best.compressed_path).unwrap()
    );

    let manifest: SearchManifest =
        serde_json::from_slice(&fs::read(report.manifest.as_ref().unwrap()).unwrap()).unwrap();
    assert_eq!(manifest.best.iter, 2);
    assert_eq!(manifest.best.copies, 2);
    assert_eq!(manifest.stop_reason, "threshold");
    assert_eq!(manifest.algorithm, AlgorithmId::Gmix);
    assert_eq!(
        manifest.inner_files,
        vec!["copy_0001_log_huff.bin", "copy_0002_log_huff.bin"]
    );
    assert_eq!(manifest.input_sha256.len(), 64);

    assert_eq!(report.csv_path, cfg.work_dir.join("recompress_log_huff_gmix.csv"));
    assert_eq!(csv_rows(&report.csv_path), 3);
}

#[test]
fn iteration_ceiling_keeps_the_last_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.max_iterations = 2;
    let adapter = ScriptedAdapter::new(AlgorithmId::Gmix, &[Step::Reduce(5.0), Step::Reduce(6.0)]);
    let report = SearchLoop::new(&cfg, &adapter).run().unwrap();
    assert_eq!(report.stop, StopReason::IterationCeiling);
    assert_eq!(report.best.unwrap().iteration, 2);
}

#[test]
fn exhausted_retries_without_best_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let adapter = ScriptedAdapter::new(AlgorithmId::Gmix, &[Step::Timeout; 6]);
    let err = SearchLoop::new(&cfg, &adapter).run().unwrap_err();
    match err {
        RecompressError::RetriesExhausted {
            copies,
            attempts,
            last_timeout_secs,
        } => {
            assert_eq!(copies, 1);
            assert_eq!(attempts, 6);
            assert_eq!(last_timeout_secs, 320);
        }
        other => panic!("unexpected error: {other}"),
    }
    let budgets: Vec<u64> = adapter.budgets.borrow().iter().map(Duration::as_secs).collect();
    assert_eq!(budgets, vec![10, 20, 40, 80, 160, 320]);
    assert!(!cfg.final_dir.join("manifest.json").exists());
}

#[test]
fn exhausted_retries_after_a_best_finalize_it() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut steps = vec![Step::Reduce(5.0)];
    steps.extend([Step::Timeout; 6]);
    let adapter = ScriptedAdapter::new(AlgorithmId::Gmix, &steps);
    let report = SearchLoop::new(&cfg, &adapter).run().unwrap();
    assert_eq!(report.stop, StopReason::RetriesExhausted);
    assert_eq!(report.best.unwrap().iteration, 1);
    assert!(report.manifest.unwrap().is_file());
    assert_eq!(csv_rows(&report.csv_path), 1);
}

#[test]
fn retry_that_succeeds_records_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let adapter = ScriptedAdapter::new(
        AlgorithmId::Gmix,
        &[Step::Timeout, Step::Timeout, Step::Reduce(5.0), Step::Reduce(-10.0)],
    );
    let report = SearchLoop::new(&cfg, &adapter).run().unwrap();
    let first = &report.iterations[0];
    assert_eq!(first.attempts, 3);
    assert_eq!(first.timeout_secs, 40);
}

#[test]
fn hard_failure_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let adapter = ScriptedAdapter::new(AlgorithmId::Gmix, &[Step::Fail, Step::Reduce(5.0)]);
    let err = SearchLoop::new(&cfg, &adapter).run().unwrap_err();
    assert!(matches!(err, RecompressError::AdapterHardFailure { .. }));
    assert_eq!(adapter.calls.get(), 1);
}

#[test]
fn missing_input_fails_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.input = dir.path().join("absent.bin");
    let adapter = ScriptedAdapter::new(AlgorithmId::Gmix, &[]);
    let err = SearchLoop::new(&cfg, &adapter).run().unwrap_err();
    assert!(matches!(err, RecompressError::MissingInput { .. }));
    assert_eq!(adapter.calls.get(), 0);
    assert!(!cfg.work_dir.exists());
}

#[test]
fn missing_output_artifact_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let adapter = ScriptedAdapter::new(AlgorithmId::Gmix, &[Step::NoOutput]);
    let err = SearchLoop::new(&cfg, &adapter).run().unwrap_err();
    assert!(matches!(err, RecompressError::MissingOutputArtifact { .. }));
}

#[test]
fn no_accepted_iteration_keeps_the_first_without_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let adapter = ScriptedAdapter::new(AlgorithmId::Gmix, &[Step::Reduce(-10.0)]);
    let report = SearchLoop::new(&cfg, &adapter).run().unwrap();
    assert!(report.best.is_none());
    assert!(report.manifest.is_none());
    assert_eq!(report.stop, StopReason::Threshold);
    assert_eq!(report.final_container, cfg.final_dir.join("container_001.bin"));
    assert_eq!(report.final_artifact, cfg.final_dir.join("container_001.gmix"));
    assert!(report.final_artifact.is_file());
    assert!(!cfg.final_dir.join("manifest.json").exists());
}

#[test]
fn throughput_from_previous_iteration_drives_the_next_budget() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.timeouts.base_secs = 1;
    // Iteration 1: 1036 bytes in 0.5 s. Iteration 2 packs 2068 bytes and is
    // assumed to run at 30% of that rate: 2068 / 621.6 = 3.3 s.
    let adapter = ScriptedAdapter::new(AlgorithmId::Gmix, &[Step::Reduce(5.0), Step::Reduce(-10.0)]);
    SearchLoop::new(&cfg, &adapter).run().unwrap();
    let budgets = adapter.budgets.borrow();
    assert_eq!(budgets[0], Duration::from_secs(1));
    assert_eq!(budgets[1], Duration::from_secs(3));
}
