use std::fs;
use std::process::Command;

fn recompress() -> Command {
    Command::new(env!("CARGO_BIN_EXE_recompress"))
}

#[test]
fn pack_then_unpack() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("payload.bin");
    fs::write(&input, b"already compressed").unwrap();
    let container = dir.path().join("c.bin");

    let status = recompress()
        .args(["pack", "-n", "3", "-o"])
        .arg(&container)
        .arg(&input)
        .status()
        .unwrap();
    assert!(status.success());

    let out_dir = dir.path().join("out");
    let output = recompress()
        .arg("unpack")
        .arg(&container)
        .arg("--out-dir")
        .arg(&out_dir)
        .output()
        .unwrap();
    assert!(output.status.success());
    let listed = String::from_utf8_lossy(&output.stdout);
    assert_eq!(listed.lines().count(), 3);
    assert_eq!(
        fs::read(out_dir.join("copy_0003_payload.bin")).unwrap(),
        b"already compressed"
    );
}

#[test]
fn detect_prints_algorithm() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("final_container_iter_002_N_0002.paq8px");
    fs::write(&artifact, b"x").unwrap();
    let output = recompress().arg("detect").arg(&artifact).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("paq8px"));
}

#[test]
fn search_with_missing_input_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let output = recompress()
        .current_dir(dir.path())
        .args(["search", "nope.bin", "--algorithm", "gmix"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("input file not found"), "{stderr}");
    assert!(!dir.path().join("work").exists());
}

#[test]
fn unpack_rejects_non_containers() {
    let dir = tempfile::tempdir().unwrap();
    let junk = dir.path().join("junk");
    fs::write(&junk, b"definitely not").unwrap();
    let output = recompress().arg("unpack").arg(&junk).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn container_info_lists_entries() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("p.bin");
    fs::write(&input, b"xyz").unwrap();
    let container = dir.path().join("c.bin");
    assert!(recompress()
        .args(["pack", "-n", "2", "-o"])
        .arg(&container)
        .arg(&input)
        .status()
        .unwrap()
        .success());
    let output = Command::new(env!("CARGO_BIN_EXE_container_info"))
        .arg(&container)
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("sniff:    ok"), "{text}");
    assert!(text.contains("copy_0002_p.bin"), "{text}");
}

/// A stand-in compressor: `-c IN OUT` keeps the first half of IN, `-d IN OUT`
/// copies. It sleeps briefly so the sampler sees it running.
#[cfg(unix)]
fn halving_compressor(dir: &std::path::Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("halve.sh");
    fs::write(
        &path,
        "#!/bin/sh\n\
         sleep 0.3\n\
         case \"$1\" in\n\
           -c) head -c $(( $(wc -c < \"$2\") / 2 )) \"$2\" > \"$3\" ;;\n\
           *) cp \"$2\" \"$3\" ;;\n\
         esac\n",
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[test]
fn measure_writes_summary_and_timeseries() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("payload.bin");
    fs::write(&input, vec![7u8; 4096]).unwrap();
    let binary = halving_compressor(dir.path());
    let out_dir = dir.path().join("measure");

    let output = recompress()
        .arg("measure")
        .arg(&input)
        .args(["-a", "gmix", "-n", "2", "--interval-ms", "20", "--timeout", "60", "--binary"])
        .arg(&binary)
        .arg("--out-dir")
        .arg(&out_dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value =
        serde_json::from_slice(&fs::read(out_dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["copies"], 2);
    assert_eq!(summary["algorithm"], "gmix");
    assert_eq!(summary["attempts"], 1);
    let container_bytes = summary["container_bytes"].as_u64().unwrap();
    assert_eq!(summary["compressed_bytes"].as_u64(), Some(container_bytes / 2));
    // Two self snapshots around packing, plus at least one of the compressor.
    assert!(summary["samples"].as_u64().unwrap() >= 3, "{summary}");

    let timeseries = summary["timeseries_csv"].as_str().unwrap();
    let csv = fs::read_to_string(timeseries).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("time_iso,t_rel_s,phase"), "{csv}");
    assert!(lines.count() >= 3, "{csv}");

    assert!(out_dir.join("final/final_container_N_0002.bin").is_file());
    assert!(out_dir.join("final/final_container_N_0002.gmix").is_file());
}

#[cfg(unix)]
#[test]
fn search_with_telemetry_appends_samples_per_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("payload.bin");
    fs::write(&input, vec![3u8; 2048]).unwrap();
    let binary = halving_compressor(dir.path());
    let work = dir.path().join("work");
    let final_dir = dir.path().join("final");

    let output = recompress()
        .arg("search")
        .arg(&input)
        .args(["-a", "gmix", "--max-iters", "2", "--timeout-base", "60", "--telemetry", "--binary"])
        .arg(&binary)
        .arg("--work-dir")
        .arg(&work)
        .arg("--final-dir")
        .arg(&final_dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let csv = fs::read_to_string(work.join("telemetry.csv")).unwrap();
    let mut lines = csv.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("time_iso,t_rel_s,phase"), "{csv}");
    let rows: Vec<&str> = lines.collect();
    // One header for both iterations, at least one row from each run.
    assert!(rows.len() >= 2, "{csv}");
    assert!(rows.iter().all(|r| !r.starts_with("time_iso")), "{csv}");
}

#[test]
fn restore_reads_its_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("restore.json");
    fs::write(&config, r#"{"input": "a.gmix", "bytes_per_second_floor": 0}"#).unwrap();

    let output = recompress()
        .arg("restore")
        .arg("--config")
        .arg(&config)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bytes_per_second_floor"), "{stderr}");
}

#[test]
fn restore_needs_input_or_config() {
    let output = recompress().arg("restore").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--config"), "{stderr}");
}
