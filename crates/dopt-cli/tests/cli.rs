use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("run.toml");
    fs::write(&path, body).unwrap();
    path.to_str().unwrap().to_string()
}

const SMALL_RUN: &str = r#"
[transcription]
scheme = "radau"
n_e = 6
n_cp = 2

[solver]
max_iter = 5000
tolerance = 1e-5

[mpc]
sample_period = 0.5
"#;

#[test]
fn dopt_help_lists_commands() {
    Command::cargo_bin("dopt")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("optimize"))
        .stdout(predicate::str::contains("mpc"))
        .stdout(predicate::str::contains("estimate"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn dopt_inspect_prints_layout() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), SMALL_RUN);
    Command::cargo_bin("dopt")
        .unwrap()
        .args(["inspect", "--config", &config, "--model", "reactor", "--n-e", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"model\": \"reactor\""))
        .stdout(predicate::str::contains("\"scheme\": \"radau\""))
        .stdout(predicate::str::contains("\"n_e\": 4"))
        .stdout(predicate::str::contains("\"n_xx\""));
}

#[test]
fn dopt_missing_config_fails() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    Command::cargo_bin("dopt")
        .unwrap()
        .args(["inspect", "--config", missing.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reading config"));
}

#[test]
fn dopt_bad_scheme_fails() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "[transcription]\nscheme = \"euler\"\n");
    Command::cargo_bin("dopt")
        .unwrap()
        .args(["inspect", "--config", &config])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parsing config"));
}

#[test]
fn dopt_mpc_writes_stitched_result() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), SMALL_RUN);
    let output = dir.path().join("mpc.txt");
    Command::cargo_bin("dopt")
        .unwrap()
        .args([
            "mpc",
            "--config",
            &config,
            "--samples",
            "2",
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("sample   1"))
        .stdout(predicate::str::contains("sample   2"));

    let result = dopt_io::ResultDymolaTextual::from_path(&output).unwrap();
    let (t, c) = result.variable_data("c").unwrap();
    assert_eq!(t.len(), c.len());
    assert!((t[0] - 0.0).abs() < 1e-12);
    assert!(t.windows(2).all(|w| w[1] >= w[0]));
    assert!((c[0] - 1.0).abs() < 1e-3);
}

#[test]
fn dopt_estimate_reports_rate_constant() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), SMALL_RUN);
    let csv = dir.path().join("measured.csv");
    fs::write(&csv, "time,c,q\n0,1.0,0.5\n1,0.8,0.5\n2,0.75,0.5\n3,0.73,0.5\n").unwrap();
    let output = dir.path().join("estimate.txt");
    Command::cargo_bin("dopt")
        .unwrap()
        .args([
            "estimate",
            "--config",
            &config,
            "--measurements",
            csv.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("k "));
    assert!(output.exists());
}
