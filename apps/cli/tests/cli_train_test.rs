//! End-to-end tests for `topica train` and `topica infer` against a scripted engine.
#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Engine that answers every variational job with two topics' worth of partitions.
/// The log-likelihood drops by 10 per iteration so runs never converge.
const ENGINE: &str = r#"#!/bin/sh
payload=$(cat)
[ "$1" = "variational" ] || exit 0
dir=$(printf '%s' "$payload" | sed -n 's/.*"dir":"\([^"]*\)".*/\1/p')
iteration=$(printf '%s' "$payload" | sed -n 's/.*"iteration":\([0-9]*\).*/\1/p')
printf '%s\n%s\n' '{"key_type":"topic_term","value_type":"term_weights"}' '{"key":[1,1],"value":0.5}' > "$dir/beta-r-00000"
printf '%s\n%s\n' '{"key_type":"topic_term","value_type":"term_weights"}' '{"key":[2,1],"value":0.5}' > "$dir/beta-r-00001"
printf 'doc-1\n' > "$dir/gamma-m-00000"
case "$payload" in
  *'"training":true'*)
    printf '%s\n%s\n' '{"topic":1,"value":-150.0}' '{"topic":2,"value":-250.0}' > "$dir/part-00000" ;;
esac
echo "{\"TOTAL_DOCS\":100,\"TOTAL_TERMS\":200,\"LOG_LIKELIHOOD\":$((150000000 + iteration * 10000000)),\"CONFIG_TIME\":20,\"TRAINING_TIME\":90}"
"#;

fn install_engine(home: &TempDir) -> PathBuf {
    let path = home.path().join("engine.sh");
    fs::write(&path, ENGINE).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn topica(home: &TempDir, engine: &Path) -> Command {
    let mut cmd = Command::cargo_bin("topica").unwrap();
    cmd.env("HOME", home.path()).current_dir(home.path()).arg("--engine").arg(engine);
    cmd
}

fn corpus(home: &TempDir) {
    fs::create_dir_all(home.path().join("corpus")).unwrap();
    fs::write(home.path().join("corpus").join("docs"), "1:2 3:1\n").unwrap();
}

#[test]
fn test_train_writes_checkpoints_and_manifest() {
    let home = TempDir::new().unwrap();
    let engine = install_engine(&home);
    corpus(&home);

    topica(&home, &engine)
        .args(["train", "-i", "corpus", "-o", "model", "-k", "2", "-V", "100"])
        .args(["--iterations", "2", "--local-merge", "--seed", "7", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"max_iterations_reached\""))
        .stdout(predicate::str::contains("\"checkpoint\": 2"));

    let model = home.path().join("model");
    for name in ["alpha-0", "alpha-1", "alpha-2", "beta-1", "beta-2", "run_manifest.json"] {
        assert!(model.join(name).is_file(), "missing {name}");
    }
    assert!(model.join("gamma-2").join("gamma-m-00000").is_file());
    assert!(!model.join("gamma-1").exists());
    assert_eq!(fs::read_to_string(model.join("beta-2")).unwrap().lines().count(), 3);
}

#[test]
fn test_resume_latest_continues_run() {
    let home = TempDir::new().unwrap();
    let engine = install_engine(&home);
    corpus(&home);

    topica(&home, &engine)
        .args(["train", "-i", "corpus", "-o", "model", "-k", "2", "-V", "100"])
        .args(["--iterations", "1", "--local-merge"])
        .assert()
        .success();

    topica(&home, &engine)
        .args(["train", "-i", "corpus", "-o", "model", "-k", "2", "-V", "100"])
        .args(["--iterations", "3", "--local-merge", "--resume", "latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("iteration limit"));

    let model = home.path().join("model");
    assert!(model.join("alpha-0").is_file());
    assert!(model.join("alpha-3").is_file());
    assert!(model.join("gamma-3").is_dir());
    assert!(!model.join("gamma-1").exists());
}

#[test]
fn test_infer_scores_against_latest_model() {
    let home = TempDir::new().unwrap();
    let engine = install_engine(&home);
    corpus(&home);

    topica(&home, &engine)
        .args(["train", "-i", "corpus", "-o", "model", "-k", "2", "-V", "100"])
        .args(["--iterations", "2", "--local-merge"])
        .assert()
        .success();

    topica(&home, &engine)
        .args(["infer", "-i", "corpus", "-o", "scored", "-m", "model", "-k", "2", "-V", "100", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"inference_done\""))
        .stdout(predicate::str::contains("\"checkpoint\": 2"));

    assert!(!home.path().join("model").join("alpha-3").exists());
    assert!(home.path().join("scored").join("run_manifest.json").is_file());
}

#[test]
fn test_failing_engine_aborts_training() {
    let home = TempDir::new().unwrap();
    corpus(&home);

    topica(&home, Path::new("false"))
        .args(["train", "-i", "corpus", "-o", "model", "-k", "2", "-V", "100", "--iterations", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("compute job failed"));

    let leftovers: Vec<_> = fs::read_dir(home.path().join("model"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("temp-"))
        .collect();
    assert!(leftovers.is_empty());
}
