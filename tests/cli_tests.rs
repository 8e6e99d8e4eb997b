use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn apk_evasion(home: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("apk-evasion").unwrap();
    cmd.arg("--home").arg(home).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    apk_evasion(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("attack"))
        .stdout(predicate::str::contains("classify"));
}

#[test]
fn test_config_merges_file_and_flags() {
    let home = TempDir::new().unwrap();
    std::fs::write(
        home.path().join("config.json"),
        r#"{"attack": {"query_budget": 42, "strategy": "mutation"}}"#,
    )
    .unwrap();

    let output = apk_evasion(home.path())
        .env_remove("APK_EVASION_QUERY_BUDGET")
        .env_remove("APK_EVASION_STRATEGY")
        .args(["config", "--classifier", "python3 score.py"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["attack"]["query_budget"], 42);
    assert_eq!(json["attack"]["strategy"], "mutation");
    assert_eq!(json["attack"]["n_features"], 5);
    assert_eq!(json["commands"]["classifier"]["program"], "python3");
}

#[test]
fn test_attack_requires_commands() {
    let home = TempDir::new().unwrap();
    let apk = home.path().join("mw.apk");
    std::fs::write(&apk, b"apk").unwrap();

    apk_evasion(home.path())
        .arg("attack")
        .arg(&apk)
        .assert()
        .failure()
        .stderr(predicate::str::contains("command configured"));
}

#[test]
fn test_attack_rejects_missing_artifact() {
    let home = TempDir::new().unwrap();
    apk_evasion(home.path())
        .args(["attack", "does-not-exist.apk", "--classifier", "true", "--extractor", "true"])
        .args(["--decode", "true", "--build", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("artifact not found"));
}

#[cfg(unix)]
#[test]
fn test_attack_end_to_end_with_fake_tools() {
    let root = TempDir::new().unwrap();
    let home = root.path().join("home");
    let malware = root.path().join("malware");
    let goodware = root.path().join("goodware");
    std::fs::create_dir_all(&malware).unwrap();
    std::fs::create_dir_all(&goodware).unwrap();
    std::fs::write(malware.join("sample.apk"), b"apk").unwrap();
    std::fs::write(goodware.join("good.apk"), b"apk").unwrap();

    // Rebuilt artifacts contain the transformer plans; injecting the goodware
    // URL flips the fake classifier.
    let config = serde_json::json!({
        "attack": {
            "query_budget": 10,
            "output_dir": root.path().join("out"),
        },
        "commands": {
            "classifier": {"program": "sh", "args": ["-c",
                "if grep -q cdn.good \"$1\"; then echo '{\"label\": 0, \"score\": 0.1}'; else echo '{\"label\": 1, \"score\": 0.9}'; fi",
                "_", "{input}"]},
            "extractor": {"program": "sh", "args": ["-c",
                "case \"$1\" in *good*) echo '{\"urls\": [\"cdn.good.example\"]}';; *) echo '{\"activities\": [\"com.mal.Main\"]}';; esac",
                "_", "{input}"]},
            "decode": {"program": "sh", "args": ["-c", "mkdir -p \"$2/smali\"", "_", "{input}", "{output}"]},
            "build": {"program": "sh", "args": ["-c",
                "cat \"$1\"/.manipulations/*.json > \"$2\" 2>/dev/null; touch \"$2\"",
                "_", "{input}", "{output}"]},
        }
    });
    let config_path = root.path().join("config.json");
    std::fs::write(&config_path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    let results = root.path().join("results.json");

    apk_evasion(&home)
        .arg("attack")
        .arg(&malware)
        .arg("--goodware")
        .arg(&goodware)
        .arg("--config")
        .arg(&config_path)
        .arg("--output")
        .arg(&results)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 evaded"));

    let records: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&results).unwrap()).unwrap();
    let record = &records[0];
    assert_eq!(record["outcome"], "evaded");
    assert_eq!(record["pre_label"], "malicious");
    assert_eq!(record["final_label"], "benign");
    let final_path = record["final_path"].as_str().unwrap();
    assert!(final_path.contains("sample_"));
    assert!(Path::new(final_path).exists());

    assert!(home.join("logs/results.jsonl").exists());
    assert!(home.join("cache/error_free/sample/sample.inject.json").exists());
    assert!(home.join("cache/features/good.json").exists());
}
