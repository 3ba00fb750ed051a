use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// A GET with one query parameter previews the six text mutations for it.
#[test]
fn test_single_url_dry_run() {
    cargo_bin_cmd!("mutaprobe")
        .args(&["http://api.example.com/items?page=1", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[DRY RUN] Would test GET http://api.example.com/items?page=1 with 6 mutation(s)",
        ))
        .stdout(predicate::str::contains("query.page"));
}

/// A JSON payload expands into per-field mutations.
#[test]
fn test_payload_dry_run_lists_fields() {
    cargo_bin_cmd!("mutaprobe")
        .args(&[
            "http://api.example.com/users",
            "-X",
            "post",
            "-d",
            r#"{"name":"Alice","age":30}"#,
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] Would test POST http://api.example.com/users"))
        .stdout(predicate::str::contains("missing_field"))
        .stdout(predicate::str::contains("negative_number"))
        .stdout(predicate::str::contains("age"));
}

/// List file with --dry-run should process every line.
#[test]
fn test_list_file_dry_run() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "http://target1.com/a").unwrap();
    writeln!(file, "# skipped").unwrap();
    writeln!(file, "http://target2.com/b").unwrap();

    let path = file.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("mutaprobe")
        .args(&["-l", &path, "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded 2 target(s)"))
        .stdout(predicate::str::contains("[DRY RUN] Would test GET http://target1.com/a"))
        .stdout(predicate::str::contains("[DRY RUN] Would test GET http://target2.com/b"));
}

/// A request file supplies the whole test.
#[test]
fn test_config_file_dry_run() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"url":"https://api.example.com/orders","method":"PUT","payload":{{"qty":2}},"timeout":2000}}"#
    )
    .unwrap();
    let path = file.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("mutaprobe")
        .args(&["--config", &path, "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] Would test PUT https://api.example.com/orders"))
        .stdout(predicate::str::contains("large_number"));
}

/// Unsupported schemes are reported instead of expanded.
#[test]
fn test_dry_run_reports_invalid_scheme() {
    cargo_bin_cmd!("mutaprobe")
        .args(&["ftp://files.example.com/x", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] Invalid test for ftp://files.example.com/x"));
}

#[test]
fn test_unknown_method_rejected() {
    cargo_bin_cmd!("mutaprobe")
        .args(&["http://api.example.com", "-X", "TRACE", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported HTTP method"));
}

#[test]
fn test_invalid_payload_rejected() {
    cargo_bin_cmd!("mutaprobe")
        .args(&["http://api.example.com", "-d", "{not json", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--data is not valid JSON"));
}

/// Running with no arguments should fail (clap requires a url, --config or -l).
#[test]
fn test_no_args_shows_error() {
    cargo_bin_cmd!("mutaprobe").assert().failure();
}

/// A bad line in a list file is reported and the remaining targets still run.
#[test]
fn test_list_continues_past_invalid_target() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "not a url").unwrap();
    writeln!(file, "http://127.0.0.1:9/api").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("report.json");

    cargo_bin_cmd!("mutaprobe")
        .args(&[
            "-l",
            &path,
            "--no-progress",
            "--timeout",
            "1000",
            "-o",
            out.to_str().unwrap(),
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid URL 'not a url'"))
        .stdout(predicate::str::contains("Target 2/2: http://127.0.0.1:9/api"))
        .stderr(predicate::str::contains("Target unreachable"));
}
