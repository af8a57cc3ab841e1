use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct CliFixture {
    _tmp: TempDir,
    home_dir: PathBuf,
    store: PathBuf,
    source: PathBuf,
    work: PathBuf,
}

impl CliFixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let home_dir = tmp.path().join("home");
        let store = tmp.path().join("store");
        let source = tmp.path().join("source");
        let work = tmp.path().join("work");

        fs::create_dir_all(&home_dir).unwrap();
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&work).unwrap();

        Self {
            _tmp: tmp,
            home_dir,
            store,
            source,
            work,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("chainback").unwrap();
        cmd.current_dir(&self.work);
        cmd.env("HOME", &self.home_dir);
        cmd.env_remove("CHAINBACK_ROOT");
        cmd.env_remove("RUST_LOG");
        cmd.arg("--output").arg(&self.store);
        cmd
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.source.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
    }

    /// Run `create` on the source and return the new backup id
    fn create(&self) -> String {
        let output = self
            .cmd()
            .arg("create")
            .arg(&self.source)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        first_token(&String::from_utf8(output).unwrap())
    }
}

fn first_token(stdout: &str) -> String {
    stdout
        .split_whitespace()
        .next()
        .expect("create printed nothing")
        .to_string()
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn list_on_fresh_root_reports_nothing() {
    let fx = CliFixture::new();
    fx.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups found"));
}

#[test]
fn create_list_restore_round_trip() {
    let fx = CliFixture::new();
    fx.write("a.txt", "alpha");
    fx.write("nested/b.txt", "beta");

    let id = fx.create();
    assert_eq!(id.len(), 8);

    fx.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("BACKUP ID"))
        .stdout(predicate::str::contains("full"));

    let dest = fx.work.join("out");
    fx.cmd()
        .args(["restore", &id, "--to"])
        .arg(&dest)
        .assert()
        .success();

    assert_eq!(read(&dest.join("a.txt")), "alpha");
    assert_eq!(read(&dest.join("nested/b.txt")), "beta");
}

#[test]
fn restore_defaults_to_directory_named_after_id() {
    let fx = CliFixture::new();
    fx.write("a.txt", "alpha");
    let id = fx.create();

    fx.cmd().args(["restore", &id]).assert().success();

    assert_eq!(
        read(&fx.work.join(format!("restore-{}", id)).join("a.txt")),
        "alpha"
    );
}

#[test]
fn deleted_file_is_absent_after_restore() {
    let fx = CliFixture::new();
    fx.write("a.txt", "1");
    fx.create();

    fx.write("a.txt", "2");
    fx.write("b.txt", "3");
    fx.create();

    fs::remove_file(fx.source.join("a.txt")).unwrap();
    let last = fx.create();

    let dest = fx.work.join("dst");
    fx.cmd()
        .args(["restore", &last, "--to"])
        .arg(&dest)
        .assert()
        .success();

    assert!(!dest.join("a.txt").exists());
    assert_eq!(read(&dest.join("b.txt")), "3");
}

#[test]
fn second_create_without_changes_logs_nothing_new() {
    let fx = CliFixture::new();
    fx.write("a.txt", "1");
    fx.create();

    fx.cmd()
        .arg("create")
        .arg(&fx.source)
        .assert()
        .success()
        .stdout(predicate::str::contains("incremental"))
        .stderr(predicate::str::contains("No files have been added or updated"));
}

#[test]
fn missing_source_alongside_good_one_exits_three() {
    let fx = CliFixture::new();
    fx.write("a.txt", "1");

    fx.cmd()
        .arg("create")
        .arg(&fx.source)
        .arg(fx.work.join("does-not-exist"))
        .assert()
        .code(3)
        .stdout(predicate::str::contains("FAILED"));

    fx.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("full"));
}

#[test]
fn only_missing_sources_exits_one() {
    let fx = CliFixture::new();
    fx.cmd()
        .arg("create")
        .arg(fx.work.join("does-not-exist"))
        .assert()
        .code(1);
}

#[test]
fn malformed_id_is_invalid_argument() {
    let fx = CliFixture::new();
    fx.cmd()
        .args(["restore", "not-an-id"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn missing_arguments_exit_two() {
    let fx = CliFixture::new();
    fx.cmd().arg("create").assert().code(2);
    fx.cmd().arg("rm").assert().code(2);
}

#[test]
fn unknown_id_fails_with_message() {
    let fx = CliFixture::new();
    fx.cmd()
        .args(["rm", "0000abcd"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("0000abcd"));
}

#[test]
fn rm_with_dependents_needs_all() {
    let fx = CliFixture::new();
    fx.write("a.txt", "1");
    let first = fx.create();
    fx.create();

    fx.cmd()
        .args(["rm", &first])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("dependent"));

    fx.cmd()
        .args(["rm", &first, "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 2 backup(s)"));

    fx.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups found"));
}

#[test]
fn restore_refuses_non_empty_destination() {
    let fx = CliFixture::new();
    fx.write("a.txt", "1");
    let id = fx.create();

    let dest = fx.work.join("busy");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("mine.txt"), "keep").unwrap();

    fx.cmd()
        .args(["restore", &id, "--to"])
        .arg(&dest)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not empty"));

    fx.cmd()
        .args(["restore", &id, "--overwrite", "--to"])
        .arg(&dest)
        .assert()
        .success();
    assert_eq!(read(&dest.join("a.txt")), "1");
    assert_eq!(read(&dest.join("mine.txt")), "keep");
}

#[test]
fn verify_flags_tampered_artifact() {
    let fx = CliFixture::new();
    fx.write("a.txt", "1");
    let id = fx.create();

    fx.cmd()
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("No problems found"));

    fs::write(fx.store.join("archives").join(format!("{}.tar.gz", id)), "x").unwrap();

    fx.cmd()
        .arg("verify")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("checksum"));
}

#[test]
fn verbose_logs_each_added_file() {
    let fx = CliFixture::new();
    fx.write("a.txt", "1");

    fx.cmd()
        .arg("--verbose")
        .arg("create")
        .arg(&fx.source)
        .assert()
        .success()
        .stderr(predicate::str::contains("added a.txt"));
}

#[cfg(unix)]
#[test]
fn unreadable_entry_in_source_exits_three() {
    let fx = CliFixture::new();
    fx.write("a.txt", "1");
    std::os::unix::fs::symlink(fx.work.join("nowhere"), fx.source.join("broken")).unwrap();
    fs::create_dir_all(&fx.store).unwrap();
    fs::write(fx.store.join("config.json"), r#"{"symlink_policy": "follow"}"#).unwrap();

    fx.cmd()
        .arg("create")
        .arg(&fx.source)
        .assert()
        .code(3)
        .stdout(predicate::str::contains("1 unreadable"))
        .stdout(predicate::str::contains("skipped"));

    fx.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("full"));
}

#[test]
fn create_past_its_timeout_is_cancelled_without_artifacts() {
    let fx = CliFixture::new();
    fx.write("a.txt", "1");

    fx.cmd()
        .args(["create", "--timeout", "0"])
        .arg(&fx.source)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED"))
        .stdout(predicate::str::contains("cancelled"));

    let archives = fx.store.join("archives");
    let left = fs::read_dir(&archives).map(|d| d.count()).unwrap_or(0);
    assert_eq!(left, 0);
}
