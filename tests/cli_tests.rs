//! End-to-end tests of the converge binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn converge_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("converge").unwrap();
    cmd.current_dir(dir)
        .env_remove("CONVERGE_CONFIG")
        .env_remove("CONVERGE_INVENTORY")
        .env_remove("RUST_LOG")
        .arg("--no-color");
    cmd
}

/// A project directory with an inventory and a few playbooks
fn project() -> TempDir {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("hosts.yml"),
        r#"
all:
  vars:
    env: staging
  children:
    webservers:
      hosts:
        web1:
        web2:
    databases:
      hosts:
        db1:
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("ok.yml"),
        r#"
- name: Say hello
  hosts: webservers
  tasks:
    - name: greet
      debug: msg="hello from {{ inventory_hostname }} in {{ env }}"
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("fail.yml"),
        r#"
- name: Break one host
  hosts: all
  tasks:
    - name: boom
      fail: msg="db is down"
      when: inventory_hostname == "db1"
"#,
    )
    .unwrap();
    fs::write(dir.path().join("vault.key"), "cli-secret\n").unwrap();
    dir
}

#[test]
fn test_help() {
    let dir = tempdir().unwrap();
    converge_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list-hosts"))
        .stdout(predicate::str::contains("vault"));
}

#[test]
fn test_unknown_subcommand() {
    let dir = tempdir().unwrap();
    converge_cmd(dir.path()).arg("frobnicate").assert().failure();
}

#[test]
fn test_list_hosts() {
    let dir = project();
    converge_cmd(dir.path())
        .args(["-i", "hosts.yml", "list-hosts", "all:!databases"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hosts (2):"))
        .stdout(predicate::str::contains("web1"))
        .stdout(predicate::str::contains("db1").not());
}

#[test]
fn test_list_hosts_json_with_vars() {
    let dir = project();
    let output = converge_cmd(dir.path())
        .args(["-i", "hosts.yml", "--output", "json", "list-hosts", "db1", "--vars"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let vars: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(vars["db1"]["env"], "staging");
    assert_eq!(vars["db1"]["inventory_hostname"], "db1");
}

#[test]
fn test_unknown_group_is_an_error() {
    let dir = project();
    converge_cmd(dir.path())
        .args(["-i", "hosts.yml", "list-hosts", "nowhere"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nowhere"));
}

#[test]
fn test_run_success() {
    let dir = project();
    converge_cmd(dir.path())
        .args(["-i", "hosts.yml", "run", "ok.yml"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("PLAY [Say hello]"))
        .stdout(predicate::str::contains("hello from web2 in staging"))
        .stdout(predicate::str::contains("PLAY RECAP"));
}

#[test]
fn test_run_with_failed_host_exits_2() {
    let dir = project();
    converge_cmd(dir.path())
        .args(["-i", "hosts.yml", "run", "fail.yml"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("db is down"));
}

#[test]
fn test_run_json_report() {
    let dir = project();
    let output = converge_cmd(dir.path())
        .args(["-i", "hosts.yml", "--output", "json", "-e", "env=prod", "run", "ok.yml"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let web1 = &report["plays"][0]["hosts"]["web1"];
    assert_eq!(web1["state"], "completed");
    assert_eq!(web1["results"][0]["msg"], "hello from web1 in prod");
    assert_eq!(report["cancelled"], false);
}

#[test]
fn test_run_limit() {
    let dir = project();
    converge_cmd(dir.path())
        .args(["-i", "hosts.yml", "--limit", "web1", "run", "fail.yml"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("web2").not());
}

#[test]
fn test_missing_inventory_exits_1() {
    let dir = project();
    converge_cmd(dir.path())
        .args(["-i", "absent.yml", "run", "ok.yml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("absent.yml"));
}

#[test]
fn test_missing_playbook_exits_1() {
    let dir = project();
    converge_cmd(dir.path())
        .args(["-i", "hosts.yml", "run", "absent.yml"])
        .assert()
        .code(1);
}

#[test]
fn test_vault_encrypt_and_view() {
    let dir = project();
    fs::write(dir.path().join("secrets.yml"), "db_password: hunter2\n").unwrap();

    converge_cmd(dir.path())
        .args(["--vault-password-file", "vault.key", "vault", "encrypt", "secrets.yml"])
        .assert()
        .success();
    let stored = fs::read_to_string(dir.path().join("secrets.yml")).unwrap();
    assert!(stored.starts_with("$CONVERGE_VAULT;1.1;AES256-GCM"));
    assert!(!stored.contains("hunter2"));

    converge_cmd(dir.path())
        .args(["--vault-password-file", "vault.key", "vault", "view", "secrets.yml"])
        .assert()
        .success()
        .stdout("db_password: hunter2\n");
}

#[test]
fn test_vault_wrong_key_exits_3() {
    let dir = project();
    fs::write(dir.path().join("secret.txt"), "classified").unwrap();
    converge_cmd(dir.path())
        .args(["--vault-password-file", "vault.key", "vault", "encrypt", "secret.txt"])
        .assert()
        .success();

    fs::write(dir.path().join("other.key"), "not-it\n").unwrap();
    converge_cmd(dir.path())
        .args(["--vault-password-file", "other.key", "vault", "view", "secret.txt"])
        .assert()
        .code(3);
}

#[test]
fn test_encrypted_variable_used_in_run() {
    let dir = project();
    let blob = {
        let output = converge_cmd(dir.path())
            .args([
                "--vault-password-file",
                "vault.key",
                "vault",
                "encrypt-string",
                "s3cret",
                "-n",
                "api_token",
            ])
            .output()
            .unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap()
    };
    assert!(blob.starts_with("api_token: !vault |"));

    fs::write(
        dir.path().join("uses_secret.yml"),
        format!(
            r#"
- hosts: db1
  vars:
{}
  tasks:
    - name: show token length
      debug: msg="{{{{ api_token | length }}}}"
"#,
            blob.lines()
                .map(|l| format!("    {}", l))
                .collect::<Vec<_>>()
                .join("\n")
        ),
    )
    .unwrap();

    converge_cmd(dir.path())
        .args([
            "-i",
            "hosts.yml",
            "--vault-password-file",
            "vault.key",
            "run",
            "uses_secret.yml",
        ])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("=> 6"));
}
