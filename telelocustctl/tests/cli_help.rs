use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn top_level_help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("telelocustctl");
    let output = cmd
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    for subcommand in ["start", "status", "wait", "download", "run"] {
        assert!(text.contains(subcommand), "help missing '{subcommand}'");
    }
    assert!(text.contains("--server"), "help missing --server");
}

#[test]
fn run_help_mentions_options() {
    let mut cmd = cargo_bin_cmd!("telelocustctl");
    let output = cmd
        .arg("run")
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("--locustfile"), "run help missing --locustfile");
    assert!(text.contains("--interval"), "run help missing --interval");
    assert!(text.contains("--output"), "run help missing --output");
}

#[test]
fn download_offers_partial_flag() {
    let mut cmd = cargo_bin_cmd!("telelocustctl");
    cmd.arg("download")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--partial"));
}

#[test]
fn malformed_token_is_refused_before_any_request() {
    let mut cmd = cargo_bin_cmd!("telelocustctl");
    cmd.args(["--server", "http://127.0.0.1:9", "status", "../../etc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid run token"));
}
