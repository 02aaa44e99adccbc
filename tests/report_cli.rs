use std::{
    fs,
    path::Path,
    process::{Command, Output},
};

use capsulemon::store::{MessageStore, NewMessage};
use chrono::{TimeZone as _, Utc};
use tempfile::tempdir;

const ACCESS_LOG: &str = "\
2022-04-20T12:06:00Z 127.0.0.1 20 gemini://example.org/index.gmi
2022-04-20T12:07:00Z 127.0.0.1 20 gemini://example.org/gemlog/posts/2022-test.gmi
this line is not a log record
2022-04-20T12:08:00Z 10.0.0.2 44 gemini://example.org/index.gmi
2022-04-20T12:09:00Z 10.0.0.2 51 gemini://example.org/missing.gmi
2022-04-20T12:10:00Z 10.0.0.3 20 gemini://example.org/remini/status
2022-05-02T08:00:00Z 10.0.0.4 20 gemini://example.org/index.gmi
";

const ERROR_LOG: &str = "\
2022/04/20 12:08:00 Too many requests from 10.0.0.2
2022/05/02 08:00:01 Error reading request
";

fn run_capsulemon(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_capsulemon"))
        .args(args)
        .env("HOME", cwd)
        .env_remove("XDG_DATA_HOME")
        .env_remove("XDG_STATE_HOME")
        .env_remove("XDG_RUNTIME_DIR")
        .current_dir(cwd)
        .output()
        .expect("capsulemon command should execute")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "expected success\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn write_project(dir: &Path, include_messages: bool) {
    fs::create_dir_all(dir.join("logs")).expect("log dir should be created");
    fs::write(dir.join("logs/access.log"), ACCESS_LOG).expect("access log should be written");
    fs::write(dir.join("logs/error.log"), ERROR_LOG).expect("error log should be written");
    fs::write(
        dir.join("capsulemon.toml"),
        format!(
            r#"
[capsule]
name = "example.org"

[storage]
path = "data/contact.db"

[logs]
access = "logs/access.log"
error = "logs/error.log"

[report]
include_messages = {include_messages}
"#
        ),
    )
    .expect("config should be written");
}

#[test]
fn report_prints_traffic_for_the_requested_period() {
    let sandbox = tempdir().expect("tempdir should be created");
    write_project(sandbox.path(), false);

    let output = run_capsulemon(
        &[
            "report",
            "--since",
            "2022-04-20",
            "--until",
            "2022-04-21",
            "--log-level",
            "off",
        ],
        sandbox.path(),
    );
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(
        lines[0].starts_with("# Report for example.org at "),
        "stdout:\n{stdout}"
    );
    assert_eq!(
        lines[1],
        "Period from 2022-04-20 00:00:00 UTC to 2022-04-21 00:00:00 UTC."
    );
    for expected in [
        "Total requests: 4",
        "Unique IPs: 2",
        "Total errors: 1",
        "* 20 (SUCCESS): 2 (50.00%)",
        "* 44 (SLOW DOWN): 1 (25.00%)",
        "* 51 (NOT FOUND): 1 (25.00%)",
        "* /index.gmi (1 hits)",
        "Total visits: 1",
        "* /gemlog/posts/2022-test.gmi (1 hits)",
    ] {
        assert!(lines.contains(&expected), "missing `{expected}` in:\n{stdout}");
    }
    assert!(!stdout.contains("remini"), "stdout:\n{stdout}");
    assert!(!stdout.contains("## Messages"), "stdout:\n{stdout}");
}

#[test]
fn report_counts_messages_and_writes_output_file() {
    let sandbox = tempdir().expect("tempdir should be created");
    write_project(sandbox.path(), true);

    let store = MessageStore::open(sandbox.path().join("data/contact.db"))
        .expect("store should open");
    for (day, read) in [(19, false), (20, true), (20, false), (22, false)] {
        let id = store
            .insert(&NewMessage {
                script_path: "/contact".to_owned(),
                path_info: String::new(),
                tls_client_hash: String::new(),
                ip_addr: "127.0.0.1".to_owned(),
                time: Utc.with_ymd_and_hms(2022, 4, day, 10, 0, 0).unwrap(),
                message: format!("message from the {day}th"),
            })
            .expect("insert should succeed");
        if read {
            store.mark_read(&[id]).expect("mark read should succeed");
        }
    }
    drop(store);

    let output = run_capsulemon(
        &[
            "report",
            "--since",
            "2022-04-20",
            "--until",
            "2022-04-21",
            "--output",
            "report.gmi",
            "--log-level",
            "off",
        ],
        sandbox.path(),
    );
    assert_success(&output);
    assert!(output.stdout.is_empty());

    let report = fs::read_to_string(sandbox.path().join("report.gmi"))
        .expect("report file should be written");
    let tail: Vec<&str> = report.lines().rev().take(4).collect();
    assert_eq!(
        tail,
        vec![
            "Unread messages: 1",
            "Total messages: 2",
            "",
            "## Messages",
        ]
    );
}

#[test]
fn report_fails_when_access_log_is_missing() {
    let sandbox = tempdir().expect("tempdir should be created");
    write_project(sandbox.path(), false);
    fs::remove_file(sandbox.path().join("logs/access.log")).expect("access log should be removed");

    let output = run_capsulemon(&["report", "--log-level", "off"], sandbox.path());

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("read access log"), "stderr:\n{stderr}");
}
