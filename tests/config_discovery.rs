use std::{
    ffi::OsStr,
    fs,
    path::Path,
    process::{Command, Output},
};

use tempfile::tempdir;

fn write_valid_config(path: &Path, db_path: &Path) {
    let config = format!(
        r#"
[capsule]
name = "example.org"

[storage]
path = "{}"
"#,
        db_path.display()
    );
    fs::write(path, config).expect("config should be written");
}

fn run_capsulemon<I, S>(args: I, cwd: &Path, home: &Path) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_capsulemon"))
        .args(args)
        .env("HOME", home)
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

#[test]
fn config_discovery_prefers_project_then_home_then_override() {
    let sandbox = tempdir().expect("tempdir should be created");
    let project_dir = sandbox.path().join("project");
    let home_dir = sandbox.path().join("home");
    let storage_dir = sandbox.path().join("storage");
    fs::create_dir_all(&project_dir).expect("project dir should be created");
    fs::create_dir_all(home_dir.join(".capsulemon")).expect("home config dir should be created");

    let project_config = project_dir.join("capsulemon.toml");
    let home_config = home_dir.join(".capsulemon").join("config.toml");
    let override_config = sandbox.path().join("override.toml");

    write_valid_config(&project_config, &storage_dir.join("project.db"));
    fs::write(
        &home_config,
        r#"
[storage]
unknown_key = "invalid"
"#,
    )
    .expect("home config should be written");

    let prefers_project = run_capsulemon(["messages", "count"], &project_dir, &home_dir);
    assert_success(&prefers_project);
    assert_eq!(String::from_utf8_lossy(&prefers_project.stdout), "0 messages.\n");
    assert!(storage_dir.join("project.db").exists());

    fs::remove_file(&project_config).expect("project config should be removed");
    write_valid_config(&home_config, &storage_dir.join("home.db"));

    let falls_back_to_home = run_capsulemon(["messages", "count"], &project_dir, &home_dir);
    assert_success(&falls_back_to_home);
    assert!(storage_dir.join("home.db").exists());

    fs::write(
        &project_config,
        r#"
[report]
internal_prefix = "remini"
"#,
    )
    .expect("project config should be rewritten as invalid");
    write_valid_config(&override_config, &storage_dir.join("override.db"));

    let without_override = run_capsulemon(["messages", "count"], &project_dir, &home_dir);
    assert!(
        !without_override.status.success(),
        "expected failure without override\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&without_override.stdout),
        String::from_utf8_lossy(&without_override.stderr)
    );
    assert!(
        String::from_utf8_lossy(&without_override.stderr).contains("project ./capsulemon.toml"),
        "stderr should indicate the project source\nstderr:\n{}",
        String::from_utf8_lossy(&without_override.stderr)
    );

    let with_override = run_capsulemon(
        [
            OsStr::new("messages"),
            OsStr::new("--config"),
            override_config.as_os_str(),
            OsStr::new("count"),
        ],
        &project_dir,
        &home_dir,
    );
    assert_success(&with_override);
    assert!(storage_dir.join("override.db").exists());
}

#[test]
fn defaults_place_database_under_home_data_dir() {
    let sandbox = tempdir().expect("tempdir should be created");
    let home_dir = sandbox.path().join("home");
    fs::create_dir_all(&home_dir).expect("home dir should be created");

    let output = run_capsulemon(["messages", "count", "--unread"], sandbox.path(), &home_dir);

    assert_success(&output);
    assert_eq!(String::from_utf8_lossy(&output.stdout), "0 messages.\n");
    assert!(
        home_dir
            .join(".local/share/capsulemon/contact.db")
            .exists()
    );
}
