use super::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use clap::error::ErrorKind;
use provision_core::{Severity, Status};

use crate::render::{render_progress_line, render_status_line, OutputStyle};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

const INSTALL_PLAN: &str = r#"
[[operands]]
kind = "install"
[operands.unit]
id = "tool"
version = "1.0.0"
touchpoint = "native"
[[operands.unit.instructions.install]]
action = "mkdir"
args = { path = "tool/bin" }
"#;

const BROKEN_PLAN: &str = r#"
[[operands]]
kind = "install"
[operands.unit]
id = "tool"
version = "1.0.0"
touchpoint = "native"
[[operands.unit.instructions.install]]
action = "mkdir"
args = { path = "made" }
[[operands.unit.instructions.install]]
action = "write"
args = { path = "made/file.txt" }
"#;

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "provision-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("must create test root");
    path
}

fn write_plan(root: &Path, contents: &str) -> PathBuf {
    let path = root.join("plan.toml");
    fs::write(&path, contents).expect("must write plan");
    path
}

fn plain() -> TerminalRenderer {
    TerminalRenderer::from_style(OutputStyle::Plain)
}

#[test]
fn cli_parses_apply_with_flags() {
    let cli = Cli::try_parse_from([
        "provision",
        "--root",
        "/tmp/registry",
        "--plain",
        "apply",
        "main",
        "plan.toml",
        "--phase-set",
        "install",
        "--dry-run",
    ])
    .expect("command must parse");

    assert!(cli.plain);
    assert_eq!(cli.root, PathBuf::from("/tmp/registry"));
    match cli.command {
        Commands::Apply {
            profile,
            plan,
            phase_set,
            dry_run,
            install_root,
        } => {
            assert_eq!(profile, "main");
            assert_eq!(plan, PathBuf::from("plan.toml"));
            assert_eq!(phase_set, "install");
            assert!(dry_run);
            assert!(install_root.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_defaults_phase_set_to_default() {
    let cli = Cli::try_parse_from(["provision", "--root", "r", "apply", "main", "plan.toml"])
        .expect("command must parse");
    match cli.command {
        Commands::Apply { phase_set, .. } => assert_eq!(phase_set, "default"),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_requires_root() {
    let err = Cli::try_parse_from(["provision", "list", "main"])
        .expect_err("missing --root must fail");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn render_status_line_plain_prefixes_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "error", "boom"),
        "error: boom"
    );
}

#[test]
fn render_status_line_rich_uses_ansi_badge() {
    let line = render_status_line(OutputStyle::Rich, "warning", "careful");
    assert!(line.contains("[WARNING]"));
    assert!(line.contains("\u{1b}["));
    assert!(line.ends_with("careful"));
}

#[test]
fn status_lines_indent_children_and_fold_containers() {
    let mut container = Status::ok();
    container.merge(
        Status::new(Severity::Error, "rollback", "rollback completed with errors")
            .with_child(Status::error("native.mkdir", "boom")),
    );
    container.merge(Status::warning("", "left backup in place"));

    let lines = plain().status_lines(&container);
    assert_eq!(
        lines,
        vec![
            "error: rollback: rollback completed with errors".to_string(),
            "  error: native.mkdir: boom".to_string(),
            "warning: left backup in place".to_string(),
        ]
    );
}

#[test]
fn status_lines_report_bare_ok() {
    assert_eq!(plain().status_lines(&Status::ok()), vec!["ok: completed".to_string()]);
}

#[test]
fn progress_line_is_hidden_in_plain_mode() {
    assert!(render_progress_line(OutputStyle::Plain, "apply", 1, 2, None).is_none());
    let line = render_progress_line(OutputStyle::Rich, "apply", 1, 2, None)
        .expect("rich mode renders progress");
    assert!(line.contains(" 50%"));
    assert!(line.contains("1/2"));
}

#[test]
fn init_apply_list_and_history_flow() {
    let root = test_root();
    let install_root = root.join("install");
    let engine =
        build_engine(&root.join("registry"), EngineConfig::default()).expect("must build engine");

    let profile = init_profile(&engine, "main", Some(&install_root)).expect("must init profile");
    assert_eq!(profile.property("install_root"), Some(install_root.to_str().expect("utf-8")));
    assert_eq!(
        list_lines(&engine, "main").expect("must list"),
        vec!["No units installed".to_string()]
    );

    let plan = write_plan(&root, INSTALL_PLAN);
    let status = apply_profile(&engine, "main", &plan, "default", false, None, plain())
        .expect("apply must run");
    assert!(!status.is_failure(), "unexpected failure: {status}");
    assert!(install_root.join("tool/bin").is_dir());

    assert_eq!(
        list_lines(&engine, "main").expect("must list"),
        vec!["tool 1.0.0".to_string()]
    );
    let history = history_lines(&engine, "main").expect("must read history");
    assert_eq!(history.len(), 3);
    assert!(history[2].ends_with("units=1"));
    assert!(history[0].ends_with("units=0"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn apply_dry_run_leaves_filesystem_and_profile_untouched() {
    let root = test_root();
    let install_root = root.join("install");
    let engine =
        build_engine(&root.join("registry"), EngineConfig::default()).expect("must build engine");
    init_profile(&engine, "main", Some(&install_root)).expect("must init profile");

    let plan = write_plan(&root, INSTALL_PLAN);
    let status = apply_profile(&engine, "main", &plan, "default", true, None, plain())
        .expect("dry run must run");
    assert!(!status.is_failure(), "unexpected failure: {status}");
    assert!(!install_root.join("tool").exists());
    assert_eq!(history_lines(&engine, "main").expect("history").len(), 2);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn apply_failure_rolls_back_and_reports_error() {
    let root = test_root();
    let install_root = root.join("install");
    let engine =
        build_engine(&root.join("registry"), EngineConfig::default()).expect("must build engine");
    init_profile(&engine, "main", None).expect("must init profile");

    let plan = write_plan(&root, BROKEN_PLAN);
    let status = apply_profile(
        &engine,
        "main",
        &plan,
        "install",
        false,
        Some(&install_root),
        plain(),
    )
    .expect("apply must run");

    assert!(status.is_failure());
    assert!(!install_root.join("made").exists());
    assert_eq!(
        list_lines(&engine, "main").expect("must list"),
        vec!["No units installed".to_string()]
    );
    assert_eq!(history_lines(&engine, "main").expect("history").len(), 1);

    let lines = plain().status_lines(&status);
    assert!(lines.iter().any(|line| line.starts_with("error: ")));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn apply_rejects_unknown_phase_set() {
    let root = test_root();
    let engine =
        build_engine(&root.join("registry"), EngineConfig::default()).expect("must build engine");
    init_profile(&engine, "main", None).expect("must init profile");
    let plan = write_plan(&root, INSTALL_PLAN);

    let err = apply_profile(&engine, "main", &plan, "deploy", false, None, plain())
        .expect_err("unknown phase set must fail");
    let message = err.to_string();
    assert!(message.contains("unknown phase set 'deploy'"));
    assert!(message.contains("default, install, uninstall, configure"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn apply_and_history_reject_missing_profile() {
    let root = test_root();
    let engine =
        build_engine(&root.join("registry"), EngineConfig::default()).expect("must build engine");
    let plan = write_plan(&root, INSTALL_PLAN);

    let err = apply_profile(&engine, "ghost", &plan, "default", false, None, plain())
        .expect_err("missing profile must fail");
    assert_eq!(err.to_string(), "profile 'ghost' does not exist");
    let err = history_lines(&engine, "ghost").expect_err("missing profile must fail");
    assert_eq!(err.to_string(), "profile 'ghost' does not exist");

    let _ = fs::remove_dir_all(&root);
}
