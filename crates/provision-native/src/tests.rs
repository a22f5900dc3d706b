use super::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use provision_core::{InstallableUnit, Instruction, Operand, Severity};
use provision_engine::{Engine, PhaseSet, ProvisioningContext};
use provision_registry::{FileProfileRegistry, Profile, ProfileRegistry};
use semver::Version;

use crate::actions::parse_mode;
use crate::fs_utils::{backup_dir, validated_relative_path};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

struct Sandbox {
    root: PathBuf,
    engine: Engine<FileProfileRegistry>,
    profile: Profile,
}

impl Sandbox {
    fn new() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        let mut root = std::env::temp_dir();
        root.push(format!(
            "provision-native-tests-{}-{}-{}",
            std::process::id(),
            nanos,
            TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let registry = FileProfileRegistry::open(root.join("registry")).expect("must open registry");
        let profile = registry.add_profile("main").expect("must add profile");
        let mut actions = provision_engine::ActionRegistry::new();
        register(&mut actions);
        Self {
            root,
            engine: Engine::new(registry, actions),
            profile,
        }
    }

    fn target(&self) -> PathBuf {
        self.root.join("target")
    }

    fn context(&self) -> ProvisioningContext {
        ProvisioningContext::new().with_property(INSTALL_ROOT, self.target().display().to_string())
    }

    fn data_dir(&self) -> PathBuf {
        self.engine
            .registry()
            .profile_data_dir("main")
            .expect("must resolve data dir")
    }

    fn install(&mut self, unit: InstallableUnit) -> provision_core::Status {
        let context = self.context();
        self.engine
            .perform(
                &mut self.profile,
                &PhaseSet::install_set(),
                &[Operand::install(unit)],
                Some(&context),
                None,
            )
            .expect("must perform")
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn tool() -> InstallableUnit {
    InstallableUnit::new("tool", Version::parse("1.0.0").expect("valid version"))
        .with_touchpoint(NATIVE_TOUCHPOINT)
}

fn install_payload(source: &Path) -> InstallableUnit {
    tool()
        .with_instruction("install", Instruction::new("mkdir").with_arg("path", "bin"))
        .with_instruction(
            "install",
            Instruction::new("mkdir").with_arg("path", "share/doc"),
        )
        .with_instruction(
            "install",
            Instruction::new("write")
                .with_arg("path", "etc/config.txt")
                .with_arg("content", "new"),
        )
        .with_instruction(
            "install",
            Instruction::new("copy")
                .with_arg("source", source.display().to_string())
                .with_arg("target", "share/doc/readme"),
        )
}

fn seed(sandbox: &Sandbox) -> PathBuf {
    fs::create_dir_all(sandbox.target().join("etc")).expect("must create etc");
    fs::write(sandbox.target().join("etc/config.txt"), "old").expect("must write config");
    let source = sandbox.root.join("payload/readme");
    fs::create_dir_all(source.parent().expect("payload dir")).expect("must create payload dir");
    fs::write(&source, "read me").expect("must write payload");
    source
}

#[test]
fn install_applies_filesystem_actions_and_drops_backups() {
    let mut sandbox = Sandbox::new();
    let source = seed(&sandbox);

    let status = sandbox.install(install_payload(&source));

    assert_eq!(status.severity(), Severity::Ok);
    let target = sandbox.target();
    assert!(target.join("bin").is_dir());
    assert_eq!(
        fs::read_to_string(target.join("share/doc/readme")).expect("must read copy"),
        "read me"
    );
    assert_eq!(
        fs::read_to_string(target.join("etc/config.txt")).expect("must read config"),
        "new"
    );
    assert!(!backup_dir(&sandbox.data_dir()).exists());
    assert!(sandbox.profile.unit_version("tool").is_some());
}

#[test]
fn failed_install_restores_the_filesystem() {
    let mut sandbox = Sandbox::new();
    let source = seed(&sandbox);
    let unit = install_payload(&source).with_instruction(
        "configure",
        Instruction::new("write")
            .with_arg("path", "missing/dir/file.txt")
            .with_arg("content", "never"),
    );

    let status = sandbox.install(unit);

    assert_eq!(status.severity(), Severity::Error);
    assert!(status.find_by_source("native.write").is_some());
    let target = sandbox.target();
    assert!(!target.join("bin").exists());
    assert!(!target.join("share").exists());
    assert_eq!(
        fs::read_to_string(target.join("etc/config.txt")).expect("must read config"),
        "old"
    );
    assert!(!backup_dir(&sandbox.data_dir()).exists());
    assert!(sandbox.profile.units().is_empty());
}

#[test]
fn remove_is_undone_from_backup() {
    let mut sandbox = Sandbox::new();
    seed(&sandbox);
    let unit = tool()
        .with_instruction(
            "install",
            Instruction::new("remove").with_arg("path", "etc/config.txt"),
        )
        .with_instruction(
            "configure",
            Instruction::new("rmdir").with_arg("path", "no/such/dir"),
        )
        .with_instruction(
            "configure",
            Instruction::new("chmod")
                .with_arg("path", "etc")
                .with_arg("mode", "9"),
        );

    let status = sandbox.install(unit);

    assert_eq!(status.severity(), Severity::Error);
    assert!(status.find_by_source("native.chmod").is_some());
    assert_eq!(
        fs::read_to_string(sandbox.target().join("etc/config.txt")).expect("must read config"),
        "old"
    );
}

#[cfg(unix)]
#[test]
fn link_and_chmod_are_reverted_on_failure() {
    use std::os::unix::fs::PermissionsExt;

    let mut sandbox = Sandbox::new();
    seed(&sandbox);
    let config = sandbox.target().join("etc/config.txt");
    fs::set_permissions(&config, fs::Permissions::from_mode(0o644)).expect("must set mode");
    let unit = tool()
        .with_instruction(
            "install",
            Instruction::new("link")
                .with_arg("target", "etc/config.txt")
                .with_arg("link", "config-link"),
        )
        .with_instruction(
            "install",
            Instruction::new("chmod")
                .with_arg("path", "etc/config.txt")
                .with_arg("mode", "600"),
        )
        .with_instruction("configure", Instruction::new("explode"));

    let status = sandbox.install(unit);

    assert_eq!(status.severity(), Severity::Error);
    assert!(fs::symlink_metadata(sandbox.target().join("config-link")).is_err());
    let mode = fs::metadata(&config).expect("must stat").permissions().mode() & 0o7777;
    assert_eq!(mode, 0o644);
}

#[test]
fn failed_install_leaves_no_install_root_behind() {
    let mut sandbox = Sandbox::new();
    let unit = tool()
        .with_instruction("install", Instruction::new("mkdir").with_arg("path", "bin"))
        .with_instruction("configure", Instruction::new("explode"));

    let status = sandbox.install(unit);

    assert_eq!(status.severity(), Severity::Error);
    assert!(!sandbox.target().exists());
}

#[test]
fn rmdir_undo_recreates_removed_directories_in_order() {
    let mut sandbox = Sandbox::new();
    seed(&sandbox);
    let nested = sandbox.target().join("a/b");
    fs::create_dir_all(&nested).expect("must create nested dir");
    let unit = tool()
        .with_instruction("install", Instruction::new("rmdir").with_arg("path", "a/b"))
        .with_instruction("install", Instruction::new("rmdir").with_arg("path", "a"))
        .with_instruction("configure", Instruction::new("explode"));

    let status = sandbox.install(unit);

    assert_eq!(status.severity(), Severity::Error);
    assert!(nested.is_dir());
}

#[test]
fn relative_paths_need_an_install_root() {
    let mut sandbox = Sandbox::new();
    let unit = tool().with_instruction("install", Instruction::new("mkdir").with_arg("path", "bin"));

    let status = sandbox
        .engine
        .perform(
            &mut sandbox.profile,
            &PhaseSet::install_set(),
            &[Operand::install(unit)],
            None,
            None,
        )
        .expect("must perform");

    assert_eq!(status.severity(), Severity::Error);
    let cause = status.find_by_source("native.mkdir").expect("mkdir failure");
    assert!(cause.message().contains("requires the 'install_root' property"));
}

#[test]
fn install_root_falls_back_to_profile_property() {
    let mut sandbox = Sandbox::new();
    let target = sandbox.target();
    sandbox
        .profile
        .set_property(INSTALL_ROOT, target.display().to_string());
    sandbox
        .engine
        .registry()
        .update_profile(&mut sandbox.profile)
        .expect("must persist property");
    let unit = tool().with_instruction("install", Instruction::new("mkdir").with_arg("path", "bin"));

    let status = sandbox
        .engine
        .perform(
            &mut sandbox.profile,
            &PhaseSet::install_set(),
            &[Operand::install(unit)],
            None,
            None,
        )
        .expect("must perform");

    assert!(!status.is_failure());
    assert!(target.join("bin").is_dir());
}

#[test]
fn validation_reports_bad_arguments_without_touching_disk() {
    let sandbox = Sandbox::new();
    let unit = tool()
        .with_instruction("install", Instruction::new("write").with_arg("path", "a.txt"))
        .with_instruction(
            "install",
            Instruction::new("chmod")
                .with_arg("path", "a.txt")
                .with_arg("mode", "rwx"),
        )
        .with_instruction(
            "install",
            Instruction::new("mkdir").with_arg("path", "../escape"),
        );

    let status = sandbox
        .engine
        .validate(&sandbox.profile, &PhaseSet::install_set(), &[Operand::install(unit)])
        .expect("must validate");

    assert_eq!(status.severity(), Severity::Error);
    assert_eq!(status.children().len(), 3);
    assert!(status.find_by_source("native.write").is_some());
    assert!(status.find_by_source("native.chmod").is_some());
    assert!(status.find_by_source("native.mkdir").is_some());
    assert!(!sandbox.target().exists());
}

#[test]
fn modes_parse_as_octal() {
    assert_eq!(parse_mode("755").expect("must parse"), 0o755);
    assert_eq!(parse_mode("0o600").expect("must parse"), 0o600);
    assert!(parse_mode("9").is_err());
    assert!(parse_mode("77777").is_err());
}

#[test]
fn relative_paths_reject_parent_components() {
    assert!(validated_relative_path("bin/tool").is_ok());
    assert!(validated_relative_path("").is_err());
    assert!(validated_relative_path("bin/../../etc").is_err());
}
