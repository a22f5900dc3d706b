use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use provision_core::{ChangePlan, Status};
use provision_engine::{ActionRegistry, Engine, EngineConfig, PhaseSet, ProvisioningContext};
use provision_native::INSTALL_ROOT;
use provision_registry::{FileProfileRegistry, Profile, ProfileRegistry};
use tracing::debug;

use crate::render::TerminalRenderer;

const PHASE_SET_NAMES: &[&str] = &["default", "install", "uninstall", "configure"];

pub(crate) fn build_engine(root: &Path, config: EngineConfig) -> Result<Engine<FileProfileRegistry>> {
    let registry = FileProfileRegistry::open(root)
        .with_context(|| format!("failed to open profile registry at {}", root.display()))?;
    let mut actions = ActionRegistry::new();
    provision_native::register(&mut actions);
    Ok(Engine::new(registry, actions).with_config(config))
}

pub(crate) fn init_profile(
    engine: &Engine<FileProfileRegistry>,
    id: &str,
    install_root: Option<&Path>,
) -> Result<Profile> {
    let mut profile = engine.registry().add_profile(id)?;
    if let Some(install_root) = install_root {
        let install_root = absolute_path(install_root)?;
        profile.set_property(INSTALL_ROOT, install_root.display().to_string());
        engine
            .registry()
            .update_profile(&mut profile)
            .with_context(|| format!("failed to record install root for profile '{id}'"))?;
        profile.clear_changed();
    }
    Ok(profile)
}

pub(crate) fn apply_profile(
    engine: &Engine<FileProfileRegistry>,
    id: &str,
    plan_path: &Path,
    phase_set_name: &str,
    dry_run: bool,
    install_root: Option<&Path>,
    renderer: TerminalRenderer,
) -> Result<Status> {
    let mut profile = load_profile(engine, id)?;
    let raw = fs::read_to_string(plan_path)
        .with_context(|| format!("failed to read change plan: {}", plan_path.display()))?;
    let plan = ChangePlan::from_toml_str(&raw)
        .with_context(|| format!("invalid change plan: {}", plan_path.display()))?;
    let phase_set = PhaseSet::by_name(phase_set_name).ok_or_else(|| {
        anyhow!(
            "unknown phase set '{phase_set_name}' (expected one of: {})",
            PHASE_SET_NAMES.join(", ")
        )
    })?;
    debug!(
        profile = id,
        phase_set = phase_set_name,
        operands = plan.operands.len(),
        dry_run,
        "applying change plan"
    );

    if dry_run {
        return Ok(engine.validate(&profile, &phase_set, &plan.operands)?);
    }

    let mut context = ProvisioningContext::new();
    if let Some(install_root) = install_root {
        context.set_property(INSTALL_ROOT, absolute_path(install_root)?.display().to_string());
    }

    let progress = renderer.start_progress(&format!("apply {id}"));
    let outcome = engine.perform(
        &mut profile,
        &phase_set,
        &plan.operands,
        Some(&context),
        Some(&progress),
    );
    if let Some(line) = progress.finish() {
        eprintln!("{line}");
    }
    Ok(outcome?)
}

pub(crate) fn list_lines(engine: &Engine<FileProfileRegistry>, id: &str) -> Result<Vec<String>> {
    let profile = load_profile(engine, id)?;
    let mut lines = profile
        .units()
        .iter()
        .map(|(unit, version)| format!("{unit} {version}"))
        .collect::<Vec<_>>();
    if lines.is_empty() {
        lines.push("No units installed".to_string());
    }
    Ok(lines)
}

pub(crate) fn history_lines(engine: &Engine<FileProfileRegistry>, id: &str) -> Result<Vec<String>> {
    let timestamps = engine.registry().list_snapshots(id)?;
    if timestamps.is_empty() {
        return Err(anyhow!("profile '{id}' does not exist"));
    }
    timestamps
        .into_iter()
        .map(|timestamp| -> Result<String> {
            let snapshot = engine.registry().load_snapshot(id, timestamp)?;
            Ok(format!("{timestamp} units={}", snapshot.units().len()))
        })
        .collect()
}

fn load_profile(engine: &Engine<FileProfileRegistry>, id: &str) -> Result<Profile> {
    engine
        .registry()
        .get_profile(id)?
        .ok_or_else(|| anyhow!("profile '{id}' does not exist"))
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    Ok(cwd.join(path))
}
