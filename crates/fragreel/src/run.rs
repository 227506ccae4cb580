use std::path::Path;

use anyhow::{bail, Context, Result};
use renderer::{
    export_still, render_video, run_preview, CancellationToken, GpuContext, GpuProgramBackend,
    PreviewConfig, RenderState, ShaderProgramManager,
};
use tracing_subscriber::EnvFilter;

use crate::catalog::Catalog;
use crate::cli::RunArgs;
use crate::config::Settings;
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Built-in defaults, then the settings file, then command-line flags.
pub fn resolve_settings(args: &RunArgs) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => {
            let paths = AppPaths::discover()?;
            tracing::debug!(config = %paths.config_dir().display(), "resolved fragreel paths");
            Settings::load_or_default(&paths.config_file())?
        }
    };
    settings.apply_args(args);
    Ok(settings)
}

pub fn run(args: RunArgs) -> Result<()> {
    let settings = resolve_settings(&args)?;
    let mut catalog = Catalog::scan(&settings.shader_dir);
    let initial_entry = match &args.shader {
        Some(query) => catalog.locate(query)?,
        None => 0,
    };

    if let Some(path) = &args.still {
        return run_still(&settings, &catalog, initial_entry, args.time, path);
    }
    if args.headless {
        return run_headless(&settings, &catalog, initial_entry);
    }

    tracing::info!(
        shaders = catalog.entries().len(),
        dir = %catalog.root().display(),
        "starting preview"
    );
    run_preview(PreviewConfig {
        window_size: settings.window_size(),
        entries: catalog.into_entries(),
        initial_entry,
        camera: settings.camera(),
        frozen_time: args.time,
        request: settings.request(),
        output: settings.output_template(),
        encoder: settings.encoder(),
    })
}

fn headless_programs(
    catalog: &Catalog,
    index: usize,
) -> Result<(GpuContext, ShaderProgramManager<GpuProgramBackend>)> {
    let gpu = GpuContext::headless()?;
    let profile = gpu.adapter_profile();
    tracing::info!(
        adapter = %profile.name,
        backend = ?profile.backend,
        software = profile.is_software(),
        "using GPU adapter"
    );

    let entry = &catalog.entries()[index];
    let (source, load_error) = entry.load();
    if let Some(err) = load_error {
        tracing::error!(shader = %entry.name, "{err}");
    }
    let (programs, report) = ShaderProgramManager::new(GpuProgramBackend::new(&gpu), &source)
        .with_context(|| format!("failed to build a program for '{}'", entry.name))?;
    if let Some(diagnostic) = &report.diagnostic {
        tracing::error!(shader = %entry.name, "shader rejected, using fallback:\n{diagnostic}");
    }
    Ok((gpu, programs))
}

fn run_headless(settings: &Settings, catalog: &Catalog, index: usize) -> Result<()> {
    let (gpu, programs) = headless_programs(catalog, index)?;
    let result = render_video(
        &gpu,
        programs.active(),
        settings.request(),
        settings.camera(),
        &settings.output_template(),
        &settings.encoder(),
        CancellationToken::new(),
    );

    let report = &result.report;
    for failure in &report.write_failures {
        tracing::warn!(frame = failure.index, "{}", failure.message);
    }
    match (report.state, &result.output_path) {
        (RenderState::Completed, Some(path)) => {
            println!("{}", path.display());
            Ok(())
        }
        _ => bail!(
            "render {:?} after {} of {} frames: {}",
            report.state,
            report.frames_rendered,
            report.frames_total,
            report.diagnostic.as_deref().unwrap_or("no output produced")
        ),
    }
}

fn run_still(
    settings: &Settings,
    catalog: &Catalog,
    index: usize,
    time: Option<f32>,
    path: &Path,
) -> Result<()> {
    let (gpu, programs) = headless_programs(catalog, index)?;
    export_still(
        &gpu,
        programs.active(),
        settings.target(),
        settings.camera(),
        time.unwrap_or(0.0),
        path,
    )
}

/// Builds `query` headlessly and prints the outcome. Fails when the shader
/// was rejected so scripts can rely on the exit status.
pub fn check(args: &RunArgs, query: &str) -> Result<()> {
    let settings = resolve_settings(args)?;
    let mut catalog = Catalog::scan(&settings.shader_dir);
    let index = catalog.locate(query)?;
    let entry = &catalog.entries()[index];

    let (source, load_error) = entry.load();
    if let Some(err) = load_error {
        bail!("{}: {err}", entry.name);
    }
    let gpu = GpuContext::headless()?;
    let (_, report) = ShaderProgramManager::new(GpuProgramBackend::new(&gpu), &source)
        .with_context(|| format!("failed to build a program for '{}'", entry.name))?;

    match report.diagnostic {
        Some(diagnostic) => {
            println!("{}: rejected\n{diagnostic}", entry.name);
            bail!("shader '{}' was rejected", entry.name)
        }
        None => {
            println!("{}: ok (uniforms: {})", entry.name, report.bindings);
            Ok(())
        }
    }
}

pub fn list(args: &RunArgs) -> Result<()> {
    let settings = resolve_settings(args)?;
    let catalog = Catalog::scan(&settings.shader_dir);
    println!("Shaders in {}:", catalog.root().display());
    for (index, entry) in catalog.entries().iter().enumerate() {
        println!("  {index:>3}  {:<32} {}", entry.name, entry.origin);
    }
    Ok(())
}
