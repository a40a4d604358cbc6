//! `lazyload` command.
//!
//! # Responsibility
//! - Run one simulated editor startup against a plugin manifest.
//! - Print what loaded, in which tier, and what failed.

use clap::Parser;
use lazyload_core::{
    default_log_level, init_logging, load_manifest, BoxError, CallbackResult, DirectoryInstaller,
    ExtensionDeclaration, ExtensionState, HookEvent, LoadReport, Loader, PluginManifest,
    PluginSpec, StartupContext,
};
use log::info;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

#[derive(Parser, Debug)]
#[command(name = "lazyload")]
#[command(about = "Deferred extension loader for editor configurations")]
#[command(version)]
struct Cli {
    /// Files the editor was asked to open; any file loads `on_file_argument` plugins at startup
    files: Vec<PathBuf>,

    /// Plugin manifest (JSON)
    #[arg(long, value_name = "PATH")]
    plugins: Option<PathBuf>,

    /// Directory plugins are installed into
    #[arg(long, value_name = "DIR")]
    plugin_root: Option<PathBuf>,

    /// Absolute directory for rolling log files; logging is off without it
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print the load report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("lazyload: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BoxError> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir)?;
    }

    let manifest = match &cli.plugins {
        Some(path) => load_manifest(path)?,
        None => PluginManifest::default(),
    };
    let plugin_root = cli.plugin_root.clone().unwrap_or_else(default_plugin_root);
    let context = StartupContext::from_args(&cli.files);

    let mut loader =
        Loader::with_installer(context, DirectoryInstaller::new(plugin_root.as_path()));
    for spec in &manifest.plugins {
        if let Err(err) = loader.declare(declaration_for(spec, &plugin_root)) {
            eprintln!("lazyload: skipping `{}`: {err}", spec.name);
        }
    }

    loader.checkpoint();
    info!("event=first_paint module=cli status=ok");
    loader.idle_tick();

    let report = loader.report();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

fn default_plugin_root() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("lazyload").join("plugins"))
        .unwrap_or_else(|| PathBuf::from(".lazyload").join("plugins"))
}

/// Attaches the build hook and settings-forwarding configure to a spec.
fn declaration_for(spec: &PluginSpec, plugin_root: &Path) -> ExtensionDeclaration {
    let mut declaration = spec.to_declaration();
    if let Some(build) = &spec.build {
        let dir = plugin_root.join(declaration.name());
        declaration = declaration.post_install(build_hook(build.clone(), dir));
    }
    if let Some(settings) = &spec.settings {
        let name = declaration.name().to_string();
        let keys: Vec<String> = settings.keys().cloned().collect();
        declaration = declaration.configure(move |_| {
            info!(
                "event=plugin_configure module=cli status=ok extension={} settings={}",
                name,
                keys.join(",")
            );
            Ok(())
        });
    }
    declaration
}

fn build_hook(command: String, dir: PathBuf) -> impl FnMut(HookEvent) -> CallbackResult {
    move |event| {
        info!(
            "event=plugin_build module=cli status=start hook_event={} dir={} command={}",
            event,
            dir.display(),
            command
        );
        let status = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&dir)
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("build command `{command}` exited with {status}").into())
        }
    }
}

fn render_report(report: &LoadReport) -> String {
    let mut out = format!(
        "file argument: {}\nnow: {}, later: {}\n",
        report.has_file_argument,
        report.now.as_str(),
        report.later.as_str()
    );
    for status in &report.extensions {
        let tier = status.tier.map(|tier| tier.as_str()).unwrap_or("-");
        let detail = match &status.state {
            ExtensionState::Failed { reason } | ExtensionState::Skipped { reason } => {
                format!(" ({reason})")
            }
            _ => String::new(),
        };
        out.push_str(&format!(
            "  {:<24} {:<6} {}{}\n",
            status.name,
            tier,
            status.state.as_str(),
            detail
        ));
    }
    out
}
