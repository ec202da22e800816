//! Weft command-line driver
//!
//! `weft weave` runs the weaver from a `weft.toml` configuration and prints
//! diagnostics; `weft inspect` summarizes a module file.

mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use weft_metadata::{Module, TypeDef};
use weft_weaver::{WeaveReport, Weaver, WeaverConfig};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Aspect weaver for Weft modules", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level unless WEFT_LOG or RUST_LOG say otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Weave the aspects named by a configuration
    Weave {
        /// Configuration file
        #[arg(default_value = "weft.toml")]
        config: PathBuf,
        /// Aspects file, overriding the configuration
        #[arg(short, long)]
        aspects: Option<PathBuf>,
        /// Output directory, overriding the configuration
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Print the references and types of a module file
    Inspect {
        /// Module file
        module: PathBuf,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match cli.command {
        Commands::Weave {
            config,
            aspects,
            out_dir,
        } => {
            let report = weave(&config, aspects, out_dir)?;
            print!("{}", render_report(&report));
            if report.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }

        Commands::Inspect { module } => {
            let bytes = std::fs::read(&module)
                .with_context(|| format!("failed to read {}", module.display()))?;
            let decoded = Module::decode(&bytes)
                .with_context(|| format!("invalid module {}", module.display()))?;
            print!("{}", render_module(&decoded));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn weave(config: &Path, aspects: Option<PathBuf>, out_dir: Option<PathBuf>) -> anyhow::Result<WeaveReport> {
    let mut config = WeaverConfig::from_file(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    if let Some(aspects) = aspects {
        config.aspects = aspects;
    }
    if let Some(out_dir) = out_dir {
        config.output_dir = out_dir;
    }
    config.validate()?;
    tracing::info!(
        advice = %config.advice_module,
        targets = %config.target_modules.join(", "),
        output = %config.output_dir.display(),
        "weaving"
    );
    Ok(Weaver::open(config).weave()?)
}

/// One line per diagnostic, then a summary line
fn render_report(report: &WeaveReport) -> String {
    let mut out = String::new();
    for diagnostic in report.diagnostics.iter() {
        out.push_str(&format!("{}: {}\n", diagnostic.code(), diagnostic));
    }
    if report.is_success() {
        out.push_str(&format!(
            "woven: {} contribution(s), {} module(s) written, {} dependenc{} copied\n",
            report.contributions,
            report.written.len(),
            report.copied.len(),
            if report.copied.len() == 1 { "y" } else { "ies" }
        ));
    } else {
        out.push_str(&format!(
            "weaving failed with {} diagnostic(s); nothing written\n",
            report.diagnostics.len()
        ));
    }
    out
}

fn render_module(module: &Module) -> String {
    let mut out = format!("module {} (version {}, flags {:#x})\n", module.name, module.version, module.flags);
    for reference in &module.references {
        match &reference.path {
            Some(path) => out.push_str(&format!("  ref {} ({})\n", reference.name, path)),
            None => out.push_str(&format!("  ref {}\n", reference.name)),
        }
    }
    for ty in &module.types {
        render_type(&mut out, ty, 1);
    }
    out
}

fn render_type(out: &mut String, ty: &TypeDef, depth: usize) {
    let indent = "  ".repeat(depth);
    let name = if ty.namespace.is_empty() {
        ty.name.clone()
    } else {
        format!("{}.{}", ty.namespace, ty.name)
    };
    out.push_str(&format!(
        "{}type {} ({} fields, {} methods, {} properties, {} events)\n",
        indent,
        name,
        ty.fields.len(),
        ty.methods.len(),
        ty.properties.len(),
        ty.events.len()
    ));
    for nested in &ty.nested {
        render_type(out, nested, depth + 1);
    }
}
