use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tconv::diag::DiagLevel;
use tconv::error::ConvertError;
use tconv::gmad::GmadMachine;
use tconv::machine::{Ecosystem, MachineBuilder};
use tconv::madx::MadxMachine;
use tconv::pass::PassId;
use tconv::pipeline::{run_pipeline, ConversionReport, ConversionState, ConvertOptions};
use tconv::session::FlushedSection;
use tconv::state::{DistributionKind, Particle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Bdsim,
    Madx,
    Both,
    /// Reconciled element registry as JSON on stdout
    Registry,
}

#[derive(Parser, Debug)]
#[command(
    name = "tconv",
    version,
    about = "TRANSPORT lattice converter: translates TRANSPORT decks and listings into BDSIM and MAD-X machines"
)]
struct Cli {
    /// TRANSPORT input deck or output listing
    source: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Both)]
    emit: EmitStage,

    /// Beam particle
    #[arg(long, value_enum, default_value_t = Particle::Proton)]
    particle: Particle,

    /// Beam distribution type
    #[arg(long, value_enum, default_value_t = DistributionKind::Gauss)]
    distr: DistributionKind,

    /// Output directory (suffixed with _bdsim / _madx when emitting both)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Keep one output file when the beam is redefined
    #[arg(long)]
    dont_split: bool,

    /// Use source labels as element names
    #[arg(long)]
    keep_names: bool,

    /// Merge consecutive drifts
    #[arg(long)]
    combine_drifts: bool,

    /// Extra GMAD option line (repeatable)
    #[arg(long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    options: Vec<(String, String)>,

    /// Write a JSON conversion report
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Per-element trace to <stem>_conversion.log
    #[arg(long)]
    debug: bool,

    /// Print pass timings and informational diagnostics
    #[arg(short, long)]
    verbose: bool,
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{}`", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty option name in `{}`", raw));
    }
    Ok((key.to_owned(), value.trim().to_owned()))
}

fn setup_tracing(verbose: bool, log_path: Option<&Path>) -> Result<(), ConvertError> {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::prelude::*;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(if verbose {
            LevelFilter::INFO
        } else {
            LevelFilter::WARN
        });

    let file_layer = match log_path {
        Some(path) => {
            let file = fs::File::create(path).map_err(|e| ConvertError::io(path, e))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Output directory per ecosystem for the chosen stage.
fn output_dirs(emit: EmitStage, output_dir: Option<&Path>) -> Vec<(Ecosystem, PathBuf)> {
    let wanted: &[Ecosystem] = match emit {
        EmitStage::Bdsim => &[Ecosystem::Bdsim],
        EmitStage::Madx => &[Ecosystem::Madx],
        EmitStage::Both => &[Ecosystem::Bdsim, Ecosystem::Madx],
        EmitStage::Registry => &[],
    };
    wanted
        .iter()
        .map(|&eco| {
            let dir = match output_dir {
                None => PathBuf::from(eco.name()),
                Some(d) if wanted.len() == 1 => d.to_path_buf(),
                Some(d) => PathBuf::from(format!("{}_{}", d.display(), eco.name())),
            };
            (eco, dir)
        })
        .collect()
}

fn discard(_: FlushedSection<'_>) -> Result<(), ConvertError> {
    Ok(())
}

fn run(cli: &Cli, state: &mut ConversionState, stem: &str) -> Result<(), ConvertError> {
    if cli.emit == EmitStage::Registry {
        run_pipeline(state, PassId::Reconcile, &mut [], &mut discard)?;
        if let Some(registry) = &state.registry {
            println!("{}", serde_json::to_string_pretty(registry)?);
        }
        return Ok(());
    }

    let dirs = output_dirs(cli.emit, cli.output_dir.as_deref());
    for (_, dir) in &dirs {
        fs::create_dir_all(dir).map_err(|e| ConvertError::io(dir, e))?;
    }

    let mut gmad = GmadMachine::with_options(cli.options.clone());
    let mut madx = MadxMachine::new();
    let wants = |eco: Ecosystem| dirs.iter().any(|(e, _)| *e == eco);
    let mut machines: Vec<&mut dyn MachineBuilder> = Vec::new();
    if wants(Ecosystem::Bdsim) {
        machines.push(&mut gmad);
    }
    if wants(Ecosystem::Madx) {
        machines.push(&mut madx);
    }

    let provenance = state.provenance.clone();
    let mut sink = |section: FlushedSection<'_>| -> Result<(), ConvertError> {
        let eco = section.machine.ecosystem();
        let Some((_, dir)) = dirs.iter().find(|(e, _)| *e == eco) else {
            return Ok(());
        };
        let path = dir.join(format!("{}.{}", section.label.file_stem(stem), eco.extension()));
        fs::write(&path, section.machine.render(&provenance)).map_err(|e| ConvertError::io(&path, e))?;
        tracing::info!(path = %path.display(), section = %section.label, "wrote {}", eco);
        Ok(())
    };
    run_pipeline(state, PassId::Build, &mut machines, &mut sink)
}

fn main() {
    let cli = Cli::parse();

    let stem = cli
        .source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lattice".to_owned());
    let source_name = cli
        .source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| stem.clone());

    let log_path = cli
        .debug
        .then(|| PathBuf::from(format!("{}_conversion.log", stem)));
    if let Err(e) = setup_tracing(cli.verbose, log_path.as_deref()) {
        eprintln!("tconv: error: {}", e);
        std::process::exit(2);
    }

    let source = match fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("tconv: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let options = ConvertOptions {
        particle: cli.particle,
        distribution: cli.distr,
        split: !cli.dont_split,
        keep_names: cli.keep_names,
        combine_drifts: cli.combine_drifts,
    };
    let mut state = ConversionState::new(source, &source_name, options);
    let result = run(&cli, &mut state, &stem);

    // ── Diagnostics ──
    for diag in &state.diagnostics {
        if cli.verbose || diag.level != DiagLevel::Info {
            eprintln!("tconv: {}", diag);
        }
    }
    if cli.emit != EmitStage::Registry || cli.verbose {
        eprintln!("tconv: {}", state.summary());
    }

    if let Some(path) = &cli.report {
        let written = ConversionReport::new(&state)
            .to_json()
            .and_then(|json| fs::write(path, json).map_err(|e| ConvertError::io(path, e)));
        if let Err(e) = written {
            eprintln!("tconv: error: {}", e);
            std::process::exit(2);
        }
    }

    match result {
        Ok(()) => {}
        Err(e @ ConvertError::Io { .. }) => {
            eprintln!("tconv: error: {}", e);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("tconv: error: {}", e);
            std::process::exit(1);
        }
    }
}
