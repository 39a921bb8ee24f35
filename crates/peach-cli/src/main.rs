//! peach-probe: validate every OpenCL GPU before the miner starts.
//!
//! Enumerates the GPUs on the first OpenCL platform, builds the test kernel
//! at each configured optimization level and runs it once per device. The
//! exit code tells CI which stage failed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use peach_opencl::config::parse_passes;
use peach_opencl::kernels::CL_MINIMAL_SOURCE;
use peach_opencl::{
    ComputeBackend, OptLevel, ProbeConfig, ProbeHarness, SimulatedBackend, SourceLoader,
    StaticSourceLoader,
};
use tracing::{debug, error, info};

mod exit;
mod output;

use output::{LogFormat, OutputFormat};

/// Validate that every OpenCL GPU can build and run device code.
#[derive(Debug, Parser)]
#[command(name = "peach-probe")]
#[command(version)]
#[command(long_about = r#"
Validate that every OpenCL GPU can build and run device code.

For each GPU on the first platform the probe creates a context and an in-order
queue, compiles and links the kernel source at each optimization level, then
dispatches the `test` entry point once and waits for it.

Examples:
  # Probe all GPUs with cl_minimal.cl from the working directory
  peach-probe

  # Build at -O0, -O1 and -O2 and keep going past failing devices
  peach-probe --passes 0,1,2 --keep-going

  # Dry run against four simulated devices, JSON report on stdout
  peach-probe --simulate 4 --format json
"#)]
struct Cli {
    /// Configuration file with a [probe] table
    #[arg(short, long, value_name = "PATH", env = "PEACH_CONFIG")]
    config: Option<PathBuf>,

    /// Kernel source file
    #[arg(short, long, value_name = "PATH")]
    kernel: Option<PathBuf>,

    /// Optimization level of each build pass, in order
    #[arg(long, value_name = "LEVELS", value_parser = parse_pass_list)]
    passes: Option<PassList>,

    /// Continue with the remaining devices after a failure
    #[arg(long)]
    keep_going: bool,

    /// Give up on the test dispatch after this many milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Target difficulty passed to the workload
    #[arg(long, value_name = "N")]
    difficulty: Option<u8>,

    /// Block number passed to the workload
    #[arg(long, value_name = "N")]
    block_number: Option<u64>,

    /// Maximum number of devices accepted
    #[arg(long, value_name = "N")]
    max_devices: Option<usize>,

    /// Output format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Run against N simulated healthy devices instead of OpenCL
    #[arg(long, value_name = "N")]
    simulate: Option<usize>,

    /// Only list devices
    #[arg(long)]
    list: bool,
}

/// `--passes` value: comma-separated optimization levels.
#[derive(Debug, Clone)]
struct PassList(Vec<OptLevel>);

fn parse_pass_list(s: &str) -> Result<PassList, String> {
    match parse_passes(s) {
        Some(levels) if !levels.is_empty() => Ok(PassList(levels)),
        _ => Err(format!("expected a list of optimization levels such as 0,1; got '{s}'")),
    }
}

fn main() {
    let cli = Cli::parse();
    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            exit::for_error(&e)
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let config = load_configuration(cli)?;
    setup_logging(&config, cli.log_format)?;
    debug!(?config, "configuration loaded");

    match cli.simulate {
        Some(devices) => {
            info!("Simulating {devices} OpenCL devices");
            let backend = SimulatedBackend::healthy(devices);
            let loader = StaticSourceLoader::new(CL_MINIMAL_SOURCE);
            probe(&backend, &loader, &config, cli)
        }
        None => probe_hardware(&config, cli),
    }
}

#[cfg(feature = "opencl")]
fn probe_hardware(config: &ProbeConfig, cli: &Cli) -> Result<i32> {
    let backend = peach_opencl::OpenClBackend::new();
    let loader = peach_opencl::FileSourceLoader::new(config.max_source_bytes);
    probe(&backend, &loader, config, cli)
}

#[cfg(not(feature = "opencl"))]
fn probe_hardware(_config: &ProbeConfig, _cli: &Cli) -> Result<i32> {
    anyhow::bail!("built without OpenCL support; rebuild with `--features opencl` or pass --simulate N")
}

fn probe<B: ComputeBackend, L: SourceLoader>(
    backend: &B,
    loader: &L,
    config: &ProbeConfig,
    cli: &Cli,
) -> Result<i32> {
    let diag = output::diagnostics(cli.format);
    let harness = ProbeHarness::new(backend, loader, &diag, config.probe_options());

    if cli.list {
        let inventory = harness.list().context("device enumeration failed")?;
        output::print_inventory(cli.format, &inventory)?;
        return Ok(exit::EXIT_SUCCESS);
    }

    let report = harness.run().context("probe failed")?;
    output::print_report(cli.format, &report)?;

    Ok(match report.first_error() {
        None if report.is_success() => exit::EXIT_SUCCESS,
        None => exit::EXIT_GENERIC_FAIL,
        Some(err) => exit::for_probe_error(err),
    })
}

/// Defaults, then the config file, then `PEACH_*`, then flags.
fn load_configuration(cli: &Cli) -> Result<ProbeConfig> {
    let mut config =
        ProbeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(kernel) = &cli.kernel {
        config.kernel_path = kernel.clone();
    }
    if let Some(PassList(passes)) = &cli.passes {
        config.passes = passes.clone();
    }
    if cli.keep_going {
        config.keep_going = true;
    }
    if let Some(ms) = cli.timeout_ms {
        config.wait_timeout_ms = Some(ms);
    }
    if let Some(d) = cli.difficulty {
        config.difficulty = d;
    }
    if let Some(n) = cli.block_number {
        config.block_number = n;
    }
    if let Some(n) = cli.max_devices {
        config.max_devices = n;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.parse().context("Invalid --log-level")?;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Install the stderr subscriber. `RUST_LOG` wins over the configured level.
fn setup_logging(config: &ProbeConfig, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Json => {
            subscriber.json().with_timer(tracing_subscriber::fmt::time::uptime()).try_init()
        }
        LogFormat::Compact => subscriber.compact().try_init(),
        LogFormat::Text => subscriber.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}
