//! Rendering of diagnostics, device listings and reports on stdout.

use clap::ValueEnum;
use peach_opencl::{DeviceInventory, DeviceSummary, Diagnostics, ProbeEvent, ProbeReport};

/// Format of what goes to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One diagnostic line per event.
    #[default]
    Text,
    /// A single JSON document at the end of the run.
    Json,
}

/// Format of the `tracing` logs on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Compact,
    Json,
}

/// Diagnostics sink for the chosen output format.
///
/// Text output prints every event as it happens; JSON output keeps stdout
/// clean for the final document and leaves events to the log.
pub fn diagnostics(format: OutputFormat) -> Diagnostics {
    match format {
        OutputFormat::Text => Diagnostics::with_callback(|event: &ProbeEvent| println!("{event}")),
        OutputFormat::Json => Diagnostics::new(),
    }
}

pub fn print_inventory<D>(format: OutputFormat, inventory: &DeviceInventory<D>) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        let devices: Vec<DeviceSummary> = inventory.devices.iter().map(|d| d.summary()).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "platform_name": inventory.platform_name,
                "platform_count": inventory.platform_count,
                "devices": devices,
            }))?
        );
    }
    Ok(())
}

pub fn print_report(format: OutputFormat, report: &ProbeReport) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", report.to_json()?);
    }
    Ok(())
}
