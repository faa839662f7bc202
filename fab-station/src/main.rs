use anyhow::Context;
use clap::Parser;
use fab_core::config::{ConfigSource, StationConfig, TomlFileSource};
use fab_core::flash::ProvisioningPlan;
use fab_core::report::ProvisioningReport;
use fab_core::serial::HandshakeEvent;
use fab_core::{orders, preflight};
use fab_hal::{LinuxHal, SerialOps, StationHal};
use fab_workflow::Sequencer;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

mod cli;

const PROBE_TIMEOUT: Duration = Duration::from_secs(20);

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    fab_core::logging::init();

    match cli.command {
        cli::Command::Provision {
            config,
            order,
            json,
            console,
        } => {
            let report = provision(&config, order, console)?;
            print_report(&report, json)?;
            if !report.passed() {
                std::process::exit(1);
            }
        }
        cli::Command::CheckTool { config } => {
            let cfg = match config {
                Some(path) => TomlFileSource::new(path).load()?,
                None => StationConfig::default(),
            };
            let found = preflight::check_station_tool(&LinuxHal::new(), &cfg.tool, PROBE_TIMEOUT)?;
            println!("✅ {} ({})", cfg.tool, found.display());
        }
        cli::Command::Ports => {
            let ports = LinuxHal::new().list_serial_ports()?;
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
        }
        cli::Command::Orders { file } => {
            for order in orders::read_orders(&file)? {
                println!("{}", order);
            }
        }
    }
    Ok(())
}

fn provision(
    config: &Path,
    order: Option<String>,
    console: bool,
) -> anyhow::Result<ProvisioningReport> {
    let hal: Arc<dyn StationHal> = Arc::new(LinuxHal::new());
    let cfg = TomlFileSource::new(config).load()?;
    let plan = ProvisioningPlan::from_config(cfg, hal.as_ref())
        .with_context(|| format!("invalid station config {}", config.display()))?;
    preflight::check_tool(&plan.tool)?;

    let mut sequencer = Sequencer::new(hal, plan);
    let printer = if console {
        let (tx, rx) = mpsc::channel();
        sequencer = sequencer.with_observer(tx);
        Some(thread::spawn(move || {
            for event in rx {
                match event {
                    HandshakeEvent::Data(line) => println!("[console] {}", line),
                    HandshakeEvent::StateChanged(state) => {
                        println!("[console] factory mode {:?}", state)
                    }
                }
            }
        }))
    } else {
        None
    };

    let report = sequencer.run_unit_provisioning(order);
    drop(sequencer);
    if let Some(printer) = printer {
        let _ = printer.join();
    }
    Ok(report)
}

fn print_report(report: &ProvisioningReport, json: bool) -> anyhow::Result<()> {
    let snapshot = report.snapshot();
    if json {
        let text = serde_json::to_string_pretty(&snapshot).context("failed to serialize report")?;
        println!("{}", text);
        return Ok(());
    }
    if let Some(order) = &snapshot.order_id {
        println!("order  {}", order);
    }
    for (name, entry) in &snapshot.checks {
        match &entry.detail {
            Some(detail) => println!("{:<22} {}  {}", name, entry.outcome, detail),
            None => println!("{:<22} {}", name, entry.outcome),
        }
    }
    let mac = |m: &Option<String>| m.clone().unwrap_or_else(|| "-".to_string());
    println!("mac s3 {}", mac(&snapshot.macs.s3));
    println!("mac h2 {}", mac(&snapshot.macs.h2));
    println!("{}", if snapshot.passed { "✅ PASS" } else { "❌ FAIL" });
    Ok(())
}
