//! System Pulse - CPU and memory telemetry binary
//!
//! Runs the background CPU sampler and prints what a host UI would poll.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use system_pulse::metrics::{ElapsedRatioSampler, FrequencySampler, SysfsFrequencySource};
use system_pulse::{
    CpuLoadEstimator, EstimatorKind, MemorySampler, MonitorService, PerformanceReport,
    SamplerConfig, DEFAULT_CADENCE_MS,
};
use tokio_stream::StreamExt;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "system_pulse")]
#[command(about = "System Pulse - background CPU and memory telemetry")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Estimates CPU load from cpufreq or process counters on a background thread")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sampling cadence in milliseconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// CPU load estimation strategy
    #[arg(short, long, value_enum)]
    estimator: Option<EstimatorKind>,

    /// Alternate sysfs cpu directory (for testing against a captured tree)
    #[arg(long)]
    sysfs_root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample continuously and print each report (default)
    Watch(WatchArgs),

    /// Wait for one sample, print a report and exit
    Snapshot(SnapshotArgs),

    /// Show per-core frequency readings and both estimates
    Info,
}

#[derive(Args)]
struct WatchArgs {
    /// Stop after this many samples
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Print reports as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SnapshotArgs {
    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;
    let config = resolve_config(&cli)?;

    match &cli.command {
        Some(Commands::Watch(args)) => watch_command(config, args).await?,
        Some(Commands::Snapshot(args)) => snapshot_command(config, args).await?,
        Some(Commands::Info) => info_command(&config)?,
        None => {
            let args = WatchArgs {
                count: None,
                json: false,
            };
            watch_command(config, &args).await?;
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(build_subscriber(log_level(cli)))?;

    Ok(())
}

fn log_level(cli: &Cli) -> Level {
    if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    }
}

/// `RUST_LOG` wins when set; otherwise the level from the flags applies.
fn build_subscriber(level: Level) -> impl tracing::Subscriber + Send + Sync {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish()
}

/// File values first, then command-line overrides.
fn resolve_config(cli: &Cli) -> anyhow::Result<SamplerConfig> {
    let mut config = match &cli.config {
        Some(path) => SamplerConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SamplerConfig::default(),
    };

    if let Some(interval) = cli.interval {
        config = config.with_cadence_ms(interval);
    }
    if let Some(estimator) = cli.estimator {
        config = config.with_estimator(estimator);
    }
    if let Some(root) = &cli.sysfs_root {
        config = config.with_sysfs_cpu_root(root);
    }

    config.validate()?;
    Ok(config)
}

async fn watch_command(config: SamplerConfig, args: &WatchArgs) -> anyhow::Result<()> {
    print_banner(&config);

    let service = MonitorService::create(config)?;
    let mut samples = service.query().subscribe();
    let mut printed = 0u64;

    loop {
        tokio::select! {
            next = samples.next() => {
                let Some(next) = next else { break };
                // `None` is the reset published on start; wait for real data.
                if next.is_none() {
                    continue;
                }

                let report = service.performance_report();
                if args.json {
                    println!("{}", serde_json::to_string(&report)?);
                } else {
                    print_report_line(&report);
                }

                printed += 1;
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping sampler");
                break;
            }
        }
    }

    let health = service.query().health();
    if health.failures > 0 {
        warn!(
            failures = health.failures,
            last_error = health.last_error.as_deref().unwrap_or(""),
            "some sampling ticks failed"
        );
    }
    service.destroy();

    Ok(())
}

async fn snapshot_command(config: SamplerConfig, args: &SnapshotArgs) -> anyhow::Result<()> {
    if args.format != "json" && args.format != "pretty" {
        bail!("Unsupported format: {}. Use 'json' or 'pretty'", args.format);
    }

    let wait = config.cadence() * 3;
    let service = MonitorService::create(config)?;
    let mut samples = service.query().subscribe();

    let first = tokio::time::timeout(wait, async {
        while let Some(next) = samples.next().await {
            if next.is_some() {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !first {
        warn!("no CPU sample arrived within {:?}, reporting 0.0", wait);
    }

    let report = service.performance_report();
    service.destroy();

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_pretty_report(&report),
    }

    Ok(())
}

fn info_command(config: &SamplerConfig) -> anyhow::Result<()> {
    println!("System Pulse CPU Information");
    println!("============================");
    println!();

    let source = SysfsFrequencySource::with_root(&config.sysfs_cpu_root, config.core_count);
    println!("Sysfs root: {}", source.root().display());

    let estimate = FrequencySampler::with_source(source).estimate();
    println!("Cores: {} ({} with frequency data)", estimate.total_cores, estimate.valid_cores);
    println!();

    println!("Per-core frequencies:");
    for reading in &estimate.readings {
        let fmt_mhz = |mhz: Option<u64>| mhz.map_or_else(|| "n/a".to_string(), |v| format!("{} MHz", v));
        let utilization = reading
            .utilization()
            .map_or_else(|| "n/a".to_string(), |u| format!("{:.1}%", u * 100.0));
        println!(
            "  cpu{:<3} cur {:>10}  min {:>10}  max {:>10}  ratio {:>7}",
            reading.core_index,
            fmt_mhz(reading.current_frequency_mhz),
            fmt_mhz(reading.min_frequency_mhz),
            fmt_mhz(reading.max_frequency_mhz),
            utilization
        );
    }
    println!();

    let elapsed = ElapsedRatioSampler::new();
    println!("Estimates:");
    println!("  {:<14} {:.2}%", EstimatorKind::Frequency.to_string(), estimate.percent);
    println!("  {:<14} {:.2}%", elapsed.kind().to_string(), elapsed.sample());
    println!();

    let memory = MemorySampler::new().sample();
    println!("Memory:");
    println!("  Total: {} MB", memory.total_mb());
    println!("  Used: {} MB ({:.1}%)", memory.used_mb(), memory.usage_percent);

    Ok(())
}

fn print_banner(config: &SamplerConfig) {
    println!("System Pulse - CPU and memory telemetry");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "   Estimator: {}, every {}ms (default {}ms)",
        config.estimator, config.cadence_ms, DEFAULT_CADENCE_MS
    );
    println!();
}

fn print_report_line(report: &PerformanceReport) {
    println!(
        "{}  CPU: {:6.2}%  MEM: {:5.1}% ({} / {} MB)",
        format_timestamp(report.timestamp, "%H:%M:%S"),
        report.cpu_usage,
        report.memory_usage,
        report.memory_used_mb,
        report.memory_total_mb
    );
}

fn print_pretty_report(report: &PerformanceReport) {
    println!(
        "Performance Snapshot ({})",
        format_timestamp(report.timestamp, "%Y-%m-%d %H:%M:%S UTC")
    );
    println!("==========================================");
    println!();
    println!("CPU:");
    println!("  Usage: {:.2}%", report.cpu_usage);
    println!("  Estimator: {}", report.estimator);
    println!();
    println!("Memory:");
    println!("  Usage: {:.1}%", report.memory_usage);
    println!("  Used: {} MB", report.memory_used_mb);
    println!("  Total: {} MB", report.memory_total_mb);
}

fn format_timestamp(millis: u64, pattern: &str) -> String {
    chrono::DateTime::from_timestamp_millis(millis as i64)
        .unwrap_or_default()
        .format(pattern)
        .to_string()
}
