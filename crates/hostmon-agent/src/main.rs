use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hostmon_agent::config::AgentConfig;
use hostmon_agent::fanout::MetricFanout;
use hostmon_agent::maintenance::MaintenanceWorker;
use hostmon_agent::scheduler::CollectionScheduler;
use hostmon_alert::{AlertManager, AlertSettings};
use hostmon_common::types::now_ts;
use hostmon_probes::{PlatformProbes, Probes};
use hostmon_publish::client::{AggregatorClient, ClientError};
use hostmon_publish::discovery::{self, DiscoverySettings};
use hostmon_publish::{DiscoveryMethod, HttpTransport, NetworkPublisher, PublishConfig};
use hostmon_storage::{MetricStore, StoreConfig, TieredRetention};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hostmon", version, about = "Host-resident monitoring agent")]
struct Cli {
    /// Agent configuration file.
    #[arg(long, global = true, default_value = "agent.yaml")]
    config: String,
    /// Alert configuration file.
    #[arg(long, global = true, default_value = "alerts.yaml")]
    alert_config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitoring daemon until interrupted.
    Run,
    /// Range-query the local store for one metric.
    Query {
        metric: String,
        /// How far back to look.
        #[arg(long, default_value_t = 1)]
        hours: i64,
        /// Maximum rows (0 = unlimited).
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show local store statistics.
    Stats,
    /// Print a one-shot snapshot of the host.
    System,
    /// Query the aggregator's host list (distributed setups).
    Hosts {
        /// Aggregator base URL; defaults to the configured one.
        #[arg(long)]
        url: Option<String>,
        /// Show one host (with its latest metrics) instead of the list.
        #[arg(long)]
        host: Option<String>,
    },
}

fn main() -> ExitCode {
    // Exit code 1 covers CLI usage errors; 2 is reserved for an
    // unreachable aggregator, so clap's default exit code of 2 for parse
    // failures cannot be used directly.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(1),
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hostmon=info")),
        )
        .init();

    let outcome = match &cli.command {
        Command::Run => run_daemon(&cli),
        Command::Query {
            metric,
            hours,
            limit,
        } => run_query(&cli, metric, *hours, *limit),
        Command::Stats => run_stats(&cli),
        Command::System => run_system(),
        Command::Hosts { url, host } => {
            return run_hosts(&cli, url.as_deref(), host.as_deref());
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn load_config(cli: &Cli) -> Result<AgentConfig> {
    if std::path::Path::new(&cli.config).exists() {
        AgentConfig::load(&cli.config)
    } else {
        tracing::info!(path = %cli.config, "no agent config found, using defaults");
        Ok(AgentConfig::default())
    }
}

fn load_alert_settings(cli: &Cli) -> Result<AlertSettings> {
    if std::path::Path::new(&cli.alert_config).exists() {
        AlertSettings::load(&cli.alert_config)
    } else {
        tracing::info!(path = %cli.alert_config, "no alert config found, alerting idle");
        Ok(AlertSettings::default())
    }
}

fn open_store(config: &AgentConfig, hostname: &str) -> Result<Arc<MetricStore>> {
    let store_config = StoreConfig {
        db_path: config.db_path.clone(),
        enable_wal: true,
        batch_size: config.storage_batch_size,
        flush_interval_ms: config.storage_flush_interval_ms,
    };
    Ok(Arc::new(MetricStore::open(store_config, hostname)?))
}

fn run_daemon(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let hostname = config.effective_hostname();
    tracing::info!(
        hostname = %hostname,
        mode = ?config.mode,
        db = %config.db_path,
        "hostmon agent starting"
    );

    let store = open_store(&config, &hostname)?;

    let alert_settings = load_alert_settings(cli)?;
    let alerts = Arc::new(AlertManager::new(alert_settings, &hostname)?);
    Arc::clone(&alerts).start();

    let publisher = if config.mode.publishes() {
        let endpoint = resolve_endpoint(&config)?;
        if endpoint.is_none() {
            tracing::warn!("service discovery found no aggregator; publishes will fail fast");
        }
        let transport = HttpTransport::new(config.http_timeout_ms, config.tls_verify_peer)
            .context("building HTTP transport")?;
        let publish_config = PublishConfig {
            hostname: hostname.clone(),
            platform: hostmon_probes::platform_name().to_string(),
            auth_token: config.auth_token.clone(),
            host_tags: config.parsed_host_tags()?,
            push_interval_ms: config.push_interval_ms,
            max_queue_size: config.max_queue_size,
            retry_max_attempts: config.retry_max_attempts,
            retry_base_delay_ms: config.retry_base_delay_ms,
        };
        let publisher = Arc::new(NetworkPublisher::new(publish_config, Box::new(transport)));
        publisher.set_endpoint(endpoint);
        Arc::clone(&publisher).start();
        Some(publisher)
    } else {
        None
    };

    let fanout = MetricFanout::new(
        Some(Arc::clone(&store)),
        Arc::clone(&alerts),
        publisher.clone(),
    );
    let scheduler = Arc::new(CollectionScheduler::new(
        Box::new(PlatformProbes::new()) as Box<dyn Probes>,
        fanout,
        config.sample_interval_ms,
    ));
    Arc::clone(&scheduler).start();

    let tiers = TieredRetention {
        raw_hours: config.raw_retention_hours,
        minute_days: config.minute_retention_days,
        hour_days: config.hour_retention_days,
    };
    tiers.validate()?;
    let maintenance = Arc::new(MaintenanceWorker::new(Arc::clone(&store), tiers));
    Arc::clone(&maintenance).start();

    let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("installing signal handler")?;
    tracing::info!("agent running, Ctrl-C to stop");
    let _ = shutdown_rx.recv();

    tracing::info!("shutting down");
    scheduler.stop();
    maintenance.stop();
    alerts.stop();
    if let Some(publisher) = &publisher {
        publisher.stop();
        let stats = publisher.stats();
        tracing::info!(
            sent = stats.metrics_sent,
            failed = stats.metrics_failed,
            overflows = stats.queue_overflows,
            "publisher totals"
        );
    }
    store.flush().context("final store flush")?;
    Ok(())
}

fn resolve_endpoint(config: &AgentConfig) -> Result<Option<String>> {
    let settings = DiscoverySettings {
        aggregator_url: config.aggregator_url.clone(),
        consul_addr: config.consul_addr.clone(),
        consul_service_tag: config.consul_service_tag.clone(),
        tls_enabled: config.tls_enabled,
    };
    let timeout = Duration::from_secs_f64(config.discovery_timeout_seconds.max(0.1));
    let endpoint = match discovery::discover_first(config.discovery_method, &settings, timeout) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::warn!(error = %e, "service discovery failed");
            None
        }
    };
    Ok(endpoint.map(|e| e.url()))
}

fn run_query(cli: &Cli, metric: &str, hours: i64, limit: usize) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config, &config.effective_hostname())?;

    let end = now_ts();
    let start = end - hours.max(0) * 3600;
    let rows = store.query_range(metric, start, end, limit)?;
    if rows.is_empty() {
        println!("no samples for '{metric}' in the last {hours}h");
        return Ok(());
    }
    println!("{:<22} {:<28} {:>14}  tags", "timestamp", "metric", "value");
    for point in &rows {
        let when = chrono::DateTime::from_timestamp(point.timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| point.timestamp.to_string());
        println!(
            "{:<22} {:<28} {:>14.3}  {}",
            when, point.metric_name, point.value, point.tags
        );
    }
    Ok(())
}

fn run_stats(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config, &config.effective_hostname())?;

    println!("database:        {}", config.db_path);
    println!("schema version:  {}", store.schema_version()?);
    for tier in ["metrics", "metrics_1m", "metrics_1h"] {
        println!("{tier:<16} {} rows", store.tier_row_count(tier)?);
    }
    let size = std::fs::metadata(&config.db_path).map(|m| m.len()).unwrap_or(0);
    println!("on disk:         {:.2} MB", size as f64 / 1_000_000.0);
    Ok(())
}

fn run_system() -> Result<()> {
    let info = hostmon_probes::system_info();
    println!("System Information");
    println!("==================");
    println!("OS:           {} {}", info.os_name, info.os_version);
    println!("Kernel:       {}", info.kernel_version);
    println!("Hostname:     {}", info.hostname);
    println!("Architecture: {}", info.architecture);
    println!("Uptime:       {} hours", info.uptime_seconds / 3600);

    let mut probes = PlatformProbes::new();
    if let Ok(cpu) = probes.cpu() {
        println!("\nCPU");
        println!("===");
        println!("Cores:        {}", cpu.num_cores);
        println!("Usage:        {:.2}%", cpu.total_usage);
        println!(
            "Load Average: {:.2}, {:.2}, {:.2}",
            cpu.load_average_1m, cpu.load_average_5m, cpu.load_average_15m
        );
    }
    if let Ok(mem) = probes.memory() {
        println!("\nMemory");
        println!("======");
        println!("Total:        {} MB", mem.total_bytes / 1024 / 1024);
        println!("Used:         {} MB", mem.used_bytes / 1024 / 1024);
        println!("Available:    {} MB", mem.available_bytes / 1024 / 1024);
        println!("Usage:        {:.2}%", mem.usage_percent);
    }
    Ok(())
}

fn run_hosts(cli: &Cli, url: Option<&str>, host: Option<&str>) -> ExitCode {
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(1);
        }
    };
    let base_url = match url {
        Some(url) => url.to_string(),
        None if !config.aggregator_url.is_empty() => config.aggregator_url.clone(),
        None => {
            eprintln!("error: no aggregator URL (pass --url or set aggregator_url)");
            return ExitCode::from(1);
        }
    };

    let client = match AggregatorClient::new(&base_url, &config.auth_token, config.http_timeout_ms)
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let outcome = (|| -> Result<(), ClientError> {
        match host {
            Some(hostname) => {
                let record = client.host(hostname)?;
                println!("host:      {}", record.hostname);
                if let Some(platform) = &record.platform {
                    println!("platform:  {platform}");
                }
                if let Some(version) = &record.version {
                    println!("agent:     {version}");
                }
                if let Some(last_seen) = record.last_seen {
                    println!("last seen: {last_seen}");
                }
                let latest = client.latest_metrics(hostname)?;
                if !latest.is_empty() {
                    println!("\nlatest metrics:");
                    for (metric, value) in &latest {
                        println!("  {metric:<28} {value:.3}");
                    }
                }
                Ok(())
            }
            None => {
                let hosts = client.hosts()?;
                println!("{} host(s)", hosts.len());
                for record in &hosts {
                    println!(
                        "  {:<24} {}",
                        record.hostname,
                        record.platform.as_deref().unwrap_or("-")
                    );
                }
                Ok(())
            }
        }
    })();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(ClientError::Unreachable(e)) => {
            eprintln!("error: aggregator unreachable: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}
