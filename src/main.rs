//! `queuevisor` command line.
//!
//! - `run --queue <q>`: one worker consuming `q` until stopped.
//! - `keep [--every <secs>]`: spawn workers up to the configured count per queue.
//! - `kill`: terminate every worker.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use queuevisor::broker::{AmqpClient, ClientRef};
use queuevisor::lifecycle::{ListenerBuilder, bridge_signals, wait_for_shutdown_signal};
use queuevisor::manage::{
    BackoffPolicy, KeepReport, ProcessSupervisor, SystemProcessTable, WorkerCommand,
};
use queuevisor::reply::{EchoInterpreter, Publisher};
use queuevisor::subscribers::{JournalWriter, LogWriter, Subscribe, SubscriberSet};
use queuevisor::{Bus, Config};

#[derive(Parser)]
#[command(name = "queuevisor", version, about = "Broker request workers and their supervisor")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = "queuevisor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume one queue until stopped.
    Run {
        /// Queue to consume.
        #[arg(long)]
        queue: String,
        /// Default exchange for replies and sends.
        #[arg(long)]
        exchange: Option<String>,
        /// Verbose logging and decoded-body dumps.
        #[arg(long)]
        debug: bool,
    },
    /// Spawn missing workers for every configured queue.
    Keep {
        /// Repeat every N seconds until interrupted.
        #[arg(long)]
        every: Option<u64>,
    },
    /// Terminate all workers.
    Kill,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = matches!(cli.command, Command::Run { debug: true, .. });
    init_tracing(debug);

    let outcome = match Config::load(&cli.config) {
        Ok(config) => {
            let config = Arc::new(config);
            match cli.command {
                Command::Run {
                    queue,
                    exchange,
                    debug,
                } => run(config, queue, exchange, debug).await,
                Command::Keep { every } => keep(&config, &cli.config, every).await,
                Command::Kill => kill(&config, &cli.config),
            }
        }
        Err(e) => Err(e.into()),
    };

    outcome.unwrap_or_else(|e| {
        error!(error = format!("{e:#}"), "command failed");
        ExitCode::FAILURE
    })
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(
    config: Arc<Config>,
    queue: String,
    exchange: Option<String>,
    debug: bool,
) -> Result<ExitCode> {
    let builder = ListenerBuilder::new(Arc::clone(&config), queue.as_str())
        .with_debug(debug)
        .with_default_exchange(exchange);
    builder.check()?;
    EchoInterpreter::check(&config, &queue)?;

    let client: ClientRef = Arc::new(
        AmqpClient::connect(&config.broker)
            .await
            .context("connecting to broker")?,
    );

    let bus = Bus::default();
    let mut subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    if let Some(path) = &config.listener.journal {
        subs.push(Arc::new(JournalWriter::new(path)));
    }
    let events = SubscriberSet::new(subs, bus.clone()).listen();

    let publisher = Arc::new(
        Publisher::open(client.as_ref(), bus.clone())
            .await
            .context("opening reply channel")?
            .with_config(Arc::clone(&config)),
    );
    let catalog = EchoInterpreter::catalog(&config, &queue, Arc::clone(&publisher))?;

    let listener = builder
        .with_catalog(catalog)
        .with_bus(bus.clone())
        .build(client)?;

    let signals = match bridge_signals(listener.control(), bus) {
        Ok(handle) => handle,
        Err(e) => {
            error!(label = e.as_label(), error = %e, "cannot install signal handlers");
            events.shutdown().await;
            return Ok(ExitCode::FAILURE);
        }
    };

    let outcome = listener.run().await;
    signals.abort();
    if let Err(e) = publisher.close().await {
        if !e.is_closed() {
            warn!(error = %e, "closing reply channel failed");
        }
    }
    events.shutdown().await;

    match outcome {
        Ok(exit) => {
            info!(queue, ?exit, "worker finished");
            Ok(ExitCode::from(u8::try_from(exit.exit_code()).unwrap_or(1)))
        }
        Err(e) => {
            error!(queue, label = e.as_label(), error = %e, "worker failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn supervisor(config: &Config, config_path: &Path) -> Result<ProcessSupervisor> {
    let program = match &config.manage.program {
        Some(p) => p.clone(),
        None => std::env::current_exe().context("resolving worker executable")?,
    };
    let config_path = std::fs::canonicalize(config_path).unwrap_or_else(|_| config_path.into());
    let command = WorkerCommand::new(program).with_config(config_path);
    Ok(ProcessSupervisor::new(
        Arc::new(SystemProcessTable),
        command,
        Bus::default(),
    ))
}

fn print_keep(reports: &[KeepReport]) {
    for r in reports {
        println!("{}", r.command.join(" "));
        println!(
            "{}: running {}, spawned {}, desired {}",
            r.queue,
            r.running,
            r.spawned.len(),
            r.desired
        );
        for f in &r.failures {
            eprintln!("{}: {f}", r.queue);
        }
    }
}

async fn keep(config: &Config, config_path: &Path, every: Option<u64>) -> Result<ExitCode> {
    let supervisor = supervisor(config, config_path)?;
    let every = every
        .map(Duration::from_secs)
        .filter(|d| !d.is_zero())
        .or_else(|| config.manage.interval());

    let Some(every) = every else {
        let reports = supervisor.keep_all(&config.manage.keep);
        print_keep(&reports);
        let clean = reports.iter().all(KeepReport::is_clean);
        return Ok(if clean { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    };

    let shutdown = async {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "cannot install signal handlers");
        }
    };
    let passes = supervisor
        .keep_every(
            &config.manage.keep,
            every,
            BackoffPolicy::default(),
            shutdown,
            print_keep,
        )
        .await;
    info!(passes, "keep loop stopped");
    Ok(ExitCode::SUCCESS)
}

fn kill(config: &Config, config_path: &Path) -> Result<ExitCode> {
    let supervisor = supervisor(config, config_path)?;
    let report = supervisor.kill_all();
    for record in &report.matched {
        println!("kill -TERM {}  # {}", record.pid, record.args.join(" "));
    }
    println!(
        "matched {}, killed {}, failed {}",
        report.matched.len(),
        report.killed.len(),
        report.failures.len()
    );
    for f in &report.failures {
        eprintln!("{f}");
    }
    Ok(if report.failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
