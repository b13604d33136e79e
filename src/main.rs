mod applet;
mod config;
mod controller;
mod panel;
mod parser;
mod session;
mod shutdown;

use applet::Applet;
use clap::Parser;
use config::PingwatchConfig;
use controller::{Controller, StopOutcome};
use panel::{Panel, PanelSet, StatusFilePanel, TerminalPanel};
use session::SessionReport;
use shutdown::ShutdownOutcome;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

/// Supervise a ping probe and render its latency as a panel label.
///
/// SIGHUP reloads the config file, SIGUSR1 toggles the probe on and off,
/// SIGINT/SIGTERM stop the probe and exit.
#[derive(Parser, Debug)]
#[command(name = "pingwatch", version, about)]
pub struct Cli {
    /// Host to ping (overrides config)
    #[arg(value_name = "HOST")]
    host: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "pingwatch.toml")]
    config: PathBuf,

    /// Ping interval in seconds (overrides config)
    #[arg(short, long)]
    interval: Option<u32>,

    /// Label prefix (overrides config)
    #[arg(short, long)]
    title: Option<String>,

    /// JSON status file mirroring the label (overrides config)
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (session lifecycle, escalation steps)
    #[arg(short, long)]
    verbose: bool,

    /// Only errors and warnings
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut PingwatchConfig) {
        if let Some(host) = &self.host {
            config.probe.host = host.clone();
        }
        if let Some(interval) = self.interval {
            config.probe.interval_secs = interval;
        }
        if let Some(title) = &self.title {
            config.probe.title = title.clone();
        }
        if let Some(path) = &self.status_file {
            config.display.status_file = Some(path.clone());
        }
    }

    fn load_config(&self) -> Result<PingwatchConfig, config::ConfigError> {
        let mut config = config::load(&self.config)?;
        self.apply_overrides(&mut config);
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "pingwatch=debug"
    } else if cli.quiet {
        "pingwatch=warn"
    } else {
        "pingwatch=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pingwatch: {e}");
            std::process::exit(1);
        }
    };

    if cli.dry_run {
        println!("pingwatch v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", cli.config.display());
        println!(
            "Probe: {} {}",
            config.probe.command,
            config.probe.build_args().join(" ")
        );
        println!("Title: {:?}", config.probe.title);
        println!(
            "Shutdown bounds: SIGTERM {} ms, SIGKILL {} ms",
            config.shutdown.term_timeout_ms, config.shutdown.kill_timeout_ms
        );
        if let Some(path) = &config.display.status_file {
            println!("Status file: {}", path.display());
        }
        return;
    }

    if let Err(e) = run(&cli, config).await {
        eprintln!("pingwatch: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, config: PingwatchConfig) -> std::io::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut toggle = signal(SignalKind::user_defined1())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let status_panel = config
        .display
        .status_file
        .clone()
        .map(|path| Arc::new(StatusFilePanel::new(path)));
    let mut panels = PanelSet::new();
    panels.push(Box::new(TerminalPanel::new(config.display.quiet_terminal)));
    if let Some(status_panel) = &status_panel {
        panels.push(Box::new(Arc::clone(status_panel)));
    }
    let panel: Arc<dyn Panel> = Arc::new(panels);

    let controller = Controller::new(Arc::clone(&panel), config.shutdown);
    let mut applet = Applet::new(controller, panel, config.probe);

    tracing::info!("pingwatch starting");
    applet.attach().await;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!(path = %cli.config.display(), "SIGHUP, reloading config");
                match cli.load_config() {
                    Ok(config) => applet.config_changed(config.probe).await,
                    Err(e) => tracing::error!(error = %e, "config reload failed, keeping current settings"),
                }
            }
            _ = toggle.recv() => applet.toggle().await,
            _ = interrupt.recv() => break,
            _ = terminate.recv() => break,
        }
    }

    tracing::info!(attached = applet.is_attached(), "shutting down");
    match applet.detach().await {
        StopOutcome::Stopped(SessionReport {
            id,
            end,
            shutdown: ShutdownOutcome::Terminated { forced, status },
        }) => tracing::info!(session = %id, ?end, forced, %status, "probe terminated"),
        StopOutcome::Stopped(SessionReport {
            id,
            end,
            shutdown: ShutdownOutcome::Exited(status),
        }) => tracing::info!(session = %id, ?end, ?status, "probe had already exited"),
        StopOutcome::Aborted(id) => tracing::error!(session = %id, "probe session aborted"),
        outcome => tracing::debug!(?outcome, "probe stopped"),
    }

    if let Some(status_panel) = status_panel {
        status_panel.remove();
    }
    Ok(())
}
