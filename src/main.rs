use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::consts::{SIGHUP, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing_subscriber::EnvFilter;

use loadgen::client::memory::MemoryClient;
use loadgen::plan::{Control, Supervisor};

/// Drive a key-value cluster with a model-driven workload.
#[derive(Debug, Parser)]
#[command(name = "loadgen", version, about)]
struct Cli {
    /// Path to the PID file.
    #[arg(long, default_value = "loadgen.pid")]
    pid: PathBuf,

    /// Path to the log file.
    #[arg(long, default_value = "loadgen.log")]
    log: PathBuf,

    /// Path to the plan file.
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// Statistics reporting interval.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    log_interval: Duration,

    /// Log to stdout instead of the log file.
    #[arg(long)]
    verbose: bool,

    /// Send a signal to the running daemon and exit.
    #[arg(long, value_enum)]
    signal: Option<SignalArg>,

    /// Query or control the running daemon.
    #[arg(value_enum)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SignalArg {
    Quit,
    Stop,
    Reload,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Command {
    Status,
    Start,
    Stop,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(signal) = cli.signal {
        let signal = match signal {
            SignalArg::Quit => Signal::SIGQUIT,
            SignalArg::Stop => Signal::SIGTERM,
            SignalArg::Reload => Signal::SIGHUP,
        };
        return send_signal(&cli.pid, signal);
    }

    match cli.command.unwrap_or(Command::Start) {
        Command::Status => status(&cli.pid),
        Command::Stop => send_signal(&cli.pid, Signal::SIGTERM),
        Command::Start => start(cli),
    }
}

fn start(cli: Cli) -> Result<()> {
    init_logging(&cli)?;
    write_pid_file(&cli.pid)?;

    let supervisor: Supervisor<MemoryClient> = Supervisor::new(cli.config.clone());
    let (control_tx, control_rx) = mpsc::channel();

    let mut signals =
        Signals::new([SIGTERM, SIGQUIT, SIGHUP]).context("installing signal handlers")?;
    {
        let control_tx = control_tx.clone();
        thread::spawn(move || {
            for signal in signals.forever() {
                let message = match signal {
                    SIGHUP => Control::Reload,
                    _ => Control::Shutdown,
                };
                tracing::info!("received signal {signal}, {message:?}");
                if control_tx.send(message).is_err() || message == Control::Shutdown {
                    return;
                }
            }
        });
    }

    let result = supervisor.run(control_tx, control_rx, cli.log_interval);
    let _ = fs::remove_file(&cli.pid);
    result
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cli.log)
            .with_context(|| format!("opening log file {}", cli.log.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}

fn write_pid_file(path: &Path) -> Result<()> {
    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(pid) = raw.trim().parse::<i32>() {
            if kill(Pid::from_raw(pid), None).is_ok() {
                bail!("another instance is already running with pid {pid}");
            }
        }
    }
    fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("writing pid file {}", path.display()))
}

fn read_pid(path: &Path) -> Result<Pid> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading pid file {}", path.display()))?;
    let pid = raw
        .trim()
        .parse::<i32>()
        .with_context(|| format!("pid file {} is malformed", path.display()))?;
    Ok(Pid::from_raw(pid))
}

fn send_signal(path: &Path, signal: Signal) -> Result<()> {
    let pid = read_pid(path)?;
    kill(pid, signal).with_context(|| format!("signaling pid {pid}"))?;
    Ok(())
}

fn status(path: &Path) -> Result<()> {
    match read_pid(path) {
        Ok(pid) if kill(pid, None).is_ok() => {
            println!("loadgen is running (pid {pid})");
            Ok(())
        }
        _ => {
            println!("loadgen is stopped");
            std::process::exit(1);
        }
    }
}
