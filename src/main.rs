use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tab_switcher::bus::message::BusMessage;
use tab_switcher::bus::socket::SocketBus;
use tab_switcher::config::{Config, RuntimePaths};
use tab_switcher::election::LeaderElection;
use tab_switcher::helper::{HelperOptions, HelperState, shortcut_labels};
use tab_switcher::native::channel::FrameSender;

const LOG_ENV: &str = "TAB_SWITCHER_LOG";
const EXTENSION_ORIGIN: &str = "chrome-extension://";

#[derive(Parser)]
#[command(name = "tab-switcher", about = "Native helper for keyboard tab switching", version)]
struct Cli {
    /// Config file (default: ~/.config/tab-switcher/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the lock file and bus socket
    #[arg(long, global = true)]
    runtime_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Arguments the browser passes when it starts a native host
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    launch_args: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve an extension over stdin/stdout
    Run {
        /// Never grab the keyboard, even as leader
        #[arg(long)]
        no_hook: bool,
    },
    /// Tell running helpers to reload their shortcuts
    NotifyShortcutsChanged,
    /// Show the current leader and configuration
    Status,
}

fn init_tracing(config_level: Option<&str>) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(config_level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the extension channel.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref());
    init_tracing(config.as_ref().ok().and_then(|c| c.log_level.as_deref()));
    if let Err(e) = &config {
        tracing::warn!(error = %e, "config unusable, using defaults");
    }

    let launched_by_browser = cli.launch_args.iter().any(|a| a.starts_with(EXTENSION_ORIGIN));
    let command = match cli.command {
        Some(command) => command,
        None if launched_by_browser => Command::Run { no_hook: false },
        None => {
            eprintln!(
                "tab-switcher is started by the browser extension.\n\
                 Available commands: status, notify-shortcuts-changed"
            );
            Command::Status
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let paths = RuntimePaths::resolve(cli.runtime_dir.as_deref());
    let code = runtime.block_on(async {
        match command {
            Command::Run { no_hook } => {
                let options = HelperOptions {
                    config_path: cli.config.clone(),
                    runtime_dir: cli.runtime_dir.clone(),
                    keyboard_hook: !no_hook,
                };
                let helper = HelperState::new(options, FrameSender::new(tokio::io::stdout()));
                match helper.run(tokio::io::stdin()).await {
                    Ok(()) => ExitCode::SUCCESS,
                    Err(e) => {
                        tracing::error!(error = %e, "helper failed");
                        ExitCode::FAILURE
                    }
                }
            }
            Command::NotifyShortcutsChanged => {
                match SocketBus::send_once(&paths.bus_socket, &BusMessage::ShortcutsChanged {}).await {
                    Ok(()) => {
                        println!("Notified running helpers.");
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        eprintln!("No running helper to notify: {e}");
                        ExitCode::FAILURE
                    }
                }
            }
            Command::Status => {
                let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
                print_status(&paths, &config_path, config.as_ref().ok());
                ExitCode::SUCCESS
            }
        }
    });

    runtime.shutdown_timeout(Duration::from_millis(500));
    code
}

fn print_status(paths: &RuntimePaths, config_path: &Path, config: Option<&Config>) {
    println!("runtime dir:  {}", paths.dir.display());
    match LeaderElection::current_holder(&paths.lock_file) {
        Some(pid) => println!("leader:       pid {pid}"),
        None => println!("leader:       none"),
    }
    println!(
        "bus socket:   {}",
        if paths.bus_socket.exists() { "present" } else { "absent" }
    );
    println!("config:       {}", config_path.display());

    let default = Config::default();
    let config = config.unwrap_or(&default);
    let labels = shortcut_labels(&config.shortcuts);
    println!("tab switch:   {}", labels.tab_switch);
    println!("copy url:     {}", labels.copy_url);
    match config.catalog() {
        Ok(catalog) => {
            for browser in catalog.iter() {
                println!(
                    "browser:      {} ({}){}",
                    browser.name,
                    browser.id,
                    if browser.enabled { "" } else { " [disabled]" }
                );
            }
        }
        Err(e) => println!("browsers:     invalid: {e}"),
    }
}
