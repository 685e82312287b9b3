//! runeterm - a line-editing front end for a Unix shell
//!
//! runeterm runs each command line you submit as a job on a pseudo-terminal
//! and keeps everything the jobs print in one scrollback. The line you type
//! is edited locally and only reaches the shell when you press Enter.
//!
//! # Quick Start
//!
//! ```text
//! runeterm                  # /bin/sh -c for every command line
//! runeterm -s /bin/bash     # another interpreter
//! runeterm --debug          # verbose log in ~/.runeterm/runeterm.log
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Enter | Run the line, or send it to the running job |
//! | Up/Down | Recall earlier command lines |
//! | PageUp/PageDown | Scroll the history |
//! | Ctrl+U | Clear the line |
//! | Ctrl+D | Quit (empty line, no job running) |
//! | F1/F2 | Cursor style |
//! | Esc | Quit |

mod config;
mod core;
mod reactor;
mod ui;

use std::env;
use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config;
use crate::core::session::Session;
use crate::reactor::{Reactor, ReactorConfig};
use crate::ui::{Renderer, TerminalDisplay};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding a log filter directive
const LOG_ENV: &str = "RUNETERM_LOG";

/// Command line options
#[derive(Debug, Default)]
struct Args {
    /// Interpreter override
    shell: Option<String>,
    /// Repaint rate override
    fps: Option<u32>,
    debug: bool,
}

fn print_version() {
    eprintln!("runeterm {}", VERSION);
}

fn print_help() {
    eprintln!("runeterm {} - A line-editing front end for a Unix shell", VERSION);
    eprintln!();
    eprintln!("Usage: runeterm [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <PATH>    Interpreter for command lines (default: /bin/sh)");
    eprintln!("  --fps <N>             Repaint rate (default: 30)");
    eprintln!("  --debug               Log at debug level");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Enter                 Run the line, or send it to the running job");
    eprintln!("  Up/Down               Recall earlier command lines");
    eprintln!("  PageUp/PageDown       Scroll the history");
    eprintln!("  Ctrl+U                Clear the line");
    eprintln!("  Ctrl+C, Ctrl+Z, ...   Sent to the running job");
    eprintln!("  Ctrl+D                Quit (empty line, no job running)");
    eprintln!("  F1/F2                 Previous/next cursor style");
    eprintln!("  F3/F4                 Proportional/fixed font");
    eprintln!("  Esc                   Quit");
    eprintln!();
    eprintln!("Configuration: ~/.runeterm/config.toml");
    eprintln!("Log:           ~/.runeterm/runeterm.log ({} overrides the level)", LOG_ENV);
    eprintln!();
    eprintln!("Color schemes: {}", config::ColorScheme::list().join(", "));
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args, String> {
    let args: Vec<String> = args.into_iter().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing shell argument".to_string());
                }
                parsed.shell = Some(args[i].clone());
            }
            "--fps" => {
                i += 1;
                let value = args.get(i).ok_or("Missing --fps argument")?;
                let fps = value
                    .parse::<u32>()
                    .ok()
                    .filter(|fps| *fps > 0)
                    .ok_or_else(|| format!("Invalid frame rate: {}", value))?;
                parsed.fps = Some(fps);
            }
            "--debug" => {
                parsed.debug = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Log to `~/.runeterm/runeterm.log`; the terminal itself is the display.
fn init_logging(debug: bool) {
    let Some(dir) = config::app_dir() else {
        return;
    };
    let _ = fs::create_dir_all(&dir);

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("runeterm.log"))
        .ok();

    if let Some(file) = log_file {
        let level = if debug { Level::DEBUG } else { Level::INFO };
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.as_str()));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args(env::args()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging(args.debug);
    info!("runeterm {} starting...", VERSION);

    run(args)
}

/// Start the shell, take over the terminal and run until exit.
fn run(args: Args) -> anyhow::Result<()> {
    // Command line overrides the config file
    let mut config = Config::load();
    if let Some(shell) = args.shell {
        config.shell = shell;
    }
    if let Some(fps) = args.fps {
        config.redraw_fps = fps;
    }

    let (cols, rows) = Renderer::size().context("Failed to query terminal size")?;
    info!("Shell: {} {}", config.shell, config.shell_flag);
    info!("Terminal size: {}x{}", cols, rows);

    // Everything that can fail at startup happens before the terminal
    // changes mode
    let mut session =
        Session::new(&config.session_config(cols, rows)).context("Failed to start shell")?;
    let mut reactor = Reactor::new(&ReactorConfig {
        frame_interval: config.frame_interval(),
        wait_timeout: config.wait_timeout(),
    })?;

    let scheme = config.get_color_scheme();
    info!("Color scheme: {}", scheme.name);
    let mut display = TerminalDisplay::new(Renderer::new(scheme))?;
    let result = reactor.run(&mut session, &mut display);
    let closed = display.close();

    session.exit();
    info!("runeterm exiting");
    result.and(closed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("runeterm")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(args(&["-s", "/bin/bash", "--fps", "60", "--debug"])).unwrap();
        assert_eq!(parsed.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(parsed.fps, Some(60));
        assert!(parsed.debug);

        let parsed = parse_args(args(&[])).unwrap();
        assert!(parsed.shell.is_none() && parsed.fps.is_none() && !parsed.debug);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(args(&["--shell"])).is_err());
        assert!(parse_args(args(&["--fps", "0"])).is_err());
        assert!(parse_args(args(&["--fps", "fast"])).is_err());
        assert!(parse_args(args(&["--bogus"])).is_err());
    }
}
