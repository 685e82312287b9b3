//! Configuration and color scheme management for runeterm.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.runeterm/config.toml`
//! - Built-in color schemes for the prompt, edit line and scrollback
//!
//! # Configuration File
//!
//! ```toml
//! # Interpreter that runs each command line
//! shell = "/bin/sh"
//! shell_flag = "-c"
//!
//! # TERM value seen by jobs
//! term = "magicalterm"
//!
//! prompt = "% "
//! edit_capacity = 256
//! redraw_fps = 30
//!
//! # block, outline or bar
//! cursor_style = "block"
//!
//! # default, solarized-dark, nord, tokyo-night
//! color_scheme = "nord"
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::core::session::{CursorStyle, SessionConfig};
use crate::core::shell::ShellConfig;

/// Directory under `$HOME` holding the config file and the log
pub const APP_DIR: &str = ".runeterm";

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interpreter that runs each command line
    pub shell: String,
    /// Flag that makes the interpreter take a command line argument
    pub shell_flag: String,
    /// TERM value in the job environment
    pub term: String,
    pub prompt: String,
    /// Fixed size of the edit line in bytes
    pub edit_capacity: usize,
    /// Initial scrollback allocation in bytes
    pub history_capacity: usize,
    /// Repaint ticks per second
    pub redraw_fps: u32,
    /// Upper bound on one reactor wait
    pub wait_timeout_ms: u64,
    /// Keep a private copy of every job's output
    pub keep_job_output: bool,
    pub cursor_style: CursorStyle,
    /// Color scheme name
    pub color_scheme: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            shell_flag: "-c".to_string(),
            term: "magicalterm".to_string(),
            prompt: "% ".to_string(),
            edit_capacity: 256,
            history_capacity: 0,
            redraw_fps: 30,
            wait_timeout_ms: 1000,
            keep_job_output: false,
            cursor_style: CursorStyle::Block,
            color_scheme: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!("Ignoring {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        app_dir().map(|dir| dir.join("config.toml"))
    }

    /// Time between repaint ticks
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.redraw_fps.max(1)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms.max(1))
    }

    /// Session parameters for a window of `cols` x `rows`
    pub fn session_config(&self, cols: u16, rows: u16) -> SessionConfig {
        SessionConfig {
            shell: ShellConfig {
                program: self.shell.clone(),
                flag: self.shell_flag.clone(),
                term: self.term.clone(),
                keep_job_output: self.keep_job_output,
                cols,
                rows,
            },
            prompt: self.prompt.clone(),
            edit_capacity: self.edit_capacity,
            history_capacity: self.history_capacity,
            cursor_style: self.cursor_style,
        }
    }

    /// Get the color scheme
    pub fn get_color_scheme(&self) -> ColorScheme {
        ColorScheme::by_name(&self.color_scheme)
    }
}

/// `~/.runeterm`, if a home directory is known
pub fn app_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(APP_DIR))
}

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }
}

/// Color scheme definition
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub name: String,

    pub background: Color,
    /// Scrollback text
    pub foreground: Color,
    pub prompt: Color,
    /// Text under edit
    pub edit: Color,
    pub cursor: Color,

    // Scroll position indicator
    pub indicator_bg: Color,
    pub indicator_fg: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self::default_scheme()
    }
}

impl ColorScheme {
    /// Default color scheme
    pub fn default_scheme() -> Self {
        Self {
            name: "default".to_string(),
            background: Color::new(0, 0, 0),
            foreground: Color::new(204, 204, 204),
            prompt: Color::new(100, 150, 255),
            edit: Color::new(255, 255, 255),
            cursor: Color::new(255, 255, 255),
            indicator_bg: Color::new(200, 200, 0),
            indicator_fg: Color::new(0, 0, 0),
        }
    }

    /// Solarized Dark scheme
    pub fn solarized_dark() -> Self {
        Self {
            name: "solarized-dark".to_string(),
            background: Color::new(0, 43, 54),
            foreground: Color::new(147, 161, 161),
            prompt: Color::new(38, 139, 210),
            edit: Color::new(253, 246, 227),
            cursor: Color::new(181, 137, 0),
            indicator_bg: Color::new(181, 137, 0),
            indicator_fg: Color::new(0, 43, 54),
        }
    }

    /// Nord scheme
    pub fn nord() -> Self {
        Self {
            name: "nord".to_string(),
            background: Color::new(46, 52, 64),
            foreground: Color::new(216, 222, 233),
            prompt: Color::new(136, 192, 208),
            edit: Color::new(236, 239, 244),
            cursor: Color::new(163, 190, 140),
            indicator_bg: Color::new(163, 190, 140),
            indicator_fg: Color::new(46, 52, 64),
        }
    }

    /// Tokyo Night scheme
    pub fn tokyo_night() -> Self {
        Self {
            name: "tokyo-night".to_string(),
            background: Color::new(26, 27, 38),
            foreground: Color::new(169, 177, 214),
            prompt: Color::new(122, 162, 247),
            edit: Color::new(192, 202, 245),
            cursor: Color::new(158, 206, 106),
            indicator_bg: Color::new(158, 206, 106),
            indicator_fg: Color::new(26, 27, 38),
        }
    }

    /// Get scheme by name
    pub fn by_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "solarized-dark" | "solarized_dark" => Self::solarized_dark(),
            "nord" => Self::nord(),
            "tokyo-night" | "tokyo_night" | "tokyonight" => Self::tokyo_night(),
            _ => Self::default_scheme(),
        }
    }

    /// List available schemes
    pub fn list() -> Vec<&'static str> {
        vec!["default", "solarized-dark", "nord", "tokyo-night"]
    }
}
