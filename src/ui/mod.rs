//! User interface rendering and input handling.
//!
//! - **keymapper**: key and mouse events to session commands
//! - **renderer**: crossterm painter for scrollback and the edit line
//! - **display**: the terminal as the reactor's display connection

pub mod display;
pub mod keymapper;
pub mod renderer;

pub use display::TerminalDisplay;
pub use renderer::Renderer;
