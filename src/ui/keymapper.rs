//! Key mapping for terminal input
//!
//! Converts crossterm key and mouse events to session commands.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};

use crate::core::session::Command;

/// Font requested by F3
pub const FONT_PROPORTIONAL: &str = "Sans 10";
/// Font requested by F4
pub const FONT_FIXED: &str = "Dina 10";

/// Ctrl+U clears the line instead of reaching the job
const KILL_LINE: u8 = 0x15;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Key mapper for converting input events to commands
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to a command
    pub fn map(event: &KeyEvent) -> Option<Command> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Self::map_char(ch, mods),

            KeyCode::Enter => Some(Command::Submit),
            KeyCode::Backspace => Some(Command::Backspace),
            KeyCode::Tab => Some(Command::Insert("\t".to_string())),
            KeyCode::Esc => Some(Command::Close),

            KeyCode::Left => Some(Command::MoveCursor(-1)),
            KeyCode::Right => Some(Command::MoveCursor(1)),
            KeyCode::Home => Some(Command::Home),
            KeyCode::End => Some(Command::End),
            KeyCode::Up => Some(Command::RecallPrevious),
            KeyCode::Down => Some(Command::RecallNext),
            KeyCode::PageUp => Some(Command::Scroll(1)),
            KeyCode::PageDown => Some(Command::Scroll(-1)),

            KeyCode::F(1) => Some(Command::CycleCursorStyle(-1)),
            KeyCode::F(2) => Some(Command::CycleCursorStyle(1)),
            KeyCode::F(3) => Some(Command::SetFont(FONT_PROPORTIONAL.to_string())),
            KeyCode::F(4) => Some(Command::SetFont(FONT_FIXED.to_string())),

            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Option<Command> {
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            let code = match ch {
                'a'..='z' => (ch as u8) - b'a' + 1,
                'A'..='Z' => (ch as u8) - b'A' + 1,
                '@' | '`' | ' ' => 0x00,
                '[' => 0x1B,
                '\\' => 0x1C,
                ']' => 0x1D,
                '^' | '~' => 0x1E,
                '_' | '?' => 0x1F,
                _ => return None,
            };
            return Some(match code {
                KILL_LINE => Command::KillLine,
                _ => Command::Control(code),
            });
        }

        // Alt chords have no meaning at the prompt
        if mods.contains(Modifiers::ALT) {
            return None;
        }

        Some(Command::Insert(ch.to_string()))
    }

    /// Map a mouse event. `hit` turns a screen cell into an edit-line byte
    /// offset, or None when the cell is outside the edit line.
    pub fn map_mouse(
        event: &MouseEvent,
        hit: impl FnOnce(u16, u16) -> Option<usize>,
    ) -> Option<Command> {
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                hit(event.column, event.row).map(Command::SetCursor)
            }
            MouseEventKind::ScrollUp => Some(Command::Scroll(1)),
            MouseEventKind::ScrollDown => Some(Command::Scroll(-1)),
            _ => None,
        }
    }
}
