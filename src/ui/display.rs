//! The controlling terminal as the reactor's display connection

use std::io::{self, Stdin};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use tracing::debug;

use super::keymapper::KeyMapper;
use super::renderer::Renderer;
use crate::core::session::{Command, Session};
use crate::reactor::Display;

/// Events handled per dispatch before returning to the reactor
const MAX_EVENTS_PER_DISPATCH: usize = 256;

pub struct TerminalDisplay {
    stdin: Stdin,
    renderer: Renderer,
}

impl TerminalDisplay {
    /// Take over the terminal. The renderer is initialized here.
    pub fn new(mut renderer: Renderer) -> Result<Self> {
        renderer.init().context("Failed to initialize terminal")?;
        Ok(Self {
            stdin: io::stdin(),
            renderer,
        })
    }

    /// Give the terminal back
    pub fn close(mut self) -> Result<()> {
        self.renderer.cleanup().context("Failed to restore terminal")
    }

    fn handle(&mut self, event: Event, session: &mut Session) -> Result<()> {
        let command = match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => KeyMapper::map(&key),
            Event::Mouse(mouse) => {
                let renderer = &self.renderer;
                KeyMapper::map_mouse(&mouse, |col, row| renderer.offset_at(col, row))
            }
            Event::Paste(text) => Some(Command::Insert(text)),
            Event::Resize(cols, rows) => Some(Command::Resize { cols, rows }),
            _ => None,
        };

        if let Some(command) = command {
            debug!(?command, "display command");
            session.apply(command)?;
        }
        Ok(())
    }
}

impl Display for TerminalDisplay {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stdin.as_fd()
    }

    fn dispatch(&mut self, session: &mut Session) -> Result<()> {
        for _ in 0..MAX_EVENTS_PER_DISPATCH {
            if !event::poll(Duration::ZERO)? {
                break;
            }
            let event = event::read()?;
            self.handle(event, session)?;
            if session.is_exiting() {
                break;
            }
        }
        Ok(())
    }

    fn repaint(&mut self, session: &mut Session) -> Result<()> {
        let max_scroll = self.renderer.render(session)?;
        session.clamp_scroll(max_scroll);
        Ok(())
    }

    /// Resize events are queued inside crossterm and never make stdin
    /// readable, so drain on every tick as well.
    fn tick(&mut self, session: &mut Session) -> Result<()> {
        self.dispatch(session)
    }
}
