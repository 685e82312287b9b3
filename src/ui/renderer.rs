//! Terminal renderer using crossterm
//!
//! Paints the scrollback, the prompt and the edit line. History bytes are
//! shown as text only: invalid UTF-8 becomes U+FFFD and control characters
//! other than newline and tab are dropped, escape sequences included.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, SetCursorStyle, Show},
    event::{DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen, SetTitle,
    },
};
use unicode_width::UnicodeWidthChar;

use crate::config::{Color, ColorScheme};
use crate::core::session::{CursorStyle, Session};
use crate::core::utf8::decode_rune;

const TAB_STOP: usize = 8;

/// What a run of text on screen belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Output,
    Prompt,
    Edit,
}

/// One screen row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub spans: Vec<(SpanKind, String)>,
    /// Display width in cells
    pub width: usize,
}

impl Line {
    fn push(&mut self, kind: SpanKind, ch: char, width: usize) {
        self.width += width;
        if let Some((last, text)) = self.spans.last_mut() {
            if *last == kind {
                text.push(ch);
                return;
            }
        }
        self.spans.push((kind, ch.to_string()));
    }

    pub fn text(&self) -> String {
        self.spans.iter().map(|(_, text)| text.as_str()).collect()
    }
}

/// Screen position of one edit-line rune
#[derive(Debug, Clone, Copy)]
struct EditCell {
    row: usize,
    col: usize,
    width: usize,
    start: usize,
    end: usize,
}

/// Breaks characters into rows of at most `cols` cells
struct Wrapper {
    cols: usize,
    lines: Vec<Line>,
}

impl Wrapper {
    fn new(cols: usize) -> Self {
        Self {
            cols,
            lines: vec![Line::default()],
        }
    }

    fn current(&self) -> &Line {
        &self.lines[self.lines.len() - 1]
    }

    fn current_mut(&mut self) -> &mut Line {
        let last = self.lines.len() - 1;
        &mut self.lines[last]
    }

    /// Where the next glyph would start
    fn position(&self) -> (usize, usize) {
        let width = self.current().width;
        if width >= self.cols {
            (self.lines.len(), 0)
        } else {
            (self.lines.len() - 1, width)
        }
    }

    /// Place one character; returns where it starts.
    fn put(&mut self, kind: SpanKind, ch: char) -> (usize, usize) {
        match ch {
            '\n' => {
                let at = self.position();
                self.lines.push(Line::default());
                at
            }
            '\t' => {
                let spaces = TAB_STOP - self.current().width % TAB_STOP;
                let mut at = None;
                for _ in 0..spaces {
                    let pos = self.put(kind, ' ');
                    at.get_or_insert(pos);
                }
                at.unwrap_or_else(|| self.position())
            }
            c if c.is_control() => self.position(),
            c => {
                let width = c.width().unwrap_or(0);
                let line = self.current();
                if width > 0 && line.width > 0 && line.width + width > self.cols {
                    self.lines.push(Line::default());
                }
                let at = (self.lines.len() - 1, self.current().width);
                self.current_mut().push(kind, c, width);
                at
            }
        }
    }
}

/// A laid-out screen
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Visible rows, top to bottom
    pub lines: Vec<Line>,
    /// Cursor cell, if it is inside the viewport
    pub cursor: Option<(u16, u16)>,
    /// Rows hidden below the viewport
    pub scrolled_lines: usize,
    /// Largest useful scroll position in pages
    pub max_scroll: usize,
    cells: Vec<EditCell>,
    edit_end: Option<(usize, usize)>,
    edit_len: usize,
}

impl Frame {
    /// Byte offset in the edit line for a click at (`col`, `row`).
    pub fn offset_at(&self, col: u16, row: u16) -> Option<usize> {
        let (col, row) = (col as usize, row as usize);
        let mut on_row = self.cells.iter().filter(|c| c.row == row).peekable();

        let Some(first) = on_row.peek().copied() else {
            return match self.edit_end {
                Some((end_row, _)) if end_row == row => Some(self.edit_len),
                _ => None,
            };
        };
        if col < first.col {
            return Some(first.start);
        }
        let hit = on_row.take_while(|c| c.col <= col).last().unwrap_or(first);
        if col >= hit.col + hit.width.max(1) {
            Some(hit.end)
        } else {
            Some(hit.start)
        }
    }
}

/// Lay out `history` followed by `prefix` and the edit line.
///
/// `scroll` counts pages of `rows - 1` lines back from the newest output.
pub fn layout(
    history: &[u8],
    prefix: &str,
    edit: &[u8],
    cursor: usize,
    cols: u16,
    rows: u16,
    scroll: usize,
) -> Frame {
    let cols = (cols as usize).max(1);
    let rows = (rows as usize).max(1);
    let page = (rows - 1).max(1);

    let needed = scroll
        .saturating_mul(page)
        .saturating_add(rows)
        .saturating_add(1);
    let start = tail_start(history, needed);

    let mut wrapper = Wrapper::new(cols);
    for ch in String::from_utf8_lossy(&history[start..]).chars() {
        wrapper.put(SpanKind::Output, ch);
    }
    for ch in prefix.chars() {
        wrapper.put(SpanKind::Prompt, ch);
    }

    let mut cells = Vec::new();
    let mut cursor_at = None;
    let mut pos = 0;
    while pos < edit.len() {
        let (ch, len) = decode_rune(&edit[pos..]);
        let (row, col) = wrapper.put(SpanKind::Edit, ch);
        let width = if row == wrapper.lines.len() - 1 {
            wrapper.current().width - col
        } else {
            0
        };
        if pos == cursor {
            cursor_at = Some((row, col));
        }
        cells.push(EditCell {
            row,
            col,
            width,
            start: pos,
            end: pos + len,
        });
        pos += len;
    }
    let end = wrapper.position();
    let cursor_at = cursor_at.unwrap_or(end);
    if end.0 >= wrapper.lines.len() {
        wrapper.lines.push(Line::default());
    }

    let lines = wrapper.lines;
    let total = lines.len();
    let overflow = total.saturating_sub(rows);
    let max_scroll = if start == 0 {
        overflow.div_ceil(page)
    } else {
        usize::MAX
    };
    let top = overflow.saturating_sub(scroll.min(max_scroll).saturating_mul(page));
    let bottom = (top + rows).min(total);

    let visible_row = |row: usize| (top..bottom).contains(&row).then(|| row - top);
    Frame {
        cursor: visible_row(cursor_at.0).map(|row| (cursor_at.1 as u16, row as u16)),
        scrolled_lines: total - bottom,
        max_scroll,
        cells: cells
            .into_iter()
            .filter_map(|c| visible_row(c.row).map(|row| EditCell { row, ..c }))
            .collect(),
        edit_end: visible_row(end.0).map(|row| (row, end.1)),
        edit_len: edit.len(),
        lines: lines[top..bottom].to_vec(),
    }
}

/// Start of the last `lines` newline-terminated lines of `bytes`
fn tail_start(bytes: &[u8], lines: usize) -> usize {
    let mut seen = 0;
    for (idx, &b) in bytes.iter().enumerate().rev() {
        if b == b'\n' {
            seen += 1;
            if seen > lines {
                return idx + 1;
            }
        }
    }
    0
}

/// Terminal renderer
pub struct Renderer {
    /// Whether the terminal has been initialized
    initialized: bool,
    colors: ColorScheme,
    /// Last painted frame, for hit testing
    frame: Frame,
    font: Option<String>,
}

impl Renderer {
    pub fn new(colors: ColorScheme) -> Self {
        Self {
            initialized: false,
            colors,
            frame: Frame::default(),
            font: None,
        }
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        self.initialized = true;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableMouseCapture,
            EnableBracketedPaste,
            DisableLineWrap,
            SetTitle("runeterm"),
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;

        // Cursor color (OSC 12)
        let c = self.colors.cursor;
        write!(stdout, "\x1b]12;#{:02x}{:02x}{:02x}\x07", c.r, c.g, c.b)?;

        stdout.flush()?;
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();

        // Reset cursor color
        write!(stdout, "\x1b]112\x07")?;

        let _ = execute!(
            stdout,
            ResetColor,
            SetAttribute(Attribute::Reset),
            SetCursorStyle::DefaultUserShape,
            Show,
            EnableLineWrap,
            DisableBracketedPaste,
            DisableMouseCapture,
            LeaveAlternateScreen
        );
        let _ = stdout.flush();

        terminal::disable_raw_mode()?;
        Ok(())
    }

    /// Byte offset in the edit line under a screen cell
    pub fn offset_at(&self, col: u16, row: u16) -> Option<usize> {
        self.frame.offset_at(col, row)
    }

    /// Paint the session. Returns the largest useful scroll position.
    pub fn render(&mut self, session: &Session) -> io::Result<usize> {
        let (cols, rows) = session.size();
        let prefix = if session.is_running() { "" } else { session.prompt() };
        let frame = layout(
            session.history_bytes(),
            prefix,
            session.edit_bytes(),
            session.cursor_offset(),
            cols,
            rows,
            session.scroll(),
        );

        let stdout = io::stdout();
        let mut stdout = io::BufWriter::with_capacity(65536, stdout.lock());

        // Begin synchronized update (reduces flicker)
        write!(stdout, "\x1b[?2026h")?;
        queue!(stdout, Hide, SetBackgroundColor(self.colors.background.to_crossterm()))?;

        if session.font() != self.font.as_deref() {
            self.font = session.font().map(str::to_string);
            if let Some(font) = &self.font {
                queue!(stdout, SetTitle(format!("runeterm [{}]", font)))?;
            }
        }

        for row in 0..rows {
            queue!(stdout, MoveTo(0, row))?;
            if let Some(line) = frame.lines.get(row as usize) {
                for (kind, text) in &line.spans {
                    queue!(
                        stdout,
                        SetForegroundColor(self.color_for(*kind).to_crossterm()),
                        Print(text)
                    )?;
                }
            }
            queue!(stdout, Clear(ClearType::UntilNewLine))?;
        }

        // Show scroll indicator if scrolled
        if frame.scrolled_lines > 0 {
            queue!(
                stdout,
                MoveTo(0, 0),
                SetBackgroundColor(self.colors.indicator_bg.to_crossterm()),
                SetForegroundColor(self.colors.indicator_fg.to_crossterm()),
                Print(format!("[↑ {} lines]", frame.scrolled_lines))
            )?;
        }
        queue!(stdout, ResetColor, SetAttribute(Attribute::Reset))?;

        if let Some((col, row)) = frame.cursor {
            queue!(
                stdout,
                MoveTo(col, row),
                cursor_shape(session.cursor_style()),
                Show
            )?;
        }

        // End synchronized update
        write!(stdout, "\x1b[?2026l")?;
        stdout.flush()?;

        let max_scroll = frame.max_scroll;
        self.frame = frame;
        Ok(max_scroll)
    }

    fn color_for(&self, kind: SpanKind) -> Color {
        match kind {
            SpanKind::Output => self.colors.foreground,
            SpanKind::Prompt => self.colors.prompt,
            SpanKind::Edit => self.colors.edit,
        }
    }

    /// Get terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Terminal cursor shape for a cursor style. Terminals have no hollow
/// block, so the outline style is drawn as an underscore.
fn cursor_shape(style: CursorStyle) -> SetCursorStyle {
    match style {
        CursorStyle::Block => SetCursorStyle::SteadyBlock,
        CursorStyle::Outline => SetCursorStyle::SteadyUnderScore,
        CursorStyle::Bar => SetCursorStyle::SteadyBar,
    }
}
