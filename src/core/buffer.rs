//! Edit and history buffers
//!
//! The edit buffer holds the line being composed. Its capacity is fixed at
//! creation and input that does not fit is dropped without an error, which
//! is what the prompt has always done. The history buffer is the append-only
//! scrollback; it grows by doubling and never loses bytes.

use thiserror::Error;
use tracing::debug;

use super::utf8::{decode_last_rune, decode_rune, floor_boundary};

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("history buffer growth overflowed (capacity {capacity}, length {len}, appending {additional})")]
    Overflow {
        capacity: usize,
        len: usize,
        additional: usize,
    },

    #[error("history buffer allocation of {0} bytes failed")]
    Alloc(usize),
}

/// The line under edit.
///
/// Invariant: `cursor <= len() <= capacity()` and `cursor` sits on a rune
/// boundary.
#[derive(Debug, Clone)]
pub struct EditBuffer {
    data: Vec<u8>,
    capacity: usize,
    cursor: usize,
}

impl EditBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[allow(dead_code)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Byte offset of the cursor
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes that still fit
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Insert `bytes` at the cursor and move the cursor past them.
    ///
    /// Input that does not fit in the remaining capacity is dropped whole and
    /// the buffer is left untouched.
    pub fn insert(&mut self, bytes: &[u8]) {
        if self.remaining() < bytes.len() {
            debug!(
                dropped = bytes.len(),
                remaining = self.remaining(),
                "edit buffer full, dropping input"
            );
            return;
        }
        self.data.splice(self.cursor..self.cursor, bytes.iter().copied());
        self.cursor += bytes.len();
    }

    /// Delete the rune before the cursor. Returns false at the start of the line.
    pub fn backspace(&mut self) -> bool {
        let (_, len) = decode_last_rune(&self.data[..self.cursor]);
        if len == 0 {
            return false;
        }
        self.data.drain(self.cursor - len..self.cursor);
        self.cursor -= len;
        true
    }

    /// Move the cursor one rune forward (`dir > 0`) or back (`dir < 0`).
    /// Returns whether the cursor moved.
    pub fn move_cursor(&mut self, dir: i32) -> bool {
        let next = match dir.signum() {
            1 => {
                let (_, len) = decode_rune(&self.data[self.cursor..]);
                self.cursor + len
            }
            -1 => {
                let (_, len) = decode_last_rune(&self.data[..self.cursor]);
                self.cursor - len
            }
            _ => return false,
        };
        if next > self.data.len() || next == self.cursor {
            return false;
        }
        self.cursor = next;
        true
    }

    /// Put the cursor at `offset`, clamped to the line and snapped back to a
    /// rune boundary.
    pub fn set_cursor(&mut self, offset: usize) -> bool {
        let next = floor_boundary(&self.data, offset);
        let moved = next != self.cursor;
        self.cursor = next;
        moved
    }

    /// Replace the whole line, cursor at the end. Oversized text is dropped.
    pub fn set_text(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.capacity {
            return false;
        }
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.cursor = self.data.len();
        true
    }

    /// Reset length and cursor to zero. Capacity is kept.
    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }
}

/// Append-only scrollback.
#[derive(Debug, Clone, Default)]
pub struct HistoryBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[allow(dead_code)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `bytes`, growing to `max(2 * capacity, len + bytes.len())`
    /// when they do not fit.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if self.capacity - self.data.len() < bytes.len() {
            let target = grow_target(self.capacity, self.data.len(), bytes.len())?;
            self.data
                .try_reserve_exact(target - self.data.len())
                .map_err(|_| BufferError::Alloc(target))?;
            self.capacity = target;
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }
}

fn grow_target(capacity: usize, len: usize, additional: usize) -> Result<usize, BufferError> {
    let overflow = || BufferError::Overflow {
        capacity,
        len,
        additional,
    };
    let doubled = capacity.checked_mul(2).ok_or_else(overflow)?;
    let needed = len.checked_add(additional).ok_or_else(overflow)?;
    Ok(doubled.max(needed))
}
