//! Core shell components.
//!
//! - **utf8**: forward/backward rune decoding
//! - **buffer**: edit line and scrollback buffers
//! - **pty**: pseudo-terminal pair and child spawning
//! - **selfpipe**: signal to readable-descriptor bridge
//! - **job**: job records and exit classification
//! - **shell**: job control over the pty
//! - **session**: buffers + shell behind the presentation-facing API
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── EditBuffer
//! ├── HistoryBuffer
//! └── Shell
//!     ├── Pty (master/slave pair)
//!     ├── SelfPipe (SIGCHLD)
//!     └── Vec<Job>
//! ```

pub mod buffer;
pub mod job;
pub mod pty;
pub mod selfpipe;
pub mod session;
pub mod shell;
pub mod utf8;
