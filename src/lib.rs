//! # unikey
//!
//! Unicode keystroke decoder for raw console input batches.
//!
//! A console in raw mode does not hand you characters: it hands you batches
//! of key-down/key-up notifications where a multi-byte character arrives as
//! one event per UTF-8 byte and a modifier combination arrives as separate
//! notifications spread over time. unikey reassembles that stream into
//! discrete logical keystrokes: a decoded Unicode scalar (or the U+FFFD
//! replacement marker when the byte sequence is ambiguous) plus a
//! Ctrl/Shift/Alt bitmask and any compound virtual key codes.
//!
//! ## Architecture
//!
//! ```text
//! EventSource (device seam) → Decoder (automaton + re-injection queue) → Keystroke
//! ```
//!
//! Events read in a batch but belonging to the *next* keystroke are parked
//! in a bounded re-injection queue and re-delivered on the next call, so
//! one decode call always yields exactly one keystroke.
//!
//! ## Modules
//!
//! - [`types`] - Raw events, modifier bitmask, virtual key codes, [`Keystroke`]
//! - [`decoder`] - The decoding automaton
//! - [`source`] - The [`EventSource`] seam and the portable crossterm source
//! - [`console`] - Raw Windows console device (Windows only)
//!
//! ## Example
//!
//! ```ignore
//! use unikey::{Decoder, TermSource};
//!
//! let mut decoder = Decoder::new(TermSource::new()?);
//! loop {
//!     let key = decoder.decode_next_keystroke()?;
//!     println!("scalar {:#x}, modifiers {:#010x}", key.scalar(), key.modifiers());
//! }
//! ```

pub mod decoder;
pub mod source;
pub mod types;

#[cfg(windows)]
pub mod console;

pub use decoder::{Decoder, QUEUE_CAPACITY};
pub use source::{EventSource, TermSource, convert_key_event};
pub use types::{Keystroke, Modifiers, RawKeyEvent, REPLACEMENT_SCALAR, vk};

#[cfg(windows)]
pub use console::ConsoleSource;
