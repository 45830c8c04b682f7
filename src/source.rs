//! Event Source - the batch reader seam
//!
//! The decoder never talks to a device directly; it consumes batches of
//! [`RawKeyEvent`] through the [`EventSource`] trait. Two implementations
//! ship with the crate:
//!
//! - [`TermSource`] (here) - portable, built on crossterm's event stream
//! - [`ConsoleSource`](crate::console) - raw Windows console device
//!
//! # API
//!
//! - `EventSource` - blocking batch reads, flush, live modifier sampling
//! - `TermSource` - crossterm-backed source, raw mode for its lifetime
//! - `convert_key_event` - crossterm KeyEvent to raw event batch

use std::io;
use std::time::Duration;

use crossterm::event::{
    Event as CrosstermEvent, KeyCode, KeyEvent as CrosstermKeyEvent, KeyEventKind, KeyModifiers,
    ModifierKeyCode, poll, read,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::types::{Modifiers, RawKeyEvent, vk};

// =============================================================================
// EVENT SOURCE TRAIT
// =============================================================================

/// A console device delivering raw key events in batches.
///
/// Batch size is significant: the decoder uses it to tell "one single-byte
/// character" from "one byte of a multi-byte character", so a source must
/// deliver all bytes of one printable character in a single batch and must
/// not pad batches with unrelated events.
pub trait EventSource {
    /// Block until input is available, then return one non-empty batch.
    fn read_batch(&mut self) -> io::Result<Vec<RawKeyEvent>>;

    /// Discard any buffered but not yet read device input.
    fn flush(&mut self) -> io::Result<()>;

    /// Ctrl/Shift/Alt currently held, as reported by the OS.
    ///
    /// Sampled once per completed keystroke so that a modifier held across
    /// several combinations (Ctrl never released between Ctrl+A, Ctrl+B)
    /// is still reported on every one of them.
    fn held_modifiers(&self) -> Modifiers;
}

// =============================================================================
// KEY EVENT CONVERSION
// =============================================================================

/// Convert a crossterm KeyEvent into a raw event batch plus the modifier
/// state it carried.
///
/// A printable key becomes one key-down event per UTF-8 byte, all in the
/// same batch. Non-printable keys become a single event carrying a virtual
/// key code. Keys with no virtual key equivalent convert to an empty batch.
pub fn convert_key_event(event: CrosstermKeyEvent) -> (Vec<RawKeyEvent>, Modifiers) {
    let is_down = event.kind != KeyEventKind::Release;
    let mods = convert_modifiers(event.modifiers);

    let batch = match event.code {
        KeyCode::Char(c) => {
            if !is_down {
                return (Vec::new(), mods);
            }
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf)
                .bytes()
                .map(RawKeyEvent::byte)
                .collect()
        }
        code => match convert_virtual_key(code) {
            Some(virtual_key) => vec![RawKeyEvent {
                is_down,
                char_payload: 0,
                virtual_key,
            }],
            None => Vec::new(),
        },
    };

    (batch, mods)
}

/// Convert a non-character crossterm KeyCode to a virtual key code.
fn convert_virtual_key(code: KeyCode) -> Option<u16> {
    let virtual_key = match code {
        KeyCode::Backspace => vk::BACK,
        KeyCode::Enter => vk::RETURN,
        KeyCode::Tab | KeyCode::BackTab => vk::TAB,
        KeyCode::Esc => vk::ESCAPE,
        KeyCode::Left => vk::LEFT,
        KeyCode::Right => vk::RIGHT,
        KeyCode::Up => vk::UP,
        KeyCode::Down => vk::DOWN,
        KeyCode::Home => vk::HOME,
        KeyCode::End => vk::END,
        KeyCode::PageUp => vk::PRIOR,
        KeyCode::PageDown => vk::NEXT,
        KeyCode::Insert => vk::INSERT,
        KeyCode::Delete => vk::DELETE,
        KeyCode::CapsLock => vk::CAPITAL,
        KeyCode::Pause => vk::PAUSE,
        KeyCode::F(n) if (1..=24).contains(&n) => vk::F1 + (n as u16 - 1),
        KeyCode::Modifier(m) => convert_modifier_key(m)?,
        _ => return None,
    };
    Some(virtual_key)
}

/// Convert a crossterm modifier keycode to its virtual key code.
fn convert_modifier_key(code: ModifierKeyCode) -> Option<u16> {
    match code {
        ModifierKeyCode::LeftControl => Some(vk::LCONTROL),
        ModifierKeyCode::RightControl => Some(vk::RCONTROL),
        ModifierKeyCode::LeftShift => Some(vk::LSHIFT),
        ModifierKeyCode::RightShift => Some(vk::RSHIFT),
        ModifierKeyCode::LeftAlt => Some(vk::LMENU),
        ModifierKeyCode::RightAlt => Some(vk::RMENU),
        ModifierKeyCode::LeftSuper => Some(vk::LWIN),
        ModifierKeyCode::RightSuper => Some(vk::RWIN),
        _ => None,
    }
}

/// Convert crossterm KeyModifiers to our Modifiers.
fn convert_modifiers(mods: KeyModifiers) -> Modifiers {
    let mut out = Modifiers::empty();
    if mods.contains(KeyModifiers::CONTROL) {
        out |= Modifiers::CTRL;
    }
    if mods.contains(KeyModifiers::SHIFT) {
        out |= Modifiers::SHIFT;
    }
    if mods.contains(KeyModifiers::ALT) {
        out |= Modifiers::ALT;
    }
    out
}

// =============================================================================
// TERM SOURCE (crossterm-backed)
// =============================================================================

/// Portable event source on top of crossterm.
///
/// Raw mode is enabled for the lifetime of the source and restored on drop.
/// Crossterm reports modifiers attached to the key event rather than as
/// separate notifications, so the live modifier state is whatever the most
/// recent event carried.
pub struct TermSource {
    held: Modifiers,
}

impl TermSource {
    /// Enable raw mode and create the source. Fails when stdin is not a
    /// terminal or the mode cannot be set.
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self {
            held: Modifiers::empty(),
        })
    }
}

impl EventSource for TermSource {
    fn read_batch(&mut self) -> io::Result<Vec<RawKeyEvent>> {
        loop {
            if let CrosstermEvent::Key(key) = read()? {
                let (batch, mods) = convert_key_event(key);
                self.held = mods;
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        while poll(Duration::ZERO)? {
            let _ = read()?;
        }
        Ok(())
    }

    fn held_modifiers(&self) -> Modifiers {
        self.held
    }
}

impl Drop for TermSource {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

// =============================================================================
// TESTS
// =============================================================================
