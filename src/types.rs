//! Core types for unikey.
//!
//! These types define the wire contract between the event source and the
//! decoder, and the completed keystroke handed back to callers.

use bitflags::bitflags;

// =============================================================================
// Virtual key codes
// =============================================================================

/// Virtual key codes, numerically identical to the Win32 `VK_*` set.
///
/// Only the codes the decoder dispatches on (modifier and meta families) are
/// required; the rest are here for sources, demos and tests.
pub mod vk {
    pub const BACK: u16 = 0x08;
    pub const TAB: u16 = 0x09;
    pub const RETURN: u16 = 0x0D;
    pub const SHIFT: u16 = 0x10;
    pub const CONTROL: u16 = 0x11;
    /// Alt. Windows calls the Alt keys "menu keys".
    pub const MENU: u16 = 0x12;
    pub const PAUSE: u16 = 0x13;
    pub const CAPITAL: u16 = 0x14;
    pub const ESCAPE: u16 = 0x1B;
    pub const PRIOR: u16 = 0x21;
    pub const NEXT: u16 = 0x22;
    pub const END: u16 = 0x23;
    pub const HOME: u16 = 0x24;
    pub const LEFT: u16 = 0x25;
    pub const UP: u16 = 0x26;
    pub const RIGHT: u16 = 0x27;
    pub const DOWN: u16 = 0x28;
    pub const INSERT: u16 = 0x2D;
    pub const DELETE: u16 = 0x2E;
    pub const LWIN: u16 = 0x5B;
    pub const RWIN: u16 = 0x5C;
    pub const F1: u16 = 0x70;
    pub const F2: u16 = 0x71;
    pub const F3: u16 = 0x72;
    pub const F4: u16 = 0x73;
    pub const F5: u16 = 0x74;
    pub const F6: u16 = 0x75;
    pub const F7: u16 = 0x76;
    pub const F8: u16 = 0x77;
    pub const F9: u16 = 0x78;
    pub const F10: u16 = 0x79;
    pub const F11: u16 = 0x7A;
    pub const F12: u16 = 0x7B;
    pub const LSHIFT: u16 = 0xA0;
    pub const RSHIFT: u16 = 0xA1;
    pub const LCONTROL: u16 = 0xA2;
    pub const RCONTROL: u16 = 0xA3;
    pub const LMENU: u16 = 0xA4;
    pub const RMENU: u16 = 0xA5;
}

// =============================================================================
// Modifiers (bitflags)
// =============================================================================

bitflags! {
    /// Modifier bits of the packed `modifiers` word.
    ///
    /// The three high bits are the external contract; the lower bits of the
    /// packed word carry virtual key codes (see [`Keystroke::modifiers`]).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u32 {
        const CTRL = 1 << 31;
        const SHIFT = 1 << 30;
        const ALT = 1 << 29;
    }
}

// =============================================================================
// RawKeyEvent - one hardware notification
// =============================================================================

/// One raw key notification as delivered by the console device.
///
/// Printable keys carry their byte in `char_payload` (one event per UTF-8
/// byte); non-printable keys carry `char_payload == 0` and a virtual key
/// code instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    /// Key-down (true) or key-up (false).
    pub is_down: bool,
    /// Character payload; 0 for non-printable keys.
    pub char_payload: u32,
    /// Virtual key code; meaningful when `char_payload` is 0.
    pub virtual_key: u16,
}

impl RawKeyEvent {
    /// A key-down event carrying one byte of a printable character.
    pub const fn byte(b: u8) -> Self {
        Self {
            is_down: true,
            char_payload: b as u32,
            virtual_key: 0,
        }
    }

    /// A key-down event for a non-printable key.
    pub const fn key_down(virtual_key: u16) -> Self {
        Self {
            is_down: true,
            char_payload: 0,
            virtual_key,
        }
    }

    /// A key-up event for a non-printable key.
    pub const fn key_up(virtual_key: u16) -> Self {
        Self {
            is_down: false,
            char_payload: 0,
            virtual_key,
        }
    }

    /// Whether this event carries a printable payload.
    pub const fn is_printable(&self) -> bool {
        self.char_payload != 0
    }
}

// =============================================================================
// Keystroke - the completed logical event
// =============================================================================

/// The UTF-8 encoding of U+FFFD, packed big-endian. Denotes an invalid or
/// overlong byte sequence.
pub const REPLACEMENT_SCALAR: u32 = 0xEFBFBD;

/// One completed logical keystroke.
///
/// Internally a tagged structure (decoded bytes, compound virtual keys,
/// modifier bits); [`Keystroke::scalar`] and [`Keystroke::modifiers`] expose
/// the packed words of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Keystroke {
    bytes: [u8; 4],
    byte_len: u8,
    vks: [u8; 4],
    vk_len: u8,
    mods: Modifiers,
}

impl Keystroke {
    /// The replacement keystroke returned for ambiguous byte sequences.
    pub const fn replacement() -> Self {
        Self {
            bytes: [0xEF, 0xBF, 0xBD, 0],
            byte_len: 3,
            vks: [0; 4],
            vk_len: 0,
            mods: Modifiers::empty(),
        }
    }

    /// Append one decoded byte. Capacity is 4; the decoder never exceeds it.
    pub(crate) fn push_byte(&mut self, b: u8) {
        if (self.byte_len as usize) < self.bytes.len() {
            self.bytes[self.byte_len as usize] = b;
            self.byte_len += 1;
        }
    }

    /// Append one compound virtual key code (low byte). A fifth code shifts
    /// the oldest out, mirroring left-shift packing into a 32-bit word.
    pub(crate) fn push_virtual_key(&mut self, virtual_key: u16) {
        if (self.vk_len as usize) == self.vks.len() {
            self.vks.copy_within(1.., 0);
            self.vk_len -= 1;
        }
        self.vks[self.vk_len as usize] = virtual_key as u8;
        self.vk_len += 1;
    }

    pub(crate) fn set_mods(&mut self, mods: Modifiers) {
        self.mods = mods;
    }

    pub(crate) fn has_virtual_keys(&self) -> bool {
        self.vk_len > 0
    }

    /// Decoded UTF-8 bytes, in arrival order (most significant first).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.byte_len as usize]
    }

    /// Compound virtual key codes, oldest first.
    pub fn virtual_keys(&self) -> &[u8] {
        &self.vks[..self.vk_len as usize]
    }

    /// Modifier bits held when the keystroke completed.
    pub fn mods(&self) -> Modifiers {
        self.mods
    }

    /// Big-endian packed decoded bytes: `'a'` is `0x61`, `'é'` is `0xC3A9`,
    /// U+FFFD (invalid sequence) is `0xEFBFBD`.
    pub fn scalar(&self) -> u32 {
        self.bytes().iter().fold(0u32, |acc, b| (acc << 8) | *b as u32)
    }

    /// Packed modifier word: Ctrl = bit 31, Shift = bit 30, Alt = bit 29,
    /// OR'd over the compound virtual key codes (most recent in the low byte).
    pub fn modifiers(&self) -> u32 {
        let packed = self
            .virtual_keys()
            .iter()
            .fold(0u32, |acc, k| (acc << 8) | *k as u32);
        self.mods.bits() | packed
    }

    /// The decoded character, when the accumulated bytes form exactly one
    /// valid UTF-8 scalar. U+FFFD means the sequence was invalid.
    pub fn ch(&self) -> Option<char> {
        let s = std::str::from_utf8(self.bytes()).ok()?;
        let mut chars = s.chars();
        let c = chars.next()?;
        chars.next().is_none().then_some(c)
    }

    /// Whether this keystroke is the invalid-sequence replacement marker.
    pub fn is_replacement(&self) -> bool {
        self.scalar() == REPLACEMENT_SCALAR
    }
}

// =============================================================================
// TESTS
// =============================================================================
