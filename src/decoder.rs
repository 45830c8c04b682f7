//! Keystroke Decoder - the stateful decoding automaton
//!
//! Consumes raw key events (from the re-injection queue first, then from
//! fresh device batches) and assembles them into one completed logical
//! keystroke per call. Multi-byte characters arrive as one event per UTF-8
//! byte; modifier combinations arrive as separate down/up notifications;
//! both have to be stitched back together here.
//!
//! # API
//!
//! - `Decoder::new(source)` - wrap an event source
//! - `decode_next_keystroke` - block until one keystroke is complete
//! - `pending_events` - events queued for the next keystroke
//! - `dropped_events` - events lost to queue overflow
//!
//! # Example
//!
//! ```ignore
//! use unikey::{Decoder, TermSource};
//!
//! let mut decoder = Decoder::new(TermSource::new()?);
//! loop {
//!     let key = decoder.decode_next_keystroke()?;
//!     println!("{:#x} {:#010x}", key.scalar(), key.modifiers());
//! }
//! ```

use std::collections::VecDeque;
use std::io;

use tracing::{trace, warn};

use crate::source::EventSource;
use crate::types::{Keystroke, Modifiers, RawKeyEvent, REPLACEMENT_SCALAR, vk};

/// Re-injection queue capacity. Events beyond this are dropped and counted.
pub const QUEUE_CAPACITY: usize = 127;

/// No encoding needs more than 4 bytes per scalar; more attempts than this
/// force the replacement-marker policy.
const MAX_SCALAR_BYTES: u8 = 4;

// =============================================================================
// DECODE STATE
// =============================================================================

/// In-progress keystroke, fresh for every decode call.
#[derive(Default)]
struct DecodeState {
    /// The keystroke being assembled.
    keystroke: Keystroke,
    /// Printable events seen for this keystroke, including ones that were
    /// re-injected instead of accumulated. Overflow detection only.
    byte_attempts: u8,
    /// A modifier went down with nothing recorded yet; hold off completion
    /// until we learn whether a combination follows.
    awaiting_combination: bool,
    /// Ctrl/Shift/Alt currently held, per down/up notifications this call.
    live: Modifiers,
}

// =============================================================================
// DECODER
// =============================================================================

/// The keystroke decoder. Owns the device seam and the re-injection queue;
/// decoding is strictly sequential (`&mut self`).
pub struct Decoder<S> {
    source: S,
    queue: VecDeque<RawKeyEvent>,
    dropped: u64,
}

impl<S: EventSource> Decoder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            queue: VecDeque::new(),
            dropped: 0,
        }
    }

    /// The wrapped event source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Events read in an earlier batch that belong to the next keystroke.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Raw events lost to re-injection queue overflow since construction.
    pub fn dropped_events(&self) -> u64 {
        self.dropped
    }

    /// Block until one logical keystroke is complete and return it.
    ///
    /// Decoding never fails: malformed or overlong byte sequences degrade to
    /// the U+FFFD replacement marker. `Err` only ever reflects device I/O
    /// failure from the underlying source.
    pub fn decode_next_keystroke(&mut self) -> io::Result<Keystroke> {
        let mut state = DecodeState::default();

        loop {
            // Drain the re-injection queue before touching the device.
            let batch: Vec<RawKeyEvent> = if self.queue.is_empty() {
                self.source.read_batch()?
            } else {
                self.queue.drain(..).collect()
            };
            let batch_len = batch.len();

            let mut last = None;
            for event in batch {
                self.step(&mut state, event, batch_len);
                last = Some(event);
            }

            // The only thing allowed to keep the combination wait alive is a
            // held modifier with nothing recorded yet. Anything else would
            // hang the automaton after a real keystroke has landed.
            let nothing_recorded =
                state.keystroke.bytes().is_empty() && !state.keystroke.has_virtual_keys();
            if state.live.is_empty() || !nothing_recorded {
                state.awaiting_combination = false;
            }

            if !state.awaiting_combination {
                // One more live sample: a modifier held since before this
                // call (chained combinations) never produced a down event
                // we could see.
                state.live |= self.source.held_modifiers();

                if last.is_some_and(|event| event.is_down) {
                    return Ok(self.finish(state));
                }
            }

            // No completed keystroke in this pass: drop whatever was typed
            // into the device during the wait and block for the next batch.
            self.source.flush()?;
        }
    }

    /// Advance the automaton by one raw event.
    fn step(&mut self, state: &mut DecodeState, event: RawKeyEvent, batch_len: usize) {
        if event.is_printable() {
            // A scalar that already reads U+FFFD is complete in content;
            // anything further on this keystroke is flag processing only.
            if state.keystroke.scalar() == REPLACEMENT_SCALAR {
                return;
            }

            state.byte_attempts = state.byte_attempts.saturating_add(1);
            let low = (event.char_payload & 0xFF) as u8;

            // Batch size is the continuation heuristic: a lone event is a
            // whole single-byte character, companions mean one byte of a
            // multi-byte sequence.
            let consistent = if batch_len <= 1 { low < 0x80 } else { low >= 0x80 };

            if event.is_down && state.byte_attempts <= MAX_SCALAR_BYTES && consistent {
                state.keystroke.push_byte(low);
            } else if event.is_down {
                // Belongs to a different keystroke; save it for re-delivery.
                self.reinject(event, batch_len);
            }
            state.awaiting_combination = false;
        } else if event.is_down {
            match event.virtual_key {
                vk::CONTROL | vk::LCONTROL | vk::RCONTROL => {
                    state.live |= Modifiers::CTRL;
                    state.awaiting_combination = true;
                }
                vk::SHIFT | vk::LSHIFT | vk::RSHIFT => {
                    state.live |= Modifiers::SHIFT;
                    state.awaiting_combination = true;
                }
                vk::MENU | vk::LMENU | vk::RMENU => {
                    state.live |= Modifiers::ALT;
                    state.awaiting_combination = true;
                }
                vk::LWIN | vk::RWIN => {}
                code => state.keystroke.push_virtual_key(code),
            }
        } else {
            // Non-printable key-up: whatever was held is not anymore.
            state.live = Modifiers::empty();
        }
    }

    /// Queue an event for re-delivery on the next decode call. Bounded by
    /// both the queue capacity and the originating batch length; events
    /// beyond that are dropped and counted.
    fn reinject(&mut self, event: RawKeyEvent, batch_len: usize) {
        if self.queue.len() < QUEUE_CAPACITY && self.queue.len() < batch_len {
            trace!(
                char_payload = event.char_payload,
                pending = self.queue.len() + 1,
                "re-injecting event for next keystroke"
            );
            self.queue.push_back(event);
        } else {
            self.dropped += 1;
            warn!(
                dropped = self.dropped,
                "re-injection queue full, raw key event lost"
            );
        }
    }

    /// Finalize the keystroke: apply the live modifier bits and the
    /// overlong-sequence replacement policy.
    fn finish(&mut self, mut state: DecodeState) -> Keystroke {
        if !state.keystroke.bytes().is_empty() && state.byte_attempts > MAX_SCALAR_BYTES {
            trace!(
                attempts = state.byte_attempts,
                "overlong byte sequence, substituting U+FFFD"
            );
            return Keystroke::replacement();
        }
        state.keystroke.set_mods(state.live);
        trace!(
            scalar = state.keystroke.scalar(),
            modifiers = state.keystroke.modifiers(),
            "keystroke complete"
        );
        state.keystroke
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted event source: hands out pre-recorded batches, errors with
    /// `UnexpectedEof` when asked for more than was scripted.
    struct ScriptedSource {
        batches: VecDeque<Vec<RawKeyEvent>>,
        held: Modifiers,
        flushes: usize,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<RawKeyEvent>>) -> Self {
            Self {
                batches: batches.into(),
                held: Modifiers::empty(),
                flushes: 0,
            }
        }

        fn with_held(mut self, held: Modifiers) -> Self {
            self.held = held;
            self
        }
    }

    impl EventSource for ScriptedSource {
        fn read_batch(&mut self) -> io::Result<Vec<RawKeyEvent>> {
            self.batches
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }

        fn held_modifiers(&self) -> Modifiers {
            self.held
        }
    }

    fn decoder(batches: Vec<Vec<RawKeyEvent>>) -> Decoder<ScriptedSource> {
        Decoder::new(ScriptedSource::new(batches))
    }

    #[test]
    fn test_single_ascii_byte_round_trip() {
        let mut d = decoder(vec![vec![RawKeyEvent::byte(b'a')]]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0x61);
        assert_eq!(key.ch(), Some('a'));
        assert_eq!(key.modifiers(), 0);
        assert!(!key.is_replacement());
    }

    #[test]
    fn test_two_byte_char_accumulates() {
        // 'é' = C3 A9, one event per byte, one batch.
        let mut d = decoder(vec![vec![RawKeyEvent::byte(0xC3), RawKeyEvent::byte(0xA9)]]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0xC3A9);
        assert_eq!(key.ch(), Some('é'));
        assert_eq!(d.pending_events(), 0);
    }

    #[test]
    fn test_three_byte_char_accumulates() {
        // '€' = E2 82 AC.
        let mut d = decoder(vec![vec![
            RawKeyEvent::byte(0xE2),
            RawKeyEvent::byte(0x82),
            RawKeyEvent::byte(0xAC),
        ]]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0xE282AC);
        assert_eq!(key.ch(), Some('€'));
    }

    #[test]
    fn test_four_byte_char_accumulates() {
        // '🦀' = F0 9F A6 80.
        let mut d = decoder(vec![vec![
            RawKeyEvent::byte(0xF0),
            RawKeyEvent::byte(0x9F),
            RawKeyEvent::byte(0xA6),
            RawKeyEvent::byte(0x80),
        ]]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0xF09FA680);
        assert_eq!(key.ch(), Some('🦀'));
    }

    #[test]
    fn test_ctrl_combination_with_virtual_key() {
        let mut d = decoder(vec![
            vec![RawKeyEvent::key_down(vk::CONTROL)],
            vec![RawKeyEvent::key_down(vk::F5)],
        ]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.mods(), Modifiers::CTRL);
        assert_eq!(key.virtual_keys(), &[vk::F5 as u8]);
        assert_eq!(key.modifiers(), (1u32 << 31) | vk::F5 as u32);
        assert_eq!(key.scalar(), 0);
    }

    #[test]
    fn test_modifier_alone_never_completes() {
        // Ctrl down with nothing after it: the decoder keeps waiting for
        // the combination until the script runs dry.
        let mut d = decoder(vec![vec![RawKeyEvent::key_down(vk::CONTROL)]]);

        let err = d.decode_next_keystroke().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_flushes_stale_input_while_waiting() {
        let mut d = decoder(vec![
            vec![RawKeyEvent::key_down(vk::LCONTROL)],
            vec![RawKeyEvent::key_down(vk::DELETE)],
        ]);

        d.decode_next_keystroke().unwrap();
        // One incomplete pass (the lone Ctrl) must have flushed the device.
        assert_eq!(d.source().flushes, 1);
    }

    #[test]
    fn test_overflow_substitutes_replacement() {
        // Five continuation-range bytes in one batch: more than any scalar
        // can hold, so the whole accumulation degrades to U+FFFD.
        let mut d = decoder(vec![vec![
            RawKeyEvent::byte(0x90),
            RawKeyEvent::byte(0x91),
            RawKeyEvent::byte(0x92),
            RawKeyEvent::byte(0x93),
            RawKeyEvent::byte(0x94),
        ]]);

        let key = d.decode_next_keystroke().unwrap();
        assert!(key.is_replacement());
        assert_eq!(key, Keystroke::replacement());
        assert_eq!(key.modifiers(), 0);
    }

    #[test]
    fn test_queue_drains_before_new_batches() {
        // One batch carrying two keystrokes: 'é' (C3 A9) and 'a'. The ASCII
        // byte is inconsistent with a 3-event batch, so it is re-injected
        // and decoded on the next call without touching the device.
        let mut d = decoder(vec![vec![
            RawKeyEvent::byte(0xC3),
            RawKeyEvent::byte(0xA9),
            RawKeyEvent::byte(b'a'),
        ]]);

        let first = d.decode_next_keystroke().unwrap();
        assert_eq!(first.ch(), Some('é'));
        assert_eq!(d.pending_events(), 1);

        let second = d.decode_next_keystroke().unwrap();
        assert_eq!(second.ch(), Some('a'));
        assert_eq!(d.pending_events(), 0);
    }

    #[test]
    fn test_key_up_clears_live_modifiers() {
        // Ctrl pressed and released without a combination: no keystroke is
        // produced and the Ctrl bit is gone by the time 'a' arrives.
        let mut d = decoder(vec![
            vec![RawKeyEvent::key_down(vk::CONTROL)],
            vec![RawKeyEvent::key_up(vk::CONTROL)],
            vec![RawKeyEvent::byte(b'a')],
        ]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0x61);
        assert_eq!(key.modifiers(), 0);
    }

    #[test]
    fn test_held_modifier_sampled_on_completion() {
        // Ctrl was already down before this decode call started (chained
        // combinations): only the live OS sample can report it.
        let source = ScriptedSource::new(vec![vec![RawKeyEvent::byte(0x01)]])
            .with_held(Modifiers::CTRL);
        let mut d = Decoder::new(source);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0x01);
        assert!(key.mods().contains(Modifiers::CTRL));
    }

    #[test]
    fn test_win_keys_are_ignored() {
        let mut d = decoder(vec![vec![RawKeyEvent::key_down(vk::LWIN)]]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0);
        assert_eq!(key.modifiers(), 0);
    }

    #[test]
    fn test_compound_virtual_keys_pack() {
        let mut d = decoder(vec![vec![
            RawKeyEvent::key_down(vk::F1),
            RawKeyEvent::key_down(vk::F2),
        ]]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.modifiers(), ((vk::F1 as u32) << 8) | vk::F2 as u32);
        assert_eq!(key.virtual_keys(), &[vk::F1 as u8, vk::F2 as u8]);
    }

    #[test]
    fn test_shift_and_alt_combination() {
        let mut d = decoder(vec![
            vec![RawKeyEvent::key_down(vk::LSHIFT)],
            vec![RawKeyEvent::key_down(vk::RMENU)],
            vec![RawKeyEvent::key_down(vk::DELETE)],
        ]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.mods(), Modifiers::SHIFT | Modifiers::ALT);
        assert_eq!(key.virtual_keys(), &[vk::DELETE as u8]);
    }

    #[test]
    fn test_replacement_scalar_stops_accumulation() {
        // Once the accumulated bytes read exactly EF BF BD, further
        // printable events on this keystroke are content no-ops.
        let mut d = decoder(vec![vec![
            RawKeyEvent::byte(0xEF),
            RawKeyEvent::byte(0xBF),
            RawKeyEvent::byte(0xBD),
            RawKeyEvent::byte(b'a'),
        ]]);

        let key = d.decode_next_keystroke().unwrap();
        assert!(key.is_replacement());
        assert_eq!(d.pending_events(), 0);
    }

    #[test]
    fn test_printable_key_up_does_not_complete() {
        // A key-up with a payload neither accumulates nor completes; the
        // next batch carries the real keystroke.
        let up = RawKeyEvent {
            is_down: false,
            char_payload: b'x' as u32,
            virtual_key: 0,
        };
        let mut d = decoder(vec![vec![up], vec![RawKeyEvent::byte(b'a')]]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.ch(), Some('a'));
    }

    #[test]
    fn test_queue_overflow_is_counted() {
        // 130 ASCII bytes coalesced into one batch: every one is
        // inconsistent with a multi-event batch, the queue caps at 127 and
        // the rest are dropped, observably.
        let batch: Vec<RawKeyEvent> = (0..130).map(|_| RawKeyEvent::byte(b'a')).collect();
        let mut d = decoder(vec![batch]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0);
        assert_eq!(d.pending_events(), QUEUE_CAPACITY);
        assert_eq!(d.dropped_events(), 3);
    }

    #[test]
    fn test_coalesced_ascii_pair_is_ambiguous() {
        // Known fragility of the batch-size heuristic: two unrelated ASCII
        // keystrokes coalesced into one batch look like neither a single
        // character nor a continuation sequence. Both events are saved for
        // the next call and an empty keystroke is reported.
        let mut d = decoder(vec![vec![RawKeyEvent::byte(b'a'), RawKeyEvent::byte(b'b')]]);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0);
        assert_eq!(d.pending_events(), 2);
    }

    #[test]
    fn test_ctrl_then_char_in_next_batch() {
        // Classic Ctrl+C: the control char payload arrives after the
        // modifier notification.
        let source = ScriptedSource::new(vec![
            vec![RawKeyEvent::key_down(vk::LCONTROL)],
            vec![RawKeyEvent::byte(0x03)],
        ])
        .with_held(Modifiers::CTRL);
        let mut d = Decoder::new(source);

        let key = d.decode_next_keystroke().unwrap();
        assert_eq!(key.scalar(), 0x03);
        assert!(key.mods().contains(Modifiers::CTRL));
    }

    #[test]
    fn test_device_error_propagates() {
        struct FailingSource;
        impl EventSource for FailingSource {
            fn read_batch(&mut self) -> io::Result<Vec<RawKeyEvent>> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
            fn held_modifiers(&self) -> Modifiers {
                Modifiers::empty()
            }
        }

        let mut d = Decoder::new(FailingSource);
        let err = d.decode_next_keystroke().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
