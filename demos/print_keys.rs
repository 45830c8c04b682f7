//! Decode keystrokes in a loop and print them.
//!
//! Run with `cargo run --example print_keys`; Ctrl+Q exits.

use std::io;

use unikey::{Decoder, Modifiers};

fn main() -> io::Result<()> {
    #[cfg(windows)]
    let source = unikey::ConsoleSource::new()?;
    #[cfg(not(windows))]
    let source = unikey::TermSource::new()?;

    let mut decoder = Decoder::new(source);

    loop {
        let key = decoder.decode_next_keystroke()?;
        let ch = key.ch().filter(|c| !c.is_control()).unwrap_or(' ');
        println!(
            "scalar: {:#08x} ({})\tmodifiers: {:#010x}\r",
            key.scalar(),
            ch,
            key.modifiers()
        );

        // Ctrl+Q (DC1, 0x11) quits.
        if key.scalar() == 0x11 && key.mods().contains(Modifiers::CTRL) {
            return Ok(());
        }
    }
}
