//! Console Source - raw Windows console input device
//!
//! Wraps the Win32 console input handle: switches the console to raw mode
//! and the UTF-8 code page for the lifetime of the source (restored on
//! drop), blocks on `WaitForSingleObject`, reads `INPUT_RECORD` batches
//! with `ReadConsoleInputA` and samples held modifiers with `GetKeyState`.
//!
//! Under the UTF-8 code page the console delivers one key record per byte
//! of a multi-byte character, which is exactly the batch shape the decoder
//! expects.

use std::io;

use winapi::shared::minwindef::{DWORD, UINT};
use winapi::um::consoleapi::{
    GetConsoleCP, GetConsoleMode, GetConsoleOutputCP, ReadConsoleInputA, SetConsoleMode,
};
use winapi::um::handleapi::INVALID_HANDLE_VALUE;
use winapi::um::processenv::GetStdHandle;
use winapi::um::synchapi::WaitForSingleObject;
use winapi::um::winbase::{INFINITE, STD_INPUT_HANDLE, WAIT_FAILED};
use winapi::um::wincon::{
    FlushConsoleInputBuffer, INPUT_RECORD, KEY_EVENT, SetConsoleCP, SetConsoleOutputCP,
};
use winapi::um::winnt::HANDLE;
use winapi::um::winuser::GetKeyState;

use crate::source::EventSource;
use crate::types::{Modifiers, RawKeyEvent, vk};

const CP_UTF8: UINT = 65001;

/// Matches the console's own event buffer granularity.
const BATCH_CAPACITY: usize = 128;

/// Event source reading the raw Windows console input device.
///
/// Construction switches the console to raw (unprocessed) input mode and
/// the UTF-8 code pages; both are restored when the source is dropped.
pub struct ConsoleSource {
    handle: HANDLE,
    saved_mode: DWORD,
    saved_input_cp: UINT,
    saved_output_cp: UINT,
}

impl ConsoleSource {
    /// Open the console input handle. Fails when stdin is not a console or
    /// its mode cannot be queried or set.
    pub fn new() -> io::Result<Self> {
        unsafe {
            let handle = GetStdHandle(STD_INPUT_HANDLE);
            if handle == INVALID_HANDLE_VALUE || handle.is_null() {
                return Err(io::Error::last_os_error());
            }

            let mut saved_mode: DWORD = 0;
            if GetConsoleMode(handle, &mut saved_mode) == 0 {
                return Err(io::Error::last_os_error());
            }
            if SetConsoleMode(handle, 0) == 0 {
                return Err(io::Error::last_os_error());
            }

            let saved_input_cp = GetConsoleCP();
            let saved_output_cp = GetConsoleOutputCP();
            // Byte-per-event delivery of multi-byte characters requires the
            // UTF-8 code page.
            SetConsoleCP(CP_UTF8);
            SetConsoleOutputCP(CP_UTF8);

            Ok(Self {
                handle,
                saved_mode,
                saved_input_cp,
                saved_output_cp,
            })
        }
    }

    fn key_state_held(virtual_key: u16) -> bool {
        // High bit of GetKeyState reports "currently down".
        unsafe { (GetKeyState(virtual_key as i32) as u16) & 0x8000 != 0 }
    }
}

impl EventSource for ConsoleSource {
    fn read_batch(&mut self) -> io::Result<Vec<RawKeyEvent>> {
        loop {
            unsafe {
                if WaitForSingleObject(self.handle, INFINITE) == WAIT_FAILED {
                    return Err(io::Error::last_os_error());
                }

                let mut records: [INPUT_RECORD; BATCH_CAPACITY] = std::mem::zeroed();
                let mut read: DWORD = 0;
                if ReadConsoleInputA(
                    self.handle,
                    records.as_mut_ptr(),
                    BATCH_CAPACITY as DWORD,
                    &mut read,
                ) == 0
                {
                    return Err(io::Error::last_os_error());
                }

                let batch: Vec<RawKeyEvent> = records[..read as usize]
                    .iter()
                    .filter(|record| record.EventType == KEY_EVENT)
                    .map(|record| unsafe {
                        let key = record.Event.KeyEvent();
                        RawKeyEvent {
                            is_down: key.bKeyDown != 0,
                            char_payload: (*key.uChar.AsciiChar()) as u8 as u32,
                            virtual_key: key.wVirtualKeyCode,
                        }
                    })
                    .collect();

                // Mouse, focus and resize records can leave an empty batch;
                // keep blocking until a key record arrives.
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        unsafe {
            if FlushConsoleInputBuffer(self.handle) == 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn held_modifiers(&self) -> Modifiers {
        let mut mods = Modifiers::empty();
        if Self::key_state_held(vk::CONTROL) {
            mods |= Modifiers::CTRL;
        }
        if Self::key_state_held(vk::SHIFT) {
            mods |= Modifiers::SHIFT;
        }
        if Self::key_state_held(vk::MENU) {
            mods |= Modifiers::ALT;
        }
        mods
    }
}

impl Drop for ConsoleSource {
    fn drop(&mut self) {
        unsafe {
            SetConsoleMode(self.handle, self.saved_mode);
            SetConsoleCP(self.saved_input_cp);
            SetConsoleOutputCP(self.saved_output_cp);
        }
    }
}
