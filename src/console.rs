//! Minimal formatted console output.
//!
//! The platform registers a byte sink; formatted output runs through a
//! fixed-size buffer and is truncated at its capacity. Output is not
//! reentrant: concurrent printing from several threads may interleave.

use core::fmt::{self, Write};

use crate::config::{CONSOLE_BUF_SIZE, VERSION};
use crate::critical::critical_section;
use crate::cs_cell::CsCell;

/// Byte sink supplied by the platform (UART, SWO, semihosting, ...).
pub type PutcFn = fn(u8);

static SINK: CsCell<Option<PutcFn>> = CsCell::new(None);

/// Register the console byte sink. Output before registration is
/// dropped.
pub fn t_console_set_output(putc: PutcFn) {
    critical_section(|cs| *SINK.get(cs) = Some(putc));
}

/// Fixed-size formatting buffer that silently truncates.
struct FmtBuffer {
    buf: [u8; CONSOLE_BUF_SIZE],
    len: usize,
}

impl FmtBuffer {
    const fn new() -> Self {
        FmtBuffer {
            buf: [0; CONSOLE_BUF_SIZE],
            len: 0,
        }
    }
}

impl Write for FmtBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = CONSOLE_BUF_SIZE - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Format and emit through the registered sink. Prefer the
/// [`kprint!`](crate::kprint)/[`kprintln!`](crate::kprintln) macros.
pub fn t_console_write(args: fmt::Arguments) {
    let Some(putc) = critical_section(|cs| *SINK.get(cs)) else {
        return;
    };

    let mut buffer = FmtBuffer::new();
    let _ = buffer.write_fmt(args);
    for &byte in &buffer.buf[..buffer.len] {
        putc(byte);
    }
}

/// Print formatted output through the console sink.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::console::t_console_write(core::format_args!($($arg)*))
    };
}

/// Print formatted output followed by CRLF.
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\r\n")
    };
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::kprint!(concat!($fmt, "\r\n") $(, $arg)*)
    };
}

/// Print the startup banner.
pub fn t_start_banner() {
    crate::kprintln!();
    crate::kprintln!("=================================================");
    crate::kprintln!("  tortos - Lightweight Real-Time Operating System");
    crate::kprintln!("  Version    : {}", VERSION);
    crate::kprintln!("=================================================");
    crate::kprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::sync::Mutex;

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    fn capture(byte: u8) {
        CAPTURED.lock().unwrap().push(byte as char);
    }

    // One sink for the whole binary; serialize console tests on it.
    static LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn formats_through_sink() {
        let _guard = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        t_console_set_output(capture);
        CAPTURED.lock().unwrap().clear();

        crate::kprint!("n={} s={} c={} x={:x} f={:.6}", -42, "abc", 'Z', 0xbeefu32, 1.5f64);

        let out = CAPTURED.lock().unwrap().clone();
        assert_eq!(out, "n=-42 s=abc c=Z x=beef f=1.500000");
    }

    #[test]
    fn output_truncates_at_buffer_size() {
        let _guard = LOCK.lock().unwrap_or_else(|e| e.into_inner());
        t_console_set_output(capture);
        CAPTURED.lock().unwrap().clear();

        crate::kprint!("{:width$}", 'x', width = 4 * CONSOLE_BUF_SIZE);

        assert_eq!(CAPTURED.lock().unwrap().len(), CONSOLE_BUF_SIZE);
    }
}
