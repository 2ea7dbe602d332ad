//! Serial console output.
//!
//! This module provides the kernel's logging macros on top of the HAL
//! serial port (a PL011 on both platforms).

use core::fmt;
use core::fmt::Write;
use spin::Mutex;

/// Initialize the serial console.
pub fn init() {
    crate::hal::serial_init();
}

/// Write a byte, expanding `\n` to CRLF for terminal programs.
pub fn write_byte(byte: u8) {
    if byte == b'\n' {
        crate::hal::serial_putc(b'\r');
    }
    crate::hal::serial_putc(byte);
}

/// Write a string.
pub fn write_str(s: &str) {
    for byte in s.bytes() {
        write_byte(byte);
    }
}

/// Try to read a byte (non-blocking).
pub fn try_read_byte() -> Option<u8> {
    crate::hal::serial_getc()
}

/// Serial writer for formatting.
pub struct SerialWriter;

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_str(s);
        Ok(())
    }
}

/// Print macro for serial output.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*));
    };
}

/// Println macro for serial output.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*));
    };
}

/// Internal print function.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // Mask interrupts so an ISR cannot interleave half a line.
    crate::interrupts::without_interrupts(|| {
        let _ = SerialWriter.write_fmt(args);
    });
}

/// Log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace = 0,
    /// Debug level.
    Debug = 1,
    /// Info level.
    Info = 2,
    /// Warning level.
    Warn = 3,
    /// Error level.
    Error = 4,
}

/// Current log level.
static LOG_LEVEL: Mutex<LogLevel> = Mutex::new(LogLevel::Info);

/// Set the log level.
pub fn set_log_level(level: LogLevel) {
    *LOG_LEVEL.lock() = level;
}

/// Get the current log level.
pub fn log_level() -> LogLevel {
    *LOG_LEVEL.lock()
}

/// Log a message at the given level.
pub fn log(level: LogLevel, args: fmt::Arguments) {
    if level >= log_level() {
        let prefix = match level {
            LogLevel::Trace => "[TRACE]",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Info => "[INFO ]",
            LogLevel::Warn => "[WARN ]",
            LogLevel::Error => "[ERROR]",
        };
        serial_println!("{} {}", prefix, args);
    }
}

/// Log macros.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::serial::log($crate::serial::LogLevel::Trace, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::serial::log($crate::serial::LogLevel::Debug, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::serial::log($crate::serial::LogLevel::Info, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        $crate::serial::log($crate::serial::LogLevel::Warn, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {
        $crate::serial::log($crate::serial::LogLevel::Error, format_args!($($arg)*));
    };
}
