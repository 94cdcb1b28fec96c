//! Kernel console output.
//!
//! The machine layer does not know what the console hardware is; a port
//! (or the hosted test harness) installs a sink once at boot and the
//! [`print!`]/[`println!`] macros route through it. Output before a sink is
//! installed is dropped, which is the honest thing a serial-less machine
//! can do.

use spin::Once;

type Sink = fn(core::fmt::Arguments<'_>);

static SINK: Once<Sink> = Once::new();

/// Installs the console sink. First caller wins.
pub fn set_sink(sink: Sink) {
    SINK.call_once(|| sink);
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments<'_>) {
    if let Some(sink) = SINK.get() {
        sink(args);
    }
}

/// Prints to the kernel console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::kprint::_print(core::format_args!($($arg)*))
    };
}

/// Prints to the kernel console, with a trailing newline.
#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($($arg:tt)*) => {
        $crate::kprint::_print(core::format_args!("{}\n", core::format_args!($($arg)*)))
    };
}
