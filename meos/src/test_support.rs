//! Hosted bring-up for the unit tests.
//!
//! Tests share one simulated machine per test process: the RAM window, the
//! coremap, the process table and the filesystem are booted exactly once,
//! and every test that needs kernel services calls [`boot`] first. The
//! hosted scheduler maps kernel threads onto host threads, so blocking
//! primitives, fork and the exit rendezvous all run for real.

use crate::thread::{hosted::HostedScheduler, scheduler::set_scheduler};
use bedrock::addressing::{PAGE_SIZE, Pa};
use std::sync::Once;

/// Pages of simulated RAM. Generous enough that concurrently running
/// tests do not starve each other.
pub const TEST_RAM_PAGES: usize = 4096;

/// Physical space reserved below the coremap, standing in for the kernel
/// image.
pub const TEST_FIRST_FREE: usize = 4 * PAGE_SIZE;

static BOOT: Once = Once::new();
static HOSTED: HostedScheduler = HostedScheduler::new();

fn console_sink(args: core::fmt::Arguments<'_>) {
    print!("{args}");
}

/// Boots the simulated machine once per test process.
pub fn boot() {
    BOOT.call_once(|| {
        let ram_size = bedrock::ram::power_on(TEST_RAM_PAGES);
        bedrock::kprint::set_sink(console_sink);
        set_scheduler(&HOSTED);
        crate::logging::init(log::LevelFilter::Info);
        crate::mm::bootstrap(Pa::new(TEST_FIRST_FREE).unwrap(), ram_size);
        crate::fs::bootstrap();
        crate::proc::bootstrap();
    });
}

/// Gives spawned threads time to reach their blocking points. Used by
/// tests that assert "this thread is still blocked".
pub fn settle() {
    std::thread::sleep(std::time::Duration::from_millis(40));
}

/// Serializes tests that need exclusive, quiescent use of a shared
/// resource (the TLB, precise memory accounting). Returns a guard.
pub fn exclusive() -> std::sync::MutexGuard<'static, ()> {
    static GATE: std::sync::Mutex<()> = std::sync::Mutex::new(());
    match GATE.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}
