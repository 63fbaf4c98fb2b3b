//! Cleaner thread (component G): the one consumer of terminated kernel
//! worker threads that nothing else reaps. A thread cannot free its
//! own kernel stack — it is still running on it at the point it would
//! need to — so self-termination only marks the thread `Terminated`
//! and the cleaner comes along afterwards to drop the table entry
//! (and with it, the stack allocation).

use crate::irql::get_system_timer;
use crate::task::scheduler;

const SWEEP_INTERVAL_NANOS: u64 = 250_000_000;

extern "C" fn cleaner_entry() {
    loop {
        scheduler::sleep_current_until(get_system_timer() + SWEEP_INTERVAL_NANOS);
        scheduler::reap_orphaned_terminated();
    }
}

/// Spawn the cleaner thread. Runs at the lowest non-idle priority: it
/// has no latency requirement and should never compete with real work.
pub fn init() {
    scheduler::spawn_kernel_thread(cleaner_entry, 1, "cleaner");
}
