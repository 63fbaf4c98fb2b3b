//! IRQL: the interrupt request level ladder.
//!
//! Every CPU has a current IRQL. Code, interrupt handlers, and deferred
//! work all run "at" a level; raising the level masks everything at or
//! below it from running (on a single-core system this is implemented by
//! disabling hardware interrupts once the level rises past [`IRQL_DRIVER`],
//! since there is no finer-grained interrupt masking available). Lowering
//! the level back towards [`IRQL_STANDARD`] drains any work that had been
//! deferred while running at a higher level, then reschedules if a switch
//! was postponed.

use core::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

pub type Irql = u8;

pub const IRQL_STANDARD: Irql = 0;
pub const IRQL_PAGE_FAULT: Irql = 1;
pub const IRQL_SCHEDULER: Irql = 2;
pub const IRQL_DRIVER: Irql = 3;
pub const IRQL_DRIVER_MAX: Irql = 39;
pub const IRQL_TIMER: Irql = 40;
pub const IRQL_HIGH: Irql = 41;

const NUM_LEVELS: usize = IRQL_HIGH as usize + 1;

/// Per-CPU IRQL state. `MAX_CPUS` is small (see [`crate::arch::hal::MAX_CPUS`]);
/// a flat array avoids allocation before the heap exists.
struct CpuIrqlState {
    level: AtomicU8,
    /// Set when a schedule was requested while above [`IRQL_STANDARD`];
    /// consumed by `lower_irql` once it reaches STANDARD again.
    postponed_switch: AtomicU8,
    /// Bitmask of levels with queued deferred work.
    deferred_mask: AtomicU32,
}

const INIT_STATE: CpuIrqlState = CpuIrqlState {
    level: AtomicU8::new(IRQL_HIGH),
    postponed_switch: AtomicU8::new(0),
    deferred_mask: AtomicU32::new(0),
};

static CPUS: [CpuIrqlState; 2] = [INIT_STATE, INIT_STATE];

/// A unit of work postponed until the IRQL drops low enough to run it.
/// Stored inline rather than boxed: deferred work is rare and bounded
/// (timer bookkeeping, scheduler wakeups), so a small fixed slot table
/// avoids needing the heap this early in boot.
const MAX_DEFERRED: usize = 8;

struct DeferredSlot {
    used: AtomicU8,
    target_irql: AtomicU8,
    func: AtomicU32,
}

const EMPTY_SLOT: DeferredSlot = DeferredSlot {
    used: AtomicU8::new(0),
    target_irql: AtomicU8::new(0),
    func: AtomicU32::new(0),
};

static DEFERRED: [DeferredSlot; MAX_DEFERRED] = [EMPTY_SLOT; MAX_DEFERRED];

fn cpu() -> &'static CpuIrqlState {
    &CPUS[crate::arch::hal::cpu_id()]
}

/// Bring up the IRQL machine for the boot CPU. Must run before any other
/// kernel subsystem raises or lowers IRQL.
pub fn init() {
    cpu().level.store(IRQL_STANDARD, Ordering::SeqCst);
    cpu().postponed_switch.store(0, Ordering::SeqCst);
    cpu().deferred_mask.store(0, Ordering::SeqCst);
}

/// Current IRQL of this CPU.
#[inline]
pub fn get_irql() -> Irql {
    cpu().level.load(Ordering::Acquire)
}

/// Raise the IRQL to `new_irql`, returning the previous level so the
/// caller can restore it with [`lower_irql`]. Panics if `new_irql` is
/// below the current level — raising must only ever increase it.
pub fn raise_irql(new_irql: Irql) -> Irql {
    let old = get_irql();
    assert!(new_irql >= old, "RaiseIrql: {} < current {}", new_irql, old);

    let was_enabled = crate::arch::hal::interrupts_enabled();
    crate::arch::hal::disable_interrupts();
    cpu().level.store(new_irql, Ordering::SeqCst);
    if new_irql < IRQL_DRIVER && was_enabled {
        crate::arch::hal::enable_interrupts();
    }
    old
}

/// Lower the IRQL back to `new_irql`, draining deferred work queued at any
/// level strictly above `new_irql` (highest level first), and running the
/// scheduler if lowering reaches [`IRQL_STANDARD`] with a switch postponed.
pub fn lower_irql(new_irql: Irql) {
    let old = get_irql();
    assert!(new_irql <= old, "LowerIrql: {} > current {}", new_irql, old);

    loop {
        let mask = cpu().deferred_mask.load(Ordering::Acquire);
        if mask == 0 {
            break;
        }
        let highest = 31 - mask.leading_zeros() as Irql;
        if highest <= new_irql {
            break;
        }
        run_deferred_at(highest);
    }

    cpu().level.store(new_irql, Ordering::SeqCst);
    if new_irql < IRQL_DRIVER {
        crate::arch::hal::enable_interrupts();
    }

    if new_irql == IRQL_STANDARD {
        let postponed = cpu().postponed_switch.swap(0, Ordering::AcqRel);
        if postponed != 0 {
            crate::task::scheduler::schedule();
        }
    }
}

/// Run `f` at `irql` if already there; synchronously raise-and-lower if
/// `irql` is below the current level; queue it for later if `irql` is
/// above the current level (since raising to satisfy it here would
/// violate the "only increases" rule for the caller's own later `lower_irql`).
pub fn defer_until_irql(irql: Irql, f: fn()) {
    let current = get_irql();
    if irql == current {
        f();
        return;
    }
    if irql > current {
        panic!("DeferUntilIrql: {} above current {} — would require raising", irql, current);
    }
    queue_deferred(irql, f);
}

fn queue_deferred(irql: Irql, f: fn()) {
    for slot in DEFERRED.iter() {
        if slot.used.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
            slot.target_irql.store(irql, Ordering::Relaxed);
            slot.func.store(f as usize as u32, Ordering::Release);
            cpu().deferred_mask.fetch_or(1 << irql, Ordering::AcqRel);
            return;
        }
    }
    panic!("DeferUntilIrql: deferred work table full");
}

fn run_deferred_at(irql: Irql) {
    let mut any_left = false;
    for slot in DEFERRED.iter() {
        if slot.used.load(Ordering::Acquire) != 0
            && slot.target_irql.load(Ordering::Relaxed) == irql
        {
            let raw = slot.func.swap(0, Ordering::AcqRel);
            slot.used.store(0, Ordering::Release);
            if raw != 0 {
                let f: fn() = unsafe { core::mem::transmute(raw as usize) };
                f();
            }
        } else if slot.used.load(Ordering::Acquire) != 0 {
            any_left = true;
        }
    }
    if !any_left {
        cpu().deferred_mask.fetch_and(!(1 << irql), Ordering::AcqRel);
    }
}

/// Request that `Schedule()` run as soon as IRQL returns to STANDARD.
/// Called from `IRQL_SCHEDULER` code paths that cannot switch contexts
/// directly (e.g. while still holding the scheduler lock).
pub fn postpone_schedule_until_standard_irql() {
    cpu().postponed_switch.store(1, Ordering::Release);
}

/// Assert the current IRQL is exactly `irql`. Debug-only consistency check
/// mirroring the `EXACT_IRQL` macro used throughout synchronization code.
#[inline]
pub fn assert_exact_irql(irql: Irql) {
    debug_assert_eq!(get_irql(), irql, "EXACT_IRQL({}) violated", irql);
}

#[inline]
pub fn assert_max_irql(irql: Irql) {
    debug_assert!(get_irql() <= irql, "MAX_IRQL({}) violated: at {}", irql, get_irql());
}

#[inline]
pub fn assert_min_irql(irql: Irql) {
    debug_assert!(get_irql() >= irql, "MIN_IRQL({}) violated: at {}", irql, get_irql());
}

// ── System timer ────────────────────────────────────────────────────────

static TIMER_LOCK: AtomicU8 = AtomicU8::new(0);
static SYSTEM_TIME_NANOS: AtomicU64 = AtomicU64::new(0);

/// Accrue `nanos` of elapsed time. Called from the PIT IRQ handler at
/// [`IRQL_TIMER`], on the boot CPU only.
pub fn received_timer(nanos: u64) {
    while TIMER_LOCK.compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed).is_err() {
        core::hint::spin_loop();
    }
    SYSTEM_TIME_NANOS.fetch_add(nanos, Ordering::Relaxed);
    TIMER_LOCK.store(0, Ordering::Release);

    let now = SYSTEM_TIME_NANOS.load(Ordering::Relaxed);
    crate::task::scheduler::drain_sleep_queue(now);
    crate::task::alarm::drain_expired(now);
}

/// Nanoseconds elapsed since [`init`] was called.
pub fn get_system_timer() -> u64 {
    SYSTEM_TIME_NANOS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_is_monotonic() {
        assert!(IRQL_STANDARD < IRQL_PAGE_FAULT);
        assert!(IRQL_PAGE_FAULT < IRQL_SCHEDULER);
        assert!(IRQL_SCHEDULER < IRQL_DRIVER);
        assert!(IRQL_DRIVER <= IRQL_DRIVER_MAX);
        assert!(IRQL_DRIVER_MAX < IRQL_TIMER);
        assert!(IRQL_TIMER < IRQL_HIGH);
    }
}
