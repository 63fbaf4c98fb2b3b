//! Preemptive, priority-based thread scheduler.
//!
//! A single global scheduler lock (conceptually `LockScheduler`/
//! `UnlockScheduler` from the original design) protects the thread table
//! and run queue. Unlike an ordinary spinlock, this lock is deliberately
//! *not* released on the same call stack that acquired it when a context
//! switch happens: it stays held (and IRQL stays raised to
//! [`IRQL_SCHEDULER`]) across `context_switch`, and is released by
//! whichever thread next resumes execution at the matching point — either
//! the original caller, once switched back to, or (for a thread running
//! for the very first time) the bootstrap trampoline set up in
//! `Thread::new`. This is what makes it safe for a timer interrupt to
//! land in the middle of switching between two half-prepared contexts.

use crate::irql::{self, Irql, IRQL_SCHEDULER, IRQL_STANDARD};
use crate::task::context::{context_switch, CpuContext};
use crate::task::thread::{Thread, ThreadState, NUM_PRIORITIES, SLEEP_QUEUE};
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

mod run_queue;
use run_queue::RunQueue;

struct SchedulerState {
    threads: BTreeMap<u32, Thread>,
    run_queue: RunQueue,
    current: u32,
    idle_tid: u32,
    sleep_head: u32,
}

static mut STATE: Option<SchedulerState> = None;
static SCHED_LOCKED: AtomicBool = AtomicBool::new(false);
static TICKS_THIS_SLICE: AtomicU32 = AtomicU32::new(0);

/// Timer ticks a thread may run before being preempted in favor of an
/// equal-or-higher-priority ready thread.
const TIME_SLICE_TICKS: u32 = 5;

fn state_mut() -> &'static mut SchedulerState {
    unsafe { STATE.as_mut().expect("scheduler not initialized") }
}

/// Acquire the scheduler lock, raising IRQL to `IRQL_SCHEDULER`. Returns
/// the IRQL to restore on unlock.
fn lock_scheduler() -> Irql {
    let prev = irql::raise_irql(IRQL_SCHEDULER);
    while SCHED_LOCKED.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
        core::hint::spin_loop();
    }
    prev
}

/// Release the scheduler lock and lower IRQL back to `prev`.
fn unlock_scheduler(prev: Irql) {
    SCHED_LOCKED.store(false, Ordering::Release);
    irql::lower_irql(prev);
}

/// Bring up the scheduler with a single idle thread for the boot CPU.
pub fn init() {
    extern "C" fn idle_entry() {
        loop {
            crate::arch::hal::enable_interrupts();
            crate::arch::hal::halt();
        }
    }

    let mut idle = Thread::new(idle_entry, 0, "idle");
    idle.is_idle = true;
    let idle_tid = idle.tid;

    let mut threads = BTreeMap::new();
    threads.insert(idle_tid, idle);

    unsafe {
        STATE = Some(SchedulerState {
            threads,
            run_queue: RunQueue::new(),
            current: idle_tid,
            idle_tid,
            sleep_head: u32::MAX,
        });
    }
}

/// TID of the thread currently executing on this CPU.
pub fn current_tid() -> u32 {
    state_mut().current
}

/// PID of the process owning the thread currently executing on this CPU
/// (0 for kernel threads, which own no process).
pub fn current_pid() -> u32 {
    let state = state_mut();
    state.threads.get(&state.current).map(|t| t.pid).unwrap_or(0)
}

/// Assign `pid` to an existing thread, e.g. right after spawning the
/// first thread of a newly created process.
pub fn set_thread_pid(tid: u32, pid: u32) {
    let prev = lock_scheduler();
    if let Some(t) = state_mut().threads.get_mut(&tid) {
        t.pid = pid;
    }
    unlock_scheduler(prev);
}

/// Like [`current_tid`], but returns `None` instead of panicking if the
/// scheduler has not been initialized yet (safe to call from a fault
/// handler triggered during early boot).
pub fn try_current_tid() -> Option<u32> {
    unsafe { STATE.as_ref().map(|s| s.current) }
}

/// Spawn a new kernel thread, ready to run.
pub fn spawn_kernel_thread(entry: extern "C" fn(), priority: u8, name: &str) -> u32 {
    let prev = lock_scheduler();
    let thread = Thread::new(entry, priority, name);
    let tid = thread.tid;
    let state = state_mut();
    state.threads.insert(tid, thread);
    state.run_queue.enqueue(&mut state.threads, tid, priority);
    unlock_scheduler(prev);
    tid
}

/// Run `f` with mutable access to thread `tid`, if it exists.
pub fn with_thread_mut<R>(tid: u32, f: impl FnOnce(&mut Thread) -> R) -> Option<R> {
    let prev = lock_scheduler();
    let result = state_mut().threads.get_mut(&tid).map(f);
    unlock_scheduler(prev);
    result
}

/// Mark the current thread `Blocked` so the next `schedule()` call will
/// not re-enqueue it on the run queue. The caller must already have
/// linked the thread onto whatever structure is responsible for waking it.
pub fn mark_current_blocked() {
    let prev = lock_scheduler();
    let state = state_mut();
    let tid = state.current;
    state.threads.get_mut(&tid).unwrap().state = ThreadState::Blocked;
    unlock_scheduler(prev);
}

/// Mark `tid` `Ready` and place it on the run queue. Used to wake a
/// thread blocked on a semaphore, mailbox, or timeout.
pub fn wake_tid(tid: u32) {
    let prev = lock_scheduler();
    let state = state_mut();
    wake_tid_locked(state, tid);
    unlock_scheduler(prev);
}

fn wake_tid_locked(state: &mut SchedulerState, tid: u32) {
    if let Some(thread) = state.threads.get_mut(&tid) {
        if thread.state == ThreadState::Blocked {
            thread.state = ThreadState::Ready;
            let priority = thread.priority;
            state.run_queue.enqueue(&mut state.threads, tid, priority);
        }
    }
}

/// Block the current thread (which must already have been marked
/// `Blocked` via [`mark_current_blocked`] and linked onto a wait
/// structure) and switch to the next runnable thread.
pub fn block_current_and_schedule() {
    schedule();
}

/// Voluntarily give up the remainder of the current time slice.
pub fn yield_now() {
    schedule();
}

/// Reschedule if at standard IRQL; otherwise postpone until IRQL returns
/// to standard (mirrors `Schedule()` in the original design).
pub fn schedule() {
    if irql::get_irql() != IRQL_STANDARD {
        irql::postpone_schedule_until_standard_irql();
        return;
    }
    let prev = lock_scheduler();
    schedule_with_lock_held(prev);
}

/// Perform the actual thread switch. Must be called with the scheduler
/// lock held and IRQL exactly `IRQL_SCHEDULER`.
fn schedule_with_lock_held(prev_irql: Irql) {
    irql::assert_exact_irql(IRQL_SCHEDULER);
    TICKS_THIS_SLICE.store(0, Ordering::Relaxed);

    let state = state_mut();
    let old_tid = state.current;

    if let Some(old_thread) = state.threads.get(&old_tid) {
        if old_thread.state == ThreadState::Running {
            let priority = old_thread.priority;
            let is_idle = old_thread.is_idle;
            state.threads.get_mut(&old_tid).unwrap().state = ThreadState::Ready;
            if !is_idle {
                state.run_queue.enqueue(&mut state.threads, old_tid, priority);
            }
        }
    }

    let next_tid = state
        .run_queue
        .dequeue_highest(&mut state.threads)
        .unwrap_or(state.idle_tid);

    state.current = next_tid;
    state.threads.get_mut(&next_tid).unwrap().state = ThreadState::Running;

    if next_tid == old_tid {
        unlock_scheduler(prev_irql);
        return;
    }

    let new_cr3 = state.threads.get(&next_tid).unwrap().context.cr3;
    let new_stack_top = state.threads.get(&next_tid).unwrap().kernel_stack_top();
    crate::arch::hal::set_kernel_stack(new_stack_top);
    if new_cr3 != 0 {
        crate::arch::hal::switch_page_table(new_cr3);
    }

    let old_ctx: *mut CpuContext = &mut state.threads.get_mut(&old_tid).unwrap().context;
    let new_ctx: *const CpuContext = &state.threads.get(&next_tid).unwrap().context;

    // Lock stays held and IRQL stays raised across the switch; whichever
    // thread next resumes execution at this call site is responsible for
    // the matching unlock.
    unsafe { context_switch(old_ctx, new_ctx) };

    unlock_scheduler(prev_irql);
}

/// Called by the PIT IRQ handler once per tick at `IRQL_TIMER`. Decides
/// whether the current thread's time slice has expired.
pub fn schedule_tick() {
    if TICKS_THIS_SLICE.fetch_add(1, Ordering::Relaxed) + 1 >= TIME_SLICE_TICKS {
        irql::defer_until_irql(IRQL_STANDARD, schedule);
    }
}

/// Terminate the current thread with `exit_code` and switch away. Never returns.
pub fn exit_current(exit_code: u32) -> ! {
    let prev = lock_scheduler();
    let state = state_mut();
    let tid = state.current;
    let waiter = state.threads.get_mut(&tid).map(|t| {
        t.state = ThreadState::Terminated;
        t.exit_code = Some(exit_code);
        t.waiter_tid
    }).flatten();
    if let Some(waiter) = waiter {
        wake_tid_locked(state, waiter);
    }
    schedule_with_lock_held(prev);
    unreachable!("terminated thread resumed");
}

/// Block the current thread until `target_tid` terminates, then reap its
/// exit code and remove it from the thread table.
pub fn waitpid(target_tid: u32) -> Option<u32> {
    loop {
        let prev = lock_scheduler();
        let state = state_mut();
        match state.threads.get(&target_tid) {
            None => {
                unlock_scheduler(prev);
                return None;
            }
            Some(t) if t.state == ThreadState::Terminated => {
                let code = t.exit_code;
                state.threads.remove(&target_tid);
                unlock_scheduler(prev);
                return code;
            }
            Some(_) => {
                let me = state.current;
                state.threads.get_mut(&target_tid).unwrap().waiter_tid = Some(me);
                state.threads.get_mut(&me).unwrap().state = ThreadState::Blocked;
                schedule_with_lock_held(prev);
            }
        }
    }
}

// ── Sleep queue ──────────────────────────────────────────────────────────

/// Block the current thread until `deadline_nanos` (measured against
/// [`crate::irql::get_system_timer`]) is reached.
pub fn sleep_current_until(deadline_nanos: u64) {
    let prev = lock_scheduler();
    let state = state_mut();
    let tid = state.current;
    {
        let thread = state.threads.get_mut(&tid).unwrap();
        thread.sleep_deadline = Some(deadline_nanos);
        thread.timed_out = false;
        thread.next[SLEEP_QUEUE] = state.sleep_head;
    }
    state.sleep_head = tid;
    state.threads.get_mut(&tid).unwrap().state = ThreadState::Blocked;
    schedule_with_lock_held(prev);
}

/// Register `tid` on the sleep queue with a wake deadline without
/// blocking the caller — used by semaphore/mailbox timed waits, where
/// the caller blocks on its own wait list and this only arranges the
/// timeout side.
pub fn arm_timeout(tid: u32, deadline_nanos: u64) {
    let prev = lock_scheduler();
    let state = state_mut();
    {
        let thread = state.threads.get_mut(&tid).unwrap();
        thread.sleep_deadline = Some(deadline_nanos);
        thread.timed_out = false;
        thread.next[SLEEP_QUEUE] = state.sleep_head;
    }
    state.sleep_head = tid;
    unlock_scheduler(prev);
}

/// Remove `tid` from the sleep queue without waking it (used when a
/// timed wait is satisfied by something other than the timeout).
pub fn disarm_timeout(tid: u32) {
    let prev = lock_scheduler();
    let state = state_mut();
    remove_from_sleep_queue(state, tid);
    unlock_scheduler(prev);
}

fn remove_from_sleep_queue(state: &mut SchedulerState, tid: u32) {
    if state.sleep_head == tid {
        state.sleep_head = state.threads.get(&tid).map(|t| t.next[SLEEP_QUEUE]).unwrap_or(u32::MAX);
        return;
    }
    let mut cur = state.sleep_head;
    while cur != u32::MAX {
        let next = state.threads.get(&cur).unwrap().next[SLEEP_QUEUE];
        if next == tid {
            let after = state.threads.get(&tid).map(|t| t.next[SLEEP_QUEUE]).unwrap_or(u32::MAX);
            state.threads.get_mut(&cur).unwrap().next[SLEEP_QUEUE] = after;
            return;
        }
        cur = next;
    }
}

/// Called from [`crate::irql::received_timer`] after each timer accrual.
/// Wakes every sleeping thread whose deadline has passed.
pub fn drain_sleep_queue(now_nanos: u64) {
    let prev = lock_scheduler();
    let state = state_mut();
    let mut cur = state.sleep_head;
    let mut prev_tid = u32::MAX;
    let mut expired = alloc::vec::Vec::new();

    while cur != u32::MAX {
        let next = state.threads.get(&cur).unwrap().next[SLEEP_QUEUE];
        let deadline = state.threads.get(&cur).unwrap().sleep_deadline;
        if deadline.map(|d| now_nanos >= d).unwrap_or(false) {
            if prev_tid == u32::MAX {
                state.sleep_head = next;
            } else {
                state.threads.get_mut(&prev_tid).unwrap().next[SLEEP_QUEUE] = next;
            }
            expired.push(cur);
        } else {
            prev_tid = cur;
        }
        cur = next;
    }

    for tid in expired {
        let thread = state.threads.get_mut(&tid).unwrap();
        thread.sleep_deadline = None;
        thread.timed_out = true;
        wake_tid_locked(state, tid);
    }

    unlock_scheduler(prev);
}

/// Whether `tid` was most recently woken by timeout expiry rather than by
/// whatever it was actually waiting on. Consumes (clears) the flag.
pub fn take_timed_out(tid: u32) -> bool {
    let prev = lock_scheduler();
    let result = state_mut().threads.get_mut(&tid).map(|t| core::mem::take(&mut t.timed_out)).unwrap_or(false);
    unlock_scheduler(prev);
    result
}

/// Reap every terminated, non-user (kernel worker) thread that nothing
/// is waiting on — detached background threads that self-terminated
/// with no parent ever going to call `waitpid`. Removing the table
/// entry drops its `Box<[u8]>` kernel stack.
///
/// Deliberately scoped to `!is_user`: a user thread backing a process
/// is always reaped by `waitpid` itself (which removes the table entry
/// the moment it observes `Terminated`), so there is no terminated
/// process thread for this scan to race against.
pub fn reap_orphaned_terminated() -> usize {
    let prev = lock_scheduler();
    let state = state_mut();
    let dead: alloc::vec::Vec<u32> = state
        .threads
        .iter()
        .filter(|(_, t)| t.state == ThreadState::Terminated && !t.is_user && t.waiter_tid.is_none() && !t.is_idle)
        .map(|(tid, _)| *tid)
        .collect();
    for tid in &dead {
        state.threads.remove(tid);
    }
    unlock_scheduler(prev);
    dead.len()
}

/// Total number of threads known to the scheduler (for diagnostics/tests).
pub fn thread_count() -> usize {
    let prev = lock_scheduler();
    let n = state_mut().threads.len();
    unlock_scheduler(prev);
    n
}

#[allow(dead_code)]
const _: () = assert!(NUM_PRIORITIES > 0);
