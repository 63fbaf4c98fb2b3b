//! Alarms (component I): cancellable one-shot timer callbacks, distinct
//! from a thread sleep. An alarm fires a callback rather than waking a
//! specific blocked thread; `nanosleep`'s blocking wait is itself built
//! on top of an alarm whose callback releases a semaphore the sleeping
//! thread waits on.

use crate::irql::get_system_timer;
use crate::sync::spinlock::Spinlock;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

pub type AlarmCallback = fn(usize);

struct Alarm {
    id: u32,
    deadline_ns: u64,
    callback: AlarmCallback,
    context: usize,
}

static NEXT_ALARM_ID: AtomicU32 = AtomicU32::new(1);
static ALARMS: Spinlock<Vec<Alarm>> = Spinlock::new_at(Vec::new(), crate::irql::IRQL_TIMER);

/// `CreateAlarmAbsolute`: fire `callback(context)` once system time
/// reaches `deadline_ns`.
pub fn create_alarm_absolute(deadline_ns: u64, callback: AlarmCallback, context: usize) -> u32 {
    let id = NEXT_ALARM_ID.fetch_add(1, Ordering::Relaxed);
    ALARMS.lock().push(Alarm { id, deadline_ns, callback, context });
    id
}

/// `CreateAlarmMicro`: fire `micros_from_now` microseconds from now.
pub fn create_alarm_micro(micros_from_now: u64, callback: AlarmCallback, context: usize) -> u32 {
    create_alarm_absolute(get_system_timer() + micros_from_now * 1000, callback, context)
}

/// `DestroyAlarm`: cancel a pending alarm. Returns whether it was still
/// pending (an already-fired or unknown id is a no-op, not an error).
pub fn destroy_alarm(id: u32) -> bool {
    let mut alarms = ALARMS.lock();
    let before = alarms.len();
    alarms.retain(|a| a.id != id);
    alarms.len() != before
}

/// `GetAlarmTimeRemaining`: nanoseconds left before `id` fires, or
/// `None` if it is not pending.
pub fn get_alarm_time_remaining(id: u32) -> Option<u64> {
    let now = get_system_timer();
    ALARMS.lock().iter().find(|a| a.id == id).map(|a| a.deadline_ns.saturating_sub(now))
}

/// Called from [`crate::irql::received_timer`] after each timer accrual.
/// Fires (and removes) every alarm whose deadline has passed. Callbacks
/// run with the alarm list unlocked, so a callback that itself creates
/// or destroys an alarm does not deadlock.
pub fn drain_expired(now_ns: u64) {
    let mut fired = Vec::new();
    {
        let mut alarms = ALARMS.lock();
        let mut i = 0;
        while i < alarms.len() {
            if alarms[i].deadline_ns <= now_ns {
                fired.push(alarms.remove(i));
            } else {
                i += 1;
            }
        }
    }
    for alarm in fired {
        (alarm.callback)(alarm.context);
    }
}

/// The single process-wide slot backing the `alarm()` syscall:
/// installing a new alarm replaces any previous one, returning the
/// microseconds that were left on it (0 if none was pending).
static UNIX_ALARM: Spinlock<Option<u32>> = Spinlock::new_at(None, crate::irql::IRQL_TIMER);

pub fn install_unix_alarm(seconds: u32, callback: AlarmCallback, context: usize) -> u32 {
    let mut slot = UNIX_ALARM.lock();
    let remaining_micros =
        slot.and_then(get_alarm_time_remaining).map(|ns| (ns / 1000) as u32).unwrap_or(0);
    if let Some(old_id) = slot.take() {
        destroy_alarm(old_id);
    }
    *slot = if seconds > 0 { Some(create_alarm_micro(seconds as u64 * 1_000_000, callback, context)) } else { None };
    remaining_micros
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicBool;

    static FIRED: AtomicBool = AtomicBool::new(false);
    fn mark_fired(_ctx: usize) {
        FIRED.store(true, Ordering::SeqCst);
    }

    #[test]
    fn alarm_fires_once_deadline_passes() {
        FIRED.store(false, Ordering::SeqCst);
        let id = create_alarm_absolute(1000, mark_fired, 0);
        drain_expired(500);
        assert!(!FIRED.load(Ordering::SeqCst));
        assert!(get_alarm_time_remaining(id).is_some());
        drain_expired(1000);
        assert!(FIRED.load(Ordering::SeqCst));
        assert!(get_alarm_time_remaining(id).is_none());
    }

    #[test]
    fn destroy_alarm_prevents_firing() {
        FIRED.store(false, Ordering::SeqCst);
        let id = create_alarm_absolute(10, mark_fired, 0);
        assert!(destroy_alarm(id));
        drain_expired(100);
        assert!(!FIRED.load(Ordering::SeqCst));
        assert!(!destroy_alarm(id));
    }

    #[test]
    fn install_unix_alarm_returns_previous_remaining() {
        let base = get_system_timer();
        let first = install_unix_alarm(10, mark_fired, 0);
        assert_eq!(first, 0);
        let second = install_unix_alarm(1, mark_fired, 0);
        assert!(second > 0);
        let _ = base;
    }
}
