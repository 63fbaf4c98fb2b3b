//! System information syscall handlers: `info` (memory/thread counters)
//! and `time` (monotonic nanosecond clock).

use super::helpers::is_valid_user_ptr;
use crate::errno;
use super::helpers::errno_ret;

/// `info(buf_ptr)`: writes a 16-byte
/// `{free_frames: u32, total_frames: u32, heap_used: u32, thread_count: u32}`
/// record. There is no wall-clock RTC backing this kernel, so unlike a
/// general-purpose `sysinfo`, nothing here reflects real-world time.
pub fn sys_info(buf_ptr: u32) -> u32 {
    if !is_valid_user_ptr(buf_ptr, 16) {
        return errno_ret(errno::EFAULT);
    }
    let free = crate::memory::physical::free_frame_count() as u32;
    let total = crate::memory::physical::total_frames() as u32;
    let (heap_used, _heap_total) = crate::memory::heap::heap_stats();
    let threads = crate::task::scheduler::thread_count() as u32;
    unsafe {
        let buf = buf_ptr as *mut u32;
        *buf = free;
        *buf.add(1) = total;
        *buf.add(2) = heap_used as u32;
        *buf.add(3) = threads;
    }
    0
}

/// `time(buf_ptr)`: writes the monotonic system timer (nanoseconds
/// since boot) as a little-endian 64-bit value split across two words.
pub fn sys_time(buf_ptr: u32) -> u32 {
    if !is_valid_user_ptr(buf_ptr, 8) {
        return errno_ret(errno::EFAULT);
    }
    let nanos = crate::irql::get_system_timer();
    unsafe {
        let buf = buf_ptr as *mut u32;
        *buf = nanos as u32;
        *buf.add(1) = (nanos >> 32) as u32;
    }
    0
}
