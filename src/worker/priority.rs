//! OS scheduling priority for worker threads.

use std::io;

/// Apply `priority` to the calling thread.
///
/// Zero keeps the inherited scheduling policy. Any other value requests
/// real-time FIFO scheduling at that priority, which usually needs elevated
/// privileges.
#[cfg(unix)]
pub(crate) fn apply_to_current_thread(priority: i32) -> io::Result<()> {
    if priority == 0 {
        return Ok(());
    }

    // sched_param carries platform-specific padding on some targets.
    // SAFETY: sched_param is a plain C struct of integers; all-zero is a valid value.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;

    // SAFETY: pthread_self() is the live calling thread and `param` outlives the call,
    // which only reads it.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn apply_to_current_thread(priority: i32) -> io::Result<()> {
    if priority == 0 {
        return Ok(());
    }
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread priorities are only supported on unix",
    ))
}
