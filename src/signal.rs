//! Ctrl-C handling for apply
//!
//! The first interrupt cancels the apply: no new operation starts and the
//! ones in flight finish and are recorded in state. A second interrupt
//! exits immediately.

use anyhow::{Context, Result};
use declarative::CancelToken;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    if INTERRUPTS.fetch_add(1, Ordering::SeqCst) >= 1 {
        // SAFETY: _exit is async-signal-safe
        unsafe { libc::_exit(130) };
    }
}

fn interrupted() -> bool {
    INTERRUPTS.load(Ordering::SeqCst) > 0
}

/// Cancel `cancel` when the user presses Ctrl-C.
pub fn cancel_on_interrupt(cancel: &CancelToken) -> Result<()> {
    #[cfg(unix)]
    {
        let handler = on_interrupt as extern "C" fn(libc::c_int);
        // SAFETY: the handler only touches an atomic and calls _exit
        let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            anyhow::bail!("Failed to install the interrupt handler");
        }
    }

    let cancel = cancel.clone();
    thread::Builder::new()
        .name("interrupt".into())
        .spawn(move || {
            while !interrupted() {
                thread::sleep(Duration::from_millis(100));
            }
            crate::ui::warn("Interrupted: waiting for operations in flight (Ctrl-C again to abort)");
            cancel.cancel();
        })
        .context("Failed to start the interrupt watcher")?;
    Ok(())
}
