//! Cooperative shutdown: an atomic flag paired with a notifier so async
//! waits can be interrupted instead of polling the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tokio::sync::Notify;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn notifier() -> &'static Notify {
    static NOTIFY: OnceLock<Notify> = OnceLock::new();
    NOTIFY.get_or_init(Notify::new)
}

/// Check if shutdown was requested.
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// Request shutdown and wake every waiter. Returns whether shutdown had
/// already been requested, so a signal handler can escalate on the
/// second signal.
pub fn request_shutdown() -> bool {
    let was_requested = SHUTDOWN.swap(true, Ordering::Relaxed);
    notifier().notify_waiters();
    was_requested
}

/// Resolve once shutdown is requested. Safe to race with
/// [`request_shutdown`]: the waiter is registered before the flag is
/// checked, so a notification between check and await is not lost.
pub async fn wait_for_shutdown() {
    let notified = notifier().notified();
    tokio::pin!(notified);
    notified.as_mut().enable();
    if is_shutdown_requested() {
        return;
    }
    notified.await;
}
