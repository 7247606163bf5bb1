use std::any::Any;
use std::cell::Cell;
use std::future::{poll_fn, Future};
use std::panic::AssertUnwindSafe;
use std::pin::pin;

use futures::FutureExt;

thread_local! {
    // Nesting depth of `catch_panics` polls on this thread
    static CATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct CatchScope;

impl CatchScope {
    fn enter() -> Self {
        CATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        CatchScope
    }
}

impl Drop for CatchScope {
    fn drop(&mut self) {
        CATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Polls `fut`, turning a panic into `Err(payload)`.
///
/// While the future is being polled, [`panic_is_caught`] returns true on the
/// polling thread, so a process-wide panic hook can tell a handled panic from
/// one that will take down its task.
pub async fn catch_panics<F>(fut: F) -> Result<F::Output, Box<dyn Any + Send>>
where
    F: Future,
{
    let mut fut = pin!(AssertUnwindSafe(fut).catch_unwind());
    poll_fn(|cx| {
        let _scope = CatchScope::enter();
        fut.as_mut().poll(cx)
    })
    .await
}

/// True when called from inside a [`catch_panics`] poll on this thread.
pub fn panic_is_caught() -> bool {
    // try_with: panic hooks can run while thread locals are being torn down
    CATCH_DEPTH
        .try_with(|depth| depth.get() > 0)
        .unwrap_or(false)
}
