//! Miscellaneous utility structs and functions.

use futures::future::{self, AbortHandle, Future};

use crate::platform;

/// Handle of a spawned task, aborting it on [`Drop`].
#[derive(Debug)]
pub struct TaskHandle(AbortHandle);

impl Drop for TaskHandle {
    #[inline]
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawns the given `task` with [`platform::spawn`] and returns a
/// [`TaskHandle`] bound to its lifetime.
pub fn spawn_abortable<F>(task: F) -> TaskHandle
where
    F: Future<Output = ()> + 'static,
{
    let (fut, abort) = future::abortable(task);
    platform::spawn(async move {
        let _ = fut.await;
    });
    TaskHandle(abort)
}
