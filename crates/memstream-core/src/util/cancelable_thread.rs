use std::{
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
};

/// Stop signal shared between a cancelable worker and its owner.
///
/// The signal only ever moves from "running" to "stop requested". Workers poll
/// [`StopToken::should_stop`] at their suspension points and block in
/// [`StopToken::wait`] once they have nothing left to do.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopToken {
    /// Creates a token in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        // the flag is a plain bool, a panicking holder cannot leave it inconsistent
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests the worker to stop and wakes it if it is waiting.
    pub fn request_stop(&self) {
        let mut stop = self.flag();
        *stop = true;
        self.inner.1.notify_all();
    }

    /// Returns `true` once a stop has been requested.
    pub fn should_stop(&self) -> bool {
        *self.flag()
    }

    /// Blocks until a stop is requested.
    pub fn wait(&self) {
        let guard = self.flag();
        let _stopped = self
            .inner
            .1
            .wait_while(guard, |stop| !*stop)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// A thread handle that can be signaled to stop.
///
/// Wraps a join handle with the [`StopToken`] handed to the thread.
pub struct CancelableJoinHandle<T> {
    handle: thread::JoinHandle<T>,
    token: StopToken,
}

/// Spawns a named cancelable thread that can be joined later.
///
/// The thread is passed a [`StopToken`] which is triggered by
/// [`CancelableJoinHandle::join`].
///
/// # Errors
///
/// Returns an I/O error if the operating system cannot create the thread.
pub fn spawn_cancelable<T: Send + 'static>(
    name: &str,
    func: impl FnOnce(StopToken) -> T + Send + 'static,
) -> io::Result<CancelableJoinHandle<T>> {
    let token = StopToken::new();
    let t = token.clone();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || func(t))?;
    Ok(CancelableJoinHandle { handle, token })
}

impl<T> CancelableJoinHandle<T> {
    /// Returns `true` if the thread function has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the thread to stop and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns error if thread panicked
    pub fn join(self) -> thread::Result<T> {
        self.token.request_stop();
        self.handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::{StopToken, spawn_cancelable};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn join_wakes_waiting_thread() {
        let handle = spawn_cancelable("waiter", |token| {
            token.wait();
            42
        })
        .expect("spawn");
        thread::sleep(Duration::from_millis(10));
        assert!(!handle.is_finished());
        assert_eq!(handle.join().expect("join"), 42);
    }

    #[test]
    fn stop_is_sticky_across_clones() {
        let token = StopToken::new();
        let other = token.clone();
        assert!(!other.should_stop());
        token.request_stop();
        assert!(other.should_stop());
        other.wait();
    }
}
