use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

type Action = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Pending {
    generation: u64,
    action: Option<Action>,
    timer: Option<JoinHandle<()>>,
}

/// Timer wrapper that runs only the most recent action once `delay` has passed
/// without another call.
///
/// - `call` (re)arms the timer and replaces any pending action.
/// - `cancel` drops the pending action.
/// - `flush` runs the pending action immediately.
///
/// Clones share the same timer.
#[derive(Clone)]
pub struct Debouncer {
    delay: Duration,
    inner: Arc<Mutex<Pending>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Must be called from within a tokio runtime.
    pub fn call<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self.inner.lock().expect("debouncer mutex poisoned");
        guard.generation += 1;
        if let Some(timer) = guard.timer.take() {
            timer.abort();
        }
        guard.action = Some(Box::new(action));

        let generation = guard.generation;
        let inner = self.inner.clone();
        let delay = self.delay;
        guard.timer = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let action = {
                let mut guard = inner.lock().expect("debouncer mutex poisoned");
                if guard.generation != generation {
                    return;
                }
                guard.timer = None;
                guard.action.take()
            };
            if let Some(action) = action {
                action();
            }
        }));
    }

    pub fn cancel(&self) {
        let mut guard = self.inner.lock().expect("debouncer mutex poisoned");
        guard.generation += 1;
        guard.action = None;
        if let Some(timer) = guard.timer.take() {
            timer.abort();
        }
    }

    /// Run the pending action now, if any. Returns whether one ran.
    pub fn flush(&self) -> bool {
        let action = {
            let mut guard = self.inner.lock().expect("debouncer mutex poisoned");
            guard.generation += 1;
            if let Some(timer) = guard.timer.take() {
                timer.abort();
            }
            guard.action.take()
        };
        match action {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner
            .lock()
            .expect("debouncer mutex poisoned")
            .action
            .is_some()
    }
}
