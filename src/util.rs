use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::sync::Notify;

/// Single slot channel where every send replaces the previous value.
///
/// Readers copy the current value out under a short lock and never wait on the writer.
pub fn latest_value_channel<T: Clone>() -> (LatestSender<T>, LatestReceiver<T>) {
    let shared = Arc::new(Shared {
        value: Mutex::new(None),
        notify: Notify::new(),
        sender_alive: AtomicBool::new(true),
    });

    let sender = LatestSender {
        shared: Arc::clone(&shared),
    };
    let receiver = LatestReceiver { shared };
    (sender, receiver)
}

struct Shared<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
    sender_alive: AtomicBool,
}

pub struct LatestSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone> LatestSender<T> {
    pub fn send(&self, value: T) {
        *self
            .shared
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(value);
        self.shared.notify.notify_waiters();
    }

    pub fn subscribe(&self) -> LatestReceiver<T> {
        LatestReceiver {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for LatestSender<T> {
    fn drop(&mut self) {
        self.shared.sender_alive.store(false, Ordering::SeqCst);
        self.shared.notify.notify_waiters()
    }
}

pub struct LatestReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for LatestReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> LatestReceiver<T> {
    /// Current value without waiting
    pub fn latest(&self) -> Option<T> {
        self.shared
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits for the next published value.
    ///
    /// Returns `None` once the sender is gone.
    pub async fn changed(&self) -> Option<T> {
        // registered before the check so a send or drop in between still wakes us
        let notified = self.shared.notify.notified();
        if !self.shared.sender_alive.load(Ordering::SeqCst) {
            return None;
        }
        notified.await;
        if !self.shared.sender_alive.load(Ordering::SeqCst) {
            return None;
        }
        self.latest()
    }

    pub fn sender_alive(&self) -> bool {
        self.shared.sender_alive.load(Ordering::SeqCst)
    }
}
