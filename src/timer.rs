use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use crossbeam::select;
use tracing::debug;

/// A single-shot timer that posts `message` into a queue when it expires.
///
/// Stopping or dropping the timer before it fires cancels it. Expiry never touches the
/// owner's state, it only enqueues the message.
pub struct OneShotTimer {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl OneShotTimer {
    pub fn start<T: Send + 'static>(duration: Duration, queue: Sender<T>, message: T) -> Self {
        let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);

        let handle: JoinHandle<()> = thread::spawn(move || {
            select! {
                recv(cancel_rx) -> _ => {}
                default(duration) => {
                    if queue.try_send(message).is_err() {
                        debug!("timer expired but its queue is full or closed");
                    }
                }
            }
        });

        return OneShotTimer {
            cancel: Some(cancel_tx),
            handle: Some(handle),
        };
    }

    pub fn is_finished(&self) -> bool {
        return self.handle.as_ref().map_or(true, |handle| handle.is_finished());
    }

    pub fn stop(&mut self) {
        // dropping the sender wakes the timer thread
        self.cancel.take();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
