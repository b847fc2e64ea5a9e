use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
    disposed: Arc<Mutex<bool>>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawns the timer task; must be called inside a tokio runtime.
    pub fn new<F>(quiet: Duration, sink: F) -> Self
    where
        F: Fn(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let disposed = Arc::new(Mutex::new(false));
        let worker = tokio::spawn(debounce_loop(quiet, rx, Arc::clone(&disposed), sink));
        Self {
            tx,
            disposed,
            worker,
        }
    }

    pub fn call(&self, value: T) {
        if *self.disposed.lock() {
            return;
        }
        let _ = self.tx.send(value);
    }

    pub fn dispose(&self) {
        *self.disposed.lock() = true;
        self.worker.abort();
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.lock()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        *self.disposed.lock() = true;
        self.worker.abort();
    }
}

async fn debounce_loop<T, F>(
    quiet: Duration,
    mut rx: mpsc::UnboundedReceiver<T>,
    disposed: Arc<Mutex<bool>>,
    sink: F,
) where
    F: Fn(T),
{
    let mut pending: Option<T> = None;
    loop {
        tokio::select! {
            next = rx.recv() => {
                match next {
                    Some(value) => pending = Some(value),
                    None => break,
                }
            }
            _ = tokio::time::sleep(quiet), if pending.is_some() => {
                let Some(value) = pending.take() else {
                    continue;
                };
                if !fire(&disposed, &sink, value) {
                    break;
                }
            }
        }
    }
}

// The flag is held while the sink runs so `dispose` cannot return mid-send.
fn fire<T, F: Fn(T)>(disposed: &Mutex<bool>, sink: &F, value: T) -> bool {
    let disposed = disposed.lock();
    if *disposed {
        return false;
    }
    sink(value);
    true
}
