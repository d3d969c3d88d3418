use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use loomerp_events::{EventBus, Subscription};

const TICK: Duration = Duration::from_millis(100);

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the worker to stop after the message in hand and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!(worker = self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs a handler for every message published on a bus, on a dedicated thread.
///
/// Delivery is at-least-once from the handler's point of view: handlers must be
/// idempotent. Handler errors are logged and the loop moves on.
#[derive(Debug)]
pub struct EventWorker;

impl EventWorker {
    /// Subscribes before spawning, so nothing published after this call is missed.
    pub fn spawn<M, B, H, E>(name: &'static str, bus: &B, handler: H) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M>,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display,
    {
        Self::spawn_with(name, bus.subscribe(), handler)
    }

    pub fn spawn_with<M, H, E>(name: &'static str, subscription: Subscription<M>, mut handler: H) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, subscription, shutdown_rx, &mut handler))?;

        tracing::info!(worker = name, "worker started");
        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(name: &'static str, sub: Subscription<M>, shutdown_rx: mpsc::Receiver<()>, handler: &mut H)
where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(TICK) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    tracing::warn!(worker = name, error = %err, "worker handler failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::info!(worker = name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomerp_events::InMemoryEventBus;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[test]
    fn handles_published_messages_until_shut_down() {
        let bus = InMemoryEventBus::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = EventWorker::spawn("test-worker", &bus, move |n: u32| {
            if n == 13 {
                return Err(format!("unlucky {n}"));
            }
            sink.lock().unwrap().push(n);
            Ok(())
        })
        .unwrap();

        for n in [1, 13, 2] {
            bus.publish(n).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
