//! Per-user dispatch.
//!
//! The poll loop must never wait on one user's pipeline. [`Router`] keeps one
//! unbounded queue and one worker task per active user: events for the same
//! user are handled strictly in arrival order, events for different users run
//! concurrently. A worker that stays idle for `idle_timeout` exits and
//! removes itself from the map under the same lock `dispatch` uses, so no
//! event is stranded in a queue nobody drains.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// An event routed to one user's queue.
pub trait Keyed: Send + 'static {
    fn key(&self) -> i64;
}

#[async_trait]
pub trait Handler<E>: Send + Sync + 'static {
    async fn handle(&self, event: E);
}

type Queues<E> = Arc<Mutex<HashMap<i64, mpsc::UnboundedSender<E>>>>;

pub struct Router<E, H> {
    handler: Arc<H>,
    queues: Queues<E>,
    idle_timeout: Duration,
}

impl<E, H> Router<E, H>
where
    E: Keyed,
    H: Handler<E>,
{
    pub fn new(handler: Arc<H>, idle_timeout: Duration) -> Self {
        Self {
            handler,
            queues: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Enqueue `event` behind earlier events for the same key. Returns the
    /// worker handle when a new worker was started.
    pub fn dispatch(&self, event: E) -> Option<JoinHandle<()>> {
        let key = event.key();
        let mut queues = match self.queues.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };

        let event = match queues.get(&key) {
            Some(tx) => match tx.send(event) {
                Ok(()) => return None,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive until the worker below starts.
        let _ = tx.send(event);
        queues.insert(key, tx);
        drop(queues);

        Some(tokio::spawn(run_worker(
            key,
            rx,
            self.handler.clone(),
            self.queues.clone(),
            self.idle_timeout,
        )))
    }

    /// Number of users with a live worker.
    pub fn active_users(&self) -> usize {
        self.queues.lock().map(|q| q.len()).unwrap_or_default()
    }
}

async fn run_worker<E, H>(
    key: i64,
    mut rx: mpsc::UnboundedReceiver<E>,
    handler: Arc<H>,
    queues: Queues<E>,
    idle_timeout: Duration,
) where
    E: Keyed,
    H: Handler<E>,
{
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(event)) => {
                handler.handle(event).await;
                continue;
            }
            Ok(None) => return,
            Err(_) => {}
        }

        // Re-check under the lock: dispatch may have queued more work.
        let next = {
            let mut map = match queues.lock() {
                Ok(q) => q,
                Err(poisoned) => poisoned.into_inner(),
            };
            match rx.try_recv() {
                Ok(event) => Some(event),
                Err(_) => {
                    map.remove(&key);
                    None
                }
            }
        };
        match next {
            Some(event) => handler.handle(event).await,
            None => {
                tracing::trace!(user_id = key, "user worker retired");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_millis(20);

    struct Event {
        user: i64,
        seq: u32,
    }

    impl Keyed for Event {
        fn key(&self) -> i64 {
            self.user
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(i64, u32)>>,
    }

    #[async_trait]
    impl Handler<Event> for Recorder {
        async fn handle(&self, event: Event) {
            // Later events for a user finish faster; order must still hold.
            tokio::time::sleep(Duration::from_millis(10 - event.seq as u64)).await;
            self.seen.lock().unwrap().push((event.user, event.seq));
        }
    }

    #[tokio::test]
    async fn test_same_user_events_run_in_order() {
        let recorder = Arc::new(Recorder::default());
        let router = Router::new(recorder.clone(), IDLE);

        let mut workers = Vec::new();
        for seq in 0..5 {
            workers.extend(router.dispatch(Event { user: 1, seq }));
            workers.extend(router.dispatch(Event { user: 2, seq }));
        }
        for w in workers {
            w.await.unwrap();
        }

        let seen = recorder.seen.lock().unwrap().clone();
        let user1: Vec<u32> = seen.iter().filter(|(u, _)| *u == 1).map(|(_, s)| *s).collect();
        let user2: Vec<u32> = seen.iter().filter(|(u, _)| *u == 2).map(|(_, s)| *s).collect();
        assert_eq!(user1, vec![0, 1, 2, 3, 4]);
        assert_eq!(user2, vec![0, 1, 2, 3, 4]);
        assert_eq!(router.active_users(), 0);
    }

    struct Blocking {
        gate: tokio::sync::Semaphore,
        done: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Handler<Event> for Blocking {
        async fn handle(&self, event: Event) {
            if event.user == 1 {
                let _permit = self.gate.acquire().await.unwrap();
            }
            self.done.lock().unwrap().push(event.user);
        }
    }

    #[tokio::test]
    async fn test_slow_user_does_not_block_others() {
        let handler = Arc::new(Blocking {
            gate: tokio::sync::Semaphore::new(0),
            done: Mutex::new(Vec::new()),
        });
        let router = Router::new(handler.clone(), IDLE);

        let slow = router.dispatch(Event { user: 1, seq: 0 }).unwrap();
        let fast = router.dispatch(Event { user: 2, seq: 0 }).unwrap();
        tokio::time::timeout(Duration::from_secs(1), fast)
            .await
            .expect("user 2 must not wait for user 1")
            .unwrap();
        assert_eq!(*handler.done.lock().unwrap(), vec![2]);

        handler.gate.add_permits(1);
        slow.await.unwrap();
        assert_eq!(*handler.done.lock().unwrap(), vec![2, 1]);
    }
}
