// Worker pool fanning pushes out over a shared queue.
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use super::client::Client;
use crate::error::{Error, Result};
use crate::notification::Notification;

const POOL_QUEUE_DEPTH: usize = 1024;

/// Outcome of one pooled push: the device token it addressed, the
/// `apns-id` when one was assigned, and the error if the push failed.
#[derive(Debug)]
pub struct PoolResponse {
    pub token: String,
    pub id: String,
    pub error: Option<Error>,
}

/// A bounded set of workers draining a shared notification queue through
/// one [`Client`]. No ordering is guaranteed across workers.
pub struct Pool {
    tx: Option<mpsc::Sender<Notification>>,
    workers: Vec<JoinHandle<()>>,
}

impl Client {
    /// Starts `workers` tasks pushing queued notifications. Each result is
    /// forwarded to `responses` when a channel is supplied.
    pub fn pool(&self, workers: usize, responses: Option<mpsc::Sender<PoolResponse>>) -> Pool {
        let (tx, rx) = mpsc::channel::<Notification>(POOL_QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|index| {
                let client = self.clone();
                let rx = Arc::clone(&rx);
                let responses = responses.clone();
                tokio::spawn(async move {
                    loop {
                        // The lock is held only while waiting on the queue,
                        // so idle workers take turns.
                        let notification = rx.lock().await.recv().await;
                        let Some(notification) = notification else {
                            break;
                        };
                        let result = client.push(&notification).await;
                        let Some(responses) = &responses else {
                            continue;
                        };
                        let response = match result {
                            Ok(id) => PoolResponse {
                                token: notification.token,
                                id,
                                error: None,
                            },
                            Err(error) => PoolResponse {
                                token: notification.token,
                                id: response_id(&error),
                                error: Some(error),
                            },
                        };
                        let _ = responses.send(response).await;
                    }
                    debug!(index, "pool worker exited");
                })
            })
            .collect();
        Pool {
            tx: Some(tx),
            workers,
        }
    }
}

fn response_id(error: &Error) -> String {
    match error {
        Error::Response(response) => response.apns_id.clone().unwrap_or_default(),
        _ => String::new(),
    }
}

impl Pool {
    /// Clones the notification once per token and queues each copy.
    pub async fn push<T: AsRef<str>>(&self, notification: &Notification, tokens: &[T]) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(Error::ClientIsClosed);
        };
        for token in tokens {
            let mut clone = notification.clone();
            clone.token = token.as_ref().to_string();
            tx.send(clone).await.map_err(|_| Error::ClientIsClosed)?;
        }
        Ok(())
    }

    /// Stops accepting pushes. Workers drain what is already queued; the
    /// caller must keep consuming responses until the channel closes.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Closes the pool and waits for the workers to finish.
    pub async fn join(mut self) {
        self.tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}
