//! Pending request set
//!
//! In-flight correlation-id bookkeeping for one control channel. An id is
//! present in the map from the moment a response-requiring command is
//! handed to the sender until exactly one response (or channel teardown)
//! resolves it. Ids are never reused while present.
//!
//! Ids are drawn uniformly at random from the positive half of the 16-bit
//! range and re-drawn on collision. The live set is tiny relative to the
//! id space, so the retry loop is effectively bounded. Random allocation
//! survives server restarts without any shared sequence state with the
//! provider.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;

use crate::control::command::Response;
use crate::error::{Error, Result};

/// Upper bound (exclusive) for correlation ids
pub const MAX_CORRELATION_ID: u16 = 0x7fff;

/// Map of in-flight correlation ids to response channels
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<u16, oneshot::Sender<Response>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and register the responder under it
    ///
    /// Draw and insert happen under one lock so two concurrent sends can
    /// never share an id.
    pub fn register(&self, responder: oneshot::Sender<Response>) -> u16 {
        let mut map = self.inner.lock();
        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate = rng.gen_range(1..MAX_CORRELATION_ID);
            if !map.contains_key(&candidate) {
                break candidate;
            }
        };
        map.insert(id, responder);
        id
    }

    /// Resolve a pending entry with its response, exactly once
    ///
    /// Returns `UnknownCorrelationId` if the id has no entry, which
    /// signals a duplicate or stale response; the caller logs and drops.
    pub fn resolve(&self, id: u16, response: Response) -> Result<()> {
        let responder = self
            .inner
            .lock()
            .remove(&id)
            .ok_or(Error::UnknownCorrelationId(id))?;
        // Receiver may have given up waiting; that is not an error here.
        let _ = responder.send(response);
        Ok(())
    }

    /// Drop a single entry without resolving it (encode failure path)
    pub fn discard(&self, id: u16) {
        self.inner.lock().remove(&id);
    }

    /// Fail every pending entry
    ///
    /// Dropping the senders wakes each waiting caller with a channel-dead
    /// error instead of leaving them hanging.
    pub fn fail_all(&self) -> usize {
        let mut map = self.inner.lock();
        let count = map.len();
        map.clear();
        count
    }

    /// Number of unresolved entries
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn response(id: u16) -> Response {
        Response::decode(&format!(r#"{{"id":{},"text":"pong"}}"#, id)).unwrap()
    }

    #[test]
    fn test_register_allocates_distinct_ids() {
        let pending = PendingRequests::new();
        let mut ids = std::collections::HashSet::new();

        let mut receivers = Vec::new();
        for _ in 0..100 {
            let (tx, rx) = oneshot::channel();
            ids.insert(pending.register(tx));
            receivers.push(rx);
        }

        assert_eq!(ids.len(), 100);
        assert_eq!(pending.len(), 100);
        for id in &ids {
            assert!(*id >= 1 && *id < MAX_CORRELATION_ID);
        }
    }

    #[tokio::test]
    async fn test_resolve_fires_exactly_once() {
        let pending = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        let id = pending.register(tx);

        pending.resolve(id, response(id)).unwrap();
        assert_eq!(pending.len(), 0);

        let got = rx.await.unwrap();
        assert_eq!(got.id, id);

        // A second response with the same id is a no-op.
        assert!(matches!(
            pending.resolve(id, response(id)),
            Err(Error::UnknownCorrelationId(_))
        ));
    }

    #[test]
    fn test_resolve_unknown_id() {
        let pending = PendingRequests::new();
        assert!(matches!(
            pending.resolve(42, response(42)),
            Err(Error::UnknownCorrelationId(42))
        ));
    }

    #[tokio::test]
    async fn test_fail_all_wakes_waiters() {
        let pending = PendingRequests::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.register(tx1);
        pending.register(tx2);

        assert_eq!(pending.fail_all(), 2);
        assert!(pending.is_empty());

        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_registration_size_tracks_unresolved() {
        let pending = Arc::new(PendingRequests::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pending = Arc::clone(&pending);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    let (tx, _rx) = oneshot::channel();
                    ids.push(pending.register(tx));
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        assert_eq!(pending.len(), 400);
        let distinct: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(distinct.len(), 400);

        // Resolve half, size must track the unresolved count.
        for id in all.iter().take(200) {
            pending.resolve(*id, response(*id)).unwrap();
        }
        assert_eq!(pending.len(), 200);
    }
}
