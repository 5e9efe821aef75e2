//! Outstanding `ask` calls keyed by correlation id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::error::AskError;

#[derive(Debug)]
struct Slot {
    deadline: Instant,
    reply: Option<Vec<u8>>,
    fulfilled: bool,
}

/// Correlation id → single-slot reply cell with a deadline.
///
/// At most one pending request exists per correlation id; the slot is removed when the
/// [`PendingGuard`] returned by [`claim`](Self::claim) is dropped.
#[derive(Clone, Debug, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, Slot>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pending request.
    ///
    /// # Errors
    /// [`AskError::Busy`] if `correlation_id` is already pending.
    pub fn claim(&self, correlation_id: &str, deadline: Instant) -> Result<PendingGuard, AskError> {
        let mut map = self.lock();
        if map.contains_key(correlation_id) {
            return Err(AskError::Busy {
                correlation_id: correlation_id.to_string(),
            });
        }
        map.insert(
            correlation_id.to_string(),
            Slot {
                deadline,
                reply: None,
                fulfilled: false,
            },
        );
        Ok(PendingGuard {
            owner: self.clone(),
            correlation_id: correlation_id.to_string(),
        })
    }

    /// Stores the reply; returns `false` if the slot is gone, expired or already filled.
    pub fn fulfill(&self, correlation_id: &str, reply: Vec<u8>) -> bool {
        let mut map = self.lock();
        match map.get_mut(correlation_id) {
            Some(slot) if !slot.fulfilled && Instant::now() <= slot.deadline => {
                slot.fulfilled = true;
                slot.reply = Some(reply);
                true
            }
            _ => false,
        }
    }

    /// Whether `correlation_id` is pending.
    pub fn contains(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Owns one pending slot; removes it on drop.
#[derive(Debug)]
pub struct PendingGuard {
    owner: PendingRequests,
    correlation_id: String,
}

impl PendingGuard {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Takes the reply out of the slot, if one arrived.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.owner
            .lock()
            .get_mut(&self.correlation_id)
            .and_then(|slot| slot.reply.take())
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.correlation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_one_pending_request_per_correlation_id() {
        let pending = PendingRequests::new();
        let deadline = Instant::now() + Duration::from_secs(5);

        let guard = pending.claim("amq.gen-1", deadline).unwrap();
        assert!(matches!(
            pending.claim("amq.gen-1", deadline),
            Err(AskError::Busy { .. })
        ));
        drop(guard);
        assert!(pending.is_empty());
        assert!(pending.claim("amq.gen-1", deadline).is_ok());
    }

    #[test]
    fn test_fulfilled_exactly_once() {
        let pending = PendingRequests::new();
        let guard = pending
            .claim("r", Instant::now() + Duration::from_secs(5))
            .unwrap();

        assert!(pending.fulfill("r", b"first".to_vec()));
        assert!(!pending.fulfill("r", b"second".to_vec()));
        assert!(!pending.fulfill("other", b"x".to_vec()));
        assert_eq!(guard.take().as_deref(), Some(&b"first"[..]));
        assert_eq!(guard.take(), None);
        assert!(!pending.fulfill("r", b"third".to_vec()));
    }
}
