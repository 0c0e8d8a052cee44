//! Per-connection correlation state: transaction inboxes and pending calls
//!
//! Each registry entry has exactly one producer (the read loop) and one
//! consumer (the owning handler task), so the channel endpoints need no extra
//! locking; the mutex only guards map insert/delete. Tearing a registry down
//! drops every sender, which resumes every suspended consumer with a
//! disconnection instead of leaving it blocked forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};

use hakunet_proto::Value;

/// Outcome stored in a pending call slot: the handler result, or the peer's
/// failure message.
pub(crate) type CallOutcome = std::result::Result<Value, String>;

struct Entries<T> {
    map: HashMap<u64, T>,
    closed: bool,
}

impl<T> Entries<T> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            closed: false,
        }
    }
}

/// Maps a live transaction id to its ordered inbox.
///
/// The unbounded channel is the inbox and wake signal in one: payloads are
/// delivered FIFO, `recv` suspends when it drains, and dropping the sender
/// releases a blocked reader.
pub(crate) struct TransactionRegistry {
    entries: Mutex<Entries<mpsc::UnboundedSender<Value>>>,
}

impl TransactionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::new()),
        }
    }

    /// Allocate the inbox for a new transaction. Returns `None` once the
    /// registry is torn down.
    pub(crate) fn register(&self, tx_id: u64) -> Option<mpsc::UnboundedReceiver<Value>> {
        let mut entries = self.entries.lock().expect("transaction registry poisoned");
        if entries.closed {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        entries.map.insert(tx_id, tx);
        Some(rx)
    }

    /// Append a payload to a transaction's inbox. Returns `false` when the id
    /// is unknown (transaction already closed); the caller drops the payload.
    pub(crate) fn deliver(&self, tx_id: u64, payload: Value) -> bool {
        let entries = self.entries.lock().expect("transaction registry poisoned");
        match entries.map.get(&tx_id) {
            Some(inbox) => inbox.send(payload).is_ok(),
            None => false,
        }
    }

    /// Drop a transaction's inbox once its handler has returned.
    pub(crate) fn remove(&self, tx_id: u64) {
        let mut entries = self.entries.lock().expect("transaction registry poisoned");
        entries.map.remove(&tx_id);
    }

    /// Tear down every inbox, releasing all blocked readers. Later `register`
    /// calls fail so a handler racing with teardown cannot leak an entry.
    pub(crate) fn close_all(&self) {
        let mut entries = self.entries.lock().expect("transaction registry poisoned");
        entries.closed = true;
        entries.map.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("transaction registry poisoned")
            .map
            .len()
    }
}

/// Maps a call correlation id to its single pending response slot.
pub(crate) struct CallRegistry {
    entries: Mutex<Entries<oneshot::Sender<CallOutcome>>>,
}

impl CallRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::new()),
        }
    }

    /// Allocate the response slot for a new call. Returns `None` once the
    /// registry is torn down.
    pub(crate) fn register(&self, call_id: u64) -> Option<oneshot::Receiver<CallOutcome>> {
        let mut entries = self.entries.lock().expect("call registry poisoned");
        if entries.closed {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        entries.map.insert(call_id, tx);
        Some(rx)
    }

    /// Resolve and remove a pending call. At most one response is ever
    /// delivered per id; a second response for a removed id returns `false`
    /// and is dropped by the caller.
    pub(crate) fn resolve(&self, call_id: u64, outcome: CallOutcome) -> bool {
        let slot = {
            let mut entries = self.entries.lock().expect("call registry poisoned");
            entries.map.remove(&call_id)
        };

        match slot {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Remove a slot without resolving it (the request was never sent).
    pub(crate) fn remove(&self, call_id: u64) {
        let mut entries = self.entries.lock().expect("call registry poisoned");
        entries.map.remove(&call_id);
    }

    /// Tear down every pending slot, releasing all blocked callers.
    pub(crate) fn close_all(&self) {
        let mut entries = self.entries.lock().expect("call registry poisoned");
        entries.closed = true;
        entries.map.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("call registry poisoned")
            .map
            .len()
    }
}

/// Correlation id generator: a random per-instance nonce in the high 32 bits
/// composed with an incrementing counter in the low 32 bits.
///
/// Unique within an instance by construction. Across processes the nonce
/// bounds the collision probability; ids are only ever interpreted by the
/// peer of the connection that allocated them.
pub(crate) struct IdGenerator {
    base: u64,
    counter: AtomicU32,
}

impl IdGenerator {
    pub(crate) fn new() -> Self {
        Self {
            base: u64::from(rand::random::<u32>()) << 32,
            counter: AtomicU32::new(0),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        self.base | u64::from(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transaction_delivery_in_order() {
        let registry = TransactionRegistry::new();
        let mut inbox = registry.register(1).unwrap();

        for n in 0..5u64 {
            assert!(registry.deliver(1, Value::from(n)));
        }

        for n in 0..5u64 {
            assert_eq!(inbox.recv().await.unwrap(), Value::from(n));
        }
    }

    #[test]
    fn test_deliver_to_unknown_id_is_dropped() {
        let registry = TransactionRegistry::new();
        assert!(!registry.deliver(42, Value::Nil));
    }

    #[tokio::test]
    async fn test_close_all_releases_reader() {
        let registry = TransactionRegistry::new();
        let mut inbox = registry.register(7).unwrap();

        registry.close_all();
        assert_eq!(inbox.recv().await, None);
        assert!(registry.register(8).is_none());
    }

    #[test]
    fn test_remove_clears_entry() {
        let registry = TransactionRegistry::new();
        let _inbox = registry.register(1).unwrap();
        assert_eq!(registry.len(), 1);

        registry.remove(1);
        assert_eq!(registry.len(), 0);
        assert!(!registry.deliver(1, Value::Nil));
    }

    #[tokio::test]
    async fn test_call_resolution_is_at_most_once() {
        let registry = CallRegistry::new();
        let rx = registry.register(9).unwrap();

        assert!(registry.resolve(9, Ok(Value::from("pong"))));
        assert_eq!(rx.await.unwrap().unwrap(), Value::from("pong"));

        // Second response for the same id is stale and dropped.
        assert!(!registry.resolve(9, Ok(Value::from("again"))));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_call_close_all_releases_waiter() {
        let registry = CallRegistry::new();
        let rx = registry.register(3).unwrap();

        registry.close_all();
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_id_generator_unique_and_monotonic_low_bits() {
        let ids = IdGenerator::new();
        let mut seen = std::collections::HashSet::new();
        let mut last = 0u64;

        for _ in 0..1000 {
            let id = ids.next_id();
            assert!(seen.insert(id));
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_id_generators_use_distinct_nonces() {
        // Not guaranteed, but a collision here is a 2^-32 event.
        let a = IdGenerator::new().next_id() >> 32;
        let b = IdGenerator::new().next_id() >> 32;
        let c = IdGenerator::new().next_id() >> 32;
        assert!(a != b || b != c);
    }
}
