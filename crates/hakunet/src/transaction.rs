//! Transaction handle: one ordered, bidirectional sub-stream

use std::sync::Arc;

use tokio::sync::mpsc;

use hakunet_proto::{Envelope, Value};

use crate::error::HakunetError;
use crate::session::Session;
use crate::Result;

/// Handle owned by a transaction's handler task.
///
/// The read loop is the only producer for the inbox and this handle is the
/// only consumer; payloads arrive in exactly the order the peer sent them.
pub struct Transaction {
    id: u64,
    tx_type: String,
    session: Arc<Session>,
    inbox: mpsc::UnboundedReceiver<Value>,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        tx_type: impl Into<String>,
        session: Arc<Session>,
        inbox: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self {
            id,
            tx_type: tx_type.into(),
            session,
            inbox,
        }
    }

    /// The transaction's correlation identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The registered transaction type name.
    pub fn tx_type(&self) -> &str {
        &self.tx_type
    }

    /// Send one payload to the peer within this transaction.
    pub async fn send(&self, payload: Value) -> Result<()> {
        self.session
            .send(&Envelope::TransactionData {
                tx_id: self.id,
                payload,
            })
            .await
    }

    /// Receive the next payload, oldest first.
    ///
    /// Suspends until the inbox is non-empty. Resolves to
    /// [`HakunetError::Disconnected`] once the session is torn down, so a
    /// blocked handler is always released on peer disconnect.
    pub async fn read(&mut self) -> Result<Value> {
        self.inbox.recv().await.ok_or(HakunetError::Disconnected)
    }
}
