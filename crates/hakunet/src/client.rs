//! Client endpoint: connects one session and multiplexes traffic over it

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, error, warn};

use hakunet_proto::{Envelope, FrameCodec, Kwargs, Value};

use crate::error::HakunetError;
use crate::handlers::HandlerTable;
use crate::registry::{CallRegistry, IdGenerator, TransactionRegistry};
use crate::session::{BoxReader, Session};
use crate::transaction::Transaction;
use crate::Result;

/// Boxed event callback: receives a context for the originating session plus
/// the event's positional and named arguments.
type EventHandler =
    Arc<dyn Fn(ClientContext, Vec<Value>, Kwargs) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Boxed transaction callback: drives the client half of one transaction and
/// produces its result.
type TransactionHandler =
    Arc<dyn Fn(Transaction, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Context handed to client-side event handlers.
#[derive(Clone)]
pub struct ClientContext {
    session: Arc<Session>,
}

impl ClientContext {
    /// Send an event back to the server.
    pub async fn emit(&self, event: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<()> {
        self.session.emit(event, args, kwargs).await
    }

    /// Whether the session has started closing.
    pub fn is_closing(&self) -> bool {
        self.session.is_closing()
    }
}

/// Builder for a [`Client`]: handlers are registered here, before any
/// traffic is processed, and are immutable once connected.
pub struct ClientBuilder {
    events: HandlerTable<EventHandler>,
    transactions: HandlerTable<TransactionHandler>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            events: HandlerTable::new(),
            transactions: HandlerTable::new(),
        }
    }

    /// Register an event handler. The last registration for a name wins.
    pub fn on_event<F, Fut>(mut self, event: &str, handler: F) -> Self
    where
        F: Fn(ClientContext, Vec<Value>, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = move |ctx, args, kwargs| -> BoxFuture<'static, Result<()>> {
            Box::pin(handler(ctx, args, kwargs))
        };
        self.events.register(event, Arc::new(handler) as EventHandler);
        self
    }

    /// Register the local handler driving transactions of the given type.
    pub fn on_transaction<F, Fut>(mut self, tx_type: &str, handler: F) -> Self
    where
        F: Fn(Transaction, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler = move |transaction, args| -> BoxFuture<'static, Result<Value>> {
            Box::pin(handler(transaction, args))
        };
        self.transactions
            .register(tx_type, Arc::new(handler) as TransactionHandler);
        self
    }

    /// Connect over TCP.
    pub async fn connect(self, addr: impl ToSocketAddrs) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        self.connect_stream(stream)
    }

    /// Connect over any duplex byte stream (the transport is injected; TCP
    /// is just the common case).
    pub fn connect_stream<S>(self, io: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);

        let shared = Arc::new(ClientShared {
            session: Arc::new(Session::new(Box::new(writer))),
            events: self.events,
            transactions: self.transactions,
            tx_registry: TransactionRegistry::new(),
            calls: CallRegistry::new(),
            ids: IdGenerator::new(),
        });

        tokio::spawn(read_loop(shared.clone(), Box::new(reader)));

        Ok(Client { shared })
    }
}

struct ClientShared {
    session: Arc<Session>,
    events: HandlerTable<EventHandler>,
    transactions: HandlerTable<TransactionHandler>,
    tx_registry: TransactionRegistry,
    calls: CallRegistry,
    ids: IdGenerator,
}

impl ClientShared {
    /// Release every task suspended on this session's registries.
    fn release_waiters(&self) {
        self.tx_registry.close_all();
        self.calls.close_all();
    }
}

/// A connected client endpoint.
///
/// Cheap to clone; all clones share one session and one read loop.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Send a fire-and-forget event to the server.
    pub async fn emit(&self, event: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<()> {
        self.shared.session.emit(event, args, kwargs).await
    }

    /// Perform one request/response round trip.
    ///
    /// Suspends until the response arrives; resolves to
    /// [`HakunetError::Remote`] if the server reports a failure (including an
    /// unknown method) and to [`HakunetError::Disconnected`] if the session
    /// closes first.
    pub async fn call(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        let call_id = self.shared.ids.next_id();
        let slot = self
            .shared
            .calls
            .register(call_id)
            .ok_or(HakunetError::Disconnected)?;

        let envelope = Envelope::Call {
            method: method.to_string(),
            call_id,
            args,
            kwargs,
        };
        if let Err(e) = self.shared.session.send(&envelope).await {
            self.shared.calls.remove(call_id);
            return Err(e);
        }

        match slot.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(HakunetError::Remote(message)),
            Err(_) => Err(HakunetError::Disconnected),
        }
    }

    /// Start a transaction of a registered type and drive its local handler
    /// to completion, returning the handler's result.
    ///
    /// The inbox is registered before the start frame is sent so an early
    /// payload from the peer can never be lost.
    pub async fn start_transaction(&self, tx_type: &str, args: Vec<Value>) -> Result<Value> {
        let handler = self
            .shared
            .transactions
            .get(tx_type)
            .cloned()
            .ok_or_else(|| HakunetError::UnknownTransaction(tx_type.to_string()))?;

        let tx_id = self.shared.ids.next_id();
        let inbox = self
            .shared
            .tx_registry
            .register(tx_id)
            .ok_or(HakunetError::Disconnected)?;
        let transaction = Transaction::new(tx_id, tx_type, self.shared.session.clone(), inbox);

        let start = Envelope::TransactionStart {
            tx_id,
            tx_type: tx_type.to_string(),
        };
        if let Err(e) = self.shared.session.send(&start).await {
            self.shared.tx_registry.remove(tx_id);
            return Err(e);
        }

        debug!("transaction {} started (type '{}')", tx_id, tx_type);
        let result = (*handler)(transaction, args).await;
        self.shared.tx_registry.remove(tx_id);
        result
    }

    /// Close the session: sends the end-of-session marker, shuts the stream
    /// down, and releases every suspended `call()` or transaction `read()`.
    pub async fn close(&self) {
        self.shared.session.close().await;
        self.shared.release_waiters();
    }

    /// Whether the session has closed or started closing.
    pub fn is_closed(&self) -> bool {
        self.shared.session.is_closing()
    }
}

/// Single-owner read loop: decodes frames one at a time and routes each to
/// the right consumer. Never suspends on a handler; handlers run as
/// independent tasks.
async fn read_loop(shared: Arc<ClientShared>, mut reader: BoxReader) {
    let mut codec = FrameCodec::new();
    debug!("client read loop started");

    loop {
        match codec.read_frame(&mut reader).await {
            Ok(Some(payload)) => match Envelope::decode(&payload) {
                Ok(Some(envelope)) => dispatch(&shared, envelope),
                Ok(None) => {
                    debug!("server closed the session");
                    break;
                }
                Err(e) => {
                    error!("failed to decode envelope: {}", e);
                    break;
                }
            },
            Ok(None) => {
                debug!("connection closed by server");
                break;
            }
            Err(e) => {
                error!("failed to read frame: {}", e);
                break;
            }
        }
    }

    shared.session.close().await;
    shared.release_waiters();
    debug!("client read loop stopped");
}

/// Per-envelope classifier: appends transaction data, resolves pending
/// calls, or launches event handlers.
fn dispatch(shared: &Arc<ClientShared>, envelope: Envelope) {
    match envelope {
        Envelope::TransactionData { tx_id, payload } => {
            if !shared.tx_registry.deliver(tx_id, payload) {
                debug!("dropping payload for closed transaction {}", tx_id);
            }
        }
        Envelope::Response { call_id, result } => {
            if !shared.calls.resolve(call_id, Ok(result)) {
                debug!("dropping stale response for call {}", call_id);
            }
        }
        Envelope::ResponseError { call_id, message } => {
            if !shared.calls.resolve(call_id, Err(message)) {
                debug!("dropping stale error response for call {}", call_id);
            }
        }
        Envelope::Event { name, args, kwargs } => match shared.events.get(&name) {
            Some(handler) => {
                let handler = handler.clone();
                let ctx = ClientContext {
                    session: shared.session.clone(),
                };
                tokio::spawn(async move {
                    if let Err(e) = (*handler)(ctx, args, kwargs).await {
                        warn!("event handler '{}' failed: {}", name, e);
                    }
                });
            }
            None => debug!("dropping event '{}' without handler", name),
        },
        Envelope::Call { method, .. } => {
            warn!("dropping server-bound call '{}' received by client", method);
        }
        Envelope::TransactionStart { tx_type, .. } => {
            warn!(
                "dropping server-bound transaction start '{}' received by client",
                tx_type
            );
        }
    }
}
