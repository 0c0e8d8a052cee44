//! Server endpoint: accepts connections and runs one read loop per session

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, error, info, warn};

use hakunet_proto::{Envelope, FrameCodec, Kwargs, Value};

use crate::error::HakunetError;
use crate::handlers::HandlerTable;
use crate::registry::TransactionRegistry;
use crate::session::{BoxReader, Session};
use crate::transaction::Transaction;
use crate::Result;

/// Boxed event callback: receives the originating session's context plus the
/// event's positional and named arguments.
type EventHandler =
    Arc<dyn Fn(Context, Vec<Value>, Kwargs) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Boxed call callback: produces the response value for one call request.
type CallHandler =
    Arc<dyn Fn(Vec<Value>, Kwargs) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Boxed transaction callback: drives the server half of one transaction.
type TransactionHandler =
    Arc<dyn Fn(Transaction, Context) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Context handed to server-side handlers: the originating session plus
/// access to the live-connection set for broadcasting.
#[derive(Clone)]
pub struct Context {
    session: Arc<Session>,
    shared: Arc<ServerShared>,
    peer: SocketAddr,
}

impl Context {
    /// Send an event to this context's peer only.
    pub async fn emit(&self, event: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<()> {
        self.session.emit(event, args, kwargs).await
    }

    /// Fan an event out to every other open session. The emitting peer does
    /// not receive its own broadcast.
    pub async fn broadcast(&self, event: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<()> {
        self.shared
            .broadcast(event, args, kwargs, Some(&self.session))
            .await
    }

    /// Close this peer's session.
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Whether this peer's session has started closing.
    pub fn is_closing(&self) -> bool {
        self.session.is_closing()
    }

    /// The peer's remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Builder for a [`Server`]: handlers are registered here, before any
/// connection is accepted, and are immutable once bound.
pub struct ServerBuilder {
    events: HandlerTable<EventHandler>,
    calls: HandlerTable<CallHandler>,
    transactions: HandlerTable<TransactionHandler>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            events: HandlerTable::new(),
            calls: HandlerTable::new(),
            transactions: HandlerTable::new(),
        }
    }

    /// Register an event handler. The last registration for a name wins.
    pub fn on_event<F, Fut>(mut self, event: &str, handler: F) -> Self
    where
        F: Fn(Context, Vec<Value>, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = move |ctx, args, kwargs| -> BoxFuture<'static, Result<()>> {
            Box::pin(handler(ctx, args, kwargs))
        };
        self.events.register(event, Arc::new(handler) as EventHandler);
        self
    }

    /// Register a call method handler.
    pub fn on_call<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler = move |args, kwargs| -> BoxFuture<'static, Result<Value>> {
            Box::pin(handler(args, kwargs))
        };
        self.calls.register(method, Arc::new(handler) as CallHandler);
        self
    }

    /// Register the handler launched for each transaction of the given type.
    pub fn on_transaction<F, Fut>(mut self, tx_type: &str, handler: F) -> Self
    where
        F: Fn(Transaction, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = move |transaction, ctx| -> BoxFuture<'static, Result<()>> {
            Box::pin(handler(transaction, ctx))
        };
        self.transactions
            .register(tx_type, Arc::new(handler) as TransactionHandler);
        self
    }

    /// Bind a TCP listener and produce a runnable server.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            shared: Arc::new(ServerShared {
                events: self.events,
                calls: self.calls,
                transactions: self.transactions,
                sessions: Mutex::new(HashMap::new()),
                next_session_key: AtomicU64::new(0),
            }),
        })
    }
}

struct ServerShared {
    events: HandlerTable<EventHandler>,
    calls: HandlerTable<CallHandler>,
    transactions: HandlerTable<TransactionHandler>,
    /// Live-connection set, keyed by a server-local session number
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    next_session_key: AtomicU64,
}

impl ServerShared {
    /// Fan an event out to the live-connection set, optionally excluding one
    /// session. Individual send failures are logged, not propagated: a peer
    /// mid-disconnect must not break the fan-out for everyone else.
    async fn broadcast(
        &self,
        event: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        exclude: Option<&Arc<Session>>,
    ) -> Result<()> {
        let targets: Vec<Arc<Session>> = {
            let sessions = self.sessions.lock().expect("session set poisoned");
            sessions
                .values()
                .filter(|s| exclude.map_or(true, |ex| !Arc::ptr_eq(s, ex)))
                .cloned()
                .collect()
        };

        for session in targets {
            if let Err(e) = session.emit(event, args.clone(), kwargs.clone()).await {
                warn!("broadcast of '{}' to one session failed: {}", event, e);
            }
        }
        Ok(())
    }
}

/// A bound server.
pub struct Server {
    listener: TcpListener,
    shared: Arc<ServerShared>,
}

impl Server {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, spawning one read-loop task per session.
    pub async fn run(&self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            stream.set_nodelay(true)?;
            tokio::spawn(handle_connection(self.shared.clone(), stream, peer));
        }
    }

    /// Fan an event out to every currently-open session.
    pub async fn broadcast(&self, event: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<()> {
        self.shared.broadcast(event, args, kwargs, None).await
    }

    /// Number of currently-open sessions.
    pub fn session_count(&self) -> usize {
        self.shared
            .sessions
            .lock()
            .expect("session set poisoned")
            .len()
    }
}

/// Per-connection task: owns the read side of one stream and drives
/// deframe, decode, and dispatch until the session ends.
async fn handle_connection(shared: Arc<ServerShared>, stream: TcpStream, peer: SocketAddr) {
    info!("connection accepted from {}", peer);

    let (reader, writer) = stream.into_split();
    let session = Arc::new(Session::new(Box::new(writer)));

    let session_key = shared.next_session_key.fetch_add(1, Ordering::Relaxed);
    shared
        .sessions
        .lock()
        .expect("session set poisoned")
        .insert(session_key, session.clone());

    let conn = ConnState {
        shared: shared.clone(),
        session: session.clone(),
        tx_registry: Arc::new(TransactionRegistry::new()),
        peer,
    };

    let mut codec = FrameCodec::new();
    let mut reader: BoxReader = Box::new(reader);

    loop {
        match codec.read_frame(&mut reader).await {
            Ok(Some(payload)) => match Envelope::decode(&payload) {
                Ok(Some(envelope)) => conn.dispatch(envelope),
                Ok(None) => {
                    debug!("{} sent the close marker", peer);
                    break;
                }
                Err(e) => {
                    error!("failed to decode envelope from {}: {}", peer, e);
                    break;
                }
            },
            Ok(None) => {
                debug!("{} closed the connection", peer);
                break;
            }
            Err(e) => {
                error!("failed to read frame from {}: {}", peer, e);
                break;
            }
        }
    }

    shared
        .sessions
        .lock()
        .expect("session set poisoned")
        .remove(&session_key);
    session.close().await;
    conn.tx_registry.close_all();
    info!("connection from {} closed", peer);
}

/// Per-connection dispatch state shared with spawned handler tasks.
struct ConnState {
    shared: Arc<ServerShared>,
    session: Arc<Session>,
    tx_registry: Arc<TransactionRegistry>,
    peer: SocketAddr,
}

impl ConnState {
    fn context(&self) -> Context {
        Context {
            session: self.session.clone(),
            shared: self.shared.clone(),
            peer: self.peer,
        }
    }

    /// Per-envelope classifier. Handlers run as independent tasks; this
    /// never suspends the read loop on application code.
    fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::TransactionData { tx_id, payload } => {
                if !self.tx_registry.deliver(tx_id, payload) {
                    debug!("dropping payload for closed transaction {}", tx_id);
                }
            }
            Envelope::TransactionStart { tx_id, tx_type } => {
                self.handle_transaction_start(tx_id, tx_type)
            }
            Envelope::Call {
                method,
                call_id,
                args,
                kwargs,
            } => self.handle_call(method, call_id, args, kwargs),
            Envelope::Event { name, args, kwargs } => match self.shared.events.get(&name) {
                Some(handler) => {
                    let handler = handler.clone();
                    let ctx = self.context();
                    tokio::spawn(async move {
                        if let Err(e) = (*handler)(ctx, args, kwargs).await {
                            warn!("event handler '{}' failed: {}", name, e);
                        }
                    });
                }
                None => debug!("dropping event '{}' without handler", name),
            },
            Envelope::Response { call_id, .. } => {
                warn!("dropping client-bound response for call {}", call_id);
            }
            Envelope::ResponseError { call_id, .. } => {
                warn!("dropping client-bound error response for call {}", call_id);
            }
        }
    }

    fn handle_transaction_start(&self, tx_id: u64, tx_type: String) {
        let Some(handler) = self.shared.transactions.get(&tx_type).cloned() else {
            warn!("dropping start for unknown transaction type '{}'", tx_type);
            return;
        };

        // Registration happens before the handler launches so data frames
        // already behind the start frame land in the inbox.
        let Some(inbox) = self.tx_registry.register(tx_id) else {
            return;
        };
        let transaction = Transaction::new(tx_id, tx_type.clone(), self.session.clone(), inbox);
        let ctx = self.context();
        let registry = self.tx_registry.clone();

        debug!("transaction {} started (type '{}')", tx_id, tx_type);
        tokio::spawn(async move {
            match (*handler)(transaction, ctx).await {
                Ok(()) => debug!("transaction {} finished", tx_id),
                Err(HakunetError::Disconnected) => {
                    info!("transaction {} stopped: peer disconnected", tx_id)
                }
                Err(e) => warn!("transaction handler '{}' failed: {}", tx_type, e),
            }
            registry.remove(tx_id);
        });
    }

    fn handle_call(&self, method: String, call_id: u64, args: Vec<Value>, kwargs: Kwargs) {
        let session = self.session.clone();

        let Some(handler) = self.shared.calls.get(&method).cloned() else {
            warn!("call {} to unknown method '{}'", call_id, method);
            tokio::spawn(async move {
                let reply = Envelope::ResponseError {
                    call_id,
                    message: format!("unknown method '{}'", method),
                };
                if let Err(e) = session.send(&reply).await {
                    warn!("failed to send error response for call {}: {}", call_id, e);
                }
            });
            return;
        };

        tokio::spawn(async move {
            let reply = match (*handler)(args, kwargs).await {
                Ok(result) => Envelope::Response { call_id, result },
                Err(e) => {
                    warn!("call handler '{}' failed: {}", method, e);
                    Envelope::ResponseError {
                        call_id,
                        message: e.to_string(),
                    }
                }
            };
            if let Err(e) = session.send(&reply).await {
                warn!("failed to send response for call {}: {}", call_id, e);
            }
        });
    }
}
