//! # Hakunet
//!
//! A lightweight session-multiplexing protocol layered on a single
//! bidirectional byte stream. Two peers exchange three kinds of interactions
//! over one connection:
//!
//! - **events** — fire-and-forget named notifications,
//! - **calls** — single round-trip request/response pairs, and
//! - **transactions** — long-lived, ordered, bidirectional payload streams
//!   correlated by a 64-bit identifier.
//!
//! One read-loop task per connection decodes frames and routes each to the
//! right consumer; handlers run as independent tasks and never block the
//! read loop. Closing a session releases every task suspended on it.
//!
//! ```no_run
//! use hakunet::{ClientBuilder, Result, Value};
//!
//! # async fn run() -> Result<()> {
//! let client = ClientBuilder::new()
//!     .on_event("reply", |_ctx, args, _kwargs| async move {
//!         println!("reply: {:?}", args);
//!         Ok(())
//!     })
//!     .connect("127.0.0.1:8000")
//!     .await?;
//!
//! let pong = client.call("ping", vec![], vec![]).await?;
//! assert_eq!(pong, Value::from("pong"));
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use hakunet_proto as proto;

/// Error types for the hakunet library
pub mod error;

/// Transaction handle for ordered bidirectional sub-streams
pub mod transaction;

/// Client endpoint
pub mod client;

/// Server endpoint
pub mod server;

mod handlers;
mod registry;
mod session;

pub use client::{Client, ClientBuilder, ClientContext};
pub use error::HakunetError;
pub use proto::{Envelope, Kwargs, Value};
pub use server::{Context, Server, ServerBuilder};
pub use transaction::Transaction;

/// Result type alias for hakunet operations
pub type Result<T> = std::result::Result<T, HakunetError>;
