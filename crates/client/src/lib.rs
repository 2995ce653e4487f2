//! Client side of the colonnade protocol.
//!
//! A [`Client`] owns one connection to a server and multiplexes any number
//! of concurrent requests over it, matching responses to callers by
//! request id. Tables and views are addressed through typed proxy handles
//! that build the wire messages; subscriptions surface as streams.
//!
//! ```no_run
//! # async fn example() -> colonnade_client::Result<()> {
//! use colonnade_client::Client;
//! use colonnade_protocol::EngineValue;
//! use colonnade_transport::Config;
//! use colonnade_transport_ws::WebSocketTransport;
//!
//! let client = Client::connect(
//!     &WebSocketTransport::new(),
//!     "ws://localhost:8080",
//!     Config::default(),
//! )
//! .await?;
//! let schema = EngineValue::mapping([("price", EngineValue::from("float"))]);
//! let table = client
//!     .create_table("quotes", schema, EngineValue::empty_mapping())
//!     .await?;
//! let view = table.view(None, EngineValue::empty_mapping()).await?;
//! let columns = view.to_columns(EngineValue::empty_mapping()).await?;
//! # let _ = columns;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod handles;
mod pending;

pub use client::Client;
pub use error::{Error, Result};
pub use handles::{Subscription, TableHandle, UpdateMode, ViewHandle};
