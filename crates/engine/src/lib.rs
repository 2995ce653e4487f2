//! The analytics-engine collaborator contract.
//!
//! The colonnade protocol forwards method calls to engine-owned tables and
//! views but never interprets their semantics: pivots, aggregates, filters
//! and sorting are whatever the engine implementation computes. This crate
//! pins down the call surface the protocol relies on (names, arity, and
//! whether a return value is binary) as object-safe traits.
//!
//! Engine implementations may invoke update/delete callbacks from their own
//! threads; callbacks must therefore be `Send + Sync` and re-enter the
//! protocol only through thread-safe channels.

pub mod error;

use bytes::Bytes;
use colonnade_protocol::EngineValue;
use std::sync::Arc;

pub use error::{EngineError, Result};

/// Opaque token identifying an attached callback, used to detach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubToken(pub u64);

/// A change notification emitted by a table or view.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    /// The input port the triggering mutation arrived on.
    pub port_id: i64,
    /// Serialized row delta, when the subscriber asked for one.
    pub delta: Option<Bytes>,
}

/// Callback invoked on table/view updates.
pub type UpdateCallback = Arc<dyn Fn(UpdateEvent) + Send + Sync>;

/// Callback invoked when a table or view is deleted.
pub type DeleteCallback = Arc<dyn Fn() + Send + Sync>;

/// Delta mode requested when subscribing to view updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Notify only; no row delta attached.
    #[default]
    None,
    /// Attach the serialized row delta to each notification.
    Delta,
}

/// An engine-owned table.
pub trait Table: Send + Sync + 'static {
    /// The table's column schema.
    fn schema(&self) -> Result<EngineValue>;

    /// Number of rows currently in the table.
    fn size(&self) -> Result<i64>;

    /// Apply an update payload through the given input port.
    fn update(&self, data: EngineValue, port_id: i64) -> Result<()>;

    /// Remove rows by primary key through the given input port.
    fn remove(&self, keys: EngineValue, port_id: i64) -> Result<()>;

    /// Replace the table's contents wholesale.
    fn replace(&self, data: EngineValue) -> Result<()>;

    /// Remove all rows.
    fn clear(&self) -> Result<()>;

    /// Allocate a new input port id.
    fn make_port(&self) -> Result<i64>;

    /// Derive a view with the given configuration.
    fn view(&self, config: EngineValue) -> Result<Arc<dyn View>>;

    /// Attach a deletion callback. Returns a token for detaching.
    fn on_delete(&self, callback: DeleteCallback) -> SubToken;

    /// Detach a previously attached deletion callback.
    fn remove_delete(&self, token: SubToken);

    /// Destroy the table. Further calls are engine errors.
    fn delete(&self);
}

/// A live query derived from a table.
pub trait View: Send + Sync + 'static {
    /// The view's column schema after configuration is applied.
    fn schema(&self) -> Result<EngineValue>;

    /// Row and column counts as a mapping.
    fn dimensions(&self) -> Result<EngineValue>;

    /// Serialize the view column-wise.
    fn to_columns(&self, options: EngineValue) -> Result<EngineValue>;

    /// Serialize the view row-wise.
    fn to_rows(&self, options: EngineValue) -> Result<EngineValue>;

    /// Serialize the view to a columnar binary buffer.
    fn to_arrow(&self, options: EngineValue) -> Result<Bytes>;

    /// Attach an update callback. Returns a token for detaching.
    fn on_update(&self, callback: UpdateCallback, mode: UpdateMode) -> SubToken;

    /// Detach a previously attached update callback.
    fn remove_update(&self, token: SubToken);

    /// Attach a deletion callback. Returns a token for detaching.
    fn on_delete(&self, callback: DeleteCallback) -> SubToken;

    /// Detach a previously attached deletion callback.
    fn remove_delete(&self, token: SubToken);

    /// Destroy the view and detach it from its table.
    fn delete(&self);
}

/// A factory for engine tables, handed to the server at construction.
pub trait Engine: Send + Sync + 'static {
    /// Create a table from initial data or a schema definition.
    fn table(&self, data_or_schema: EngineValue, options: EngineValue)
    -> Result<Arc<dyn Table>>;
}
