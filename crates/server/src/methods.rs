//! Closed method tables for tables and views.
//!
//! Method dispatch is a closed enumeration decided once per request, not a
//! string-driven dynamic lookup: unknown names fail with `NotFound` before
//! anything reaches the engine, and each method declares its argument
//! shape and whether it mutates state.

use crate::error::{Error, Result};
use colonnade_protocol::EngineValue;

/// Argument shape of a method call, reconstructed from the positional
/// wire arguments according to the method's category.
#[derive(Debug, Clone)]
pub enum MethodArgs {
    /// Serialization methods take a single options mapping.
    Serialize {
        /// Method options; an empty mapping when the caller sent none.
        options: EngineValue,
    },
    /// Mutation methods take a primary payload plus an options mapping
    /// that may carry an input port id.
    Mutate {
        /// The update/remove payload.
        payload: EngineValue,
        /// Input port the mutation arrives on.
        port_id: i64,
    },
    /// Everything else takes its arguments positionally.
    Positional(Vec<EngineValue>),
}

impl MethodArgs {
    fn serialize_from(mut args: Vec<EngineValue>) -> Result<Self> {
        let options = match args.drain(..).next() {
            None | Some(EngineValue::Null) => EngineValue::empty_mapping(),
            Some(options @ EngineValue::Mapping(_)) => options,
            Some(other) => {
                return Err(Error::InvalidRequest(format!(
                    "options must be a mapping, got {other:?}"
                )));
            }
        };
        Ok(Self::Serialize { options })
    }

    fn mutate_from(mut args: Vec<EngineValue>) -> Result<Self> {
        if args.is_empty() {
            return Err(Error::InvalidRequest(
                "mutation requires a payload argument".to_string(),
            ));
        }
        let mut rest = args.split_off(1);
        let payload = args.remove(0);
        let port_id = match rest.first_mut() {
            Some(options) => options
                .get("port_id")
                .and_then(EngineValue::as_int)
                .unwrap_or(0),
            None => 0,
        };
        Ok(Self::Mutate { payload, port_id })
    }
}

/// The closed set of remotely callable table methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMethod {
    /// `schema()`
    Schema,
    /// `size()`
    Size,
    /// `update(data, port_id)`
    Update,
    /// `remove(keys, port_id)`
    Remove,
    /// `replace(data)`
    Replace,
    /// `clear()`
    Clear,
    /// `make_port()`
    MakePort,
    /// `on_delete(cb)`, a subscription
    OnDelete,
    /// `remove_delete(cb)`, an unsubscribe
    RemoveDelete,
    /// `delete()`, never permitted remotely
    Delete,
}

impl TableMethod {
    /// Resolve a wire method name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for names outside the table.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "schema" => Ok(Self::Schema),
            "size" => Ok(Self::Size),
            "update" => Ok(Self::Update),
            "remove" => Ok(Self::Remove),
            "replace" => Ok(Self::Replace),
            "clear" => Ok(Self::Clear),
            "make_port" => Ok(Self::MakePort),
            "on_delete" => Ok(Self::OnDelete),
            "remove_delete" => Ok(Self::RemoveDelete),
            "delete" => Ok(Self::Delete),
            other => Err(Error::NotFound(format!("table method '{other}'"))),
        }
    }

    /// Whether this method is in the lock-sensitive mutating set.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::Update | Self::Remove | Self::Replace | Self::Clear | Self::Delete
        )
    }

    /// Reconstruct the method's argument shape from wire arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the arguments do not fit the
    /// method's category.
    pub fn shape_args(self, args: Vec<EngineValue>) -> Result<MethodArgs> {
        match self {
            Self::Update | Self::Remove => MethodArgs::mutate_from(args),
            _ => Ok(MethodArgs::Positional(args)),
        }
    }
}

/// The closed set of remotely callable view methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMethod {
    /// `schema()`
    Schema,
    /// `dimensions()`
    Dimensions,
    /// `to_columns(options)`
    ToColumns,
    /// `to_rows(options)`
    ToRows,
    /// `to_arrow(options)`, binary result
    ToArrow,
    /// `on_update(cb, mode)`, a subscription
    OnUpdate,
    /// `remove_update(cb)`, an unsubscribe
    RemoveUpdate,
    /// `on_delete(cb)`, a subscription
    OnDelete,
    /// `remove_delete(cb)`, an unsubscribe
    RemoveDelete,
    /// `delete()`, intercepted; also drops the registry entry
    Delete,
}

impl ViewMethod {
    /// Resolve a wire method name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for names outside the view.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "schema" => Ok(Self::Schema),
            "dimensions" => Ok(Self::Dimensions),
            "to_columns" => Ok(Self::ToColumns),
            "to_rows" => Ok(Self::ToRows),
            "to_arrow" => Ok(Self::ToArrow),
            "on_update" => Ok(Self::OnUpdate),
            "remove_update" => Ok(Self::RemoveUpdate),
            "on_delete" => Ok(Self::OnDelete),
            "remove_delete" => Ok(Self::RemoveDelete),
            "delete" => Ok(Self::Delete),
            other => Err(Error::NotFound(format!("view method '{other}'"))),
        }
    }

    /// Reconstruct the method's argument shape from wire arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the arguments do not fit the
    /// method's category.
    pub fn shape_args(self, args: Vec<EngineValue>) -> Result<MethodArgs> {
        match self {
            Self::ToColumns | Self::ToRows | Self::ToArrow => MethodArgs::serialize_from(args),
            _ => Ok(MethodArgs::Positional(args)),
        }
    }
}
