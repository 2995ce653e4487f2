//! In-process engine implementation for testing and development
//!
//! This engine keeps tables as column vectors in memory and computes no
//! pivots or aggregates: views select a subset of columns and forward
//! update notifications. It exists so the server and client crates have a
//! real collaborator to exercise the protocol against, without an external
//! analytics engine in the loop.

use bytes::Bytes;
use colonnade_engine::{
    DeleteCallback, Engine, EngineError, Result, SubToken, Table, UpdateCallback, UpdateEvent,
    UpdateMode, View,
};
use colonnade_protocol::EngineValue;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// In-memory engine factory.
#[derive(Debug, Default)]
pub struct MemoryEngine;

impl MemoryEngine {
    /// Create a new in-memory engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Engine for MemoryEngine {
    fn table(
        &self,
        data_or_schema: EngineValue,
        _options: EngineValue,
    ) -> Result<Arc<dyn Table>> {
        Ok(Arc::new(MemoryTable {
            inner: TableInner::from_value(data_or_schema)?,
        }))
    }
}

type Listener = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

struct TableState {
    schema: BTreeMap<String, String>,
    columns: BTreeMap<String, Vec<EngineValue>>,
}

impl TableState {
    fn row_count(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }
}

struct TableInner {
    state: RwLock<TableState>,
    listeners: Mutex<Vec<(SubToken, Listener)>>,
    delete_callbacks: Mutex<Vec<(SubToken, DeleteCallback)>>,
    next_token: AtomicU64,
    next_port: AtomicI64,
    deleted: AtomicBool,
}

fn schema_type_of(value: &EngineValue) -> &'static str {
    match value {
        EngineValue::Bool(_) => "boolean",
        EngineValue::Int(_) => "integer",
        EngineValue::Float(_) => "float",
        _ => "string",
    }
}

impl TableInner {
    /// Build table state from a schema mapping (`col -> type name`) or
    /// from initial column data (`col -> sequence of values`).
    fn from_value(data_or_schema: EngineValue) -> Result<Arc<Self>> {
        let EngineValue::Mapping(entries) = data_or_schema else {
            return Err(EngineError::InvalidSchema(
                "expected a mapping of columns".to_string(),
            ));
        };
        if entries.is_empty() {
            return Err(EngineError::InvalidSchema("no columns".to_string()));
        }

        let mut schema = BTreeMap::new();
        let mut columns = BTreeMap::new();
        for (name, value) in entries {
            match value {
                EngineValue::Str(type_name) => {
                    schema.insert(name.clone(), type_name);
                    columns.insert(name, Vec::new());
                }
                EngineValue::Sequence(values) => {
                    let type_name = values
                        .first()
                        .map_or("string", schema_type_of)
                        .to_string();
                    schema.insert(name.clone(), type_name);
                    columns.insert(name, values);
                }
                other => {
                    return Err(EngineError::InvalidSchema(format!(
                        "column {name} must be a type name or a sequence, got {other:?}"
                    )));
                }
            }
        }

        let lengths: Vec<usize> = columns.values().map(Vec::len).collect();
        if lengths.windows(2).any(|w| w[0] != w[1]) {
            return Err(EngineError::InvalidSchema(
                "columns have unequal lengths".to_string(),
            ));
        }

        Ok(Arc::new(Self {
            state: RwLock::new(TableState { schema, columns }),
            listeners: Mutex::new(Vec::new()),
            delete_callbacks: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            next_port: AtomicI64::new(1),
            deleted: AtomicBool::new(false),
        }))
    }

    fn token(&self) -> SubToken {
        SubToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn guard_deleted(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            Err(EngineError::Deleted)
        } else {
            Ok(())
        }
    }

    fn subscribe(&self, listener: Listener) -> SubToken {
        let token = self.token();
        self.listeners.lock().push((token, listener));
        token
    }

    fn unsubscribe(&self, token: SubToken) {
        self.listeners.lock().retain(|(t, _)| *t != token);
    }

    fn notify(&self, event: &UpdateEvent) {
        // Snapshot outside the lock so a listener may re-enter the table.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn apply_update(&self, data: &EngineValue) -> Result<()> {
        let mut state = self.state.write();
        match data {
            // Column-oriented payload: col -> sequence.
            EngineValue::Mapping(cols) => {
                let mut appended = None;
                for (name, values) in cols {
                    let EngineValue::Sequence(values) = values else {
                        return Err(EngineError::BadMutation(format!(
                            "column {name} must be a sequence"
                        )));
                    };
                    if !state.columns.contains_key(name) {
                        return Err(EngineError::InvalidColumn(name.clone()));
                    }
                    match appended {
                        None => appended = Some(values.len()),
                        Some(n) if n != values.len() => {
                            return Err(EngineError::BadMutation(
                                "unequal column lengths".to_string(),
                            ));
                        }
                        Some(_) => {}
                    }
                }
                for (name, values) in cols {
                    if let EngineValue::Sequence(values) = values {
                        if let Some(column) = state.columns.get_mut(name) {
                            column.extend(values.iter().cloned());
                        }
                    }
                }
                Ok(())
            }
            // Row-oriented payload: sequence of mappings.
            EngineValue::Sequence(rows) => {
                for row in rows {
                    let EngineValue::Mapping(cells) = row else {
                        return Err(EngineError::BadMutation(
                            "row must be a mapping".to_string(),
                        ));
                    };
                    for name in cells.keys() {
                        if !state.columns.contains_key(name) {
                            return Err(EngineError::InvalidColumn(name.clone()));
                        }
                    }
                    let names: Vec<String> = state.columns.keys().cloned().collect();
                    for name in names {
                        let cell = cells.get(&name).cloned().unwrap_or(EngineValue::Null);
                        if let Some(column) = state.columns.get_mut(&name) {
                            column.push(cell);
                        }
                    }
                }
                Ok(())
            }
            other => Err(EngineError::BadMutation(format!(
                "unsupported update payload: {other:?}"
            ))),
        }
    }

    fn columns_value(&self, selected: Option<&[String]>) -> EngineValue {
        let state = self.state.read();
        let mut out = BTreeMap::new();
        for (name, values) in &state.columns {
            if selected.is_none_or(|s| s.iter().any(|n| n == name)) {
                out.insert(name.clone(), EngineValue::Sequence(values.clone()));
            }
        }
        EngineValue::Mapping(out)
    }
}

/// An in-memory table: a schema plus column vectors.
pub struct MemoryTable {
    inner: Arc<TableInner>,
}

impl Table for MemoryTable {
    fn schema(&self) -> Result<EngineValue> {
        self.inner.guard_deleted()?;
        let state = self.inner.state.read();
        Ok(EngineValue::Mapping(
            state
                .schema
                .iter()
                .map(|(k, v)| (k.clone(), EngineValue::Str(v.clone())))
                .collect(),
        ))
    }

    fn size(&self) -> Result<i64> {
        self.inner.guard_deleted()?;
        Ok(self.inner.state.read().row_count() as i64)
    }

    fn update(&self, data: EngineValue, port_id: i64) -> Result<()> {
        self.inner.guard_deleted()?;
        self.inner.apply_update(&data)?;
        let delta = serde_json::to_vec(&data).ok().map(Bytes::from);
        self.inner.notify(&UpdateEvent { port_id, delta });
        Ok(())
    }

    fn remove(&self, keys: EngineValue, port_id: i64) -> Result<()> {
        self.inner.guard_deleted()?;
        let EngineValue::Sequence(indices) = &keys else {
            return Err(EngineError::BadMutation(
                "remove expects a sequence of row indices".to_string(),
            ));
        };
        let mut to_remove: Vec<usize> = indices
            .iter()
            .filter_map(EngineValue::as_int)
            .filter_map(|i| usize::try_from(i).ok())
            .collect();
        to_remove.sort_unstable_by(|a, b| b.cmp(a));

        {
            let mut state = self.inner.state.write();
            for index in &to_remove {
                for column in state.columns.values_mut() {
                    if *index < column.len() {
                        column.remove(*index);
                    }
                }
            }
        }
        let delta = serde_json::to_vec(&keys).ok().map(Bytes::from);
        self.inner.notify(&UpdateEvent { port_id, delta });
        Ok(())
    }

    fn replace(&self, data: EngineValue) -> Result<()> {
        self.inner.guard_deleted()?;
        {
            let mut state = self.inner.state.write();
            for column in state.columns.values_mut() {
                column.clear();
            }
        }
        self.update(data, 0)
    }

    fn clear(&self) -> Result<()> {
        self.inner.guard_deleted()?;
        {
            let mut state = self.inner.state.write();
            for column in state.columns.values_mut() {
                column.clear();
            }
        }
        self.inner.notify(&UpdateEvent {
            port_id: 0,
            delta: None,
        });
        Ok(())
    }

    fn make_port(&self) -> Result<i64> {
        self.inner.guard_deleted()?;
        Ok(self.inner.next_port.fetch_add(1, Ordering::Relaxed))
    }

    fn view(&self, config: EngineValue) -> Result<Arc<dyn View>> {
        self.inner.guard_deleted()?;

        let selected: Option<Vec<String>> = match config.get("columns") {
            Some(EngineValue::Sequence(names)) => {
                let mut out = Vec::with_capacity(names.len());
                for name in names {
                    let Some(name) = name.as_str() else {
                        return Err(EngineError::InvalidColumn(format!("{name:?}")));
                    };
                    if !self.inner.state.read().columns.contains_key(name) {
                        return Err(EngineError::InvalidColumn(name.to_string()));
                    }
                    out.push(name.to_string());
                }
                Some(out)
            }
            Some(other) => {
                return Err(EngineError::InvalidColumn(format!(
                    "columns must be a sequence, got {other:?}"
                )));
            }
            None => None,
        };

        Ok(MemoryView::attach(Arc::clone(&self.inner), selected))
    }

    fn on_delete(&self, callback: DeleteCallback) -> SubToken {
        let token = self.inner.token();
        self.inner.delete_callbacks.lock().push((token, callback));
        token
    }

    fn remove_delete(&self, token: SubToken) {
        self.inner
            .delete_callbacks
            .lock()
            .retain(|(t, _)| *t != token);
    }

    fn delete(&self) {
        if self.inner.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.listeners.lock().clear();
        let callbacks: Vec<DeleteCallback> = self
            .inner
            .delete_callbacks
            .lock()
            .drain(..)
            .map(|(_, cb)| cb)
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

struct ViewSubscribers {
    updates: Vec<(SubToken, UpdateCallback, UpdateMode)>,
    deletes: Vec<(SubToken, DeleteCallback)>,
}

/// A column-selecting live view over a table.
pub struct MemoryView {
    table: Arc<TableInner>,
    columns: Option<Vec<String>>,
    subscribers: Arc<Mutex<ViewSubscribers>>,
    table_token: SubToken,
    next_token: AtomicU64,
    deleted: AtomicBool,
}

impl MemoryView {
    fn attach(table: Arc<TableInner>, columns: Option<Vec<String>>) -> Arc<dyn View> {
        let subscribers = Arc::new(Mutex::new(ViewSubscribers {
            updates: Vec::new(),
            deletes: Vec::new(),
        }));

        // Fan the table's update events out to this view's subscribers,
        // honoring each subscriber's delta mode.
        let fanout = Arc::clone(&subscribers);
        let table_token = table.subscribe(Arc::new(move |event: &UpdateEvent| {
            let snapshot: Vec<(UpdateCallback, UpdateMode)> = fanout
                .lock()
                .updates
                .iter()
                .map(|(_, cb, mode)| (Arc::clone(cb), *mode))
                .collect();
            for (callback, mode) in snapshot {
                callback(UpdateEvent {
                    port_id: event.port_id,
                    delta: match mode {
                        UpdateMode::Delta => event.delta.clone(),
                        UpdateMode::None => None,
                    },
                });
            }
        }));

        Arc::new(Self {
            table,
            columns,
            subscribers,
            table_token,
            next_token: AtomicU64::new(1),
            deleted: AtomicBool::new(false),
        })
    }

    fn token(&self) -> SubToken {
        SubToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn guard_deleted(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            Err(EngineError::Deleted)
        } else {
            Ok(())
        }
    }
}

impl View for MemoryView {
    fn schema(&self) -> Result<EngineValue> {
        self.guard_deleted()?;
        let state = self.table.state.read();
        Ok(EngineValue::Mapping(
            state
                .schema
                .iter()
                .filter(|(name, _)| {
                    self.columns
                        .as_ref()
                        .is_none_or(|s| s.iter().any(|n| n == *name))
                })
                .map(|(k, v)| (k.clone(), EngineValue::Str(v.clone())))
                .collect(),
        ))
    }

    fn dimensions(&self) -> Result<EngineValue> {
        self.guard_deleted()?;
        let state = self.table.state.read();
        let num_columns = self
            .columns
            .as_ref()
            .map_or(state.columns.len(), Vec::len);
        Ok(EngineValue::mapping([
            ("num_rows", EngineValue::Int(state.row_count() as i64)),
            ("num_columns", EngineValue::Int(num_columns as i64)),
        ]))
    }

    fn to_columns(&self, _options: EngineValue) -> Result<EngineValue> {
        self.guard_deleted()?;
        Ok(self.table.columns_value(self.columns.as_deref()))
    }

    fn to_rows(&self, _options: EngineValue) -> Result<EngineValue> {
        self.guard_deleted()?;
        let state = self.table.state.read();
        let mut rows = Vec::with_capacity(state.row_count());
        for index in 0..state.row_count() {
            let mut row = BTreeMap::new();
            for (name, values) in &state.columns {
                if self
                    .columns
                    .as_ref()
                    .is_none_or(|s| s.iter().any(|n| n == name))
                {
                    row.insert(
                        name.clone(),
                        values.get(index).cloned().unwrap_or(EngineValue::Null),
                    );
                }
            }
            rows.push(EngineValue::Mapping(row));
        }
        Ok(EngineValue::Sequence(rows))
    }

    fn to_arrow(&self, _options: EngineValue) -> Result<Bytes> {
        self.guard_deleted()?;
        // This engine's columnar buffer format is serialized JSON columns;
        // the protocol treats it as opaque bytes either way.
        let columns = self.table.columns_value(self.columns.as_deref());
        serde_json::to_vec(&columns)
            .map(Bytes::from)
            .map_err(|e| EngineError::Other(e.to_string()))
    }

    fn on_update(&self, callback: UpdateCallback, mode: UpdateMode) -> SubToken {
        let token = self.token();
        self.subscribers.lock().updates.push((token, callback, mode));
        token
    }

    fn remove_update(&self, token: SubToken) {
        self.subscribers.lock().updates.retain(|(t, _, _)| *t != token);
    }

    fn on_delete(&self, callback: DeleteCallback) -> SubToken {
        let token = self.token();
        self.subscribers.lock().deletes.push((token, callback));
        token
    }

    fn remove_delete(&self, token: SubToken) {
        self.subscribers.lock().deletes.retain(|(t, _)| *t != token);
    }

    fn delete(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.table.unsubscribe(self.table_token);
        let mut subscribers = self.subscribers.lock();
        subscribers.updates.clear();
        let callbacks: Vec<DeleteCallback> = subscribers
            .deletes
            .drain(..)
            .map(|(_, cb)| cb)
            .collect();
        drop(subscribers);
        for callback in callbacks {
            callback();
        }
    }
}
