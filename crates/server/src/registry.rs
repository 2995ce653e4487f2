//! The process-wide table/view name registry.

use crate::error::{Error, Result};
use colonnade_engine::{EngineError, Table, View};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Either kind of registered target.
#[derive(Clone)]
pub enum Target {
    /// A registered table.
    Table(Arc<dyn Table>),
    /// A registered view.
    View(Arc<dyn View>),
}

/// Name-to-object registry shared by every session of a server.
///
/// Entries are added by `create_table`/`create_view` and removed by
/// explicit deletes; adds and removes are atomic with respect to
/// concurrent lookups. The `locked` flag gates mutating commands.
#[derive(Default)]
pub struct Registry {
    tables: DashMap<String, Arc<dyn Table>>,
    views: DashMap<String, Arc<dyn View>>,
    locked: AtomicBool,
    next_view_id: AtomicU64,
}

impl Registry {
    /// Create an empty, unlocked registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table under `name`.
    ///
    /// # Errors
    ///
    /// Fails if the name is already taken; the engine owns duplicate
    /// detection semantics, so this surfaces as an engine error.
    pub fn insert_table(&self, name: &str, table: Arc<dyn Table>) -> Result<()> {
        match self.tables.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(table);
                Ok(())
            }
            Entry::Occupied(_) => Err(Error::Engine(EngineError::Other(format!(
                "table '{name}' already registered"
            )))),
        }
    }

    /// Register a view under `name`.
    ///
    /// # Errors
    ///
    /// Fails if the name is already taken.
    pub fn insert_view(&self, name: &str, view: Arc<dyn View>) -> Result<()> {
        match self.views.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(view);
                Ok(())
            }
            Entry::Occupied(_) => Err(Error::Engine(EngineError::Other(format!(
                "view '{name}' already registered"
            )))),
        }
    }

    /// Look up a table by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown names.
    pub fn table(&self, name: &str) -> Result<Arc<dyn Table>> {
        self.tables
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NotFound(format!("table '{name}'")))
    }

    /// Look up a view by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown names.
    pub fn view(&self, name: &str) -> Result<Arc<dyn View>> {
        self.views
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NotFound(format!("view '{name}'")))
    }

    /// Look up a name as either a table or a view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if neither map has the name.
    pub fn target(&self, name: &str) -> Result<Target> {
        if let Some(entry) = self.tables.get(name) {
            return Ok(Target::Table(Arc::clone(entry.value())));
        }
        if let Some(entry) = self.views.get(name) {
            return Ok(Target::View(Arc::clone(entry.value())));
        }
        Err(Error::NotFound(format!("target '{name}'")))
    }

    /// Remove a table, returning it if present.
    pub fn remove_table(&self, name: &str) -> Option<Arc<dyn Table>> {
        self.tables.remove(name).map(|(_, table)| table)
    }

    /// Remove a view, returning it if present.
    pub fn remove_view(&self, name: &str) -> Option<Arc<dyn View>> {
        self.views.remove(name).map(|(_, view)| view)
    }

    /// Whether a table with this name is registered.
    #[must_use]
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Whether a view with this name is registered.
    #[must_use]
    pub fn has_view(&self, name: &str) -> bool {
        self.views.contains_key(name)
    }

    /// Names of all registered tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|e| e.key().clone()).collect()
    }

    /// Names of all registered views.
    #[must_use]
    pub fn view_names(&self) -> Vec<String> {
        self.views.iter().map(|e| e.key().clone()).collect()
    }

    /// Generate a fresh server-side view name.
    #[must_use]
    pub fn generate_view_name(&self) -> String {
        format!("view_{}", self.next_view_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Reject mutating commands until [`Registry::unlock`] is called.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    /// Allow mutating commands again.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Whether the registry is currently locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}
