//! Sidebar navigation state shared between the registry and the shell
//!
//! The collection only holds items for plugins that are currently active;
//! the registry inserts on activate and removes on deactivate. The shell
//! subscribes to change events instead of polling.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

use alcove_plugin_api::{NavigationHandle, NavigationItem};

/// Marshals UI-observable mutations onto the interactive thread.
///
/// Background workers (async reinitialize) never touch navigation or
/// command state directly; they hand a closure to the dispatcher.
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs tasks on the calling thread. Used by the synchronous registry
/// paths and by tests.
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Change notifications emitted by [`NavigationCollection`]
#[derive(Debug, Clone)]
pub enum NavigationChange {
    Added {
        plugin_id: String,
        item: NavigationItem,
    },
    Removed {
        plugin_id: String,
    },
    Selected {
        plugin_id: String,
        entity_id: Option<String>,
    },
}

struct Selection {
    current: Option<String>,
    previous: Option<String>,
}

/// Sidebar items for active plugins, ordered by their declared weight
pub struct NavigationCollection {
    items: Mutex<Vec<(String, NavigationItem)>>,
    selection: Mutex<Selection>,
    changes: broadcast::Sender<NavigationChange>,
}

impl Default for NavigationCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationCollection {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            items: Mutex::new(Vec::new()),
            selection: Mutex::new(Selection {
                current: None,
                previous: None,
            }),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NavigationChange> {
        self.changes.subscribe()
    }

    /// Insert an item for an active plugin, keeping order-then-id sorting.
    /// Replaces an existing item from the same plugin.
    pub fn insert(&self, plugin_id: &str, item: NavigationItem) {
        let mut items = self.items.lock();
        items.retain(|(owner, _)| owner != plugin_id);
        items.push((plugin_id.to_string(), item.clone()));
        items.sort_by(|(_, a), (_, b)| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        drop(items);

        let _ = self.changes.send(NavigationChange::Added {
            plugin_id: plugin_id.to_string(),
            item,
        });
    }

    /// Remove a plugin's item; clears the selection if it pointed there
    pub fn remove(&self, plugin_id: &str) {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|(owner, _)| owner != plugin_id);
        let removed = items.len() != before;
        drop(items);

        let mut selection = self.selection.lock();
        if selection.current.as_deref() == Some(plugin_id) {
            selection.current = None;
        }
        if selection.previous.as_deref() == Some(plugin_id) {
            selection.previous = None;
        }
        drop(selection);

        if removed {
            let _ = self.changes.send(NavigationChange::Removed {
                plugin_id: plugin_id.to_string(),
            });
        }
    }

    pub fn items(&self) -> Vec<(String, NavigationItem)> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Plugin owning the navigation item with the given id
    pub fn owner_of(&self, nav_id: &str) -> Option<String> {
        self.items
            .lock()
            .iter()
            .find(|(_, item)| item.id == nav_id)
            .map(|(owner, _)| owner.clone())
    }

    pub fn current(&self) -> Option<String> {
        self.selection.lock().current.clone()
    }

    /// Select a plugin's tab, remembering the one it replaces
    pub fn select(&self, plugin_id: &str, entity_id: Option<String>) {
        let mut selection = self.selection.lock();
        if selection.current.as_deref() != Some(plugin_id) {
            selection.previous = selection.current.take();
        }
        selection.current = Some(plugin_id.to_string());
        drop(selection);

        let _ = self.changes.send(NavigationChange::Selected {
            plugin_id: plugin_id.to_string(),
            entity_id,
        });
    }

    /// Return to the previously selected tab, if any
    pub fn select_previous(&self) {
        let target = {
            let mut selection = self.selection.lock();
            let Some(previous) = selection.previous.take() else {
                return;
            };
            selection.previous = selection.current.take();
            selection.current = Some(previous.clone());
            previous
        };

        let _ = self.changes.send(NavigationChange::Selected {
            plugin_id: target,
            entity_id: None,
        });
    }
}

/// Per-plugin navigation handle given out through the façade.
///
/// All mutations go through the UI dispatcher so plugin-initiated
/// navigation is safe from any thread.
pub struct NavigationAdapter {
    collection: Arc<NavigationCollection>,
    dispatcher: Arc<dyn UiDispatcher>,
}

impl NavigationAdapter {
    pub fn new(collection: Arc<NavigationCollection>, dispatcher: Arc<dyn UiDispatcher>) -> Self {
        Self {
            collection,
            dispatcher,
        }
    }
}

impl NavigationHandle for NavigationAdapter {
    fn navigate_back(&self) {
        let collection = Arc::clone(&self.collection);
        self.dispatcher
            .dispatch(Box::new(move || collection.select_previous()));
    }

    fn navigate_to_item(&self, plugin_id: &str, entity_id: Option<&str>) {
        let collection = Arc::clone(&self.collection);
        let plugin_id = plugin_id.to_string();
        let entity_id = entity_id.map(str::to_string);
        self.dispatcher.dispatch(Box::new(move || {
            collection.select(&plugin_id, entity_id);
        }));
    }
}
