//! In-memory resource tree.
//!
//! Nodes are addressed by slash separated paths without leading slash; the
//! root is the empty path. Every node except the root needs an existing
//! parent, so collections register their domain node before their items.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::model::ModelError;

const CHANGE_CAPACITY: usize = 1024;

/// Process value: timestamp in milliseconds, value, quality state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pv {
    pub ts: i64,
    pub v: Value,
    pub s: u16,
}

impl Pv {
    /// A good-quality value stamped with the current time.
    pub fn now(v: Value) -> Self {
        Self {
            ts: crate::model::now_millis(),
            v,
            s: 0,
        }
    }
}

/// Metadata and state of one resource.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub role: String,
    pub properties: Map<String, Value>,
    pub pv: Option<Pv>,
}

impl Node {
    pub fn new(identifier: impl Into<String>, title: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// A node together with the identifiers of its children.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub node: Node,
    pub children: Vec<String>,
}

/// Emitted whenever a process value changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelChange {
    pub path: String,
    pub pv: Pv,
}

#[derive(Debug)]
struct Entry {
    node: Node,
    children: BTreeSet<String>,
}

/// The resource tree with change notifications.
#[derive(Debug)]
pub struct ResourceTree {
    nodes: RwLock<BTreeMap<String, Entry>>,
    changes: broadcast::Sender<ModelChange>,
}

impl ResourceTree {
    /// Create a tree holding only `root`.
    pub fn new(root: Node) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            String::new(),
            Entry {
                node: root,
                children: BTreeSet::new(),
            },
        );
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            nodes: RwLock::new(nodes),
            changes,
        }
    }

    /// Insert or replace the node at `path`.
    ///
    /// Children survive a replace. So does the process value, unless the new
    /// node carries one.
    pub fn upsert(&self, path: &str, node: Node) -> Result<(), ModelError> {
        let path = normalize(path);
        let (parent, id) = split_parent(path).ok_or_else(|| ModelError::NoParent(path.to_string()))?;
        let mut nodes = self.nodes.write();
        match nodes.get_mut(path) {
            Some(entry) => {
                let pv = node.pv.clone().or_else(|| entry.node.pv.take());
                entry.node = Node { pv, ..node };
            }
            None => {
                let parent_entry = nodes
                    .get_mut(parent)
                    .ok_or_else(|| ModelError::NoParent(path.to_string()))?;
                parent_entry.children.insert(id.to_string());
                nodes.insert(
                    path.to_string(),
                    Entry {
                        node,
                        children: BTreeSet::new(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Set one property of an existing node.
    pub fn set_property(&self, path: &str, key: &str, value: Value) -> Result<(), ModelError> {
        let path = normalize(path);
        let mut nodes = self.nodes.write();
        let entry = nodes
            .get_mut(path)
            .ok_or_else(|| ModelError::NotFound(path.to_string()))?;
        entry.node.properties.insert(key.to_string(), value);
        Ok(())
    }

    /// Replace the process value of an existing node and notify subscribers.
    pub fn set_pv(&self, path: &str, pv: Pv) -> Result<(), ModelError> {
        let path = normalize(path);
        {
            let mut nodes = self.nodes.write();
            let entry = nodes
                .get_mut(path)
                .ok_or_else(|| ModelError::NotFound(path.to_string()))?;
            entry.node.pv = Some(pv.clone());
        }
        // No receivers is fine: nobody mirrors the model yet.
        let _ = self.changes.send(ModelChange {
            path: path.to_string(),
            pv,
        });
        Ok(())
    }

    /// Remove a node and everything below it.
    pub fn remove(&self, path: &str) -> bool {
        let path = normalize(path);
        let Some((parent, id)) = split_parent(path) else {
            return false;
        };
        let mut nodes = self.nodes.write();
        if nodes.remove(path).is_none() {
            return false;
        }
        let prefix = format!("{path}/");
        nodes.retain(|key, _| !key.starts_with(&prefix));
        if let Some(parent_entry) = nodes.get_mut(parent) {
            parent_entry.children.remove(id);
        }
        true
    }

    pub fn get(&self, path: &str) -> Option<NodeView> {
        let nodes = self.nodes.read();
        nodes.get(normalize(path)).map(|entry| NodeView {
            node: entry.node.clone(),
            children: entry.children.iter().cloned().collect(),
        })
    }

    pub fn pv(&self, path: &str) -> Option<Pv> {
        let nodes = self.nodes.read();
        nodes.get(normalize(path)).and_then(|entry| entry.node.pv.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.read().contains_key(normalize(path))
    }

    /// Identifiers of the children of `path`.
    pub fn children(&self, path: &str) -> Vec<String> {
        let nodes = self.nodes.read();
        nodes
            .get(normalize(path))
            .map(|entry| entry.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscribe to process value changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ModelChange> {
        self.changes.subscribe()
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn split_parent(path: &str) -> Option<(&str, &str)> {
    if path.is_empty() {
        return None;
    }
    Some(path.rsplit_once('/').unwrap_or(("", path)))
}
