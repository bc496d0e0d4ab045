//! Read and write access to the resource tree.
//!
//! Reads are served straight from the tree. Writes are routed to the
//! [`PvWriter`] registered for the top-level collection of the path, which
//! forwards them to the controller and updates the tree itself. Nodes whose
//! value lives elsewhere are mounted with an [`ExternalValue`] and bypass
//! the tree for both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::model::tree::{Node, Pv, ResourceTree};
use crate::model::ModelError;

/// Path of the vendor domain.
pub const VENDOR_PATH: &str = "~vendor";

/// Path of the handler statistics below the vendor domain.
pub const STATISTICS_PATH: &str = "~vendor/statistics";

/// Accepts process value writes for one collection.
#[async_trait]
pub trait PvWriter: Send + Sync {
    /// `path` is relative to the collection, e.g. `1234` for `sysvar/1234`.
    async fn write_pv(&self, path: &str, value: Value) -> Result<(), ModelError>;
}

/// Value of a node kept outside the tree, read and written in place.
#[async_trait]
pub trait ExternalValue: Send + Sync {
    fn read(&self) -> Result<Pv, ModelError>;

    async fn write(&self, value: Value) -> Result<(), ModelError>;
}

/// Request counters of the REST dispatch.
#[derive(Debug, Default)]
pub struct HandlerStats {
    requests: AtomicU64,
    errors: AtomicU64,
}

impl HandlerStats {
    pub fn record(&self, success: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Static facts about this server, published in the vendor domain.
#[derive(Debug, Clone)]
pub struct VendorInfo {
    pub server_name: String,
    pub server_version: String,
    pub server_description: String,
    pub vendor_name: String,
}

impl Default for VendorInfo {
    fn default() -> Self {
        Self {
            server_name: "Home Gateway".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            server_description: env!("CARGO_PKG_DESCRIPTION").to_string(),
            vendor_name: "Home Gateway contributors".to_string(),
        }
    }
}

/// A link to a child resource.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Link {
    pub rel: String,
    pub href: String,
    pub title: String,
}

/// Dispatch service over the resource tree.
pub struct ModelService {
    tree: Arc<ResourceTree>,
    writers: DashMap<String, Arc<dyn PvWriter>>,
    external: DashMap<String, Arc<dyn ExternalValue>>,
    stats: Arc<HandlerStats>,
}

impl ModelService {
    /// Construct the root domain and the vendor domain.
    pub fn new(vendor: &VendorInfo) -> Self {
        let root = Node::new("root", "Root", "domain")
            .with_description(format!("Root of the {} resource tree", vendor.server_name));
        let tree = Arc::new(ResourceTree::new(root));

        let vendor_node = Node::new(VENDOR_PATH, "Vendor information", "vendor")
            .with_property("serverName", vendor.server_name.as_str())
            .with_property("serverVersion", vendor.server_version.as_str())
            .with_property("serverDescription", vendor.server_description.as_str())
            .with_property("vendorName", vendor.vendor_name.as_str());
        let stats_node = Node::new("statistics", "Request statistics", "statistics");
        // Both parents exist at this point.
        let _ = tree.upsert(VENDOR_PATH, vendor_node);
        let _ = tree.upsert(STATISTICS_PATH, stats_node);

        Self {
            tree,
            writers: DashMap::new(),
            external: DashMap::new(),
            stats: Arc::new(HandlerStats::default()),
        }
    }

    pub fn tree(&self) -> &Arc<ResourceTree> {
        &self.tree
    }

    pub fn stats(&self) -> &Arc<HandlerStats> {
        &self.stats
    }

    /// Register a top-level collection: its domain node and optional writer.
    pub fn register_collection(
        &self,
        identifier: &str,
        title: &str,
        writer: Option<Arc<dyn PvWriter>>,
    ) -> Result<(), ModelError> {
        self.tree.upsert(identifier, Node::new(identifier, title, "domain"))?;
        if let Some(writer) = writer {
            self.writers.insert(identifier.to_string(), writer);
        }
        Ok(())
    }

    /// Add `node` at `path` with a value served by `value`.
    pub fn mount_external(&self, path: &str, node: Node, value: Arc<dyn ExternalValue>) -> Result<(), ModelError> {
        self.tree.upsert(path, node)?;
        self.external.insert(path.to_string(), value);
        Ok(())
    }

    fn external(&self, path: &str) -> Option<Arc<dyn ExternalValue>> {
        self.external.get(path).map(|v| Arc::clone(v.value()))
    }

    /// Properties of a resource including links to its children.
    pub fn read(&self, path: &str) -> Result<Value, ModelError> {
        let path = path.trim_matches('/');
        let view = self
            .tree
            .get(path)
            .ok_or_else(|| ModelError::NotFound(path.to_string()))?;

        let mut body = Map::new();
        body.insert("identifier".into(), json!(view.node.identifier));
        body.insert("title".into(), json!(view.node.title));
        if !view.node.description.is_empty() {
            body.insert("description".into(), json!(view.node.description));
        }
        body.insert("~role".into(), json!(view.node.role));
        for (key, value) in view.node.properties {
            body.insert(key, value);
        }
        if path == STATISTICS_PATH {
            body.insert("requests".into(), json!(self.stats.requests()));
            body.insert("errors".into(), json!(self.stats.errors()));
        }

        let links: Vec<Link> = view
            .children
            .iter()
            .map(|child| {
                let child_path = join(path, child);
                let title = self
                    .tree
                    .get(&child_path)
                    .map(|v| v.node.title)
                    .unwrap_or_default();
                Link {
                    rel: "item".into(),
                    href: child.clone(),
                    title,
                }
            })
            .collect();
        if !links.is_empty() {
            body.insert("~links".into(), json!(links));
        }
        Ok(Value::Object(body))
    }

    pub fn read_pv(&self, path: &str) -> Result<Pv, ModelError> {
        let path = path.trim_matches('/');
        if !self.tree.contains(path) {
            return Err(ModelError::NotFound(path.to_string()));
        }
        if let Some(value) = self.external(path) {
            return value.read();
        }
        self.tree
            .pv(path)
            .ok_or_else(|| ModelError::NoValue(path.to_string()))
    }

    pub async fn write_pv(&self, path: &str, value: Value) -> Result<(), ModelError> {
        let path = path.trim_matches('/');
        if !self.tree.contains(path) {
            return Err(ModelError::NotFound(path.to_string()));
        }
        if let Some(external) = self.external(path) {
            return external.write(value).await;
        }
        let (collection, rest) = path.split_once('/').unwrap_or((path, ""));
        let writer = self
            .writers
            .get(collection)
            .map(|w| Arc::clone(w.value()))
            .ok_or_else(|| ModelError::NotWritable(path.to_string()))?;
        if rest.is_empty() {
            return Err(ModelError::NotWritable(path.to_string()));
        }
        writer.write_pv(rest, value).await
    }
}

fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}
