//! Function (trade) collection, fed by the logic-layer explorer.

use std::sync::Arc;

use crate::collections::mirror_objects;
use crate::controller::explorer::{ExplorerListener, LogicGraph};
use crate::model::{ModelError, ModelService, ResourceTree};

pub const COLLECTION: &str = "function";

pub struct FunctionCol {
    tree: Arc<ResourceTree>,
}

impl FunctionCol {
    pub fn new(service: &ModelService) -> Result<Self, ModelError> {
        service.register_collection(COLLECTION, "Functions", None)?;
        Ok(Self {
            tree: Arc::clone(service.tree()),
        })
    }
}

impl ExplorerListener for FunctionCol {
    fn graph_changed(&self, graph: &LogicGraph) {
        let count = mirror_objects(&self.tree, COLLECTION, "function", &graph.functions);
        tracing::debug!(count, "Functions updated");
    }
}
