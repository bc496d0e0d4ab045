//! Room collection, fed by the logic-layer explorer.

use std::sync::Arc;

use crate::collections::mirror_objects;
use crate::controller::explorer::{ExplorerListener, LogicGraph};
use crate::model::{ModelError, ModelService, ResourceTree};

pub const COLLECTION: &str = "room";

pub struct RoomCol {
    tree: Arc<ResourceTree>,
}

impl RoomCol {
    pub fn new(service: &ModelService) -> Result<Self, ModelError> {
        service.register_collection(COLLECTION, "Rooms", None)?;
        Ok(Self {
            tree: Arc::clone(service.tree()),
        })
    }
}

impl ExplorerListener for RoomCol {
    fn graph_changed(&self, graph: &LogicGraph) {
        let count = mirror_objects(&self.tree, COLLECTION, "room", &graph.rooms);
        tracing::debug!(count, "Rooms updated");
    }
}
