//! Domain collections mirrored onto the resource tree.
//!
//! # Data Flow
//! ```text
//! Script endpoint ──poll──→ sysvar.rs / program.rs ──→ sysvar/<id>, program/<id>
//! Explorer ──listener──→ room.rs / function.rs ──→ room/<id>, function/<id>
//! Pipeline stage 2 ──→ device.rs ──→ device/<dev>/<ch>/<param>
//! ```
//!
//! # Design Decisions
//! - Each polling collection owns one refresh loop, stopped by `stop`
//! - Items missing from a poll result are removed from the tree

pub mod device;
pub mod function;
pub mod program;
pub mod room;
pub mod sysvar;

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::controller::explorer::LogicObject;
use crate::model::{Node, ResourceTree};

pub use device::DeviceCol;
pub use function::FunctionCol;
pub use program::ProgramCol;
pub use room::RoomCol;
pub use sysvar::SysVarCol;

/// Logic-layer object ids are plain integers.
pub(crate) fn is_object_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

/// Remove every child of `collection` not contained in `keep`.
pub(crate) fn remove_missing(tree: &ResourceTree, collection: &str, keep: &HashSet<String>) -> usize {
    let mut removed = 0;
    for child in tree.children(collection) {
        if !keep.contains(&child) && tree.remove(&format!("{collection}/{child}")) {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::debug!(collection, removed, "Stale items removed");
    }
    removed
}

/// Replace the items of `collection` by `objects`.
pub(crate) fn mirror_objects(tree: &ResourceTree, collection: &str, role: &str, objects: &[LogicObject]) -> usize {
    let mut keep = HashSet::new();
    for object in objects {
        let channels: Vec<Value> = object.channels.iter().map(|c| json!(c)).collect();
        let node = Node::new(&object.id, &object.name, role)
            .with_description(&object.description)
            .with_property("channels", Value::Array(channels));
        match tree.upsert(&format!("{collection}/{}", object.id), node) {
            Ok(()) => {
                keep.insert(object.id.clone());
            }
            Err(e) => tracing::warn!(collection, id = %object.id, error = %e, "Updating item failed"),
        }
    }
    remove_missing(tree, collection, &keep);
    keep.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids() {
        assert!(is_object_id("1234"));
        assert!(!is_object_id(""));
        assert!(!is_object_id("12;x"));
    }
}
