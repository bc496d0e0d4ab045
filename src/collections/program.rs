//! Program collection.
//!
//! `program/<id>` carries the active flag as value, stamped with the time
//! of the last execution. Writing `true` executes the program.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::collections::{is_object_id, remove_missing};
use crate::controller::script::{parse_rows, ScriptError, ScriptRunner};
use crate::lifecycle::shutdown::TaskGroup;
use crate::model::{ModelError, ModelService, Node, Pv, PvWriter, ResourceTree};

pub const COLLECTION: &str = "program";

const LIST_SCRIPT: &str = r#"
string id;
foreach(id, dom.GetObject(ID_PROGRAMS).EnumUsedIDs()) {
  var o = dom.GetObject(id);
  WriteLine(id # "\t" # o.Name() # "\t" # o.PrgInfo() # "\t" # o.Active() # "\t" # o.ProgramLastExecuteTime().ToInteger());
}
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub id: String,
    pub name: String,
    pub description: String,
    pub active: bool,
    /// Seconds since the Unix epoch, 0 if never executed.
    pub last_executed: i64,
}

pub fn parse_list(output: &str) -> Result<Vec<Program>, ScriptError> {
    parse_rows(output, 5)?
        .iter()
        .enumerate()
        .map(|(index, fields)| {
            let last_executed = fields[4].trim().parse().map_err(|_| ScriptError::Parse {
                line: index + 1,
                reason: format!("bad execution time {:?}", fields[4]),
            })?;
            Ok(Program {
                id: fields[0].to_string(),
                name: fields[1].to_string(),
                description: fields[2].to_string(),
                active: fields[3] == "true",
                last_executed,
            })
        })
        .collect()
}

pub struct ProgramCol {
    tree: Arc<ResourceTree>,
    runner: Arc<dyn ScriptRunner>,
    period: Duration,
    tasks: TaskGroup,
}

impl ProgramCol {
    pub fn new(service: &ModelService, runner: Arc<dyn ScriptRunner>, period: Duration) -> Result<Self, ModelError> {
        let writer = Arc::new(ProgramWriter {
            runner: Arc::clone(&runner),
        });
        service.register_collection(COLLECTION, "Programs", Some(writer))?;
        Ok(Self {
            tree: Arc::clone(service.tree()),
            runner,
            period,
            tasks: TaskGroup::new("programs"),
        })
    }

    pub async fn refresh(&self) -> Result<usize, ScriptError> {
        let output = self.runner.run(LIST_SCRIPT).await?;
        let programs = parse_list(&output)?;
        let mut seen = HashSet::new();
        for program in &programs {
            let path = format!("{COLLECTION}/{}", program.id);
            let node = Node::new(&program.id, &program.name, "program")
                .with_description(&program.description);
            if let Err(e) = self.tree.upsert(&path, node) {
                tracing::warn!(path = %path, error = %e, "Updating program failed");
                continue;
            }
            let pv = Pv {
                ts: program.last_executed * 1000,
                v: json!(program.active),
                s: 0,
            };
            if self.tree.pv(&path).as_ref() != Some(&pv) {
                let _ = self.tree.set_pv(&path, pv);
            }
            seen.insert(program.id.clone());
        }
        remove_missing(&self.tree, COLLECTION, &seen);
        Ok(programs.len())
    }

    pub fn start(self: &Arc<Self>) {
        let col = Arc::clone(self);
        self.tasks.spawn_periodic(self.period, move || {
            let col = Arc::clone(&col);
            async move {
                match col.refresh().await {
                    Ok(count) => tracing::debug!(count, "Programs refreshed"),
                    Err(e) => tracing::warn!(error = %e, "Reading programs failed"),
                }
            }
        });
    }

    pub async fn stop(&self) {
        self.tasks.stop().await;
    }
}

struct ProgramWriter {
    runner: Arc<dyn ScriptRunner>,
}

#[async_trait]
impl PvWriter for ProgramWriter {
    async fn write_pv(&self, id: &str, value: Value) -> Result<(), ModelError> {
        if !is_object_id(id) {
            return Err(ModelError::NotWritable(format!("{COLLECTION}/{id}")));
        }
        if value != Value::Bool(true) {
            return Err(ModelError::BadRequest("programs accept only true".into()));
        }
        self.runner
            .run(&format!("dom.GetObject({id}).ProgramExecute();"))
            .await
            .map_err(|e| ModelError::Backend(e.to_string()))?;
        tracing::info!(id, "Program executed");
        // The next refresh picks up the new execution time.
        Ok(())
    }
}
