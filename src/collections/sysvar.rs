//! System variable collection.
//!
//! Polls all system variables into `sysvar/<id>` and writes values back
//! through the scripting endpoint.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::collections::{is_object_id, remove_missing};
use crate::controller::script::{parse_rows, quote, ScriptError, ScriptRunner};
use crate::lifecycle::shutdown::TaskGroup;
use crate::model::{ModelError, ModelService, Node, Pv, PvWriter, ResourceTree};

pub const COLLECTION: &str = "sysvar";

const LIST_SCRIPT: &str = r#"
string id;
foreach(id, dom.GetObject(ID_SYSTEM_VARIABLES).EnumUsedIDs()) {
  var o = dom.GetObject(id);
  WriteLine(id # "\t" # o.Name() # "\t" # o.DPInfo() # "\t" # o.ValueType() # "\t" # o.ValueUnit() # "\t" # o.Value());
}
"#;

/// Value type codes of the logic layer.
const TYPE_BOOL: &str = "2";
const TYPE_FLOAT: &str = "4";
const TYPE_INTEGER: &str = "16";

/// A system variable as read from the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SysVar {
    pub id: String,
    pub name: String,
    pub description: String,
    pub value_type: String,
    pub unit: String,
    pub value: Value,
}

impl SysVar {
    fn from_fields(fields: &[&str]) -> Self {
        let value_type = fields[3].to_string();
        Self {
            id: fields[0].to_string(),
            name: fields[1].to_string(),
            description: fields[2].to_string(),
            unit: fields[4].to_string(),
            value: parse_value(&value_type, fields[5]),
            value_type,
        }
    }
}

fn parse_value(value_type: &str, raw: &str) -> Value {
    match value_type {
        TYPE_BOOL => json!(raw == "true"),
        TYPE_FLOAT | TYPE_INTEGER => raw
            .parse::<f64>()
            .ok()
            .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
            .unwrap_or_else(|| json!(raw)),
        _ => json!(raw),
    }
}

pub fn parse_list(output: &str) -> Result<Vec<SysVar>, ScriptError> {
    Ok(parse_rows(output, 6)?
        .iter()
        .map(|fields| SysVar::from_fields(fields))
        .collect())
}

pub struct SysVarCol {
    tree: Arc<ResourceTree>,
    runner: Arc<dyn ScriptRunner>,
    period: Duration,
    tasks: TaskGroup,
}

impl SysVarCol {
    pub fn new(service: &ModelService, runner: Arc<dyn ScriptRunner>, period: Duration) -> Result<Self, ModelError> {
        let writer = Arc::new(SysVarWriter {
            tree: Arc::clone(service.tree()),
            runner: Arc::clone(&runner),
        });
        service.register_collection(COLLECTION, "System variables", Some(writer))?;
        Ok(Self {
            tree: Arc::clone(service.tree()),
            runner,
            period,
            tasks: TaskGroup::new("sysvars"),
        })
    }

    /// Poll once and mirror the result.
    pub async fn refresh(&self) -> Result<usize, ScriptError> {
        let output = self.runner.run(LIST_SCRIPT).await?;
        let variables = parse_list(&output)?;
        let mut seen = HashSet::new();
        for var in &variables {
            let path = format!("{COLLECTION}/{}", var.id);
            let node = Node::new(&var.id, &var.name, "variable")
                .with_description(&var.description)
                .with_property("valueType", var.value_type.as_str())
                .with_property("unit", var.unit.as_str());
            if let Err(e) = self.tree.upsert(&path, node) {
                tracing::warn!(path = %path, error = %e, "Updating system variable failed");
                continue;
            }
            if self.tree.pv(&path).map(|pv| pv.v) != Some(var.value.clone()) {
                let _ = self.tree.set_pv(&path, Pv::now(var.value.clone()));
            }
            seen.insert(var.id.clone());
        }
        remove_missing(&self.tree, COLLECTION, &seen);
        Ok(variables.len())
    }

    pub fn start(self: &Arc<Self>) {
        let col = Arc::clone(self);
        self.tasks.spawn_periodic(self.period, move || {
            let col = Arc::clone(&col);
            async move {
                match col.refresh().await {
                    Ok(count) => tracing::debug!(count, "System variables refreshed"),
                    Err(e) => tracing::warn!(error = %e, "Reading system variables failed"),
                }
            }
        });
    }

    pub async fn stop(&self) {
        self.tasks.stop().await;
    }
}

struct SysVarWriter {
    tree: Arc<ResourceTree>,
    runner: Arc<dyn ScriptRunner>,
}

fn literal(value: &Value) -> Result<String, ModelError> {
    match value {
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(quote(s)),
        other => Err(ModelError::BadRequest(format!("unsupported value {other}"))),
    }
}

#[async_trait]
impl PvWriter for SysVarWriter {
    async fn write_pv(&self, id: &str, value: Value) -> Result<(), ModelError> {
        if !is_object_id(id) {
            return Err(ModelError::NotWritable(format!("{COLLECTION}/{id}")));
        }
        let script = format!("dom.GetObject({id}).State({});", literal(&value)?);
        self.runner
            .run(&script)
            .await
            .map_err(|e| ModelError::Backend(e.to_string()))?;
        tracing::info!(id, value = %value, "System variable written");
        self.tree.set_pv(&format!("{COLLECTION}/{id}"), Pv::now(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::script::fake::FakeRunner;
    use crate::model::VendorInfo;

    const OUTPUT: &str = "1234\tAlarm\tAlarm zone 1\t2\t\ttrue\n\
                          1235\tTemperature\t\t4\t°C\t21.5\n\
                          1236\tMode\t\t20\t\tAway\n";

    #[test]
    fn values_follow_their_type() {
        let vars = parse_list(OUTPUT).unwrap();
        assert_eq!(vars[0].value, json!(true));
        assert_eq!(vars[1].value, json!(21.5));
        assert_eq!(vars[2].value, json!("Away"));
    }

    #[tokio::test]
    async fn refresh_mirrors_and_prunes() {
        let service = ModelService::new(&VendorInfo::default());
        let runner = Arc::new(FakeRunner::with_output(OUTPUT));
        let col = SysVarCol::new(&service, runner.clone(), Duration::from_secs(30)).unwrap();

        assert_eq!(col.refresh().await.unwrap(), 3);
        assert_eq!(service.read_pv("sysvar/1235").unwrap().v, json!(21.5));
        assert_eq!(service.read("sysvar/1234").unwrap()["description"], json!("Alarm zone 1"));

        *runner.output.lock() = "1234\tAlarm\t\t2\t\tfalse\n".to_string();
        col.refresh().await.unwrap();
        assert!(!service.tree().contains("sysvar/1235"));
        assert_eq!(service.read_pv("sysvar/1234").unwrap().v, json!(false));
    }

    #[tokio::test]
    async fn writes_go_through_the_script_endpoint() {
        let service = ModelService::new(&VendorInfo::default());
        let runner = Arc::new(FakeRunner::with_output(OUTPUT));
        let col = SysVarCol::new(&service, runner.clone(), Duration::from_secs(30)).unwrap();
        col.refresh().await.unwrap();

        service.write_pv("sysvar/1236", json!("Home")).await.unwrap();
        assert!(runner.scripts.lock().last().unwrap().contains("dom.GetObject(1236).State(\"Home\")"));
        assert_eq!(service.read_pv("sysvar/1236").unwrap().v, json!("Home"));

        let err = service.write_pv("sysvar/1236", json!([1])).await.unwrap_err();
        assert!(matches!(err, ModelError::BadRequest(_)));

        runner.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = service.write_pv("sysvar/1234", json!(true)).await.unwrap_err();
        assert!(matches!(err, ModelError::Backend(_)));
    }
}
