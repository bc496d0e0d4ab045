//! Device collection.
//!
//! # Responsibilities
//! - Keep the latest value of every device parameter (pipeline stage 2)
//! - Mirror devices, channels and parameters into `device/…`
//! - Track device descriptions announced by the interface processes
//! - Annotate channels with their rooms and functions
//!
//! Model layout: `device/<device>/<channel>/<parameter>`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};

use crate::controller::callback::{DeviceDescription, DeviceDirectory};
use crate::controller::explorer::LogicExplorer;
use crate::lifecycle::shutdown::TaskGroup;
use crate::model::{ModelError, ModelService, Node, Pv, ResourceTree};
use crate::pipeline::{ChannelAddress, Event, ForwardError, Stage};

pub const COLLECTION: &str = "device";

/// A value change ready to be applied to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterUpdate {
    pub address: ChannelAddress,
    pub parameter: String,
    pub pv: Pv,
}

impl ParameterUpdate {
    pub fn path(&self) -> String {
        format!(
            "{COLLECTION}/{}/{}/{}",
            self.address.device, self.address.channel, self.parameter
        )
    }
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    interface_id: String,
    descriptions: Vec<DeviceDescription>,
}

pub struct DeviceCol {
    tree: Arc<ResourceTree>,
    explorer: Arc<LogicExplorer>,
    devices: DashMap<String, DeviceEntry>,
    values: DashMap<String, Pv>,
    period: Duration,
    tasks: TaskGroup,
}

impl DeviceCol {
    pub fn new(service: &ModelService, explorer: Arc<LogicExplorer>, period: Duration) -> Result<Self, ModelError> {
        service.register_collection(COLLECTION, "Devices", None)?;
        Ok(Self {
            tree: Arc::clone(service.tree()),
            explorer,
            devices: DashMap::new(),
            values: DashMap::new(),
            period,
            tasks: TaskGroup::new("devices"),
        })
    }

    /// Cached value of `device/<device>/<channel>/<parameter>`.
    pub fn value(&self, address: &str, parameter: &str) -> Option<Pv> {
        let address = ChannelAddress::parse(address)?;
        let path = format!("{COLLECTION}/{}/{}/{parameter}", address.device, address.channel);
        self.values.get(&path).map(|pv| pv.clone())
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn start(self: &Arc<Self>) {
        let col = Arc::clone(self);
        self.tasks.spawn_periodic(self.period, move || {
            let col = Arc::clone(&col);
            async move { col.annotate() }
        });
    }

    pub async fn stop(&self) {
        self.tasks.stop().await;
    }

    fn ensure_device(&self, device: &str) -> Result<String, ModelError> {
        let path = format!("{COLLECTION}/{device}");
        if !self.tree.contains(&path) {
            self.tree.upsert(&path, Node::new(device, device, "device"))?;
        }
        Ok(path)
    }

    fn ensure_channel(&self, address: &ChannelAddress) -> Result<String, ModelError> {
        let device_path = self.ensure_device(&address.device)?;
        let path = format!("{device_path}/{}", address.channel);
        if !self.tree.contains(&path) {
            let title = format!("{}:{}", address.device, address.channel);
            self.tree.upsert(&path, Node::new(&address.channel, title, "channel"))?;
        }
        Ok(path)
    }

    fn apply(&self, update: ParameterUpdate) -> Result<(), ModelError> {
        let channel_path = self.ensure_channel(&update.address)?;
        let path = format!("{channel_path}/{}", update.parameter);
        if !self.tree.contains(&path) {
            self.tree.upsert(
                &path,
                Node::new(&update.parameter, &update.parameter, "parameter"),
            )?;
        }
        self.values.insert(path.clone(), update.pv.clone());
        self.tree.set_pv(&path, update.pv)
    }

    /// Set the room and function properties of every known channel.
    pub fn annotate(&self) {
        let graph = self.explorer.graph();
        let mut annotated = 0usize;
        for device in self.tree.children(COLLECTION) {
            for channel in self.tree.children(&format!("{COLLECTION}/{device}")) {
                let address = format!("{device}:{channel}");
                let path = format!("{COLLECTION}/{device}/{channel}");
                let rooms: Vec<Value> = graph.rooms_of(&address).iter().map(|r| json!(r.name)).collect();
                let functions: Vec<Value> = graph
                    .functions_of(&address)
                    .iter()
                    .map(|f| json!(f.name))
                    .collect();
                // A node removed concurrently is skipped.
                let _ = self.tree.set_property(&path, "rooms", Value::Array(rooms));
                let _ = self.tree.set_property(&path, "functions", Value::Array(functions));
                annotated += 1;
            }
        }
        tracing::debug!(channels = annotated, "Channels annotated");
    }

    fn describe(&self, interface_id: &str, description: &DeviceDescription) -> Result<(), ModelError> {
        if description.is_channel() {
            let Some(address) = ChannelAddress::parse(&description.address) else {
                return Err(ModelError::BadRequest(description.address.clone()));
            };
            let path = self.ensure_channel(&address)?;
            self.tree
                .set_property(&path, "type", json!(description.type_name))?;
        } else {
            let path = self.ensure_device(&description.address)?;
            self.tree.set_property(&path, "type", json!(description.type_name))?;
            self.tree.set_property(&path, "interface", json!(interface_id))?;
            self.tree.set_property(&path, "version", json!(description.version))?;
        }
        Ok(())
    }
}

impl Stage for DeviceCol {
    type Item = ParameterUpdate;

    fn name(&self) -> &'static str {
        "device-cache"
    }

    fn validate(&self, event: &Event) -> Result<(), ForwardError> {
        if event.parameter.is_empty() || event.parameter.contains('/') {
            return Err(ForwardError::Invalid(format!("bad parameter {:?}", event.parameter)));
        }
        let address = event.channel_address()?;
        if address.device.contains('/') || address.channel.contains('/') {
            return Err(ForwardError::Invalid(format!("bad address {:?}", event.address)));
        }
        Ok(())
    }

    fn translate(&self, event: &Event) -> Result<ParameterUpdate, ForwardError> {
        Ok(ParameterUpdate {
            address: event.channel_address()?,
            parameter: event.parameter.clone(),
            pv: Pv {
                ts: event.received_at,
                v: event.value.clone(),
                s: 0,
            },
        })
    }

    fn forward(&self, update: ParameterUpdate) -> Result<(), ForwardError> {
        self.apply(update)?;
        Ok(())
    }
}

impl DeviceDirectory for DeviceCol {
    fn list_devices(&self, interface_id: &str) -> Vec<DeviceDescription> {
        self.devices
            .iter()
            .filter(|entry| entry.interface_id == interface_id)
            .flat_map(|entry| entry.descriptions.clone())
            .collect()
    }

    fn new_devices(&self, interface_id: &str, devices: Vec<DeviceDescription>) {
        // Devices first, so channels find their parent.
        let (parents, channels): (Vec<_>, Vec<_>) = devices.into_iter().partition(|d| !d.is_channel());
        for description in parents.into_iter().chain(channels) {
            if let Err(e) = self.describe(interface_id, &description) {
                tracing::warn!(address = %description.address, error = %e, "Device description rejected");
                continue;
            }
            let device = if description.is_channel() {
                description.parent.clone()
            } else {
                description.address.clone()
            };
            let mut entry = self.devices.entry(device).or_insert_with(|| DeviceEntry {
                interface_id: interface_id.to_string(),
                descriptions: Vec::new(),
            });
            entry.descriptions.retain(|d| d.address != description.address);
            entry.descriptions.push(description);
        }
    }

    fn delete_devices(&self, _interface_id: &str, addresses: &[String]) {
        for address in addresses {
            match ChannelAddress::parse(address) {
                Some(parsed) if address.contains(':') => {
                    let path = format!("{COLLECTION}/{}/{}", parsed.device, parsed.channel);
                    self.tree.remove(&path);
                    self.values.retain(|key, _| !key.starts_with(&format!("{path}/")));
                    if let Some(mut entry) = self.devices.get_mut(&parsed.device) {
                        entry.descriptions.retain(|d| &d.address != address);
                    }
                }
                _ => {
                    let path = format!("{COLLECTION}/{address}");
                    self.tree.remove(&path);
                    self.values.retain(|key, _| !key.starts_with(&format!("{path}/")));
                    self.devices.remove(address);
                }
            }
        }
    }
}
