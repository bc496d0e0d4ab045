//! Startup phases.
//!
//! # Responsibilities
//! - `startup_base`: static assets, REST listeners, resource model stack
//! - `startup_app`: collections, broker, web-socket bridge, pipeline,
//!   explorer and interconnector
//!
//! # Design Decisions
//! - Every subsystem registers its stop action right after it started, so
//!   teardown runs in exact reverse start order
//! - Listeners start without blocking; failures arrive later on the fatal
//!   channel
//! - Everything derived from the configuration is read under one guard

use std::sync::Arc;
use std::time::Duration;

use tower_http::services::ServeDir;

use crate::broker::{Broker, BrokerOptions, StoreAuthenticator};
use crate::collections::{DeviceCol, FunctionCol, ProgramCol, RoomCol, SysVarCol};
use crate::controller::{
    CallbackReceiver, ControllerLink, Interconnector, InterconnectorOptions, LogicExplorer, ScriptClient,
    ScriptRunner, XmlRpcLink,
};
use crate::http::server::model_stack;
use crate::http::websocket::BRIDGE_PATH;
use crate::http::{Bridge, Mux, RestOptions, RestServer};
use crate::lifecycle::orchestrator::{App, GatewayError};
use crate::lifecycle::teardown::Teardown;
use crate::model::handler::URL_PREFIX;
use crate::model::{ConfigValue, ModelService, VendorInfo};
use crate::net::connection::ConnectionTracker;
use crate::pipeline::{BrokerPublisher, Pipeline};

/// Path of the static web UI.
pub const UI_PATH: &str = "/ui";

const REGISTRATION_RETRY_BASE: Duration = Duration::from_secs(1);
const REGISTRATION_RETRY_MAX: Duration = Duration::from_secs(60);

/// How long the base teardown waits for open web-socket tunnels.
const TUNNEL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles created by [`startup_base`] and used by [`startup_app`].
pub struct Base {
    pub mux: Arc<Mux>,
    pub model: Arc<ModelService>,
    pub tunnels: ConnectionTracker,
}

/// Start the REST transport and mount the resource model.
pub fn startup_base(app: &App, teardown: &mut Teardown) -> Result<Base, GatewayError> {
    let cors_origins = app.store.read().http.cors_origins.clone();
    let mux = Arc::new(Mux::new());
    mux.nest_service(UI_PATH, ServeDir::new(app.paths.web_ui_dir()))?;

    let options = RestOptions {
        addr: app.plan.rest,
        addr_tls: app.plan.rest_tls,
        tls: app.tls.clone(),
    };
    let server = Arc::new(RestServer::start(options, mux.service(), app.fatal.clone()));
    let tunnels = ConnectionTracker::new();
    {
        let server = Arc::clone(&server);
        let tunnels = tunnels.clone();
        teardown.push("base transport", move || async move {
            server.stop().await;
            if tokio::time::timeout(TUNNEL_DRAIN_TIMEOUT, tunnels.wait_idle()).await.is_err() {
                tracing::warn!(open = tunnels.active_count(), "Web-socket tunnels still open");
            }
        });
    }

    let model = Arc::new(ModelService::new(&VendorInfo::default()));
    ConfigValue::mount(&model, Arc::clone(&app.store))?;
    mux.nest(
        URL_PREFIX,
        model_stack(Arc::clone(&model), Arc::clone(&app.store), &cors_origins),
    )?;

    Ok(Base { mux, model, tunnels })
}

/// Settings of the application phase, read under one guard.
struct AppSettings {
    controller_address: String,
    options: InterconnectorOptions,
    sysvar_period: Duration,
    program_period: Duration,
    explorer_period: Duration,
    device_period: Duration,
}

impl AppSettings {
    fn read(app: &App) -> Self {
        let config = app.store.read();
        Self {
            controller_address: config.controller.address.clone(),
            options: InterconnectorOptions {
                interfaces: config.controller.interfaces.clone(),
                id_prefix: format!("{}-", config.controller.init_id),
                callback_url: app.plan.callback_url.clone(),
                binary_callback_url: app.plan.binary_callback_url.clone(),
                binary_addr: app.plan.binrpc,
                retry_base: REGISTRATION_RETRY_BASE,
                retry_max: REGISTRATION_RETRY_MAX,
            },
            sysvar_period: Duration::from_secs(config.refresh.sysvar_secs),
            program_period: Duration::from_secs(config.refresh.program_secs),
            explorer_period: Duration::from_secs(config.refresh.explorer_secs),
            device_period: Duration::from_secs(config.refresh.device_secs),
        }
    }
}

/// Start the application services on top of the base transport.
pub fn startup_app(app: &App, base: &Base, teardown: &mut Teardown) -> Result<(), GatewayError> {
    let settings = AppSettings::read(app);
    let runner: Arc<dyn ScriptRunner> = match &app.collaborators.script_runner {
        Some(runner) => Arc::clone(runner),
        None => Arc::new(ScriptClient::new(&settings.controller_address)?),
    };
    let link: Arc<dyn ControllerLink> = match &app.collaborators.controller_link {
        Some(link) => Arc::clone(link),
        None => Arc::new(XmlRpcLink::new(&settings.controller_address).map_err(GatewayError::Link)?),
    };

    // Constructed now, started after the broker; the device collection
    // reads its snapshots.
    let explorer = Arc::new(LogicExplorer::new(Arc::clone(&runner), settings.explorer_period));
    let devices = Arc::new(DeviceCol::new(&base.model, Arc::clone(&explorer), settings.device_period)?);

    let sysvars = Arc::new(SysVarCol::new(&base.model, Arc::clone(&runner), settings.sysvar_period)?);
    sysvars.start();
    {
        let sysvars = Arc::clone(&sysvars);
        teardown.push("system variables", move || async move { sysvars.stop().await });
    }

    let programs = Arc::new(ProgramCol::new(&base.model, runner, settings.program_period)?);
    programs.start();
    {
        let programs = Arc::clone(&programs);
        teardown.push("programs", move || async move { programs.stop().await });
    }

    let broker = Arc::new(Broker::new(
        BrokerOptions {
            addr: app.plan.pubsub,
            addr_tls: app.plan.pubsub_tls,
            tls: app.tls.clone(),
            max_connections: app.max_connections,
            auth: Arc::new(StoreAuthenticator::new(Arc::clone(&app.store))),
        },
        Arc::clone(&app.collaborators.engine),
        app.fatal.clone(),
    ));
    broker.start();
    broker.mirror(base.model.tree().subscribe());
    {
        let broker = Arc::clone(&broker);
        teardown.push("broker", move || async move { broker.stop().await });
    }

    let bridge = Bridge::new(app.plan.pubsub_loopback, base.tunnels.clone());
    base.mux.route(BRIDGE_PATH, bridge.route())?;
    tracing::info!(path = BRIDGE_PATH, target = %app.plan.pubsub_loopback, "Web-socket bridge registered");

    let pipeline = Pipeline::new()
        .with_stage(Arc::new(BrokerPublisher::new(Arc::clone(broker.bus()))))
        .with_stage(devices.clone());
    tracing::debug!(stages = ?pipeline.stage_names(), "Event pipeline built");
    let receiver = Arc::new(CallbackReceiver::new(pipeline, devices.clone()));
    let interconnector = Arc::new(Interconnector::new(
        settings.options,
        link,
        Arc::clone(&app.collaborators.codec),
        receiver,
        Arc::clone(&base.mux),
        app.fatal.clone(),
    ));

    // Listeners first, so the first poll already reaches them.
    explorer.add_listener(Arc::new(RoomCol::new(&base.model)?));
    explorer.add_listener(Arc::new(FunctionCol::new(&base.model)?));
    explorer.start();
    {
        let explorer = Arc::clone(&explorer);
        teardown.push("explorer", move || async move { explorer.stop().await });
    }

    devices.start();
    {
        let devices = Arc::clone(&devices);
        teardown.push("devices", move || async move { devices.stop().await });
    }

    interconnector.start();
    teardown.push("interconnector", move || async move { interconnector.stop().await });

    Ok(())
}
