//! Event registration with the controller's interfaces.
//!
//! # Responsibilities
//! - Publish the text callback on the shared multiplexer
//! - Run the binary callback server when an interface needs it
//! - Register every configured interface, retrying until it succeeds
//! - Withdraw the registrations on stop
//!
//! # Design Decisions
//! - Registration runs in the background: an unreachable controller does
//!   not delay startup, it only delays events
//! - Withdrawal is best effort and bounded in time

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use parking_lot::Mutex;

use crate::config::InterfaceKind;
use crate::controller::callback::{self, CallbackCodec, CallbackReceiver, CallbackState, TEXT_CALLBACK_PATH};
use crate::controller::link::ControllerLink;
use crate::http::mux::Mux;
use crate::lifecycle::fatal::FatalErrors;
use crate::lifecycle::shutdown::TaskGroup;
use crate::resilience::backoff::calculate_backoff;

const DEINIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Addresses and identifiers of the registrations.
#[derive(Debug, Clone)]
pub struct InterconnectorOptions {
    pub interfaces: Vec<InterfaceKind>,
    /// Prefix of the callback identifiers, `<init_id>-`.
    pub id_prefix: String,
    pub callback_url: String,
    pub binary_callback_url: String,
    pub binary_addr: SocketAddr,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl InterconnectorOptions {
    pub fn callback_id(&self, interface: InterfaceKind) -> String {
        format!("{}{}", self.id_prefix, interface.as_str())
    }

    pub fn callback_url_for(&self, interface: InterfaceKind) -> &str {
        if interface.uses_binary_callback() {
            &self.binary_callback_url
        } else {
            &self.callback_url
        }
    }

    pub fn needs_binary_server(&self) -> bool {
        self.interfaces.iter().any(InterfaceKind::uses_binary_callback)
    }
}

pub struct Interconnector {
    options: InterconnectorOptions,
    link: Arc<dyn ControllerLink>,
    state: CallbackState,
    mux: Arc<Mux>,
    fatal: FatalErrors,
    tasks: TaskGroup,
    registered: Arc<Mutex<Vec<InterfaceKind>>>,
}

impl Interconnector {
    pub fn new(
        options: InterconnectorOptions,
        link: Arc<dyn ControllerLink>,
        codec: Arc<dyn CallbackCodec>,
        receiver: Arc<CallbackReceiver>,
        mux: Arc<Mux>,
        fatal: FatalErrors,
    ) -> Self {
        Self {
            options,
            link,
            state: CallbackState { codec, receiver },
            mux,
            fatal,
            tasks: TaskGroup::new("interconnector"),
            registered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn options(&self) -> &InterconnectorOptions {
        &self.options
    }

    /// Interfaces with an active registration.
    pub fn registered(&self) -> Vec<InterfaceKind> {
        self.registered.lock().clone()
    }

    pub fn start(&self) {
        self.state.receiver.set_running(true);

        // The route stays mounted after stop; the receiver then refuses
        // callbacks.
        if !self.mux.is_registered(TEXT_CALLBACK_PATH) {
            let route = post(callback::text_callback).with_state(self.state.clone());
            if let Err(e) = self.mux.route(TEXT_CALLBACK_PATH, route) {
                tracing::error!(error = %e, "Registering text callback failed");
            }
        }

        if self.options.needs_binary_server() {
            self.tasks.spawn(callback::serve_binary(
                self.options.binary_addr,
                self.state.clone(),
                self.fatal.clone(),
                self.tasks.listener(),
            ));
        }

        for &interface in &self.options.interfaces {
            self.spawn_registration(interface);
        }
        tracing::info!(
            interfaces = self.options.interfaces.len(),
            callback_url = %self.options.callback_url,
            "Interconnector started"
        );
    }

    fn spawn_registration(&self, interface: InterfaceKind) {
        let link = Arc::clone(&self.link);
        let registered = Arc::clone(&self.registered);
        let url = self.options.callback_url_for(interface).to_string();
        let id = self.options.callback_id(interface);
        let (base, max) = (self.options.retry_base, self.options.retry_max);
        let mut shutdown = self.tasks.listener();

        self.tasks.spawn(async move {
            let mut attempt = 0;
            loop {
                match link.init(interface, &url, &id).await {
                    Ok(()) => {
                        tracing::info!(interface = %interface, callback_id = %id, "Registered for events");
                        registered.lock().push(interface);
                        return;
                    }
                    Err(e) => {
                        attempt += 1;
                        let delay = calculate_backoff(attempt, base, max);
                        tracing::warn!(interface = %interface, attempt, retry_in = ?delay, error = %e, "Registration failed");
                        tokio::select! {
                            _ = shutdown.recv() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        });
    }

    /// Stop the callback server and registration tasks, then withdraw all
    /// registrations.
    pub async fn stop(&self) {
        self.state.receiver.set_running(false);
        self.tasks.stop().await;

        let registered = std::mem::take(&mut *self.registered.lock());
        for interface in registered {
            let url = self.options.callback_url_for(interface);
            match tokio::time::timeout(DEINIT_TIMEOUT, self.link.deinit(interface, url)).await {
                Ok(Ok(())) => tracing::info!(interface = %interface, "Registration withdrawn"),
                Ok(Err(e)) => tracing::warn!(interface = %interface, error = %e, "Withdrawing registration failed"),
                Err(_) => tracing::warn!(interface = %interface, "Withdrawing registration timed out"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::callback::fake::MemoryDirectory;
    use crate::controller::callback::JsonCallbackCodec;
    use crate::controller::link::LinkError;
    use crate::lifecycle::fatal::fatal_channel;
    use crate::pipeline::Pipeline;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FlakyLink {
        failures_left: AtomicUsize,
        calls: Mutex<Vec<(InterfaceKind, String, String)>>,
    }

    #[async_trait]
    impl ControllerLink for FlakyLink {
        async fn init(&self, interface: InterfaceKind, callback_url: &str, callback_id: &str) -> Result<(), LinkError> {
            self.calls
                .lock()
                .push((interface, callback_url.to_string(), callback_id.to_string()));
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(LinkError::Status { interface, status: 503 });
            }
            Ok(())
        }

        async fn deinit(&self, interface: InterfaceKind, callback_url: &str) -> Result<(), LinkError> {
            self.calls
                .lock()
                .push((interface, callback_url.to_string(), String::new()));
            Ok(())
        }
    }

    fn options(interfaces: Vec<InterfaceKind>) -> InterconnectorOptions {
        InterconnectorOptions {
            interfaces,
            id_prefix: "gw-".into(),
            callback_url: "http://10.0.0.2:2121".into(),
            binary_callback_url: "xmlrpc_bin://10.0.0.2:2123".into(),
            binary_addr: "127.0.0.1:0".parse().unwrap(),
            retry_base: Duration::from_millis(5),
            retry_max: Duration::from_millis(20),
        }
    }

    fn interconnector(link: Arc<FlakyLink>, interfaces: Vec<InterfaceKind>) -> (Interconnector, Arc<Mux>) {
        let mux = Arc::new(Mux::new());
        let receiver = Arc::new(CallbackReceiver::new(
            Pipeline::new(),
            Arc::new(MemoryDirectory::default()),
        ));
        let (fatal, _rx) = fatal_channel();
        let ic = Interconnector::new(
            options(interfaces),
            link,
            Arc::new(JsonCallbackCodec),
            receiver,
            mux.clone(),
            fatal,
        );
        (ic, mux)
    }

    #[test]
    fn identifiers_and_urls() {
        let options = options(vec![InterfaceKind::HmIpRf, InterfaceKind::Cuxd]);
        assert_eq!(options.callback_id(InterfaceKind::HmIpRf), "gw-HmIP-RF");
        assert_eq!(options.callback_url_for(InterfaceKind::Cuxd), "xmlrpc_bin://10.0.0.2:2123");
        assert!(options.needs_binary_server());
    }

    #[tokio::test]
    async fn registration_retries_then_withdraws() {
        let link = Arc::new(FlakyLink::default());
        link.failures_left.store(2, Ordering::SeqCst);
        let (ic, mux) = interconnector(link.clone(), vec![InterfaceKind::BidCosRf]);

        ic.start();
        assert!(mux.is_registered(TEXT_CALLBACK_PATH));
        for _ in 0..100 {
            if !ic.registered().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ic.registered(), vec![InterfaceKind::BidCosRf]);

        ic.stop().await;
        let calls = link.calls.lock().clone();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2].2, "gw-BidCos-RF");
        assert_eq!(calls[3].2, "");
        assert!(ic.registered().is_empty());
    }

    #[tokio::test]
    async fn stop_interrupts_retries() {
        let link = Arc::new(FlakyLink::default());
        link.failures_left.store(usize::MAX, Ordering::SeqCst);
        let (ic, _) = interconnector(link.clone(), vec![InterfaceKind::HmIpRf]);

        ic.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        ic.stop().await;
        assert_eq!(ic.tasks.task_count(), 0);
        // Nothing was registered, so nothing is withdrawn.
        assert!(link.calls.lock().iter().all(|(_, _, id)| !id.is_empty()));
    }

    #[tokio::test]
    async fn callback_route_refuses_after_stop() {
        use axum::body::{to_bytes, Body};
        use axum::http::Request;
        use tower::ServiceExt;

        let (ic, mux) = interconnector(Arc::new(FlakyLink::default()), Vec::new());
        ic.start();
        ic.stop().await;
        assert!(mux.is_registered(TEXT_CALLBACK_PATH));

        let request = Request::post(TEXT_CALLBACK_PATH)
            .body(Body::from(r#"{"method":"event","params":["id","A:1","STATE",true]}"#))
            .unwrap();
        let response = mux.service().oneshot(request).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("fault"));
    }
}
