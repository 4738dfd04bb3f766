//! The session service client.

use crate::{BoundService, ClientError, ClientResult, ConnectionState, ServiceBinder, SocketBinder};
use parking_lot::Mutex;
use service_lifecycle::{ServiceLauncher, StartMode};
use session_config_and_utils::{AppIdentity, Paths};
use session_ipc::{Method, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct Slot {
    /// Bumped by every connect and disconnect. Callbacks carrying an older
    /// value are stale.
    generation: u64,
    state: ConnectionState,
    service: Option<Arc<dyn BoundService>>,
}

struct Shared {
    slot: Mutex<Slot>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn publish(&self, slot: &mut Slot, state: ConnectionState) {
        slot.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Receives the outcome of one bind attempt.
#[derive(Clone)]
pub struct ConnectionSink {
    shared: Arc<Shared>,
    generation: u64,
}

impl ConnectionSink {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The bind completed. A stale handle is unbound right away.
    pub async fn connected(&self, service: Arc<dyn BoundService>) {
        let accepted = {
            let mut slot = self.shared.slot.lock();
            if slot.generation == self.generation && slot.state == ConnectionState::Binding {
                slot.service = Some(service.clone());
                self.shared.publish(&mut slot, ConnectionState::Connected);
                true
            } else {
                false
            }
        };

        if accepted {
            info!(generation = self.generation, "Connected to session service");
        } else {
            debug!(generation = self.generation, "Stale connection callback, unbinding");
            service.unbind().await;
        }
    }

    /// The bind failed or the bound connection went away.
    pub fn disconnected(&self) {
        let mut slot = self.shared.slot.lock();
        if slot.generation != self.generation || slot.state == ConnectionState::Disconnected {
            return;
        }
        slot.service = None;
        self.shared.publish(&mut slot, ConnectionState::Disconnected);
        info!(generation = self.generation, "Session service disconnected");
    }
}

/// Binds to the session service and reads the shared session through it.
///
/// Reads never fail: when not connected, or when the call itself fails, the
/// getters return `None`/`false` and log why.
pub struct SessionServiceClient {
    interface: String,
    binder: Arc<dyn ServiceBinder>,
    shared: Arc<Shared>,
}

impl SessionServiceClient {
    pub fn new(identity: &AppIdentity, binder: Arc<dyn ServiceBinder>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            interface: identity.interface_descriptor(),
            binder,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    generation: 0,
                    state: ConnectionState::Disconnected,
                    service: None,
                }),
                state_tx,
            }),
        }
    }

    /// Client over the application's socket that starts the daemon when needed.
    pub fn for_app(identity: &AppIdentity, paths: &Paths) -> Self {
        let binder = SocketBinder::new(identity, paths)
            .with_auto_create(ServiceLauncher::new(identity, paths), StartMode::Plain);
        Self::new(identity, Arc::new(binder))
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.slot.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connection-changed notifications.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait up to `timeout` for the connection to come up.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let connected = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == ConnectionState::Connected)).await,
            Ok(Ok(_))
        );
        connected
    }

    /// Start binding to the service.
    ///
    /// If already connected or binding, returns whether the client is
    /// connected without issuing another bind. Otherwise returns whether the
    /// bind was accepted; the connection itself is reported on
    /// [`subscribe`](Self::subscribe).
    pub fn connect(&self) -> bool {
        let generation = {
            let mut slot = self.shared.slot.lock();
            match slot.state {
                ConnectionState::Connected => return true,
                ConnectionState::Binding => {
                    debug!("Bind already in flight");
                    return false;
                }
                ConnectionState::Disconnected => {}
            }
            slot.generation += 1;
            self.shared.publish(&mut slot, ConnectionState::Binding);
            slot.generation
        };

        let sink = ConnectionSink {
            shared: self.shared.clone(),
            generation,
        };
        match self.binder.bind(&self.interface, sink) {
            Ok(()) => {
                debug!(interface = %self.interface, generation, "Binding to session service");
                true
            }
            Err(rejected) => {
                warn!(interface = %self.interface, error = %rejected, "Bind rejected");
                let mut slot = self.shared.slot.lock();
                if slot.generation == generation {
                    self.shared.publish(&mut slot, ConnectionState::Disconnected);
                }
                false
            }
        }
    }

    /// Release the service. The service itself keeps running.
    pub async fn disconnect(&self) {
        let service = {
            let mut slot = self.shared.slot.lock();
            slot.generation += 1;
            if slot.state != ConnectionState::Disconnected {
                self.shared.publish(&mut slot, ConnectionState::Disconnected);
            }
            slot.service.take()
        };

        if let Some(service) = service {
            service.unbind().await;
            info!("Disconnected from session service");
        }
    }

    fn bound_service(&self) -> ClientResult<Arc<dyn BoundService>> {
        let slot = self.shared.slot.lock();
        match (&slot.state, &slot.service) {
            (ConnectionState::Connected, Some(service)) => Ok(service.clone()),
            _ => Err(ClientError::NotConnected),
        }
    }

    async fn call(&self, method: Method) -> ClientResult<Response> {
        let service = self.bound_service()?;
        let response = service.call(method).await?;
        if let Some(error) = &response.error {
            return Err(ClientError::Remote {
                code: error.code,
                message: error.message.clone(),
            });
        }
        Ok(response)
    }

    async fn fetch_string(&self, method: Method, field: &str) -> Option<String> {
        match self.call(method).await {
            Ok(response) => response
                .result_field(field)
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            Err(e) => {
                report(method, &e);
                None
            }
        }
    }

    async fn fetch_bool(&self, method: Method, field: &str) -> bool {
        match self.call(method).await {
            Ok(response) => response
                .result_field(field)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            Err(e) => {
                report(method, &e);
                false
            }
        }
    }

    pub async fn get_access_token(&self) -> Option<String> {
        self.fetch_string(Method::SessionGetAccessToken, "access_token")
            .await
    }

    pub async fn get_refresh_token(&self) -> Option<String> {
        self.fetch_string(Method::SessionGetRefreshToken, "refresh_token")
            .await
    }

    pub async fn get_id_token(&self) -> Option<String> {
        self.fetch_string(Method::SessionGetIdToken, "id_token").await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.fetch_bool(Method::SessionIsAuthenticated, "authenticated")
            .await
    }

    /// Clear the shared session. Returns whether the service cleared it.
    pub async fn logout(&self) -> bool {
        self.fetch_bool(Method::SessionLogout, "logged_out").await
    }
}

impl Drop for SessionServiceClient {
    fn drop(&mut self) {
        let service = {
            let mut slot = self.shared.slot.lock();
            slot.generation += 1;
            slot.service.take()
        };
        if let (Some(service), Ok(handle)) = (service, tokio::runtime::Handle::try_current()) {
            handle.spawn(async move { service.unbind().await });
        }
    }
}

fn report(method: Method, error: &ClientError) {
    match error {
        ClientError::NotConnected => warn!(method = %method, "Not connected to session service"),
        _ => warn!(method = %method, error = %error, "Session call failed"),
    }
}
