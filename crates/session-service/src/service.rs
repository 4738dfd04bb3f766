//! Session service core.

use crate::{HostPlatform, ServiceError, ServiceResult, StatusIndicator};
use parking_lot::RwLock;
use service_lifecycle::{
    LifecycleTracker, ServiceInput, ServiceLifecycleState, ServiceOutput, ServicePhase,
};
use session_config_and_utils::{AppIdentity, Config, Paths};
use session_storage::{StorageResult, TokenStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Builds the service's private store on first bind or start.
pub type StoreFactory = Box<dyn Fn() -> StorageResult<TokenStore> + Send + Sync>;

pub struct SessionService {
    /// Serializes lifecycle events.
    lifecycle: Mutex<LifecycleTracker>,
    store: RwLock<Option<Arc<TokenStore>>>,
    store_factory: StoreFactory,
    host: Arc<dyn HostPlatform>,
    indicator: StatusIndicator,
    relaunch_delay: Duration,
    /// Cleared by an intentional stop so destroy does not ask for a restart.
    restart_on_destroy: AtomicBool,
}

impl SessionService {
    pub fn new(store_factory: StoreFactory, host: Arc<dyn HostPlatform>, relaunch_delay: Duration) -> Self {
        Self {
            lifecycle: Mutex::new(LifecycleTracker::new()),
            store: RwLock::new(None),
            store_factory,
            host,
            indicator: StatusIndicator::default(),
            relaunch_delay,
            restart_on_destroy: AtomicBool::new(true),
        }
    }

    /// Service whose store is the application's vault file.
    pub fn for_app(
        paths: &Paths,
        identity: &AppIdentity,
        config: &Config,
        host: Arc<dyn HostPlatform>,
    ) -> Self {
        let paths = paths.clone();
        let identity = identity.clone();
        let encrypt = config.vault_encryption;
        Self::new(
            Box::new(move || TokenStore::open(&paths, &identity, encrypt)),
            host,
            config.relaunch_delay(),
        )
    }

    pub fn with_indicator(mut self, indicator: StatusIndicator) -> Self {
        self.indicator = indicator;
        self
    }

    fn store(&self) -> Option<Arc<TokenStore>> {
        self.store.read().clone()
    }

    // ==========================================
    // Lifecycle events
    // ==========================================

    /// A client bound. Returns once the store exists and the service is foreground.
    pub async fn on_bind(&self) -> ServiceResult<()> {
        self.start_or_bind(ServiceInput::Bind).await
    }

    /// An explicit start request.
    pub async fn on_start_command(&self) -> ServiceResult<()> {
        self.start_or_bind(ServiceInput::StartCommand).await
    }

    pub async fn on_unbind(&self) {
        let mut tracker = self.lifecycle.lock().await;
        tracker.handle(ServiceInput::Unbind);
        info!("Client unbound; service keeps running");
    }

    /// The launching task went away. Schedules one deferred relaunch.
    pub async fn on_task_removed(&self) {
        let mut tracker = self.lifecycle.lock().await;
        let output = tracker.handle(ServiceInput::TaskRemoved);
        let _ = self.run_effects(&mut tracker, output).await;
    }

    /// Broadcast a restart, release foreground and drop the store.
    pub async fn on_destroy(&self) {
        let mut tracker = self.lifecycle.lock().await;
        let output = tracker.handle(ServiceInput::Destroy);
        let _ = self.run_effects(&mut tracker, output).await;
        let output = tracker.handle(ServiceInput::Stopped);
        let _ = self.run_effects(&mut tracker, output).await;
        info!("Session service destroyed");
    }

    /// Make the next destroy final: no restart is broadcast.
    pub fn suppress_restart(&self) {
        self.restart_on_destroy.store(false, Ordering::SeqCst);
        info!("Restart after destroy suppressed");
    }

    async fn start_or_bind(&self, input: ServiceInput) -> ServiceResult<()> {
        let mut tracker = self.lifecycle.lock().await;
        match tracker.phase() {
            // A previous attempt could not create the store.
            ServicePhase::Starting => {
                self.run_effects(&mut tracker, Some(ServiceOutput::CreateStore))
                    .await
            }
            ServicePhase::Destroying => Err(ServiceError::Destroying),
            _ => {
                let output = tracker.handle(input);
                self.run_effects(&mut tracker, output).await
            }
        }
    }

    async fn run_effects(
        &self,
        tracker: &mut LifecycleTracker,
        mut next: Option<ServiceOutput>,
    ) -> ServiceResult<()> {
        while let Some(output) = next.take() {
            next = self.perform(tracker, output).await?;
        }
        Ok(())
    }

    async fn perform(
        &self,
        tracker: &mut LifecycleTracker,
        output: ServiceOutput,
    ) -> ServiceResult<Option<ServiceOutput>> {
        match output {
            ServiceOutput::CreateStore => {
                if self.store().is_none() {
                    let store = (self.store_factory)().map_err(|e| {
                        error!(error = %e, "Failed to create session store");
                        e
                    })?;
                    *self.store.write() = Some(Arc::new(store));
                    debug!("Session store created");
                }
                Ok(tracker.handle(ServiceInput::StoreReady))
            }
            ServiceOutput::PromoteForeground => {
                if let Err(e) = self.host.promote_foreground(&self.indicator).await {
                    warn!(error = %e, "Failed to publish status indicator");
                }
                info!("Session service promoted to foreground");
                Ok(None)
            }
            ServiceOutput::ScheduleRelaunch => {
                match self.host.schedule_relaunch(self.relaunch_delay).await {
                    Ok(()) => info!(
                        delay_ms = self.relaunch_delay.as_millis() as u64,
                        "Scheduled relaunch after task removal"
                    ),
                    Err(e) => warn!(error = %e, "Failed to schedule relaunch"),
                }
                Ok(None)
            }
            ServiceOutput::BroadcastRestart => {
                if !self.restart_on_destroy.load(Ordering::SeqCst) {
                    debug!("Stopping for good; no restart broadcast");
                    return Ok(None);
                }
                match self.host.broadcast_restart().await {
                    Ok(()) => info!("Restart broadcast sent"),
                    Err(e) => error!(error = %e, "Failed to broadcast restart"),
                }
                Ok(None)
            }
            ServiceOutput::ReleaseForeground => {
                if let Err(e) = self.host.release_foreground().await {
                    warn!(error = %e, "Failed to remove status indicator");
                }
                *self.store.write() = None;
                Ok(None)
            }
        }
    }

    pub async fn phase(&self) -> ServicePhase {
        self.lifecycle.lock().await.phase()
    }

    pub async fn lifecycle_state(&self) -> ServiceLifecycleState {
        self.lifecycle.lock().await.state()
    }

    // ==========================================
    // Session operations
    // ==========================================

    pub fn get_access_token(&self) -> Option<String> {
        self.store()?.get_access_token()
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.store()?.get_refresh_token()
    }

    pub fn get_id_token(&self) -> Option<String> {
        self.store()?.get_id_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store().is_some_and(|store| store.is_authenticated())
    }

    /// Clear the session. Returns whether the clear was committed.
    pub fn logout(&self) -> bool {
        let Some(store) = self.store() else {
            warn!("Logout before the session store exists");
            return false;
        };
        match store.clear_tokens() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Logout failed to clear tokens");
                false
            }
        }
    }
}
