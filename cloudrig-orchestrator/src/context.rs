use std::sync::Arc;

use cloudrig_common::{CloudrigConfig, Settings};
use cloudrig_providers::{CloudGateway, PublicAddressSource};
use tokio::sync::{watch, RwLock};

use crate::lifecycle::LifecyclePhase;
use crate::polling::PollPolicy;

/// Per-session state: one per front-end session, cloned into every operation.
///
/// Settings live here instead of in globals; they are replaced wholesale by a
/// successful `setup()` and patched only by operations that change what we own
/// (image swap).
#[derive(Clone)]
pub struct CloudrigContext {
    gateway: Arc<dyn CloudGateway>,
    addresses: Arc<dyn PublicAddressSource>,
    config: Arc<CloudrigConfig>,
    settings: Arc<RwLock<Settings>>,
    phase: Arc<watch::Sender<LifecyclePhase>>,
}

impl CloudrigContext {
    pub fn new(
        gateway: Arc<dyn CloudGateway>,
        addresses: Arc<dyn PublicAddressSource>,
        config: CloudrigConfig,
    ) -> Self {
        Self {
            gateway,
            addresses,
            config: Arc::new(config),
            settings: Arc::new(RwLock::new(Settings::default())),
            phase: Arc::new(watch::channel(LifecyclePhase::Absent).0),
        }
    }

    pub fn gateway(&self) -> &dyn CloudGateway {
        self.gateway.as_ref()
    }

    pub fn addresses(&self) -> &dyn PublicAddressSource {
        self.addresses.as_ref()
    }

    pub fn config(&self) -> &CloudrigConfig {
        &self.config
    }

    /// Snapshot of the current settings.
    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Lifecycle phase of this session, updated by `start()` and `stop()`.
    pub fn watch_phase(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// Publish `to` and return the phase it replaced.
    pub(crate) fn publish_phase(&self, to: LifecyclePhase) -> LifecyclePhase {
        self.phase.send_replace(to)
    }

    pub(crate) async fn replace_settings(&self, settings: Settings) {
        *self.settings.write().await = settings;
    }

    pub(crate) async fn set_image_id(&self, image_id: &str) {
        self.settings.write().await.image_id = Some(image_id.to_string());
    }

    // Poll cadences. Intervals are fixed; the bounds come from config.

    pub(crate) fn fulfillment_policy(&self) -> PollPolicy {
        PollPolicy::fixed(
            std::time::Duration::from_secs(5),
            self.config.timeouts.fulfillment,
        )
    }

    pub(crate) fn boot_policy(&self) -> PollPolicy {
        PollPolicy::fixed(std::time::Duration::from_secs(5), self.config.timeouts.boot)
    }

    pub(crate) fn command_policy(&self) -> PollPolicy {
        PollPolicy::fixed(
            std::time::Duration::from_secs(1),
            self.config.timeouts.command,
        )
    }
}
