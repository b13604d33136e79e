/// Host-facing glue: maps panel lifecycle and configuration changes onto the
/// controller.
///
/// - attached to panel: start the probe
/// - detached from panel: stop it
/// - configuration changed: restart, but only while attached
use crate::config::ProbeConfig;
use crate::controller::{Controller, StopOutcome};
use crate::panel::Panel;
use std::sync::Arc;

pub struct Applet {
    controller: Controller,
    panel: Arc<dyn Panel>,
    config: ProbeConfig,
    attached: bool,
}

impl Applet {
    pub fn new(controller: Controller, panel: Arc<dyn Panel>, config: ProbeConfig) -> Self {
        Self {
            controller,
            panel,
            config,
            attached: false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    #[cfg(test)]
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// The applet was added to the panel.
    pub async fn attach(&mut self) {
        self.attached = true;
        self.panel.set_tooltip(&self.config.host);
        self.controller.start(&self.config).await;
    }

    /// The applet was removed from the panel.
    pub async fn detach(&mut self) -> StopOutcome {
        self.attached = false;
        self.controller.stop().await
    }

    /// Flip between attached and detached.
    pub async fn toggle(&mut self) {
        if self.attached {
            let outcome = self.detach().await;
            tracing::info!(?outcome, "detached");
        } else {
            self.attach().await;
            tracing::info!("attached");
        }
    }

    /// New settings arrived. Restarts the probe only while attached;
    /// otherwise they apply on the next attach.
    pub async fn config_changed(&mut self, config: ProbeConfig) {
        if config == self.config {
            tracing::debug!("probe configuration unchanged");
            return;
        }

        tracing::info!(host = %config.host, interval_secs = config.interval_secs, "probe configuration changed");
        self.config = config;
        self.panel.set_tooltip(&self.config.host);

        if self.attached {
            self.controller.restart(&self.config).await;
        }
    }
}
