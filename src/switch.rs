use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::client::LaMarzoccoClient;
use crate::error::Result;

/// A machine's power exposed as an on/off switch.
///
/// Reads never fail: when the cloud cannot tell us the state, the last known
/// value is reported instead.
pub struct PowerSwitch {
    name: String,
    serial: String,
    client: Arc<LaMarzoccoClient>,
    cached_power: AtomicBool,
}

impl PowerSwitch {
    pub fn new(
        name: impl Into<String>,
        serial: impl Into<String>,
        client: Arc<LaMarzoccoClient>,
    ) -> Self {
        Self {
            name: name.into(),
            serial: serial.into(),
            client,
            cached_power: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn client(&self) -> &LaMarzoccoClient {
        &self.client
    }

    /// Last power state read from or written to the machine
    pub fn cached_power(&self) -> bool {
        self.cached_power.load(Ordering::SeqCst)
    }

    pub async fn handle_get(&self) -> bool {
        match self.client.get_dashboard(&self.serial).await {
            Ok(dashboard) => match dashboard.power() {
                Some(power) => {
                    self.cached_power.store(power, Ordering::SeqCst);
                    power
                }
                None => {
                    warn!("Unable to determine machine power from dashboard.");
                    self.cached_power()
                }
            },
            Err(err) => {
                error!("Failed to fetch dashboard: {}", err);
                self.cached_power()
            }
        }
    }

    pub async fn handle_set(&self, enabled: bool) -> Result<()> {
        match self.client.set_power(&self.serial, enabled).await {
            Ok(_) => {
                self.cached_power.store(enabled, Ordering::SeqCst);
                info!(
                    "{} switched {}",
                    self.name,
                    if enabled { "on" } else { "to standby" }
                );
                Ok(())
            }
            Err(err) => {
                error!("Failed to set power: {}", err);
                Err(err)
            }
        }
    }

    /// Poll the machine every `interval`, publishing each reading on `updates`.
    ///
    /// Returns `None` without spawning when `interval` is zero. The task ends
    /// once every receiver of `updates` has been dropped.
    pub fn spawn_polling(
        self: Arc<Self>,
        interval: Duration,
        updates: watch::Sender<bool>,
    ) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; polling starts one interval in
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let power = self.handle_get().await;
                if updates.send(power).is_err() {
                    debug!("No listeners left, stopping polling for {}", self.serial);
                    break;
                }
            }
        }))
    }
}
