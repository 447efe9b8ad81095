use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::client::api::ExamApi;
use crate::client::clock::Clock;
use crate::dto::session_dto::HeartbeatRequest;

/// Edge-triggered connectivity callbacks. Each transition is reported once.
pub trait ConnectivityListener: Send + Sync {
    fn on_disconnect(&self, at: DateTime<Utc>);

    fn on_reconnect(&self, at: DateTime<Utc>);
}

/// Device state carried by each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSnapshot {
    pub is_focused: bool,
    pub is_fullscreen: bool,
    pub battery_level: Option<f32>,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self {
            is_focused: true,
            is_fullscreen: false,
            battery_level: None,
        }
    }
}

pub type DeviceProbe = Arc<dyn Fn() -> DeviceSnapshot + Send + Sync>;

#[derive(Debug)]
struct ChannelState {
    online: bool,
    last_online: Option<DateTime<Utc>>,
}

pub struct HeartbeatChannel {
    session_id: Uuid,
    api: Arc<dyn ExamApi>,
    clock: Arc<dyn Clock>,
    device: DeviceProbe,
    listener: Arc<dyn ConnectivityListener>,
    interval: Duration,
    state: Mutex<ChannelState>,
}

impl HeartbeatChannel {
    pub fn new(
        session_id: Uuid,
        api: Arc<dyn ExamApi>,
        clock: Arc<dyn Clock>,
        device: DeviceProbe,
        listener: Arc<dyn ConnectivityListener>,
        interval: Duration,
    ) -> Self {
        Self {
            session_id,
            api,
            clock,
            device,
            listener,
            interval,
            state: Mutex::new(ChannelState {
                online: true,
                last_online: None,
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    pub fn last_online(&self) -> Option<DateTime<Utc>> {
        self.lock().last_online
    }

    /// Sends one heartbeat and reports transitions. Returns whether it was acknowledged.
    pub async fn beat(&self) -> bool {
        let device = (self.device)();
        let req = HeartbeatRequest {
            client_timestamp: self.clock.now(),
            is_focused: device.is_focused,
            is_fullscreen: device.is_fullscreen,
            battery_level: device.battery_level,
        };

        let result = self.api.heartbeat(self.session_id, &req).await;
        let now = self.clock.now();

        let was_online = {
            let mut state = self.lock();
            let was_online = state.online;
            state.online = result.is_ok();
            if result.is_ok() {
                state.last_online = Some(now);
            }
            was_online
        };

        match result {
            Ok(()) => {
                if !was_online {
                    tracing::info!(session_id = %self.session_id, "Connection restored");
                    self.listener.on_reconnect(now);
                }
                true
            }
            Err(e) => {
                if was_online {
                    tracing::warn!(session_id = %self.session_id, error = %e, "Heartbeat failed, going offline");
                    self.listener.on_disconnect(now);
                } else {
                    tracing::debug!(session_id = %self.session_id, error = %e, "Heartbeat still failing");
                }
                false
            }
        }
    }

    /// Beats every interval, first tick immediately, until the task is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.beat().await;
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
