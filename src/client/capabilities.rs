//! The set of host signals the integrity monitor can observe.
//!
//! Every capability is optional. A host that cannot provide one reports
//! `Unsupported` from `subscribe` and the monitor runs without it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use crate::client::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserSignal {
    VisibilityHidden,
    VisibilityVisible,
    WindowBlur,
    WindowFocus,
    FullscreenExit,
    FullscreenEnter,
    PointerLeave,
    NetworkOffline,
    NetworkOnline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Visibility,
    Focus,
    Fullscreen,
    Pointer,
    Network,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Visibility => "visibility",
            CapabilityKind::Focus => "focus",
            CapabilityKind::Fullscreen => "fullscreen",
            CapabilityKind::Pointer => "pointer",
            CapabilityKind::Network => "network",
        }
    }
}

/// Keeps a signal subscription alive. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

pub trait SignalSource: Send + Sync {
    fn kind(&self) -> CapabilityKind;

    fn subscribe(&self, sink: UnboundedSender<BrowserSignal>) -> ClientResult<Subscription>;
}

pub trait FullscreenControl: Send + Sync {
    fn request_fullscreen(&self) -> ClientResult<()>;
}

pub trait BatteryProbe: Send + Sync {
    /// Charge as a fraction in `0.0..=1.0`, if known.
    fn level(&self) -> Option<f32>;
}

#[derive(Clone, Default)]
pub struct Capabilities {
    pub sources: Vec<Arc<dyn SignalSource>>,
    pub fullscreen: Option<Arc<dyn FullscreenControl>>,
    pub battery: Option<Arc<dyn BatteryProbe>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_fullscreen(mut self, control: Arc<dyn FullscreenControl>) -> Self {
        self.fullscreen = Some(control);
        self
    }

    pub fn with_battery(mut self, probe: Arc<dyn BatteryProbe>) -> Self {
        self.battery = Some(probe);
        self
    }
}

type Sinks = Arc<Mutex<Vec<(u64, UnboundedSender<BrowserSignal>)>>>;

/// A source driven by the host shell (or a test) calling `emit`.
pub struct ManualSource {
    kind: CapabilityKind,
    supported: bool,
    sinks: Sinks,
    next_id: AtomicU64,
}

impl ManualSource {
    pub fn new(kind: CapabilityKind) -> Self {
        Self {
            kind,
            supported: true,
            sinks: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn unsupported(kind: CapabilityKind) -> Self {
        Self {
            supported: false,
            ..Self::new(kind)
        }
    }

    /// Delivers a signal to every live subscriber. Returns how many received it.
    pub fn emit(&self, signal: BrowserSignal) -> usize {
        let mut sinks = self.sinks.lock().unwrap_or_else(|p| p.into_inner());
        sinks.retain(|(_, tx)| !tx.is_closed());
        sinks
            .iter()
            .filter(|(_, tx)| tx.send(signal).is_ok())
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl SignalSource for ManualSource {
    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    fn subscribe(&self, sink: UnboundedSender<BrowserSignal>) -> ClientResult<Subscription> {
        if !self.supported {
            return Err(ClientError::Unsupported(self.kind.as_str().to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sinks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, sink));

        let sinks = Arc::clone(&self.sinks);
        Ok(Subscription::new(move || {
            sinks
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .retain(|(sid, _)| *sid != id);
        }))
    }
}
