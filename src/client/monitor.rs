//! Observes focus, fullscreen, pointer, network and clock signals for one exam
//! session and turns them into security events, warnings and strikes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::client::capabilities::{BrowserSignal, Capabilities, Subscription};
use crate::client::clock::Clock;
use crate::client::error::ClientError;
use crate::models::security_event::{SecurityEvent, SecurityEventKind};
use crate::models::strictness::StrictnessPolicy;
use crate::utils::time::{non_negative, rounded_seconds};

pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);
/// Probe lateness tolerated before the clock is considered tampered with.
pub const DRIFT_TOLERANCE: Duration = Duration::from_millis(2_000);
pub const FULLSCREEN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Receives everything the monitor produces. Calls happen outside the monitor's lock.
pub trait MonitorHooks: Send + Sync {
    fn security_event(&self, event: SecurityEvent);

    fn warning(&self, _kind: SecurityEventKind, _warnings: u32) {}

    fn strike(&self, _strikes: u32, _max_strikes: u32) {}

    /// Fired at most once per monitor, when strikes reach the policy maximum.
    fn auto_submit(&self);

    fn connectivity_hint(&self, _online: bool) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub strikes: u32,
    /// Warnings since the last strike.
    pub warnings: u32,
    pub is_focused: bool,
    pub is_fullscreen: bool,
    pub last_focus_change: DateTime<Utc>,
    pub auto_submit_fired: bool,
}

#[derive(Debug)]
struct MonitorState {
    strikes: u32,
    warnings: u32,
    is_focused: bool,
    is_fullscreen: bool,
    focus_lost_at: Option<DateTime<Utc>>,
    last_focus_change: DateTime<Utc>,
    auto_submit_fired: bool,
    last_probe: Option<DateTime<Utc>>,
}

enum Action {
    Event(SecurityEvent),
    Warning(SecurityEventKind, u32),
    Strike(u32),
    AutoSubmit,
    Connectivity(bool),
    RestoreFullscreen,
}

pub struct IntegrityMonitor {
    session_id: Uuid,
    policy: StrictnessPolicy,
    clock: Arc<dyn Clock>,
    capabilities: Capabilities,
    hooks: Arc<dyn MonitorHooks>,
    state: Mutex<MonitorState>,
}

impl IntegrityMonitor {
    pub fn new(
        session_id: Uuid,
        policy: StrictnessPolicy,
        clock: Arc<dyn Clock>,
        capabilities: Capabilities,
        hooks: Arc<dyn MonitorHooks>,
    ) -> Self {
        let now = clock.now();
        Self {
            session_id,
            policy,
            clock,
            capabilities,
            hooks,
            state: Mutex::new(MonitorState {
                strikes: 0,
                warnings: 0,
                is_focused: true,
                is_fullscreen: false,
                focus_lost_at: None,
                last_focus_change: now,
                auto_submit_fired: false,
                last_probe: None,
            }),
        }
    }

    pub fn policy(&self) -> StrictnessPolicy {
        self.policy
    }

    pub fn battery_level(&self) -> Option<f32> {
        self.capabilities.battery.as_ref().and_then(|b| b.level())
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let state = self.lock();
        MonitorSnapshot {
            strikes: state.strikes,
            warnings: state.warnings,
            is_focused: state.is_focused,
            is_fullscreen: state.is_fullscreen,
            last_focus_change: state.last_focus_change,
            auto_submit_fired: state.auto_submit_fired,
        }
    }

    /// Subscribes to every available capability and runs the 1-second clock probe.
    pub fn start(self: &Arc<Self>) -> MonitorHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut subscriptions = Vec::new();
        for source in &self.capabilities.sources {
            match source.subscribe(tx.clone()) {
                Ok(sub) => subscriptions.push(sub),
                Err(ClientError::Unsupported(name)) => {
                    tracing::debug!(capability = %name, "Capability unsupported, detector disabled");
                }
                Err(e) => {
                    tracing::warn!(capability = source.kind().as_str(), error = %e, "Failed to subscribe");
                }
            }
        }
        drop(tx);

        let monitor = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut probe = tokio::time::interval(PROBE_INTERVAL);
            probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    Some(signal) = rx.recv() => monitor.handle_signal(signal),
                    _ = probe.tick() => monitor.probe(),
                }
            }
        });

        tracing::info!(
            session_id = %self.session_id,
            strictness = %self.policy.tier,
            detectors = subscriptions.len(),
            "Integrity monitor started"
        );

        MonitorHandle {
            subscriptions,
            task: Some(task),
        }
    }

    pub fn handle_signal(&self, signal: BrowserSignal) {
        let now = self.clock.now();
        let mut actions = Vec::new();
        {
            let mut state = self.lock();
            match signal {
                BrowserSignal::VisibilityHidden | BrowserSignal::WindowBlur => {
                    if state.is_focused {
                        state.is_focused = false;
                        state.focus_lost_at = Some(now);
                        state.last_focus_change = now;
                    }
                }
                BrowserSignal::VisibilityVisible | BrowserSignal::WindowFocus => {
                    if !state.is_focused {
                        state.is_focused = true;
                        state.last_focus_change = now;
                        if let Some(lost_at) = state.focus_lost_at.take() {
                            self.focus_regained(&mut state, lost_at, now, &mut actions);
                        }
                    }
                }
                BrowserSignal::FullscreenExit => {
                    state.is_fullscreen = false;
                    actions.push(Action::Event(self.event(
                        SecurityEventKind::FullscreenExit,
                        None,
                        now,
                    )));
                    self.add_strike(&mut state, &mut actions);
                    actions.push(Action::RestoreFullscreen);
                }
                BrowserSignal::FullscreenEnter => {
                    state.is_fullscreen = true;
                }
                BrowserSignal::PointerLeave => {
                    state.warnings += 1;
                    actions.push(Action::Warning(SecurityEventKind::MouseLeave, state.warnings));
                    actions.push(Action::Event(self.event(
                        SecurityEventKind::MouseLeave,
                        None,
                        now,
                    )));
                }
                BrowserSignal::NetworkOffline => actions.push(Action::Connectivity(false)),
                BrowserSignal::NetworkOnline => actions.push(Action::Connectivity(true)),
            }
        }
        self.dispatch(actions);
    }

    /// One probe tick: compares wall-clock time elapsed since the previous tick.
    pub fn probe(&self) {
        let now = self.clock.now();
        let previous = self.lock().last_probe.replace(now);
        if let Some(previous) = previous {
            self.check_drift(non_negative(now - previous));
        }
    }

    /// `actual_elapsed` is the wall-clock time between two probe ticks scheduled
    /// one second apart. Lateness beyond the tolerance means the clock jumped or
    /// the page was suspended.
    pub fn check_drift(&self, actual_elapsed: Duration) {
        let drift = actual_elapsed.saturating_sub(PROBE_INTERVAL);
        if drift <= DRIFT_TOLERANCE {
            return;
        }

        let now = self.clock.now();
        let mut actions = Vec::new();
        {
            let mut state = self.lock();
            actions.push(Action::Event(self.event(
                SecurityEventKind::TimeWarp,
                Some(rounded_seconds(drift)),
                now,
            )));
            state.warnings += 1;
            actions.push(Action::Warning(SecurityEventKind::TimeWarp, state.warnings));
            self.add_strike(&mut state, &mut actions);
        }
        self.dispatch(actions);
    }

    fn focus_regained(
        &self,
        state: &mut MonitorState,
        lost_at: DateTime<Utc>,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) {
        let away = non_negative(now - lost_at);
        if away >= self.policy.strike_after {
            actions.push(Action::Event(self.event(
                SecurityEventKind::FocusLost,
                Some(rounded_seconds(away)),
                lost_at,
            )));
            self.add_strike(state, actions);
        } else if away >= self.policy.warning_after {
            state.warnings += 1;
            actions.push(Action::Warning(SecurityEventKind::TabSwitch, state.warnings));
            actions.push(Action::Event(self.event(
                SecurityEventKind::TabSwitch,
                Some(rounded_seconds(away)),
                lost_at,
            )));
        }
    }

    fn add_strike(&self, state: &mut MonitorState, actions: &mut Vec<Action>) {
        state.strikes += 1;
        state.warnings = 0;
        actions.push(Action::Strike(state.strikes));
        if state.strikes >= self.policy.max_strikes && !state.auto_submit_fired {
            state.auto_submit_fired = true;
            actions.push(Action::AutoSubmit);
        }
    }

    fn event(
        &self,
        kind: SecurityEventKind,
        duration_seconds: Option<i32>,
        occurred_at: DateTime<Utc>,
    ) -> SecurityEvent {
        SecurityEvent::new(self.session_id, kind, duration_seconds, occurred_at)
    }

    fn dispatch(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Event(event) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        kind = %event.kind,
                        duration_seconds = ?event.duration_seconds,
                        "Integrity violation observed"
                    );
                    self.hooks.security_event(event);
                }
                Action::Warning(kind, warnings) => self.hooks.warning(kind, warnings),
                Action::Strike(strikes) => {
                    self.hooks.strike(strikes, self.policy.max_strikes);
                }
                Action::AutoSubmit => {
                    tracing::warn!(session_id = %self.session_id, "Strike limit reached, auto-submitting");
                    self.hooks.auto_submit();
                }
                Action::Connectivity(online) => self.hooks.connectivity_hint(online),
                Action::RestoreFullscreen => self.schedule_fullscreen_restore(),
            }
        }
    }

    fn schedule_fullscreen_restore(&self) {
        let Some(control) = self.capabilities.fullscreen.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            tokio::time::sleep(FULLSCREEN_RETRY_DELAY).await;
            if let Err(e) = control.request_fullscreen() {
                tracing::debug!(error = %e, "Fullscreen re-request refused");
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Running detectors. Stopping (or dropping) unsubscribes and ends the probe.
pub struct MonitorHandle {
    subscriptions: Vec<Subscription>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.subscriptions.clear();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::capabilities::{CapabilityKind, FullscreenControl, ManualSource};
    use crate::client::clock::ManualClock;
    use crate::client::error::ClientResult;
    use crate::models::strictness::Strictness;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<SecurityEvent>>,
        warnings: Mutex<Vec<(SecurityEventKind, u32)>>,
        strikes: Mutex<Vec<u32>>,
        auto_submits: AtomicUsize,
        hints: Mutex<Vec<bool>>,
    }

    impl RecordingHooks {
        fn events(&self) -> Vec<SecurityEvent> {
            self.events.lock().unwrap().clone()
        }

        fn strikes(&self) -> Vec<u32> {
            self.strikes.lock().unwrap().clone()
        }
    }

    impl MonitorHooks for RecordingHooks {
        fn security_event(&self, event: SecurityEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn warning(&self, kind: SecurityEventKind, warnings: u32) {
            self.warnings.lock().unwrap().push((kind, warnings));
        }

        fn strike(&self, strikes: u32, _max_strikes: u32) {
            self.strikes.lock().unwrap().push(strikes);
        }

        fn auto_submit(&self) {
            self.auto_submits.fetch_add(1, Ordering::SeqCst);
        }

        fn connectivity_hint(&self, online: bool) {
            self.hints.lock().unwrap().push(online);
        }
    }

    fn monitor(tier: Strictness) -> (IntegrityMonitor, Arc<ManualClock>, Arc<RecordingHooks>) {
        monitor_with(tier, Capabilities::new())
    }

    fn monitor_with(
        tier: Strictness,
        capabilities: Capabilities,
    ) -> (IntegrityMonitor, Arc<ManualClock>, Arc<RecordingHooks>) {
        let clock = Arc::new(ManualClock::default());
        let hooks = Arc::new(RecordingHooks::default());
        let monitor = IntegrityMonitor::new(
            Uuid::new_v4(),
            tier.policy(),
            clock.clone(),
            capabilities,
            hooks.clone(),
        );
        (monitor, clock, hooks)
    }

    fn away_for(monitor: &IntegrityMonitor, clock: &ManualClock, away: Duration) {
        monitor.handle_signal(BrowserSignal::VisibilityHidden);
        clock.advance(away);
        monitor.handle_signal(BrowserSignal::VisibilityVisible);
    }

    const TIERS: [Strictness; 3] = [Strictness::Low, Strictness::Medium, Strictness::High];

    #[test]
    fn short_focus_loss_is_ignored() {
        for tier in TIERS {
            let (monitor, clock, hooks) = monitor(tier);
            let below = tier.policy().warning_after - Duration::from_millis(1);
            away_for(&monitor, &clock, below);

            assert!(hooks.events().is_empty(), "{tier}");
            assert!(hooks.strikes().is_empty());
            assert!(monitor.snapshot().is_focused);
        }
    }

    #[test]
    fn long_focus_loss_is_one_strike_with_duration() {
        for tier in TIERS {
            let (monitor, clock, hooks) = monitor(tier);
            let strike_after = tier.policy().strike_after;
            away_for(&monitor, &clock, strike_after + Duration::from_millis(200));

            let events = hooks.events();
            assert_eq!(events.len(), 1, "{tier}");
            assert_eq!(events[0].kind, SecurityEventKind::FocusLost);
            let duration = events[0].duration_seconds.unwrap();
            assert!(duration as u64 >= strike_after.as_secs(), "{tier}");
            assert_eq!(hooks.strikes(), vec![1]);
            assert_eq!(monitor.snapshot().strikes, 1);
        }
    }

    #[test]
    fn medium_focus_loss_warns_and_logs_tab_switch() {
        let (monitor, clock, hooks) = monitor(Strictness::Medium);
        away_for(&monitor, &clock, Duration::from_millis(3_000));

        let events = hooks.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SecurityEventKind::TabSwitch);
        assert_eq!(events[0].duration_seconds, Some(3));
        assert!(hooks.strikes().is_empty());
        assert_eq!(monitor.snapshot().warnings, 1);
    }

    #[test]
    fn blur_and_hidden_together_count_once() {
        let (monitor, clock, hooks) = monitor(Strictness::High);
        monitor.handle_signal(BrowserSignal::WindowBlur);
        monitor.handle_signal(BrowserSignal::VisibilityHidden);
        clock.advance(Duration::from_secs(4));
        monitor.handle_signal(BrowserSignal::VisibilityVisible);
        monitor.handle_signal(BrowserSignal::WindowFocus);

        assert_eq!(hooks.events().len(), 1);
        assert_eq!(hooks.strikes(), vec![1]);
    }

    #[test]
    fn strike_resets_warning_counter() {
        let (monitor, clock, _hooks) = monitor(Strictness::Low);
        monitor.handle_signal(BrowserSignal::PointerLeave);
        monitor.handle_signal(BrowserSignal::PointerLeave);
        assert_eq!(monitor.snapshot().warnings, 2);

        away_for(&monitor, &clock, Duration::from_secs(16));
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.warnings, 0);
        assert_eq!(snapshot.strikes, 1);
    }

    #[test]
    fn auto_submit_fires_exactly_once() {
        let (monitor, _clock, hooks) = monitor(Strictness::Medium);
        for _ in 0..6 {
            monitor.handle_signal(BrowserSignal::FullscreenExit);
        }

        assert_eq!(hooks.strikes(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(hooks.auto_submits.load(Ordering::SeqCst), 1);
        assert!(monitor.snapshot().auto_submit_fired);
    }

    #[test]
    fn pointer_leave_warns_without_strike() {
        let (monitor, _clock, hooks) = monitor(Strictness::High);
        monitor.handle_signal(BrowserSignal::PointerLeave);

        assert_eq!(hooks.events()[0].kind, SecurityEventKind::MouseLeave);
        assert!(hooks.strikes().is_empty());
        assert_eq!(
            hooks.warnings.lock().unwrap().clone(),
            vec![(SecurityEventKind::MouseLeave, 1)]
        );
    }

    #[test]
    fn network_signals_are_hints_only() {
        let (monitor, _clock, hooks) = monitor(Strictness::High);
        monitor.handle_signal(BrowserSignal::NetworkOffline);
        monitor.handle_signal(BrowserSignal::NetworkOnline);

        assert_eq!(hooks.hints.lock().unwrap().clone(), vec![false, true]);
        assert!(hooks.events().is_empty());
        assert!(hooks.strikes().is_empty());
    }

    #[test]
    fn drift_just_over_tolerance_is_a_time_warp() {
        let (monitor, _clock, hooks) = monitor(Strictness::Low);
        // 1 s scheduled interval + 2001 ms drift
        monitor.check_drift(Duration::from_millis(3_001));

        let events = hooks.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SecurityEventKind::TimeWarp);
        assert_eq!(events[0].duration_seconds, Some(2));
        assert_eq!(hooks.strikes(), vec![1]);
    }

    #[test]
    fn drift_within_tolerance_is_ignored() {
        let (monitor, _clock, hooks) = monitor(Strictness::High);
        monitor.check_drift(Duration::from_millis(2_999));
        monitor.check_drift(Duration::from_millis(3_000));

        assert!(hooks.events().is_empty());
        assert!(hooks.strikes().is_empty());
    }

    #[test]
    fn probe_measures_wall_clock_between_ticks() {
        let (monitor, clock, hooks) = monitor(Strictness::Medium);
        monitor.probe();
        clock.advance(Duration::from_secs(1));
        monitor.probe();
        assert!(hooks.events().is_empty());

        clock.advance(Duration::from_secs(10));
        monitor.probe();
        let events = hooks.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration_seconds, Some(9));
    }

    struct CountingFullscreen(AtomicUsize);

    impl FullscreenControl for CountingFullscreen {
        fn request_fullscreen(&self) -> ClientResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Unsupported("fullscreen".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fullscreen_exit_re_requests_after_delay() {
        let control = Arc::new(CountingFullscreen(AtomicUsize::new(0)));
        let (monitor, _clock, hooks) =
            monitor_with(Strictness::Medium, Capabilities::new().with_fullscreen(control.clone()));

        monitor.handle_signal(BrowserSignal::FullscreenExit);
        assert_eq!(hooks.events()[0].kind, SecurityEventKind::FullscreenExit);
        assert_eq!(control.0.load(Ordering::SeqCst), 0);

        tokio::time::sleep(FULLSCREEN_RETRY_DELAY + Duration::from_millis(10)).await;
        assert_eq!(control.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn started_monitor_reacts_to_sources_until_stopped() {
        let visibility = Arc::new(ManualSource::new(CapabilityKind::Visibility));
        let fullscreen = Arc::new(ManualSource::unsupported(CapabilityKind::Fullscreen));
        let capabilities = Capabilities::new()
            .with_source(visibility.clone())
            .with_source(fullscreen);
        let (monitor, clock, hooks) = monitor_with(Strictness::High, capabilities);
        let monitor = Arc::new(monitor);

        let handle = monitor.start();
        assert_eq!(visibility.subscriber_count(), 1);

        visibility.emit(BrowserSignal::VisibilityHidden);
        tokio::time::sleep(Duration::from_millis(20)).await;
        clock.advance(Duration::from_secs(5));
        visibility.emit(BrowserSignal::VisibilityVisible);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hooks.strikes(), vec![1]);

        handle.stop();
        assert_eq!(visibility.subscriber_count(), 0);
    }
}
