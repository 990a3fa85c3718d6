//! Hotplug bridge.
//!
//! Runs a dedicated worker thread that blocks on the hardware event source
//! and turns cable in/out events into `OutputController` calls. The worker
//! is only spawned when the platform has an HDMI port; raw mode codes are
//! validated here so nothing outside the catalog reaches the controller.

use crate::error::HotplugError;
use crate::mode_catalog::DisplayMode;
use crate::output_controller::OutputController;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default wait per event poll; bounds how quickly `stop()` is observed.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default back-off after a source failure.
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 5;

const WORKER_THREAD_NAME: &str = "hdmi-hotplug";

/// A raw hardware event, before mode validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawHotplugEvent {
    Connected { raw_modes: Vec<u32> },
    Disconnected,
}

/// Producer of hardware hotplug events. Lives on the observer thread only.
pub trait HotplugSource {
    /// Acquire the underlying event channel. Called again after a failure.
    fn open(&mut self) -> Result<(), HotplugError> {
        Ok(())
    }

    /// Event describing a sink already attached when observation starts.
    fn initial_state(&mut self) -> Option<RawHotplugEvent> {
        None
    }

    /// Wait up to `timeout` for the next event.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<RawHotplugEvent>, HotplugError>;
}

/// Builds the source on the observer thread, so sources holding
/// thread-bound handles can be used.
pub type SourceFactory = Box<dyn FnOnce() -> Box<dyn HotplugSource> + Send>;

/// Validate raw mode codes, dropping the ones outside the catalog.
pub fn parse_modes(raw_modes: &[u32]) -> Vec<DisplayMode> {
    raw_modes
        .iter()
        .filter_map(|&code| match DisplayMode::from_vic(code) {
            Ok(mode) => Some(mode),
            Err(e) => {
                warn!("{}, dropped", e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    /// Platform has an HDMI port; without it the worker is never spawned.
    pub enabled: bool,
    pub poll_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
        }
    }
}

pub struct HotplugBridge {
    controller: Arc<OutputController>,
    source: Option<SourceFactory>,
    settings: BridgeSettings,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl HotplugBridge {
    pub fn new(
        controller: Arc<OutputController>,
        source: SourceFactory,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            controller,
            source: Some(source),
            settings,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Spawn the observer thread.
    ///
    /// Returns `Ok(false)` without spawning anything when the platform has
    /// no HDMI port. Starting a running bridge is a no-op.
    pub fn start(&mut self) -> Result<bool, HotplugError> {
        if self.worker.is_some() {
            return Ok(true);
        }

        if !self.settings.enabled {
            info!("Platform has no HDMI port, hotplug observer not started");
            return Ok(false);
        }

        let factory = self.source.take().ok_or(HotplugError::SourceConsumed)?;
        self.stop_flag.store(false, Ordering::SeqCst);

        let worker = Worker {
            controller: Arc::clone(&self.controller),
            settings: self.settings,
            stop_flag: Arc::clone(&self.stop_flag),
        };

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run(factory()))
            .map_err(HotplugError::SpawnFailed)?;

        self.worker = Some(handle);
        Ok(true)
    }

    /// Signal the observer thread and wait for it to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };

        self.stop_flag.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            error!("Hotplug observer thread panicked");
        }
        info!("Hotplug observer stopped");
    }
}

impl Drop for HotplugBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    controller: Arc<OutputController>,
    settings: BridgeSettings,
    stop_flag: Arc<AtomicBool>,
}

impl Worker {
    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    fn run(self, mut source: Box<dyn HotplugSource>) {
        info!("Hotplug observer started");

        'session: while !self.stopped() {
            if let Err(e) = source.open() {
                warn!(
                    "Failed to open hotplug source: {}, retrying in {:?}",
                    e, self.settings.retry_interval
                );
                self.pause(self.settings.retry_interval);
                continue;
            }

            if let Some(event) = source.initial_state() {
                debug!("Sink already present at startup");
                self.dispatch(event);
            }

            while !self.stopped() {
                match source.next_event(self.settings.poll_interval) {
                    Ok(Some(event)) => self.dispatch(event),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            "Hotplug source error: {}, reopening in {:?}",
                            e, self.settings.retry_interval
                        );
                        self.degrade();
                        self.pause(self.settings.retry_interval);
                        continue 'session;
                    }
                }
            }
        }

        debug!("Hotplug observer exiting");
    }

    /// Forward one event to the controller. A panic while handling it is
    /// contained so observation continues.
    fn dispatch(&self, event: RawHotplugEvent) {
        let controller = &self.controller;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| match event {
            RawHotplugEvent::Connected { raw_modes } => {
                controller.on_cable_connected(parse_modes(&raw_modes))
            }
            RawHotplugEvent::Disconnected => controller.on_cable_disconnected(),
        }));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Hotplug event applied with error: {}", e),
            Err(_) => error!("Panic while handling hotplug event, continuing observation"),
        }
    }

    /// The source failed: nothing is known about the sink any more.
    fn degrade(&self) {
        if self.controller.query_connected() {
            warn!("Treating HDMI link as disconnected until the source recovers");
            self.dispatch(RawHotplugEvent::Disconnected);
        }
    }

    /// Sleep for `duration`, waking early on stop.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let slice = Duration::from_millis(50);

        while !self.stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LinkEvent, HDMI_NOTICE_ID};
    use crate::output_controller::tests::{scenario_modes, Call, Harness};
    use std::sync::mpsc;

    type Script = mpsc::Sender<Result<RawHotplugEvent, String>>;

    struct ScriptedSource {
        events: mpsc::Receiver<Result<RawHotplugEvent, String>>,
        initial: Option<RawHotplugEvent>,
        opens: Arc<std::sync::atomic::AtomicU32>,
    }

    impl HotplugSource for ScriptedSource {
        fn open(&mut self) -> Result<(), HotplugError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn initial_state(&mut self) -> Option<RawHotplugEvent> {
            self.initial.take()
        }

        fn next_event(&mut self, timeout: Duration) -> Result<Option<RawHotplugEvent>, HotplugError> {
            match self.events.recv_timeout(timeout) {
                Ok(Ok(event)) => Ok(Some(event)),
                Ok(Err(msg)) => Err(HotplugError::ReceiveFailed(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    msg,
                ))),
                Err(_) => Ok(None),
            }
        }
    }

    fn fast_settings(enabled: bool) -> BridgeSettings {
        BridgeSettings {
            enabled,
            poll_interval: Duration::from_millis(10),
            retry_interval: Duration::from_millis(20),
        }
    }

    fn scripted(
        initial: Option<RawHotplugEvent>,
    ) -> (SourceFactory, Script, Arc<std::sync::atomic::AtomicU32>) {
        let (tx, rx) = mpsc::channel();
        let opens = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let source = ScriptedSource {
            events: rx,
            initial,
            opens: Arc::clone(&opens),
        };
        let factory: SourceFactory = Box::new(move || Box::new(source) as Box<dyn HotplugSource>);
        (factory, tx, opens)
    }

    /// Poll the call log until `predicate` holds or two seconds pass.
    fn wait_for(h: &Harness, predicate: impl Fn(&[Call]) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if predicate(&h.log.lock().unwrap()) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_parse_modes_drops_unrecognized() {
        assert_eq!(
            parse_modes(&[6, 99, 16, 0, 18]),
            vec![
                DisplayMode::Sd480i60,
                DisplayMode::Hd1080p60,
                DisplayMode::Sd576p50Wide,
            ]
        );
        assert!(parse_modes(&[8, 9]).is_empty());
    }

    #[test]
    fn test_disabled_platform_never_spawns() {
        let h = Harness::new(true);
        let (source, _tx, opens) = scripted(None);
        let mut bridge = HotplugBridge::new(Arc::clone(&h.controller), source, fast_settings(false));

        assert!(!bridge.start().unwrap());
        assert!(bridge.worker.is_none());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_events_reach_controller() {
        let h = Harness::new(true);
        let (source, tx, _opens) = scripted(None);
        let mut bridge = HotplugBridge::new(Arc::clone(&h.controller), source, fast_settings(true));
        assert!(bridge.start().unwrap());

        tx.send(Ok(RawHotplugEvent::Connected { raw_modes: vec![6, 16, 18] }))
            .unwrap();
        assert!(wait_for(&h, |calls| calls
            .contains(&Call::Publish(LinkEvent::link_on(&scenario_modes())))));
        assert!(h.controller.query_connected());

        tx.send(Ok(RawHotplugEvent::Disconnected)).unwrap();
        assert!(wait_for(&h, |calls| calls.contains(&Call::Cancel(HDMI_NOTICE_ID))));
        assert!(!h.controller.query_connected());

        bridge.stop();
        assert!(bridge.worker.is_none());
    }

    #[test]
    fn test_unrecognized_modes_filtered_before_controller() {
        let h = Harness::new(true);
        let (source, tx, _opens) = scripted(None);
        let mut bridge = HotplugBridge::new(Arc::clone(&h.controller), source, fast_settings(true));
        bridge.start().unwrap();

        tx.send(Ok(RawHotplugEvent::Connected { raw_modes: vec![200, 4, 99] }))
            .unwrap();
        assert!(wait_for(&h, |calls| calls.contains(&Call::Enable(DisplayMode::Hd720p60))));
        assert_eq!(h.controller.snapshot().modes, vec![DisplayMode::Hd720p60]);
    }

    #[test]
    fn test_only_unrecognized_modes_is_disconnect() {
        let h = Harness::new(true);
        let (source, tx, _opens) = scripted(Some(RawHotplugEvent::Connected {
            raw_modes: vec![4],
        }));
        let mut bridge = HotplugBridge::new(Arc::clone(&h.controller), source, fast_settings(true));
        bridge.start().unwrap();
        assert!(wait_for(&h, |calls| calls.contains(&Call::Enable(DisplayMode::Hd720p60))));

        tx.send(Ok(RawHotplugEvent::Connected { raw_modes: vec![77] }))
            .unwrap();
        assert!(wait_for(&h, |calls| calls.contains(&Call::Disable)));
        assert!(!h.controller.query_connected());
    }

    #[test]
    fn test_source_error_degrades_and_reopens() {
        let h = Harness::new(true);
        let (source, tx, opens) = scripted(None);
        let mut bridge = HotplugBridge::new(Arc::clone(&h.controller), source, fast_settings(true));
        bridge.start().unwrap();

        tx.send(Ok(RawHotplugEvent::Connected { raw_modes: vec![16] }))
            .unwrap();
        assert!(wait_for(&h, |calls| calls.contains(&Call::Enable(DisplayMode::Hd1080p60))));

        tx.send(Err("monitor overrun".to_string())).unwrap();
        assert!(wait_for(&h, |calls| calls.contains(&Call::Disable)));
        assert!(!h.controller.query_connected());

        let deadline = Instant::now() + Duration::from_secs(2);
        while opens.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(opens.load(Ordering::SeqCst) >= 2);

        // Observation continues after recovery
        tx.send(Ok(RawHotplugEvent::Connected { raw_modes: vec![4] }))
            .unwrap();
        assert!(wait_for(&h, |calls| calls.contains(&Call::Enable(DisplayMode::Hd720p60))));
    }

    #[test]
    fn test_restart_after_stop_reports_consumed_source() {
        let h = Harness::new(true);
        let (source, _tx, _opens) = scripted(None);
        let mut bridge = HotplugBridge::new(Arc::clone(&h.controller), source, fast_settings(true));

        assert!(bridge.start().unwrap());
        assert!(bridge.start().unwrap());
        bridge.stop();
        assert!(matches!(bridge.start(), Err(HotplugError::SourceConsumed)));
    }

    #[test]
    fn test_source_built_on_observer_thread() {
        let h = Harness::new(true);
        let (built_on_tx, built_on_rx) = mpsc::channel();
        let (_tx, rx) = mpsc::channel();
        let factory: SourceFactory = Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            built_on_tx.send(name).unwrap();
            Box::new(ScriptedSource {
                events: rx,
                initial: None,
                opens: Arc::new(std::sync::atomic::AtomicU32::new(0)),
            }) as Box<dyn HotplugSource>
        });

        let mut bridge = HotplugBridge::new(Arc::clone(&h.controller), factory, fast_settings(true));
        assert!(built_on_rx.try_recv().is_err());
        bridge.start().unwrap();

        let name = built_on_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some(WORKER_THREAD_NAME));
    }
}
