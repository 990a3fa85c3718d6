//! Output controller.
//!
//! Owns the single `LinkState`, applies hardware and user triggers to it and
//! emits the resulting side effects. Transitions run under the state mutex;
//! the side effects they produce are planned under the lock and executed
//! after it is released, so a slow collaborator never blocks readers of the
//! state and a collaborator may query the controller while it is called.
//!
//! Emissions are serialized by a second lock taken before the state lock
//! and held until the planned effects have run. Plans therefore reach the
//! collaborators in the order their transitions were applied, and the last
//! hardware call always matches the current decision.

use crate::collaborators::{
    EventBus, HardwareLink, LinkEvent, Notice, NotificationSink, PreferenceStore, HDMI_NOTICE_ID,
};
use crate::error::{HardwareError, LinkError};
use crate::link_state::{Decision, LinkPhase, LinkState};
use crate::mode_catalog::DisplayMode;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Preference key holding the user's on/off choice.
pub const USER_OPTION_KEY: &str = "HDMI_USEROPTION";
pub const USER_OPTION_ON: &str = "HDMI_ON";
pub const USER_OPTION_OFF: &str = "HDMI_OFF";

/// One immediate retry after a failed hardware call.
const HARDWARE_ATTEMPTS: u32 = 2;

/// A single side effect of a transition, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    EnableHardware(DisplayMode),
    DisableHardware,
    ShowNotice,
    CancelNotice,
    Publish(LinkEvent),
}

/// Effects for an effective "enable" decision.
pub fn plan_enable(mode: DisplayMode, modes: &[DisplayMode]) -> Vec<Effect> {
    vec![
        Effect::EnableHardware(mode),
        Effect::ShowNotice,
        Effect::Publish(LinkEvent::CableConnected),
        Effect::Publish(LinkEvent::link_on(modes)),
    ]
}

/// Effects for an effective "disable" decision. `cable_gone` adds the
/// cancellation of the connected notice.
pub fn plan_disable(cable_gone: bool) -> Vec<Effect> {
    let mut effects = vec![Effect::DisableHardware];
    if cable_gone {
        effects.push(Effect::CancelNotice);
    }
    effects.push(Effect::Publish(LinkEvent::CableDisconnected));
    effects.push(Effect::Publish(LinkEvent::LinkOff));
    effects
}

fn plan(decision: &Decision, cable_gone: bool) -> Vec<Effect> {
    match decision {
        Decision::Enable { mode, modes } => plan_enable(*mode, modes),
        Decision::Disable => plan_disable(cable_gone),
    }
}

/// Point-in-time copy of the link state for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub phase: LinkPhase,
    pub user_enabled: bool,
    pub modes: Vec<DisplayMode>,
    pub selected_mode: Option<DisplayMode>,
}

/// Read the persisted preference; anything but an explicit "on" is off.
pub fn load_user_preference(store: &dyn PreferenceStore) -> bool {
    match store.get(USER_OPTION_KEY) {
        Ok(value) => value.as_deref() == Some(USER_OPTION_ON),
        Err(e) => {
            warn!("Failed to read {}: {}, defaulting to off", USER_OPTION_KEY, e);
            false
        }
    }
}

pub struct OutputController {
    state: Mutex<LinkState>,
    /// Held from planning until the planned effects have run. Always
    /// acquired before `state`, never while holding it.
    emission: Mutex<()>,
    hardware: Arc<dyn HardwareLink>,
    notifier: Arc<dyn NotificationSink>,
    bus: Arc<dyn EventBus>,
    preferences: Arc<dyn PreferenceStore>,
}

impl OutputController {
    /// Create the controller, loading the user preference from the store.
    pub fn new(
        hardware: Arc<dyn HardwareLink>,
        notifier: Arc<dyn NotificationSink>,
        bus: Arc<dyn EventBus>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let user_enabled = load_user_preference(preferences.as_ref());
        info!("HDMI output user preference at startup: {}", on_off(user_enabled));

        Self {
            state: Mutex::new(LinkState::new(user_enabled)),
            emission: Mutex::new(()),
            hardware,
            notifier,
            bus,
            preferences,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_emission(&self) -> MutexGuard<'_, ()> {
        self.emission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hardware reported a sink with the given modes.
    ///
    /// An empty mode set is handled exactly like a disconnect and then
    /// reported as `EmptyModeSet`.
    pub fn on_cable_connected(&self, modes: Vec<DisplayMode>) -> Result<(), LinkError> {
        let _emission = self.lock_emission();
        let reported = modes.len();
        let (effects, outcome) = {
            let mut state = self.lock_state();
            match state.cable_connected(modes) {
                Ok(decision) => (plan(&decision, false), Ok(decision.is_enable())),
                Err(e) => (plan_disable(true), Err(e)),
            }
        };

        match &outcome {
            Ok(enabled) => info!(
                "HDMI cable connected with {} modes, output {}",
                reported,
                if *enabled {
                    "enabled"
                } else {
                    "held off by user preference"
                }
            ),
            Err(e) => warn!("{}, treating as cable disconnected", e),
        }

        let executed = self.execute(effects);
        outcome.and(executed)
    }

    /// Hardware reported the cable was removed.
    pub fn on_cable_disconnected(&self) -> Result<(), LinkError> {
        let _emission = self.lock_emission();
        let effects = {
            let mut state = self.lock_state();
            state.cable_disconnected();
            plan_disable(true)
        };

        info!("HDMI cable disconnected");
        self.execute(effects)
    }

    /// Persist and apply the user's on/off choice.
    ///
    /// The in-memory decision and its effects are applied even when the
    /// preference cannot be written; that failure is returned afterwards.
    /// The write and the transition happen under the same emission, so the
    /// last value persisted is the last value applied.
    pub fn set_user_preference(&self, enabled: bool) -> Result<(), LinkError> {
        let _emission = self.lock_emission();
        let value = if enabled { USER_OPTION_ON } else { USER_OPTION_OFF };
        let persisted = self
            .preferences
            .put(USER_OPTION_KEY, value)
            .map_err(LinkError::from);
        if let Err(e) = &persisted {
            error!("{}", e);
        }

        let effects = {
            let mut state = self.lock_state();
            let decision = state.set_user_enabled(enabled);
            plan(&decision, !state.cable_present())
        };

        info!("HDMI output preference set to {}", on_off(enabled));
        let executed = self.execute(effects);
        persisted.and(executed)
    }

    /// Whether a sink is present with known modes.
    pub fn query_connected(&self) -> bool {
        self.lock_state().phase() == LinkPhase::ConnectedModesKnown
    }

    pub fn user_preference(&self) -> bool {
        self.lock_state().user_enabled()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        let state = self.lock_state();
        LinkSnapshot {
            phase: state.phase(),
            user_enabled: state.user_enabled(),
            modes: state.current_modes().to_vec(),
            selected_mode: state.selected_mode(),
        }
    }

    /// Audio path reported activity: re-announce the link if it is live.
    pub fn notify_audio_path_active(&self) {
        let _emission = self.lock_emission();
        let event = {
            let state = self.lock_state();
            match state.decision() {
                Decision::Enable { modes, .. } if state.user_enabled() => {
                    Some(LinkEvent::link_on(&modes))
                }
                _ => None,
            }
        };

        match event {
            Some(event) => self.bus.publish(event),
            None => debug!("Audio path active while HDMI link is off, not forwarded"),
        }
    }

    /// Audio path went idle: forward "off" unless the user disabled the link.
    pub fn notify_audio_path_inactive(&self) {
        let _emission = self.lock_emission();
        if self.user_preference() {
            self.bus.publish(LinkEvent::LinkOff);
        } else {
            debug!("Audio path inactive while HDMI output is disabled, not forwarded");
        }
    }

    /// Generic "service online" notice, independent of cable state.
    pub fn announce_online(&self) {
        let _emission = self.lock_emission();
        self.bus.publish(LinkEvent::Online);
    }

    /// Re-post the connected notice if the link is live.
    pub fn refresh_notice(&self) -> bool {
        let _emission = self.lock_emission();
        let live = self.lock_state().decision().is_enable();
        if live {
            self.notifier.cancel(HDMI_NOTICE_ID);
            self.notifier.show(&Notice::cable_connected());
        }
        live
    }

    /// Run planned effects in order. Every effect runs even if an earlier
    /// hardware call failed; the first failure is returned.
    fn execute(&self, effects: Vec<Effect>) -> Result<(), LinkError> {
        let mut first_error = None;

        for effect in effects {
            let result = match effect {
                Effect::EnableHardware(mode) => {
                    self.call_hardware("enable", || self.hardware.enable(mode))
                }
                Effect::DisableHardware => self.call_hardware("disable", || self.hardware.disable()),
                Effect::ShowNotice => {
                    self.notifier.show(&Notice::cable_connected());
                    Ok(())
                }
                Effect::CancelNotice => {
                    self.notifier.cancel(HDMI_NOTICE_ID);
                    Ok(())
                }
                Effect::Publish(event) => {
                    debug!("Broadcasting {}", event.name());
                    self.bus.publish(event);
                    Ok(())
                }
            };

            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn call_hardware<F>(&self, operation: &'static str, call: F) -> Result<(), LinkError>
    where
        F: Fn() -> Result<(), HardwareError>,
    {
        let mut attempt = 1;
        loop {
            match call() {
                Ok(()) => return Ok(()),
                Err(e) if attempt < HARDWARE_ATTEMPTS => {
                    warn!("Hardware {} failed: {}, retrying", operation, e);
                    attempt += 1;
                }
                Err(e) => {
                    let err = LinkError::HardwareCallFailure {
                        operation,
                        attempts: attempt,
                        source: e,
                    };
                    error!("{}", err);
                    return Err(err);
                }
            }
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
