//! Link state machine.
//!
//! This module tracks cable presence, the mode set advertised by the sink and
//! the user preference, and derives the single output decision from them.

use crate::error::LinkError;
use crate::mode_catalog::{self, DisplayMode};

/// Connection phase of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPhase {
    /// No cable detected
    #[default]
    Idle,
    /// Cable present and the sink's mode set recorded
    ConnectedModesKnown,
}

/// Effective output decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Drive the output with `mode`; `modes` is the full reported set.
    Enable {
        mode: DisplayMode,
        modes: Vec<DisplayMode>,
    },
    /// Keep the output off.
    Disable,
}

impl Decision {
    pub fn is_enable(&self) -> bool {
        matches!(self, Decision::Enable { .. })
    }
}

/// The live link state.
///
/// Mutated only through the three transitions below, each of which ends in
/// `recompute()`.
#[derive(Debug, Clone)]
pub struct LinkState {
    phase: LinkPhase,
    current_modes: Vec<DisplayMode>,
    user_enabled: bool,
    selected_mode: Option<DisplayMode>,
}

impl LinkState {
    /// Create the state at service startup with the persisted preference.
    pub fn new(user_enabled: bool) -> Self {
        let mut state = Self {
            phase: LinkPhase::Idle,
            current_modes: Vec::new(),
            user_enabled,
            selected_mode: None,
        };
        state.recompute();
        state
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn cable_present(&self) -> bool {
        self.phase == LinkPhase::ConnectedModesKnown
    }

    pub fn user_enabled(&self) -> bool {
        self.user_enabled
    }

    pub fn current_modes(&self) -> &[DisplayMode] {
        &self.current_modes
    }

    pub fn selected_mode(&self) -> Option<DisplayMode> {
        self.selected_mode
    }

    /// CableConnected transition.
    ///
    /// An empty mode set is applied as a disconnect and then reported as
    /// `EmptyModeSet`.
    pub fn cable_connected(&mut self, modes: Vec<DisplayMode>) -> Result<Decision, LinkError> {
        if modes.is_empty() {
            self.cable_disconnected();
            return Err(LinkError::EmptyModeSet);
        }

        self.phase = LinkPhase::ConnectedModesKnown;
        self.current_modes = modes;
        self.recompute();
        Ok(self.decision())
    }

    /// CableDisconnected transition.
    pub fn cable_disconnected(&mut self) -> Decision {
        self.phase = LinkPhase::Idle;
        self.current_modes.clear();
        self.recompute();
        self.decision()
    }

    /// UserPreferenceChanged transition.
    pub fn set_user_enabled(&mut self, enabled: bool) -> Decision {
        self.user_enabled = enabled;
        self.recompute();
        self.decision()
    }

    /// The current effective decision.
    pub fn decision(&self) -> Decision {
        match self.selected_mode {
            Some(mode) => Decision::Enable {
                mode,
                modes: self.current_modes.clone(),
            },
            None => Decision::Disable,
        }
    }

    /// Re-derive `selected_mode` from cable presence, preference and modes.
    fn recompute(&mut self) {
        let eligible = self.cable_present() && self.user_enabled;

        self.selected_mode = if eligible {
            mode_catalog::select_best(&self.current_modes).ok()
        } else {
            None
        };

        debug_assert!(self.invariant_holds(), "link state invariant violated: {:?}", self);
    }

    /// `selected_mode` is set iff the cable is present, the user enabled the
    /// link and modes are known; when set it is the best of `current_modes`.
    pub fn invariant_holds(&self) -> bool {
        let eligible =
            self.cable_present() && self.user_enabled && !self.current_modes.is_empty();
        let phase_consistent = self.cable_present() != self.current_modes.is_empty();

        let selection_consistent = match self.selected_mode {
            Some(mode) => {
                eligible && mode_catalog::select_best(&self.current_modes).ok() == Some(mode)
            }
            None => !eligible,
        };

        phase_consistent && selection_consistent
    }
}
