use std::fmt;

use chrono::{DateTime, Utc};

/// Reachability of the monitored host, as last recorded by the polling loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PowerState {
    /// No probe has completed yet.
    #[default]
    Unknown,
    On,
    Off,
}

impl PowerState {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            PowerState::On
        } else {
            PowerState::Off
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            PowerState::Unknown => "\u{2753}",
            PowerState::On => "\u{1F4A1}",
            PowerState::Off => "\u{1F31A}",
        }
    }

    /// Value exported on the `svitlo_power_state` gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            PowerState::Unknown => -1.0,
            PowerState::On => 1.0,
            PowerState::Off => 0.0,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            PowerState::Unknown => "unknown",
            PowerState::On => "on",
            PowerState::Off => "off",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Unknown => write!(f, "UNKNOWN"),
            PowerState::On => write!(f, "ON"),
            PowerState::Off => write!(f, "OFF"),
        }
    }
}

/// The last recorded reachability and when it last changed.
///
/// Owned by the polling loop; other tasks only ever see copies of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReachabilityState {
    pub power: PowerState,
    pub last_update: Option<DateTime<Utc>>,
}

/// Result of feeding one probe outcome into a [`ReachabilityState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: ReachabilityState,
    pub next: ReachabilityState,
    pub changed: bool,
}

impl ReachabilityState {
    /// Decides whether `reachable` is a real change against the recorded state.
    ///
    /// The first observation out of `Unknown` always counts as a change, so the
    /// baseline gets announced. An unchanged result keeps the old timestamp.
    pub fn apply(&self, reachable: bool, now: DateTime<Utc>) -> Transition {
        let observed = PowerState::from_reachable(reachable);
        let changed = self.power != observed;

        let next = if changed {
            ReachabilityState {
                power: observed,
                last_update: Some(now),
            }
        } else {
            *self
        };

        Transition {
            previous: *self,
            next,
            changed,
        }
    }
}

/// Holds the single live [`ReachabilityState`] of the process.
///
/// There is no shared global: the polling loop constructs one and owns it.
#[derive(Debug, Default)]
pub struct StateStore {
    current: ReachabilityState,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ReachabilityState {
        self.current
    }

    /// Applies a probe result, storing the next state only when it changed.
    pub fn record(&mut self, reachable: bool, now: DateTime<Utc>) -> Transition {
        let transition = self.current.apply(reachable, now);
        if transition.changed {
            self.current = transition.next;
        }
        transition
    }
}
