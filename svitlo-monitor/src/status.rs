//! Human-facing status texts shared by the poller broadcasts and bot replies.

use chrono::{Duration, Local};
use svitlo_common::state::{PowerState, ReachabilityState};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn status_line(power: PowerState) -> String {
    match power {
        PowerState::Unknown => format!("{} Electricity status is unknown", power.icon()),
        PowerState::On | PowerState::Off => {
            format!("{} Electricity is {}", power.icon(), power)
        }
    }
}

/// Status line for `state` plus the local time it was last recorded, if any.
pub fn current_status(state: &ReachabilityState) -> String {
    match state.last_update {
        Some(at) => format!(
            "{}\nsince {}",
            status_line(state.power),
            at.with_timezone(&Local).format(TIME_FORMAT)
        ),
        None => status_line(state.power),
    }
}

/// Broadcast text for a change from `previous` to `next`.
///
/// Mentions how long the previous state lasted when it was a known one.
pub fn change_message(previous: &ReachabilityState, next: &ReachabilityState) -> String {
    let mut message = current_status(next);

    if previous.power != PowerState::Unknown {
        if let (Some(from), Some(to)) = (previous.last_update, next.last_update) {
            message.push_str(&format!(" (after {})", format_elapsed(to - from)));
        }
    }

    message
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let minutes = elapsed.num_minutes().max(0);
    let (days, hours, minutes) = (minutes / 1440, minutes / 60 % 24, minutes % 60);

    if days > 0 {
        format!("{days}d {hours:02}h {minutes:02}m")
    } else if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        "less than a minute".to_owned()
    }
}
