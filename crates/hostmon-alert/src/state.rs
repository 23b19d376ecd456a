use crate::AlertRule;

/// Where a rule instance sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// Comparator is false.
    Normal,
    /// Comparator is true but has not held for the rule's duration yet,
    /// or the global cooldown is suppressing the emission.
    Breached,
    /// The rule fired and the comparator is still true.
    Firing,
    /// Reserved; cooldown is tracked as an attribute of `Firing` via
    /// `last_fired`, not as a distinct state.
    Cooldown,
}

/// Per-rule runtime state, owned for the process lifetime.
#[derive(Debug, Clone)]
pub struct AlertInstance {
    pub state: AlertState,
    /// Set while in `Breached`/`Firing`.
    pub breach_start: Option<i64>,
    /// Set once the rule has fired at least once.
    pub last_fired: Option<i64>,
    pub last_value: f64,
}

impl Default for AlertInstance {
    fn default() -> Self {
        Self {
            state: AlertState::Normal,
            breach_start: None,
            last_fired: None,
            last_value: 0.0,
        }
    }
}

/// Advances one rule instance by one observation. Returns true when the
/// rule fires at `now` (the caller emits the event and notifies sinks).
///
/// The breach and hold checks are sequential, so a rule with duration 0
/// fires on the same evaluation that first sees the breach. A hold that
/// elapses inside the global cooldown window keeps the instance in
/// `Breached`; the event surfaces at the first evaluation after the
/// window closes.
pub fn step(
    rule: &AlertRule,
    instance: &mut AlertInstance,
    value: f64,
    now: i64,
    cooldown_seconds: i64,
) -> bool {
    instance.last_value = value;

    if !rule.condition.check(value, rule.threshold) {
        if instance.state != AlertState::Normal {
            instance.state = AlertState::Normal;
            instance.breach_start = None;
        }
        return false;
    }

    if instance.state == AlertState::Normal {
        instance.state = AlertState::Breached;
        instance.breach_start = Some(now);
    }

    if instance.state == AlertState::Breached {
        let start = instance.breach_start.unwrap_or(now);
        if now - start >= rule.duration_seconds {
            let in_cooldown = instance
                .last_fired
                .is_some_and(|fired| now - fired < cooldown_seconds);
            if !in_cooldown {
                instance.state = AlertState::Firing;
                instance.last_fired = Some(now);
                return true;
            }
        }
    }

    // Firing stays firing silently while the comparator holds.
    false
}
