//! Pure rule-state transitions.

use crate::Evaluation;
use pulsewatch_common::duration::{
    parse_duration_or, DEFAULT_DURATION_SECS, DEFAULT_SILENCE_SECS,
};
use pulsewatch_common::types::{Condition, ContactState, Rule, RuleState};

/// Computes the state following `old` after evaluating `rule` at `now`.
///
/// The returned state keeps `old.version`; the store bumps it on write.
pub fn advance(old: &RuleState, rule: &Rule, eval: &Evaluation, now: i64) -> RuleState {
    let mut next = old.clone();
    next.last_check_value = eval.value;
    next.updated_at = now;

    // 静默期结束：清空窗口并重置计数
    if matches!(next.silence_end, Some(end) if now >= end) {
        next.silence_start = None;
        next.silence_end = None;
        next.notify_counter = 0;
        next.contact_state = ContactState::Normal;
    }
    let in_silence = next.in_silence(now);

    if eval.exceeded {
        next.last_triggered_value = Some(eval.value);
        next.last_triggered_severity = eval.severity;
        next.last_triggered_at = Some(now);
        let first = *next.first_triggered_at.get_or_insert(now);

        let duration = parse_duration_or(&rule.duration, DEFAULT_DURATION_SECS);
        if now - first >= duration {
            next.condition = Condition::Alerting;
            if !in_silence {
                next.notify_counter += 1;
                if next.notify_counter >= rule.times.max(1) {
                    let silence = parse_duration_or(&rule.silence_period, DEFAULT_SILENCE_SECS);
                    next.silence_start = Some(now);
                    next.silence_end = Some(now + silence);
                    next.contact_state = ContactState::Silenced;
                }
            }
        } else if next.condition == Condition::Resolved {
            next.condition = Condition::Normal;
        }
    } else {
        next.condition = match old.condition {
            Condition::Alerting => Condition::Resolved,
            _ => Condition::Normal,
        };
        next.first_triggered_at = None;
        next.last_triggered_severity = None;
        if !in_silence {
            next.notify_counter = 0;
        }
    }

    next
}

/// True when `next` differs from a stored `old` only in the check value,
/// so a single-column update is enough.
pub fn is_check_value_only(old: &RuleState, next: &RuleState) -> bool {
    if old.version == 0 {
        return false;
    }
    let mut probe = next.clone();
    probe.last_check_value = old.last_check_value;
    probe.updated_at = old.updated_at;
    probe == *old
}
