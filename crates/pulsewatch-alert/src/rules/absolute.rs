use crate::{Detector, Evaluation};
use pulsewatch_common::types::{DetectionType, MetricSample, Rule, Severity};

/// Compares every scaled sample against the rule thresholds.
///
/// The rule exceeds only when every sample in the window breaches some
/// threshold, so a single spike cannot trigger it.
pub struct AbsoluteDetector;

/// Highest severity whose threshold `value` breaches, checked crit → warn → info.
fn breach(rule: &Rule, value: f64) -> Option<Severity> {
    rule.thresholds
        .by_priority()
        .find(|(_, threshold)| rule.operator.check(value, *threshold))
        .map(|(severity, _)| severity)
}

impl Detector for AbsoluteDetector {
    fn kind(&self) -> DetectionType {
        DetectionType::Absolute
    }

    fn evaluate(&self, rule: &Rule, window: &[MetricSample]) -> Evaluation {
        let Some(last) = window.last() else {
            return Evaluation::normal(0.0);
        };

        let mut all_exceeded = true;
        let mut last_severity = None;
        for sample in window {
            let severity = breach(rule, sample.value * rule.scale);
            if severity.is_none() {
                all_exceeded = false;
            }
            last_severity = severity;
        }

        let value = last.value * rule.scale;
        if all_exceeded {
            Evaluation {
                exceeded: true,
                value,
                severity: last_severity,
            }
        } else {
            Evaluation::normal(value)
        }
    }
}
