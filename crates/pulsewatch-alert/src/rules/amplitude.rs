use crate::{Detector, Evaluation};
use pulsewatch_common::types::{DetectionType, MetricSample, Rule};

/// Floor applied to the window minimum before dividing by it.
const MIN_EPSILON: f64 = 0.000_001;

/// Relative spread of the window: `(max - min) / min * 100`.
///
/// The spread always breaches upward; the rule's operator does not apply.
pub struct AmplitudeDetector;

pub fn amplitude(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut min = values.iter().copied().fold(f64::INFINITY, f64::min);
    if min == 0.0 {
        min = MIN_EPSILON;
    }
    Some((max - min) / min * 100.0)
}

impl Detector for AmplitudeDetector {
    fn kind(&self) -> DetectionType {
        DetectionType::Amplitude
    }

    fn evaluate(&self, rule: &Rule, window: &[MetricSample]) -> Evaluation {
        let values: Vec<f64> = window.iter().map(|s| s.value * rule.scale).collect();
        let Some(amp) = amplitude(&values) else {
            return Evaluation::normal(0.0);
        };

        match rule
            .thresholds
            .by_priority()
            .find(|(_, threshold)| amp > *threshold)
        {
            Some((severity, _)) => Evaluation {
                exceeded: true,
                value: amp,
                severity: Some(severity),
            },
            None => Evaluation::normal(amp),
        }
    }
}
