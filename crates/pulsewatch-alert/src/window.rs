use pulsewatch_common::duration::{parse_duration_or, DEFAULT_DURATION_SECS};
use pulsewatch_common::types::{MetricSample, Rule};

/// Duration window of a rule in seconds, 5m when unset or unparseable.
pub fn rule_duration_secs(rule: &Rule) -> i64 {
    parse_duration_or(&rule.duration, DEFAULT_DURATION_SECS)
}

/// Picks the samples no older than `duration_secs` before the latest sample.
///
/// Samples may arrive unordered; the result is sorted by timestamp. When
/// fewer than two samples fall inside the window, all samples are used.
pub fn select(samples: &[MetricSample], duration_secs: i64) -> Vec<MetricSample> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp);

    let Some(latest) = sorted.last().map(|s| s.timestamp) else {
        return sorted;
    };
    let cutoff = latest - duration_secs;
    let windowed: Vec<MetricSample> = sorted
        .iter()
        .filter(|s| s.timestamp >= cutoff)
        .copied()
        .collect();

    if windowed.len() < 2 {
        sorted
    } else {
        windowed
    }
}
