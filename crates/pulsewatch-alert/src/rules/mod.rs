pub mod absolute;
pub mod amplitude;

use crate::Detector;
use pulsewatch_common::types::DetectionType;

static ABSOLUTE: absolute::AbsoluteDetector = absolute::AbsoluteDetector;
static AMPLITUDE: amplitude::AmplitudeDetector = amplitude::AmplitudeDetector;

/// Returns the detector registered for a detection type.
pub fn detector_for(kind: DetectionType) -> &'static dyn Detector {
    match kind {
        DetectionType::Absolute => &ABSOLUTE,
        DetectionType::Amplitude => &AMPLITUDE,
    }
}
