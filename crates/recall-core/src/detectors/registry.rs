use std::fmt;

use super::Detector;

/// Detectors ordered by ascending priority, with insertion order breaking ties.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detector, replacing any registered under the same name.
    pub fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.retain(|d| d.name() != detector.name());
        self.detectors.push(detector);
        // `sort_by_key` is stable, so equal priorities keep registration order.
        self.detectors.sort_by_key(|d| d.priority());
    }

    /// Enabled detectors in priority order.
    pub fn enabled_detectors(&self) -> impl Iterator<Item = &dyn Detector> {
        self.detectors
            .iter()
            .map(|d| d.as_ref())
            .filter(|d| d.is_enabled())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Detector> {
        self.detectors
            .iter()
            .find(|d| d.name() == name)
            .map(|d| d.as_ref())
    }

    /// Registered names in priority order.
    pub fn names(&self) -> Vec<String> {
        self.detectors.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn clear(&mut self) {
        self.detectors.clear();
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("detectors", &self.names())
            .finish()
    }
}
