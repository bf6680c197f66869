//! Bounded rolling buffer of ingested observations
//!
//! The buffer grows until it exceeds `max_size`, then drops its oldest entries
//! in one step so that only the `trim_to` most recent observations remain.
//! Trimming in bulk keeps ingestion cheap: most pushes touch nothing but the tail.

use crate::events::{ModuleTag, Observation};
use std::collections::{BTreeMap, VecDeque};

/// Rolling observation buffer with bulk trimming
#[derive(Debug)]
pub struct ContextBuffer {
    observations: VecDeque<Observation>,
    max_size: usize,
    trim_to: usize,
}

impl ContextBuffer {
    /// Create a buffer that trims to `trim_to` entries once it exceeds `max_size`
    ///
    /// # Examples
    ///
    /// ```
    /// use sitaware::aggregator::ContextBuffer;
    ///
    /// let buffer = ContextBuffer::new(1000, 500);
    /// assert!(buffer.is_empty());
    /// ```
    pub fn new(max_size: usize, trim_to: usize) -> Self {
        Self {
            observations: VecDeque::with_capacity(max_size + 1),
            max_size,
            trim_to: trim_to.min(max_size),
        }
    }

    /// Append an observation, trimming oldest-first if the bound is exceeded
    ///
    /// Returns the number of observations evicted by this push.
    pub fn push(&mut self, observation: Observation) -> usize {
        self.observations.push_back(observation);
        if self.observations.len() > self.max_size {
            let evicted = self.observations.len() - self.trim_to;
            self.observations.drain(..evicted);
            return evicted;
        }
        0
    }

    /// The `count` most recent observations, oldest first
    pub fn recent(&self, count: usize) -> Vec<Observation> {
        let skip = self.observations.len().saturating_sub(count);
        self.observations.iter().skip(skip).cloned().collect()
    }

    /// Drop buffered observations whose source is not in `modules`
    ///
    /// Returns the number of observations removed.
    pub fn retain_modules(&mut self, modules: &[ModuleTag]) -> usize {
        let before = self.observations.len();
        self.observations
            .retain(|observation| modules.contains(&observation.source));
        before - self.observations.len()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn clear(&mut self) {
        self.observations.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }
}

impl Default for ContextBuffer {
    fn default() -> Self {
        Self::new(1000, 500)
    }
}

/// Group observations by source, the last one seen for each module wins
pub fn latest_by_module(observations: &[Observation]) -> BTreeMap<ModuleTag, Observation> {
    let mut latest = BTreeMap::new();
    for observation in observations {
        latest.insert(observation.source, observation.clone());
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelTag, Payload};
    use chrono::Utc;
    use serde_json::json;

    fn create_observation(source: ModuleTag, seq: usize) -> Observation {
        let mut payload = Payload::new();
        payload.insert("seq".to_string(), json!(seq));
        Observation {
            source,
            origin_channel: ChannelTag::Internal,
            timestamp: Utc::now(),
            payload,
            metadata: None,
        }
    }

    fn seq_of(observation: &Observation) -> u64 {
        observation.payload["seq"].as_u64().unwrap()
    }

    #[test]
    fn test_push_1001_leaves_last_500_in_order() {
        let mut buffer = ContextBuffer::new(1000, 500);

        let mut evicted = 0;
        for seq in 0..1001 {
            evicted += buffer.push(create_observation(ModuleTag::Navigation, seq));
        }

        assert_eq!(buffer.len(), 500);
        assert_eq!(evicted, 501);
        let seqs: Vec<u64> = buffer.iter().map(seq_of).collect();
        let expected: Vec<u64> = (501..1001).collect();
        assert_eq!(seqs, expected);
    }

    #[test]
    fn test_no_trim_at_exact_capacity() {
        let mut buffer = ContextBuffer::new(10, 5);
        for seq in 0..10 {
            assert_eq!(buffer.push(create_observation(ModuleTag::Crew, seq)), 0);
        }
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    fn test_recent_returns_tail() {
        let mut buffer = ContextBuffer::default();
        for seq in 0..60 {
            buffer.push(create_observation(ModuleTag::Weather, seq));
        }

        let recent = buffer.recent(50);
        assert_eq!(recent.len(), 50);
        assert_eq!(seq_of(&recent[0]), 10);
        assert_eq!(seq_of(&recent[49]), 59);

        assert_eq!(buffer.recent(100).len(), 60);
    }

    #[test]
    fn test_latest_by_module_most_recent_wins() {
        let mut buffer = ContextBuffer::default();
        buffer.push(create_observation(ModuleTag::Navigation, 1));
        buffer.push(create_observation(ModuleTag::Weather, 2));
        buffer.push(create_observation(ModuleTag::Navigation, 3));

        let latest = latest_by_module(&buffer.recent(50));
        assert_eq!(latest.len(), 2);
        assert_eq!(seq_of(&latest[&ModuleTag::Navigation]), 3);
        assert_eq!(seq_of(&latest[&ModuleTag::Weather]), 2);
    }

    #[test]
    fn test_latest_by_module_respects_sample_window() {
        let mut buffer = ContextBuffer::default();
        buffer.push(create_observation(ModuleTag::Mission, 0));
        for seq in 1..=3 {
            buffer.push(create_observation(ModuleTag::Sensors, seq));
        }

        let latest = latest_by_module(&buffer.recent(3));
        assert!(!latest.contains_key(&ModuleTag::Mission));
        assert_eq!(seq_of(&latest[&ModuleTag::Sensors]), 3);
    }

    #[test]
    fn test_retain_modules_drops_other_sources() {
        let mut buffer = ContextBuffer::default();
        buffer.push(create_observation(ModuleTag::Crew, 0));
        buffer.push(create_observation(ModuleTag::Navigation, 1));
        buffer.push(create_observation(ModuleTag::Crew, 2));

        assert_eq!(buffer.retain_modules(&[ModuleTag::Navigation]), 2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(seq_of(&buffer.recent(1)[0]), 1);
    }

    #[test]
    fn test_clear() {
        let mut buffer = ContextBuffer::default();
        buffer.push(create_observation(ModuleTag::Crew, 0));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
