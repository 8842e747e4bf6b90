use std::collections::BTreeMap;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde_json::{Map, Value};
use tracing::debug;

/// Balanced random assignment shared by every participant.
///
/// For each tag the counter tracks how often every combination of factor levels
/// was handed out and always picks among the least used ones.
#[derive(Debug, Default)]
pub struct AssignmentCounter {
    counts: Mutex<BTreeMap<String, Vec<u64>>>,
}

impl AssignmentCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks a combination for `tag`, records it and returns `{factor: level}`.
    ///
    /// Factors without levels are skipped.
    pub fn assign(&self, tag: &str, factors: &BTreeMap<String, Vec<Value>>) -> Map<String, Value> {
        let factors: Vec<(&String, &Vec<Value>)> = factors
            .iter()
            .filter(|(_, levels)| !levels.is_empty())
            .collect();
        let combinations: usize = factors.iter().map(|(_, levels)| levels.len()).product();

        let index = {
            let mut counts = self.counts.lock();
            let slots = counts.entry(tag.to_string()).or_default();
            if slots.len() != combinations {
                slots.resize(combinations, 0);
            }
            let least = slots.iter().copied().min().unwrap_or(0);
            let candidates: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter(|(_, count)| **count == least)
                .map(|(index, _)| index)
                .collect();
            let picked = candidates
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(0);
            if let Some(slot) = slots.get_mut(picked) {
                *slot += 1;
            }
            picked
        };

        let mut assigned = Map::new();
        let mut remainder = index;
        for (name, levels) in factors.iter().rev() {
            let level = remainder % levels.len();
            remainder /= levels.len();
            assigned.insert((*name).clone(), levels[level].clone());
        }
        debug!(tag, combination = index, "assigned condition");
        assigned
    }

    /// Counts an assignment made elsewhere, such as one held by a resumed
    /// participant. Returns `false` when `assigned` matches no combination.
    pub fn record(
        &self,
        tag: &str,
        factors: &BTreeMap<String, Vec<Value>>,
        assigned: &Map<String, Value>,
    ) -> bool {
        self.adjust(tag, factors, assigned, |slot| *slot += 1)
    }

    /// Takes back an assignment whose transition was never committed.
    pub fn release(
        &self,
        tag: &str,
        factors: &BTreeMap<String, Vec<Value>>,
        assigned: &Map<String, Value>,
    ) -> bool {
        self.adjust(tag, factors, assigned, |slot| *slot = slot.saturating_sub(1))
    }

    fn adjust(
        &self,
        tag: &str,
        factors: &BTreeMap<String, Vec<Value>>,
        assigned: &Map<String, Value>,
        update: impl FnOnce(&mut u64),
    ) -> bool {
        let mut index = 0;
        let mut combinations = 1;
        for (name, levels) in factors.iter().filter(|(_, levels)| !levels.is_empty()) {
            let Some(level) = assigned
                .get(name)
                .and_then(|value| levels.iter().position(|level| level == value))
            else {
                return false;
            };
            index = index * levels.len() + level;
            combinations *= levels.len();
        }

        let mut counts = self.counts.lock();
        let slots = counts.entry(tag.to_string()).or_default();
        if slots.len() != combinations {
            slots.resize(combinations, 0);
        }
        match slots.get_mut(index) {
            Some(slot) => {
                update(slot);
                true
            }
            None => false,
        }
    }

    /// Current usage count per combination index for `tag`.
    pub fn counts(&self, tag: &str) -> Vec<u64> {
        self.counts.lock().get(tag).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factors() -> BTreeMap<String, Vec<Value>> {
        BTreeMap::from([
            ("anchor".to_string(), vec![json!("low"), json!("high")]),
            ("frame".to_string(), vec![json!("gain"), json!("loss"), json!("none")]),
        ])
    }

    #[test]
    fn assignments_stay_balanced() {
        let counter = AssignmentCounter::new();
        for _ in 0..12 {
            let assigned = counter.assign("cond", &factors());
            assert_eq!(assigned.len(), 2);
        }
        assert_eq!(counter.counts("cond"), vec![2; 6]);
    }

    #[test]
    fn every_combination_is_used_before_repeats() {
        let counter = AssignmentCounter::new();
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..6 {
            let assigned = counter.assign("cond", &factors());
            seen.insert(Value::Object(assigned).to_string());
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn tags_are_counted_independently() {
        let counter = AssignmentCounter::new();
        counter.assign("a", &factors());
        assert_eq!(counter.counts("a").iter().sum::<u64>(), 1);
        assert!(counter.counts("b").is_empty());
    }

    #[test]
    fn recorded_assignments_steer_new_ones() {
        let counter = AssignmentCounter::new();
        let mut low_gain = Map::new();
        low_gain.insert("anchor".into(), json!("low"));
        low_gain.insert("frame".into(), json!("gain"));
        for _ in 0..5 {
            assert!(counter.record("cond", &factors(), &low_gain));
        }
        for _ in 0..5 {
            let assigned = counter.assign("cond", &factors());
            assert_ne!(assigned, low_gain);
        }
        assert_eq!(counter.counts("cond"), vec![5, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn released_assignment_is_handed_out_again() {
        let counter = AssignmentCounter::new();
        let assigned = counter.assign("cond", &factors());
        assert!(counter.release("cond", &factors(), &assigned));
        assert_eq!(counter.counts("cond"), vec![0; 6]);
        assert!(counter.release("cond", &factors(), &assigned));
        assert_eq!(counter.counts("cond"), vec![0; 6]);
    }

    #[test]
    fn unknown_levels_are_not_recorded() {
        let counter = AssignmentCounter::new();
        let mut stray = Map::new();
        stray.insert("anchor".into(), json!("medium"));
        stray.insert("frame".into(), json!("gain"));
        assert!(!counter.record("cond", &factors(), &stray));
        assert!(counter.counts("cond").is_empty());
    }

    #[test]
    fn no_factors_yields_empty_assignment() {
        let counter = AssignmentCounter::new();
        assert!(counter.assign("empty", &BTreeMap::new()).is_empty());
    }
}
