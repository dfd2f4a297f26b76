use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::Confidence;

/// Bounded FIFO of recent correctness flags.
pub const WINDOW_CAPACITY: usize = 32;

/// Persisted snapshot of the tracker: counters plus the rolling window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub correct_count: u64,
    pub incorrect_count: u64,
    pub window: Vec<bool>,
}

/// Rolling accuracy and streak bookkeeping for the engine's exact-match
/// correctness metric.
pub struct AccuracyTracker {
    window: VecDeque<bool>,
    correct_count: u64,
    incorrect_count: u64,
    current_streak: u64,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            correct_count: 0,
            incorrect_count: 0,
            current_streak: 0,
        }
    }

    /// Restore counters and window from a persisted snapshot. The window
    /// keeps only the newest `WINDOW_CAPACITY` entries.
    pub fn from_snapshot(snapshot: TrackerSnapshot) -> Self {
        let mut window: VecDeque<bool> = snapshot.window.into_iter().collect();
        while window.len() > WINDOW_CAPACITY {
            window.pop_front();
        }
        Self {
            window,
            correct_count: snapshot.correct_count,
            incorrect_count: snapshot.incorrect_count,
            current_streak: 0,
        }
    }

    pub fn update(&mut self, correct: bool) {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(correct);

        if correct {
            self.correct_count += 1;
            self.current_streak += 1;
        } else {
            self.incorrect_count += 1;
            self.current_streak = 0;
        }
    }

    /// Percentage of hits over the rolling window; 0 when empty.
    pub fn rolling_accuracy(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let hits = self.window.iter().filter(|&&c| c).count();
        hits as f64 / self.window.len() as f64 * 100.0
    }

    pub fn confidence(&self) -> Confidence {
        confidence_for(self.rolling_accuracy())
    }

    pub fn current_streak(&self) -> u64 {
        self.current_streak
    }

    pub fn correct_count(&self) -> u64 {
        self.correct_count
    }

    pub fn incorrect_count(&self) -> u64 {
        self.incorrect_count
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            correct_count: self.correct_count,
            incorrect_count: self.incorrect_count,
            window: self.window.iter().copied().collect(),
        }
    }
}

impl Default for AccuracyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Inclusive cutoffs on rolling accuracy.
pub fn confidence_for(rolling_accuracy: f64) -> Confidence {
    if rolling_accuracy >= 60.0 {
        Confidence::High
    } else if rolling_accuracy >= 50.0 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// The feed collaborator's stats row: big/small bucket correctness with
/// per-direction streaks and their maxima. Kept separate from the engine
/// tracker; the two metrics are never merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedStats {
    pub correct_count: u64,
    pub incorrect_count: u64,
    pub correct_streak: u64,
    pub incorrect_streak: u64,
    pub max_correct_streak: u64,
    pub max_incorrect_streak: u64,
    pub acc_history: Vec<u8>,
}

impl FeedStats {
    pub fn apply(&mut self, correct: bool) {
        if correct {
            self.correct_count += 1;
            self.correct_streak += 1;
            self.incorrect_streak = 0;
            if self.correct_streak > self.max_correct_streak {
                self.max_correct_streak = self.correct_streak;
            }
        } else {
            self.incorrect_count += 1;
            self.incorrect_streak += 1;
            self.correct_streak = 0;
            if self.incorrect_streak > self.max_incorrect_streak {
                self.max_incorrect_streak = self.incorrect_streak;
            }
        }

        self.acc_history.push(if correct { 1 } else { 0 });
        if self.acc_history.len() > WINDOW_CAPACITY {
            self.acc_history.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_bounded_and_ordered() {
        let mut tracker = AccuracyTracker::new();
        for i in 0..40 {
            tracker.update(i % 2 == 0);
        }
        assert_eq!(tracker.window_len(), 32);
        let snapshot = tracker.snapshot();
        // Last 32 pushed values in push order: i = 8..40
        let expected: Vec<bool> = (8..40).map(|i| i % 2 == 0).collect();
        assert_eq!(snapshot.window, expected);
    }

    #[test]
    fn test_rolling_accuracy_math() {
        let mut tracker = AccuracyTracker::new();
        assert_eq!(tracker.rolling_accuracy(), 0.0);
        for &c in &[true, true, false, true] {
            tracker.update(c);
        }
        assert_eq!(tracker.rolling_accuracy(), 75.0);
    }

    #[test]
    fn test_confidence_thresholds_are_inclusive() {
        assert_eq!(confidence_for(60.0), Confidence::High);
        assert_eq!(confidence_for(59.99), Confidence::Medium);
        assert_eq!(confidence_for(50.0), Confidence::Medium);
        assert_eq!(confidence_for(49.99), Confidence::Low);
    }

    #[test]
    fn test_streak_resets_on_miss() {
        let mut tracker = AccuracyTracker::new();
        tracker.update(true);
        tracker.update(true);
        assert_eq!(tracker.current_streak(), 2);
        tracker.update(false);
        assert_eq!(tracker.current_streak(), 0);
        assert_eq!(tracker.correct_count(), 2);
        assert_eq!(tracker.incorrect_count(), 1);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut tracker = AccuracyTracker::new();
        for &c in &[true, false, true] {
            tracker.update(c);
        }
        let restored = AccuracyTracker::from_snapshot(tracker.snapshot());
        assert_eq!(restored.correct_count(), 2);
        assert_eq!(restored.incorrect_count(), 1);
        assert_eq!(restored.rolling_accuracy(), tracker.rolling_accuracy());
    }

    #[test]
    fn test_feed_stats_streak_maxima() {
        let mut stats = FeedStats::default();
        for &c in &[true, true, true, false, false, true] {
            stats.apply(c);
        }
        assert_eq!(stats.correct_count, 4);
        assert_eq!(stats.incorrect_count, 2);
        assert_eq!(stats.max_correct_streak, 3);
        assert_eq!(stats.max_incorrect_streak, 2);
        assert_eq!(stats.correct_streak, 1);
        assert_eq!(stats.incorrect_streak, 0);
        assert_eq!(stats.acc_history, vec![1, 1, 1, 0, 0, 1]);
    }

    #[test]
    fn test_feed_stats_history_bounded() {
        let mut stats = FeedStats::default();
        for i in 0..40 {
            stats.apply(i % 3 == 0);
        }
        assert_eq!(stats.acc_history.len(), 32);
    }
}
