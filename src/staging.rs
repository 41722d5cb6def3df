//! Debounced staging re-evaluation.
//!
//! Every staging-relevant mutation marks its stream dirty with a deadline
//! `now + debounce`; a new edit on the same stream pushes the deadline out
//! again (restarting debounce). A periodic reconciliation pass collects due
//! streams and recomputes `has_staging_changes` for each. Deadlines are keyed
//! per stream id, so overlapping edits to different streams never interfere.
//!
//! The clock is supplied by the caller, which keeps the whole lifecycle
//! deterministic under test.

use std::collections::HashMap;

pub const DEFAULT_DEBOUNCE_MS: i64 = 300;

#[derive(Debug)]
pub struct StagingScheduler {
    debounce_ms: i64,
    deadlines: HashMap<String, i64>,
}

impl StagingScheduler {
    pub fn new(debounce_ms: i64) -> Self {
        Self {
            debounce_ms,
            deadlines: HashMap::new(),
        }
    }

    /// Schedule (or reschedule) a staging re-check for one stream.
    pub fn mark_dirty(&mut self, stream_id: &str, now_ms: i64) {
        self.deadlines
            .insert(stream_id.to_string(), now_ms + self.debounce_ms);
    }

    /// Drop any pending re-check, e.g. after a launch already settled the flag.
    pub fn clear(&mut self, stream_id: &str) {
        self.deadlines.remove(stream_id);
    }

    pub fn is_dirty(&self, stream_id: &str) -> bool {
        self.deadlines.contains_key(stream_id)
    }

    /// Collect and remove every stream whose debounce window has settled.
    pub fn take_due(&mut self, now_ms: i64) -> Vec<String> {
        let mut due: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now_ms)
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        for id in &due {
            self.deadlines.remove(id);
        }
        due
    }

    pub fn pending_count(&self) -> usize {
        self.deadlines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_settles_after_debounce() {
        let mut sched = StagingScheduler::new(300);
        sched.mark_dirty("s1", 1000);

        assert!(sched.take_due(1299).is_empty());
        assert_eq!(sched.take_due(1300), vec!["s1".to_string()]);
        // One-shot: collected entries are gone
        assert!(sched.take_due(2000).is_empty());
    }

    #[test]
    fn new_edit_restarts_the_window() {
        let mut sched = StagingScheduler::new(300);
        sched.mark_dirty("s1", 1000);
        sched.mark_dirty("s1", 1200);

        assert!(sched.take_due(1300).is_empty());
        assert_eq!(sched.take_due(1500), vec!["s1".to_string()]);
    }

    #[test]
    fn streams_are_keyed_independently() {
        let mut sched = StagingScheduler::new(300);
        sched.mark_dirty("s1", 1000);
        sched.mark_dirty("s2", 1250);

        let due = sched.take_due(1300);
        assert_eq!(due, vec!["s1".to_string()]);
        assert!(sched.is_dirty("s2"));
    }

    #[test]
    fn clear_cancels_a_pending_check() {
        let mut sched = StagingScheduler::new(300);
        sched.mark_dirty("s1", 1000);
        sched.clear("s1");
        assert!(sched.take_due(5000).is_empty());
    }
}
