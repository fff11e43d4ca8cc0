//! Run counters, the missing-user cache, and the end-of-run report.
//!
//! Counters and the cache are the only state shared across concurrent
//! tasks; both are safe for concurrent mutation on their own.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A monotonically increasing counter, safe for concurrent increments.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// All counters incremented during a reconciliation run.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub groups: Counter,
    pub members_seen: Counter,
    pub missing_groups: Counter,
    pub groups_created: Counter,
    pub group_create_errors: Counter,
    pub members_created: Counter,
    pub member_create_errors: Counter,
    pub members_removed: Counter,
    pub member_remove_errors: Counter,
}

impl RunCounters {
    /// Reset every counter at the start of a run.
    pub fn reset(&self) {
        self.groups.reset();
        self.members_seen.reset();
        self.missing_groups.reset();
        self.groups_created.reset();
        self.group_create_errors.reset();
        self.members_created.reset();
        self.member_create_errors.reset();
        self.members_removed.reset();
        self.member_remove_errors.reset();
    }
}

/// Identity keys confirmed absent at the destination.
///
/// Built incrementally during a run, never pre-seeded, never evicted;
/// a key enters at most once and suppresses any further destination
/// lookups for it.
#[derive(Debug, Default)]
pub struct MissingUserCache {
    keys: Mutex<HashSet<String>>,
}

impl MissingUserCache {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().expect("missing-user cache poisoned").contains(key)
    }

    /// Insert a key, returning true only for the first insertion.
    pub fn insert(&self, key: &str) -> bool {
        self.keys
            .lock()
            .expect("missing-user cache poisoned")
            .insert(key.to_string())
    }

    pub fn len(&self) -> usize {
        self.keys.lock().expect("missing-user cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.keys.lock().expect("missing-user cache poisoned").clear();
    }
}

/// Snapshot of a finished reconciliation run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub elapsed: Duration,
    pub groups: u64,
    pub members_seen: u64,
    pub missing_groups: u64,
    pub groups_created: u64,
    pub group_create_errors: u64,
    pub missing_users: u64,
    pub members_created: u64,
    pub member_create_errors: u64,
    pub members_removed: u64,
    pub member_remove_errors: u64,
    pub create_missing_groups: bool,
    pub remove_members: bool,
}

impl RunReport {
    /// Render the fixed-order, human-readable summary. Group-creation
    /// lines appear only when group creation was enabled, removal lines
    /// only when removal was enabled.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Time elapsed: {} ms\n", self.elapsed.as_millis()));
        out.push_str(&format!("Count of groups at source: {}\n", self.groups));
        out.push_str(&format!(
            "Count of missing groups at destination: {}\n",
            self.missing_groups
        ));
        if self.create_missing_groups {
            out.push_str(&format!(
                "Count of missing groups created: {}\n",
                self.groups_created
            ));
            out.push_str(&format!(
                "Count of missing groups not created due to errors: {}\n",
                self.group_create_errors
            ));
        }
        out.push_str(&format!(
            "Count of users members at source: {}\n",
            self.members_seen
        ));
        out.push_str(&format!(
            "Count of missing users at destination: {}\n",
            self.missing_users
        ));
        out.push_str(&format!(
            "Count of users members created at destination: {}\n",
            self.members_created
        ));
        out.push_str(&format!(
            "Count of users members not created due to errors: {}\n",
            self.member_create_errors
        ));
        if self.remove_members {
            out.push_str(&format!(
                "Count of users members removed at destination: {}\n",
                self.members_removed
            ));
            out.push_str(&format!(
                "Count of users members not removed due to errors: {}\n",
                self.member_remove_errors
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        RunReport {
            elapsed: Duration::from_millis(1234),
            groups: 10,
            members_seen: 120,
            missing_groups: 2,
            groups_created: 1,
            group_create_errors: 1,
            missing_users: 3,
            members_created: 15,
            member_create_errors: 1,
            members_removed: 4,
            member_remove_errors: 0,
            create_missing_groups: false,
            remove_members: false,
        }
    }

    #[test]
    fn counter_increments_and_resets() {
        let counter = Counter::default();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn counters_are_shareable_across_threads() {
        let counters = std::sync::Arc::new(RunCounters::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = std::sync::Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.members_created.inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.members_created.get(), 8000);
    }

    #[test]
    fn missing_user_cache_inserts_once() {
        let cache = MissingUserCache::default();
        assert!(cache.insert("jane.doe"));
        assert!(!cache.insert("jane.doe"));
        assert!(cache.contains("jane.doe"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.insert("jane.doe"));
    }

    #[test]
    fn summary_base_lines() {
        let text = report().summary();
        assert!(text.starts_with("Time elapsed: 1234 ms\n"));
        assert!(text.contains("Count of groups at source: 10\n"));
        assert!(text.contains("Count of missing groups at destination: 2\n"));
        assert!(text.contains("Count of users members at source: 120\n"));
        assert!(text.contains("Count of missing users at destination: 3\n"));
        assert!(text.contains("Count of users members created at destination: 15\n"));
        assert!(!text.contains("missing groups created"));
        assert!(!text.contains("removed"));
    }

    #[test]
    fn summary_includes_creation_lines_when_enabled() {
        let mut r = report();
        r.create_missing_groups = true;
        let text = r.summary();
        assert!(text.contains("Count of missing groups created: 1\n"));
        assert!(text.contains("Count of missing groups not created due to errors: 1\n"));
    }

    #[test]
    fn summary_includes_removal_lines_when_enabled() {
        let mut r = report();
        r.remove_members = true;
        let text = r.summary();
        assert!(text.contains("Count of users members removed at destination: 4\n"));
        assert!(text.contains("Count of users members not removed due to errors: 0\n"));
    }

    #[test]
    fn summary_line_order_is_fixed() {
        let mut r = report();
        r.create_missing_groups = true;
        r.remove_members = true;
        let text = r.summary();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 11);
        assert!(lines[0].starts_with("Time elapsed"));
        assert!(lines[3].starts_with("Count of missing groups created"));
        assert!(lines[9].starts_with("Count of users members removed"));
    }
}
