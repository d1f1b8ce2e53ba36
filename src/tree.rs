//! The profile tree data model: [`CallMetrics`] nodes rooted in a [`Profile`].
//!
//! Grounded on the teacher's `CallPathPool`/`CallPathTiming` pair in
//! `reqray::internal`, generalized from a pool-indexed arena (needed there
//! to satisfy `tracing`'s span-extension borrow rules) to an owned tree,
//! since this crate's profiler builds trees outside of `tracing` extensions.
//! Field names mirror `profiler/sink/file.go`'s JSON encoding of the
//! original Go `CallMetrics`/`Profile` structs exactly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::stats::{Accumulator, Sealed};

/// One node in a profile tree: the aggregated statistics for every call made
/// at a particular call *path* (not merely a particular function -- two
/// calls to the same function from different call sites are different
/// nodes, mirroring how the teacher keys children by callsite identity).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetrics {
    pub fn_name: String,
    pub invocations: u64,
    #[serde(with = "duration_nanos")]
    pub total_time: Duration,
    #[serde(with = "duration_nanos")]
    pub min_time: Duration,
    #[serde(with = "duration_nanos")]
    pub max_time: Duration,
    #[serde(with = "duration_nanos")]
    pub mean_time: Duration,
    #[serde(with = "duration_nanos")]
    pub median_time: Duration,
    #[serde(with = "duration_nanos")]
    pub p50_time: Duration,
    #[serde(with = "duration_nanos")]
    pub p75_time: Duration,
    #[serde(with = "duration_nanos")]
    pub p90_time: Duration,
    #[serde(with = "duration_nanos")]
    pub p99_time: Duration,
    pub std_dev: f64,
    pub nested_calls: Vec<CallMetrics>,
}

impl CallMetrics {
    /// Build a sealed node from an accumulator and its already-sealed
    /// children. Invariants checked here mirror SPEC_FULL.md §8: the sum of
    /// child total times must not exceed this node's total time, and
    /// `invocations >= 1`.
    pub(crate) fn from_sealed(fn_name: String, sealed: Sealed, nested_calls: Vec<CallMetrics>) -> Self {
        debug_assert!(sealed.count >= 1);
        CallMetrics {
            fn_name,
            invocations: sealed.count,
            total_time: sealed.total,
            min_time: sealed.min,
            max_time: sealed.max,
            mean_time: sealed.mean,
            median_time: sealed.median,
            p50_time: sealed.p50,
            p75_time: sealed.p75,
            p90_time: sealed.p90,
            p99_time: sealed.p99,
            std_dev: sealed.std_dev_nanos,
            nested_calls,
        }
    }
}

/// A single sealed profile: one root invocation of a user-specified target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: u64,
    pub label: Option<String>,
    pub created_at: u128,
    pub target: CallMetrics,
}

impl Profile {
    pub fn new(id: u64, label: Option<String>, target: CallMetrics) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos();
        Profile {
            id,
            label,
            created_at,
            target,
        }
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_nanos() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_serialization_is_identity() {
        let mut g_acc = Accumulator::new();
        g_acc.record(Duration::from_nanos(10));
        g_acc.record(Duration::from_nanos(20));
        let child = CallMetrics::from_sealed("pkg.g".to_string(), g_acc.seal(), vec![]);

        let mut f_acc = Accumulator::new();
        f_acc.record(Duration::from_nanos(100));
        let root = CallMetrics::from_sealed("pkg.f".to_string(), f_acc.seal(), vec![child]);

        let profile = Profile::new(1, Some("run-a".to_string()), root);

        let json = serde_json::to_string(&profile).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, profile.id);
        assert_eq!(back.label, profile.label);
        assert_eq!(back.created_at, profile.created_at);
        assert_eq!(back.target.fn_name, profile.target.fn_name);
        assert_eq!(back.target.invocations, profile.target.invocations);
        assert_eq!(back.target.nested_calls.len(), profile.target.nested_calls.len());
    }
}
