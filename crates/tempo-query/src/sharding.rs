//! Query sharding: trace-id lookups route to one log partition; range
//! queries split into sub-intervals bounded by a target job size (spec.md
//! §4.4 "Sharding").

use std::time::Duration;

/// Splits `[start, end]` into sub-intervals no wider than
/// `target_bytes_per_job / avg_bytes_per_ns`, per spec.md §4.4. Always
/// returns at least one interval, even if `start == end`.
pub fn split_range(
    start: u64,
    end: u64,
    target_bytes_per_job: u64,
    avg_bytes_per_ns: f64,
) -> Vec<(u64, u64)> {
    if end <= start {
        return vec![(start, end)];
    }
    let width_ns = if avg_bytes_per_ns > 0.0 {
        ((target_bytes_per_job as f64) / avg_bytes_per_ns).max(1.0) as u64
    } else {
        end - start
    };

    let mut out = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = cursor.saturating_add(width_ns).min(end);
        out.push((cursor, next));
        cursor = next;
    }
    out
}

/// Partition a log assigns a `TraceID` to, per spec.md §3's fold-to-32-bit
/// rule applied mod the partition count.
pub fn owning_partition(trace_id: &tempo_proto::TraceId, partition_count: u32) -> u32 {
    trace_id.partition_key() % partition_count.max(1)
}

/// A simple per-run concurrency cap, matching spec.md §4.4's
/// `concurrentJobs`: callers `acquire` before dispatching a sub-interval job.
pub struct JobLimiter {
    semaphore: tokio::sync::Semaphore,
}

impl JobLimiter {
    pub fn new(concurrent_jobs: usize) -> Self {
        JobLimiter {
            semaphore: tokio::sync::Semaphore::new(concurrent_jobs.max(1)),
        }
    }

    pub async fn acquire(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.semaphore.acquire().await.expect("semaphore not closed")
    }
}

/// Per-call deadline budget, per spec.md §5 "Cancellation & timeouts":
/// "Each external call carries a deadline."
pub const DEFAULT_JOB_DEADLINE: Duration = Duration::from_secs(10);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_into_bounded_width_intervals() {
        // width = 100/10 = 10ns per job, so 100 jobs span [0,1000).
        let intervals = split_range(0, 1000, 100, 10.0);
        assert_eq!(intervals.len(), 100);
        assert_eq!(intervals[0], (0, 10));
        assert_eq!(*intervals.last().unwrap(), (990, 1000));
    }

    #[test]
    fn degenerate_range_yields_single_interval() {
        assert_eq!(split_range(5, 5, 100, 1.0), vec![(5, 5)]);
    }

    #[test]
    fn zero_rate_falls_back_to_one_job() {
        assert_eq!(split_range(0, 1000, 100, 0.0), vec![(0, 1000)]);
    }
}
