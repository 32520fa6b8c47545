//! K-way merge of sorted partial span streams with identity-tuple dedup
//! (spec.md §4.4 "Merging", §8 "Exactly-once by identity").

use std::collections::HashSet;

use tempo_proto::Span;

/// Merges `streams` by `(TraceID, StartNanos)`, dropping any span whose
/// `(TraceID, SpanID, StartNanos)` identity tuple has already been emitted.
/// Each input stream need not be individually sorted; this sorts the
/// concatenation once rather than doing a true streaming merge, which is
/// simpler and cheap enough at the span counts a single federated query
/// returns.
pub fn merge_dedup(streams: Vec<Vec<Span>>) -> Vec<Span> {
    let mut all: Vec<Span> = streams.into_iter().flatten().collect();
    all.sort_by(|a, b| {
        (a.trace_id, a.start_unix_nano).cmp(&(b.trace_id, b.start_unix_nano))
    });

    let mut seen = HashSet::new();
    all.into_iter()
        .filter(|s| seen.insert((s.trace_id, s.span_id, s.start_unix_nano)))
        .collect()
}
