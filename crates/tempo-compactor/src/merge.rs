//! Merge semantics for a group of input blocks: identity-tuple dedup,
//! attribute-set union with deterministic last-write-wins by input block id
//! (spec.md §4.5 "Merge semantics").

use std::collections::BTreeMap;

use tempo_proto::{Attribute, BlockId, Span};

/// Merges spans pulled from multiple input blocks into one deduplicated set.
/// Spans sharing a `(TraceID, SpanID, StartNanos)` identity tuple across
/// inputs are emitted once; their attribute lists are unioned, with
/// conflicting keys resolved by the input block id ordering — the span from
/// the numerically greatest block id wins, both for the attribute value and
/// for whichever non-attribute fields differ (spec.md is silent on why two
/// "duplicate" spans would ever disagree outside attributes, but picking one
/// deterministic winner covers it without guessing at a merge strategy the
/// spec never asked for).
pub fn merge_spans(inputs: Vec<(BlockId, Vec<Span>)>) -> Vec<Span> {
    let mut by_identity: BTreeMap<(tempo_proto::TraceId, tempo_proto::SpanId, u64), Vec<(BlockId, Span)>> =
        BTreeMap::new();

    for (block_id, spans) in inputs {
        for span in spans {
            let key = (span.trace_id, span.span_id, span.start_unix_nano);
            by_identity.entry(key).or_default().push((block_id, span));
        }
    }

    let mut out = Vec::with_capacity(by_identity.len());
    for (_, mut group) in by_identity {
        group.sort_by_key(|(id, _)| *id);
        if group.len() == 1 {
            out.push(group.pop().unwrap().1);
            continue;
        }
        out.push(union_duplicates(group));
    }
    out
}

/// `group` is sorted ascending by source block id; the last entry is the
/// deterministic winner for base fields, and for each attribute key the
/// highest-block-id source that set it wins.
fn union_duplicates(group: Vec<(BlockId, Span)>) -> Span {
    let mut attrs: BTreeMap<String, (BlockId, Attribute)> = BTreeMap::new();
    for (block_id, span) in &group {
        for attr in &span.attributes {
            let replace = match attrs.get(&attr.key) {
                None => true,
                Some((existing_id, _)) => block_id >= existing_id,
            };
            if replace {
                attrs.insert(attr.key.clone(), (*block_id, attr.clone()));
            }
        }
    }

    let mut base = group.last().expect("group is non-empty").1.clone();
    base.attributes = attrs.into_values().map(|(_, attr)| attr).collect();
    base
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_proto::{AttributeValue, SpanId, SpanKind, Status, TraceId};

    fn span(trace: u8, span_id: u8, start: u64, attrs: Vec<(&str, &str)>) -> Span {
        Span {
            trace_id: TraceId([trace; 16]),
            span_id: SpanId([span_id; 8]),
            parent_span_id: None,
            service_name: "svc".into(),
            operation_name: "op".into(),
            kind: SpanKind::Server,
            start_unix_nano: start,
            duration_nano: 10,
            status: Status::unset(),
            attributes: attrs
                .into_iter()
                .map(|(k, v)| Attribute {
                    key: k.into(),
                    value: AttributeValue::String(v.into()),
                })
                .collect(),
            events: vec![],
            links: vec![],
        }
    }

    #[test]
    fn non_overlapping_spans_pass_through_unchanged() {
        let a = BlockId::new();
        let merged = merge_spans(vec![(a, vec![span(1, 1, 100, vec![])])]);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn duplicate_identity_emitted_once_with_attributes_unioned() {
        let mut ids = vec![BlockId::new(), BlockId::new()];
        ids.sort();
        let (low, high) = (ids[0], ids[1]);

        let a = span(1, 1, 100, vec![("host", "a")]);
        let b = span(1, 1, 100, vec![("region", "us")]);

        let merged = merge_spans(vec![(low, vec![a]), (high, vec![b])]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].attributes.len(), 2);
    }

    #[test]
    fn conflicting_key_resolved_by_higher_block_id() {
        let mut ids = vec![BlockId::new(), BlockId::new()];
        ids.sort();
        let (low, high) = (ids[0], ids[1]);

        let a = span(1, 1, 100, vec![("host", "from-low")]);
        let b = span(1, 1, 100, vec![("host", "from-high")]);

        let merged = merge_spans(vec![(low, vec![a]), (high, vec![b])]);
        assert_eq!(merged.len(), 1);
        let host = merged[0]
            .attributes
            .iter()
            .find(|a| a.key == "host")
            .unwrap();
        assert_eq!(host.value, AttributeValue::String("from-high".into()));
    }
}
