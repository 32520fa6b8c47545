//! `GET /ingester/ring` debug dump (spec.md §6). A minimal HTML table, not a
//! styled UI — its job is to let an operator eyeball ring membership during
//! an incident.

use tempo_ring::RingSnapshot;

pub fn render(snapshot: &RingSnapshot) -> String {
    let mut out = String::from(
        "<html><head><title>tempo ring</title></head><body><h1>ring members</h1>\
         <table border=\"1\" cellpadding=\"4\"><tr><th>address</th><th>zone</th>\
         <th>state</th><th>last heartbeat (unix nano)</th><th>tokens</th></tr>",
    );

    let mut entries: Vec<_> = snapshot.all_instances().collect();
    entries.sort_by(|a, b| a.address.cmp(&b.address));

    for entry in entries {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{:?}</td><td>{}</td><td>{}</td></tr>",
            entry.address,
            entry.zone,
            entry.state,
            entry.last_heartbeat_unix_nano,
            entry.tokens.len(),
        ));
    }

    out.push_str("</table></body></html>");
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_proto::{InstanceState, RingEntry};

    #[test]
    fn renders_every_known_instance() {
        let ring = tempo_ring::Ring::new();
        ring.upsert(
            "a:1".into(),
            RingEntry {
                address: "a:1".into(),
                zone: "zone-a".into(),
                state: InstanceState::Active,
                last_heartbeat_unix_nano: 10,
                tokens: vec![1, 2, 3],
            },
        );
        let html = render(&ring.snapshot());
        assert!(html.contains("a:1"));
        assert!(html.contains("zone-a"));
    }
}
