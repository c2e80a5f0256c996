//! Per-topic presence lists maintained from presence events.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use switchboard_shared::{Presence, PresenceDiff, Topic};

#[derive(Debug, Clone, Default)]
pub(crate) struct PresenceStore {
    topics: HashMap<Topic, BTreeMap<String, Presence>>,
}

impl PresenceStore {
    /// Replace everything known about `topic`.
    pub(crate) fn replace(&mut self, topic: &Topic, presences: &[Presence]) {
        let entries = presences
            .iter()
            .map(|presence| (presence.id.clone(), presence.clone()))
            .collect();
        self.topics.insert(topic.clone(), entries);
    }

    pub(crate) fn join(&mut self, topic: &Topic, presence: &Presence) {
        let entries = self.topics.entry(topic.clone()).or_default();
        match entries.get_mut(&presence.id) {
            Some(existing) => {
                for meta in &presence.metas {
                    if !existing.metas.iter().any(|m| same_meta(m, meta)) {
                        existing.metas.push(meta.clone());
                    }
                }
            }
            None => {
                entries.insert(presence.id.clone(), presence.clone());
            }
        }
    }

    /// Remove the metas in `presence`; an id with no metas left disappears.
    /// A leave without metas removes the id outright.
    pub(crate) fn leave(&mut self, topic: &Topic, presence: &Presence) {
        let Some(entries) = self.topics.get_mut(topic) else {
            return;
        };

        let now_empty = match entries.get_mut(&presence.id) {
            Some(existing) if !presence.metas.is_empty() => {
                existing
                    .metas
                    .retain(|m| !presence.metas.iter().any(|left| same_meta(m, left)));
                existing.metas.is_empty()
            }
            Some(_) => true,
            None => false,
        };
        if now_empty {
            entries.remove(&presence.id);
        }
    }

    pub(crate) fn apply_diff(&mut self, topic: &Topic, diff: &PresenceDiff) {
        for presence in &diff.joins {
            self.join(topic, presence);
        }
        for presence in &diff.leaves {
            self.leave(topic, presence);
        }
    }

    pub(crate) fn list(&self, topic: &str) -> Vec<&Presence> {
        self.topics
            .get(topic)
            .map(|entries| entries.values().collect())
            .unwrap_or_default()
    }
}

/// Metas are matched by `phx_ref` when both carry one, otherwise by value.
fn same_meta(a: &Value, b: &Value) -> bool {
    match (a.get("phx_ref"), b.get("phx_ref")) {
        (Some(left), Some(right)) => left == right,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn presence(id: &str, refs: &[&str]) -> Presence {
        Presence::new(id, refs.iter().map(|r| json!({ "phx_ref": r })).collect())
    }

    #[test]
    fn state_replaces_then_diff_applies() {
        let topic = Topic::from("room:1");
        let mut store = PresenceStore::default();
        store.replace(&topic, &[presence("ada", &["a1"]), presence("bob", &["b1"])]);

        store.apply_diff(
            &topic,
            &PresenceDiff {
                joins: vec![presence("ada", &["a2"]), presence("cy", &["c1"])],
                leaves: vec![presence("bob", &["b1"])],
            },
        );

        let ids: Vec<&str> = store.list("room:1").iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ada", "cy"]);
        assert_eq!(store.list("room:1")[0].metas.len(), 2);
    }

    #[test]
    fn partial_leave_keeps_remaining_metas() {
        let topic = Topic::from("room:1");
        let mut store = PresenceStore::default();
        store.join(&topic, &presence("ada", &["a1", "a2"]));
        store.leave(&topic, &presence("ada", &["a1"]));

        let list = store.list("room:1");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].metas, vec![json!({ "phx_ref": "a2" })]);

        store.leave(&topic, &Presence::new("ada", Vec::new()));
        assert!(store.list("room:1").is_empty());
    }

    #[test]
    fn rejoin_does_not_duplicate_metas() {
        let topic = Topic::from("room:1");
        let mut store = PresenceStore::default();
        store.join(&topic, &presence("ada", &["a1"]));
        store.join(&topic, &presence("ada", &["a1"]));
        assert_eq!(store.list("room:1")[0].metas.len(), 1);
        assert!(store.list("room:other").is_empty());
    }
}
