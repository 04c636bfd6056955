//! Per-endpoint append-only transcript logs with today-filtered queries.

use std::collections::HashMap;

use chrono::Local;
use dashmap::DashMap;
use uuid::Uuid;

use crate::types::TranscriptMessage;

/// Endpoint-keyed map of message logs. Appends are linearizable per endpoint
/// (one map shard guards each log); logs are unbounded and callers filter by
/// day.
#[derive(Debug, Default)]
pub struct TranscriptStore {
    logs: DashMap<Uuid, Vec<TranscriptMessage>>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize an empty log for a newly observed endpoint.
    pub fn ensure_log(&self, endpoint: Uuid) {
        self.logs.entry(endpoint).or_default();
    }

    /// Create the log if absent and append.
    pub fn append(&self, endpoint: Uuid, message: TranscriptMessage) {
        self.logs.entry(endpoint).or_default().push(message);
    }

    pub fn contains(&self, endpoint: Uuid) -> bool {
        self.logs.contains_key(&endpoint)
    }

    /// Most recent message from the current local calendar day, or `None` if
    /// the endpoint is unknown or silent today.
    pub fn latest_today(&self, endpoint: Uuid) -> Option<TranscriptMessage> {
        let today = Local::now().date_naive();
        let log = self.logs.get(&endpoint)?;
        log.iter()
            .rev()
            .find(|m| m.timestamp.date_naive() == today)
            .cloned()
    }

    /// Every known endpoint mapped to its latest message of the day; silent
    /// endpoints get the placeholder so callers can tell "silent" from
    /// "unknown".
    pub fn latest_today_by_endpoint(&self) -> HashMap<Uuid, TranscriptMessage> {
        let today = Local::now().date_naive();
        self.logs
            .iter()
            .map(|entry| {
                let latest = entry
                    .value()
                    .iter()
                    .rev()
                    .find(|m| m.timestamp.date_naive() == today)
                    .cloned()
                    .unwrap_or_default();
                (*entry.key(), latest)
            })
            .collect()
    }

    /// All of today's messages for an endpoint in append order, or `None` if
    /// the endpoint is unknown.
    pub fn today_history(&self, endpoint: Uuid) -> Option<Vec<TranscriptMessage>> {
        let today = Local::now().date_naive();
        let log = self.logs.get(&endpoint)?;
        Some(
            log.iter()
                .filter(|m| m.timestamp.date_naive() == today)
                .cloned()
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn msg(text: &str, days_ago: i64) -> TranscriptMessage {
        TranscriptMessage {
            timestamp: Local::now() - Duration::days(days_ago),
            text: text.into(),
            audio_file: format!("{text}.wav"),
            confidence: 1.0,
        }
    }

    #[test]
    fn latest_today_skips_older_days() {
        let store = TranscriptStore::new();
        let id = Uuid::new_v4();

        store.append(id, msg("yesterday", 1));
        store.append(id, msg("first", 0));
        store.append(id, msg("second", 0));

        let latest = store.latest_today(id).unwrap();
        assert_eq!(latest.text, "second");
    }

    #[test]
    fn unknown_endpoint_is_none() {
        let store = TranscriptStore::new();
        assert!(store.latest_today(Uuid::new_v4()).is_none());
        assert!(store.today_history(Uuid::new_v4()).is_none());
    }

    #[test]
    fn silent_today_is_none_but_listed_with_placeholder() {
        let store = TranscriptStore::new();
        let silent = Uuid::new_v4();
        let active = Uuid::new_v4();

        store.append(silent, msg("old", 2));
        store.append(active, msg("new", 0));

        assert!(store.latest_today(silent).is_none());

        let map = store.latest_today_by_endpoint();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&active].text, "new");
        assert_eq!(map[&silent], TranscriptMessage::default());
    }

    #[test]
    fn ensure_log_registers_without_messages() {
        let store = TranscriptStore::new();
        let id = Uuid::new_v4();

        store.ensure_log(id);
        assert!(store.contains(id));
        assert!(store.latest_today(id).is_none());
        assert_eq!(store.today_history(id).unwrap().len(), 0);
        assert_eq!(store.latest_today_by_endpoint().len(), 1);
    }

    #[test]
    fn today_history_preserves_append_order() {
        let store = TranscriptStore::new();
        let id = Uuid::new_v4();
        store.append(id, msg("a", 0));
        store.append(id, msg("b", 0));
        store.append(id, msg("old", 3));

        let history = store.today_history(id).unwrap();
        assert_eq!(
            history.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}
