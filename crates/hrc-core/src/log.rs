//! Per-call debug log

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Event names, in the order they were first recorded, each with its
/// messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugLog {
    events: Vec<(String, Vec<String>)>,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: &str, message: impl Into<String>) {
        let message = message.into();
        match self.events.iter_mut().find(|(name, _)| name == event) {
            Some((_, messages)) => messages.push(message),
            None => self.events.push((event.to_string(), vec![message])),
        }
    }

    pub fn messages(&self, event: &str) -> &[String] {
        self.events
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, messages)| messages.as_slice())
            .unwrap_or_default()
    }

    pub fn events(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.events
            .iter()
            .map(|(name, messages)| (name.as_str(), messages.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Serialize for DebugLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.events.len()))?;
        for (name, messages) in &self.events {
            map.serialize_entry(name, messages)?;
        }
        map.end()
    }
}

/// A value together with the debug log of the call that produced it
#[derive(Debug, Clone)]
pub struct Traced<T> {
    pub value: T,
    pub log: DebugLog,
}

impl<T> Traced<T> {
    pub fn new(value: T, log: DebugLog) -> Self {
        Self { value, log }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_grouped_by_event() {
        let mut log = DebugLog::new();
        log.add("State", "Read");
        log.add("CacheStorage-Read", "MISS");
        log.add("State", "Again");

        assert_eq!(log.messages("State"), ["Read".to_string(), "Again".to_string()]);
        assert_eq!(log.messages("CacheStorage-Read"), ["MISS".to_string()]);
        assert!(log.messages("Unknown").is_empty());
        assert_eq!(
            log.events().map(|(name, _)| name).collect::<Vec<_>>(),
            vec!["State", "CacheStorage-Read"]
        );
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let mut log = DebugLog::new();
        log.add("State", "Save");
        log.add("CacheRule-Match", "Default rule matched the request.");

        assert_eq!(
            serde_json::to_string(&log).unwrap(),
            r#"{"State":["Save"],"CacheRule-Match":["Default rule matched the request."]}"#
        );
    }
}
