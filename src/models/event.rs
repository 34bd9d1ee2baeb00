use serde::{Deserialize, Serialize};

/// A logged activity event, as supplied by the event log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier assigned by the log
    pub id: u32,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    /// What kind of event this is (ontology URI)
    #[serde(default)]
    pub interpretation: String,

    /// How the event came about (ontology URI)
    #[serde(default)]
    pub manifestation: String,

    /// Application that produced the event, e.g. `application://firefox.desktop`
    #[serde(default)]
    pub actor: String,

    /// Where the event originated
    #[serde(default)]
    pub origin: String,

    /// Objects the event refers to
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

impl Event {
    /// Create a new event with the given id and timestamp
    pub fn new(id: u32, timestamp: i64) -> Self {
        Self {
            id,
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_interpretation(mut self, interpretation: impl Into<String>) -> Self {
        self.interpretation = interpretation.into();
        self
    }

    pub fn with_manifestation(mut self, manifestation: impl Into<String>) -> Self {
        self.manifestation = manifestation.into();
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Append a subject
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subjects.push(subject);
        self
    }
}

/// An object referenced by an event: a file, a web page, a contact...
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub uri: String,

    #[serde(default)]
    pub interpretation: String,

    #[serde(default)]
    pub manifestation: String,

    #[serde(default)]
    pub origin: String,

    #[serde(default)]
    pub mimetype: String,

    /// Human readable text, usually the display name
    #[serde(default)]
    pub text: String,

    /// Storage medium identifier
    #[serde(default)]
    pub storage: String,

    /// Free-text tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Subject {
    /// Create a new subject for the given URI
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn with_interpretation(mut self, interpretation: impl Into<String>) -> Self {
        self.interpretation = interpretation.into();
        self
    }

    pub fn with_manifestation(mut self, manifestation: impl Into<String>) -> Self {
        self.manifestation = manifestation.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = storage.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = Event::new(7, 1000)
            .with_actor("application://gedit.desktop")
            .with_interpretation("zg:AccessEvent")
            .with_subject(Subject::new("file:///tmp/a.txt").with_text("a.txt"));

        assert_eq!(event.id, 7);
        assert_eq!(event.timestamp, 1000);
        assert_eq!(event.subjects.len(), 1);
        assert_eq!(event.subjects[0].text, "a.txt");
        assert!(event.origin.is_empty());
    }

    #[test]
    fn test_event_deserialize_with_missing_fields() {
        let event: Event =
            serde_json::from_str(r#"{"id": 3, "timestamp": 42, "subjects": [{"uri": "http://x"}]}"#)
                .unwrap();
        assert_eq!(event.id, 3);
        assert_eq!(event.subjects[0].uri, "http://x");
        assert!(event.subjects[0].tags.is_empty());
    }
}
