//! Event document structures and indexing

use crate::models::{Event, Subject};
use crate::search::error::{SearchError, SearchResult};
use crate::search::ontology::TypeExpander;
use tantivy::schema::*;
use tantivy::tokenizer::{AsciiFoldingFilter, LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer};
use tantivy::TantivyDocument;
use tracing::debug;

/// Name under which the free-text analyzer is registered on the index
pub const TEXT_TOKENIZER: &str = "zg_text";

/// Name of the timestamp fast field, used by range queries and ordering
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Raw filter values longer than this are not indexed
const MAX_TERM_BYTES: usize = 16 * 1024;

/// Resolved handles for every field of the event schema
#[derive(Debug, Clone, Copy)]
pub struct EventFields {
    pub id: Field,
    pub timestamp: Field,
    pub text: Field,
    pub interpretation: Field,
    pub manifestation: Field,
    pub actor: Field,
    pub origin: Field,
    pub subject_interpretation: Field,
    pub subject_manifestation: Field,
    pub subject_uri: Field,
    pub subject_origin: Field,
    pub subject_mimetype: Field,
    pub subject_storage: Field,
    pub subject_text: Field,
    pub subject_tag: Field,
    pub subjects: Field,
}

impl EventFields {
    /// Look up every field by name, failing on the first one the schema lacks
    pub fn from_schema(schema: &Schema) -> SearchResult<Self> {
        let get = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| SearchError::SchemaError(format!("missing field '{}'", name)))
        };

        Ok(Self {
            id: get("id")?,
            timestamp: get(TIMESTAMP_FIELD)?,
            text: get("text")?,
            interpretation: get("interpretation")?,
            manifestation: get("manifestation")?,
            actor: get("actor")?,
            origin: get("origin")?,
            subject_interpretation: get("subject_interpretation")?,
            subject_manifestation: get("subject_manifestation")?,
            subject_uri: get("subject_uri")?,
            subject_origin: get("subject_origin")?,
            subject_mimetype: get("subject_mimetype")?,
            subject_storage: get("subject_storage")?,
            subject_text: get("subject_text")?,
            subject_tag: get("subject_tag")?,
            subjects: get("subjects")?,
        })
    }
}

/// Build the search schema for events
pub fn build_event_schema() -> Schema {
    let mut schema_builder = Schema::builder();

    // Event id - upsert and delete key
    schema_builder.add_u64_field("id", INDEXED | STORED | FAST);

    // Timestamp in milliseconds - range filters and time ordering
    schema_builder.add_i64_field(TIMESTAMP_FIELD, INDEXED | STORED | FAST);

    // Free text with positions so phrase queries work
    let text_indexing = TextFieldIndexing::default()
        .set_tokenizer(TEXT_TOKENIZER)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    schema_builder.add_text_field("text", TextOptions::default().set_indexing_options(text_indexing));

    // Filter terms, matched exactly
    for name in [
        "interpretation",
        "manifestation",
        "actor",
        "origin",
        "subject_interpretation",
        "subject_manifestation",
        "subject_uri",
        "subject_origin",
        "subject_mimetype",
        "subject_storage",
        "subject_text",
        "subject_tag",
    ] {
        schema_builder.add_text_field(name, STRING);
    }

    // Subjects as JSON, read back for subject-level results
    schema_builder.add_text_field("subjects", STORED);

    schema_builder.build()
}

/// Analyzer shared by indexing and query parsing
pub fn text_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .build()
}

/// Converts one event into a tantivy document
pub struct DocumentBuilder<'a> {
    fields: &'a EventFields,
    expander: &'a TypeExpander,
    doc: TantivyDocument,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(fields: &'a EventFields, expander: &'a TypeExpander) -> Self {
        Self {
            fields,
            expander,
            doc: TantivyDocument::new(),
        }
    }

    /// Build the complete document for `event`
    pub fn build(mut self, event: &Event) -> TantivyDocument {
        self.doc.add_u64(self.fields.id, u64::from(event.id));

        for subject in &event.subjects {
            self.index_text(&subject.text);
            self.index_uri(&subject.uri);
            for tag in &subject.tags {
                self.index_text(tag);
            }
        }

        if !self.index_actor(&event.actor) && !event.actor.is_empty() {
            debug!(event_id = event.id, actor = %event.actor, "Actor not indexable, omitted");
        }

        self.add_doc_filters(event);
        self.doc
    }

    /// Add free text to the document
    pub fn index_text(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.doc.add_text(self.fields.text, text);
        }
    }

    /// Add the scheme, host and path fragments of `uri` as free text
    pub fn index_uri(&mut self, uri: &str) {
        for fragment in uri_fragments(uri) {
            self.index_text(&fragment);
        }
    }

    /// Add the application name of `actor` and its URI pieces as free text.
    ///
    /// Returns `false` when the actor is empty or malformed; the actor filter
    /// term is then omitted as well.
    pub fn index_actor(&mut self, actor: &str) -> bool {
        match actor_name(actor) {
            Some(name) => {
                self.index_text(name);
                self.index_uri(actor);
                true
            }
            None => false,
        }
    }

    /// Add the structured filter terms, the timestamp and the stored subjects
    pub fn add_doc_filters(&mut self, event: &Event) {
        let fields = *self.fields;

        self.add_types(fields.interpretation, &event.interpretation);
        self.add_types(fields.manifestation, &event.manifestation);
        if actor_name(&event.actor).is_some() {
            self.add_raw(fields.actor, &event.actor);
        }
        self.add_raw(fields.origin, &event.origin);

        for subject in &event.subjects {
            self.add_subject_filters(subject);
        }

        self.doc.add_i64(fields.timestamp, event.timestamp);

        match serde_json::to_string(&event.subjects) {
            Ok(json) => self.doc.add_text(fields.subjects, json),
            Err(e) => debug!(event_id = event.id, error = %e, "Failed to store subjects"),
        }
    }

    fn add_subject_filters(&mut self, subject: &Subject) {
        let fields = *self.fields;

        self.add_types(fields.subject_interpretation, &subject.interpretation);
        self.add_types(fields.subject_manifestation, &subject.manifestation);
        self.add_raw(fields.subject_uri, &subject.uri);
        self.add_raw(fields.subject_origin, &subject.origin);
        self.add_raw(fields.subject_mimetype, &subject.mimetype);
        self.add_raw(fields.subject_storage, &subject.storage);
        self.add_raw(fields.subject_text, &subject.text);
        for tag in &subject.tags {
            self.add_raw(fields.subject_tag, tag);
        }
    }

    /// Index the type itself plus every ancestor
    fn add_types(&mut self, field: Field, uri: &str) {
        if uri.trim().is_empty() {
            return;
        }
        for value in self.expander.ancestors(uri) {
            self.add_raw(field, &value);
        }
    }

    fn add_raw(&mut self, field: Field, value: &str) {
        if value.trim().is_empty() {
            return;
        }
        if value.len() > MAX_TERM_BYTES {
            debug!(len = value.len(), "Skipping oversized filter value");
            return;
        }
        self.doc.add_text(field, value);
    }
}

/// The application name of an actor: `application://firefox.desktop` -> `firefox`
pub(crate) fn actor_name(actor: &str) -> Option<&str> {
    if actor.is_empty() || actor.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return None;
    }

    let name = match actor.split_once("://") {
        Some((_, rest)) => rest,
        None => actor.split_once(':').map(|(_, rest)| rest).unwrap_or(actor),
    };
    let name = name.strip_suffix(".desktop").unwrap_or(name).trim_matches('/');

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Split a URI into the pieces a user is likely to type
fn uri_fragments(uri: &str) -> Vec<String> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Vec::new();
    }

    // Query strings and fragments carry no useful words
    let uri = uri.split(['?', '#']).next().unwrap_or(uri);

    let mut fragments = Vec::new();
    let path = match uri.split_once("://") {
        Some((scheme, rest)) => {
            fragments.push(scheme.to_string());
            let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
            let host = authority.rsplit('@').next().unwrap_or(authority);
            if !host.is_empty() {
                fragments.push(host.to_string());
            }
            path
        }
        None => match uri.split_once(':') {
            Some((scheme, rest)) if is_scheme(scheme) => {
                fragments.push(scheme.to_string());
                rest
            }
            _ => uri,
        },
    };

    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(percent_decode)
        .collect();

    if let Some(last) = segments.last() {
        if let Some((stem, extension)) = last.rsplit_once('.') {
            if !stem.is_empty() && !extension.is_empty() {
                fragments.push(stem.to_string());
                fragments.push(extension.to_string());
            }
        }
    }
    fragments.extend(segments);

    fragments
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Decode `%XX` escapes; invalid UTF-8 is replaced rather than rejected
fn percent_decode(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ontology::TypeRegistry;
    use std::sync::Arc;
    use tantivy::schema::Value;

    fn expander() -> TypeExpander {
        TypeExpander::new(Arc::new(
            TypeRegistry::new().with_subtype("nfo:Audio", "nfo:Media"),
        ))
    }

    fn texts(doc: &TantivyDocument, field: Field) -> Vec<String> {
        doc.get_all(field)
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_schema_building() {
        let schema = build_event_schema();
        let fields = EventFields::from_schema(&schema);
        assert!(fields.is_ok());
    }

    #[test]
    fn test_missing_field_is_schema_error() {
        let mut builder = Schema::builder();
        builder.add_u64_field("id", INDEXED);
        let result = EventFields::from_schema(&builder.build());
        assert!(matches!(result, Err(SearchError::SchemaError(_))));
    }

    #[test]
    fn test_actor_name() {
        assert_eq!(actor_name("application://firefox.desktop"), Some("firefox"));
        assert_eq!(actor_name("app:editor"), Some("editor"));
        assert_eq!(actor_name("gedit"), Some("gedit"));
        assert_eq!(actor_name(""), None);
        assert_eq!(actor_name("application://"), None);
        assert_eq!(actor_name("bad actor"), None);
    }

    #[test]
    fn test_uri_fragments() {
        let fragments = uri_fragments("file:///home/user/My%20Notes.txt");
        assert!(fragments.contains(&"file".to_string()));
        assert!(fragments.contains(&"home".to_string()));
        assert!(fragments.contains(&"My Notes.txt".to_string()));
        assert!(fragments.contains(&"My Notes".to_string()));
        assert!(fragments.contains(&"txt".to_string()));

        let fragments = uri_fragments("http://user@www.example.org/docs/index.html?q=1");
        assert!(fragments.contains(&"www.example.org".to_string()));
        assert!(fragments.contains(&"docs".to_string()));
        assert!(!fragments.iter().any(|f| f.contains("q=1")));

        assert!(uri_fragments("").is_empty());
    }

    #[test]
    fn test_percent_decode_tolerates_truncated_escape() {
        assert_eq!(percent_decode("a%2"), "a%2");
        assert_eq!(percent_decode("a%zz"), "a%zz");
        assert_eq!(percent_decode("%41b"), "Ab");
    }

    #[test]
    fn test_percent_decode_multibyte_and_invalid_utf8() {
        assert_eq!(percent_decode("caf%C3%A9"), "café");
        assert_eq!(percent_decode("r%C3%A9sum%C3%A9.pdf"), "résumé.pdf");
        assert_eq!(percent_decode("bad%FFbyte"), "bad\u{FFFD}byte");

        let fragments = uri_fragments("file:///home/caf%C3%A9/menu%20card.txt");
        assert!(fragments.contains(&"café".to_string()));
        assert!(fragments.contains(&"menu card".to_string()));
    }

    #[test]
    fn test_event_to_document() {
        let schema = build_event_schema();
        let fields = EventFields::from_schema(&schema).unwrap();
        let expander = expander();

        let event = Event::new(5, 1234)
            .with_actor("application://rhythmbox.desktop")
            .with_interpretation("zg:AccessEvent")
            .with_subject(
                Subject::new("file:///music/song.ogg")
                    .with_interpretation("nfo:Audio")
                    .with_mimetype("audio/ogg")
                    .with_text("song")
                    .with_tag("favourite"),
            );

        let doc = DocumentBuilder::new(&fields, &expander).build(&event);

        assert_eq!(doc.get_first(fields.id).and_then(|v| v.as_u64()), Some(5));
        assert_eq!(doc.get_first(fields.timestamp).and_then(|v| v.as_i64()), Some(1234));
        assert_eq!(texts(&doc, fields.actor), vec!["application://rhythmbox.desktop"]);

        // The subject type is indexed with its ancestors
        let types = texts(&doc, fields.subject_interpretation);
        assert_eq!(types.len(), 2);
        assert!(types.contains(&crate::search::ontology::resolve_uri("nfo:Media")));

        assert_eq!(texts(&doc, fields.subject_tag), vec!["favourite"]);
        let text = texts(&doc, fields.text);
        assert!(text.contains(&"rhythmbox".to_string()));
        assert!(text.contains(&"application".to_string()));

        let stored = texts(&doc, fields.subjects);
        let subjects: Vec<Subject> = serde_json::from_str(&stored[0]).unwrap();
        assert_eq!(subjects, event.subjects);
    }

    #[test]
    fn test_malformed_actor_skips_filter_only() {
        let schema = build_event_schema();
        let fields = EventFields::from_schema(&schema).unwrap();
        let expander = expander();

        let event = Event::new(1, 10)
            .with_actor("not an actor")
            .with_subject(Subject::new("file:///a.txt"));
        let doc = DocumentBuilder::new(&fields, &expander).build(&event);

        assert!(texts(&doc, fields.actor).is_empty());
        assert_eq!(texts(&doc, fields.subject_uri), vec!["file:///a.txt"]);
    }
}
