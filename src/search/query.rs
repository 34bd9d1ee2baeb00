//! Search request types and query compilation

use crate::models::Subject;
use crate::search::document::{build_event_schema, text_analyzer, EventFields, TIMESTAMP_FIELD};
use crate::search::error::{SearchError, SearchResult};
use crate::search::ontology::TypeExpander;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Bound;
use strum::{Display, EnumString};
use tantivy::query::{
    AllQuery, BooleanQuery, ConstScoreQuery, Occur, Query, QueryParser, QueryParserError,
    RangeQuery, RegexQuery, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption, Schema};
use tantivy::tokenizer::TokenStream;
use tantivy::Term;
use tracing::debug;

/// Inclusive time window in milliseconds; `None` leaves a side open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    /// The unbounded range
    pub fn always() -> Self {
        Self::default()
    }

    /// `i64::MIN` and `i64::MAX` are treated as open sides
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: (start != i64::MIN).then_some(start),
            end: (end != i64::MAX).then_some(end),
        }
    }

    pub fn since(start: i64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn until(end: i64) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn until_now() -> Self {
        Self::until(chrono::Utc::now().timestamp_millis())
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }
}

/// Event-level filter. `None` or `""` leaves a field unconstrained.
///
/// A leading `!` negates a field and a trailing `*` turns it into a prefix
/// match, where the field supports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub actor: Option<String>,
    pub interpretation: Option<String>,
    pub manifestation: Option<String>,
    pub origin: Option<String>,

    /// Alternatives: an event matches if any subject template matches
    #[serde(default)]
    pub subjects: Vec<SubjectTemplate>,
}

impl EventTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_interpretation(mut self, interpretation: impl Into<String>) -> Self {
        self.interpretation = Some(interpretation.into());
        self
    }

    pub fn with_manifestation(mut self, manifestation: impl Into<String>) -> Self {
        self.manifestation = Some(manifestation.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_subject(mut self, subject: SubjectTemplate) -> Self {
        self.subjects.push(subject);
        self
    }

    /// Whether `subject` satisfies this template's subject constraints
    pub fn matches_subject(&self, subject: &Subject, expander: &TypeExpander) -> bool {
        self.subjects.is_empty()
            || self
                .subjects
                .iter()
                .any(|template| template.matches(subject, expander))
    }
}

/// Subject-level filter, same conventions as [`EventTemplate`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectTemplate {
    pub uri: Option<String>,
    pub interpretation: Option<String>,
    pub manifestation: Option<String>,
    pub origin: Option<String>,
    pub mimetype: Option<String>,
    pub text: Option<String>,
    pub storage: Option<String>,
}

impl SubjectTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_interpretation(mut self, interpretation: impl Into<String>) -> Self {
        self.interpretation = Some(interpretation.into());
        self
    }

    pub fn with_manifestation(mut self, manifestation: impl Into<String>) -> Self {
        self.manifestation = Some(manifestation.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = Some(storage.into());
        self
    }

    /// In-memory evaluation against a single subject
    pub fn matches(&self, subject: &Subject, expander: &TypeExpander) -> bool {
        let checks = [
            (&self.uri, subject.uri.as_str(), RAW_OPS, FieldKind::Raw),
            (&self.interpretation, subject.interpretation.as_str(), TYPE_OPS, FieldKind::Type),
            (&self.manifestation, subject.manifestation.as_str(), TYPE_OPS, FieldKind::Type),
            (&self.origin, subject.origin.as_str(), RAW_OPS, FieldKind::Raw),
            (&self.mimetype, subject.mimetype.as_str(), RAW_OPS, FieldKind::Raw),
            (&self.text, subject.text.as_str(), TEXT_OPS, FieldKind::Raw),
            (&self.storage, subject.storage.as_str(), STORAGE_OPS, FieldKind::Raw),
        ];

        checks.iter().all(|(constraint, value, ops, kind)| {
            match FieldMatch::parse(constraint.as_deref(), *ops) {
                Some(field_match) => field_match.accepts(value, *kind, expander),
                None => true,
            }
        })
    }
}

/// Which rows a search returns and how they are ordered
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum ResultType {
    /// One row per event, best match first
    #[default]
    Relevancy,
    MostRecentEvents,
    LeastRecentEvents,
    /// One row per distinct subject URI, best match first
    RelevantSubjects,
    MostRecentSubjects,
    LeastRecentSubjects,
}

/// Row granularity of a result type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Event,
    Subject,
}

/// Sort order of a result type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Relevance,
    NewestFirst,
    OldestFirst,
}

impl ResultType {
    pub fn granularity(&self) -> Granularity {
        match self {
            ResultType::Relevancy | ResultType::MostRecentEvents | ResultType::LeastRecentEvents => {
                Granularity::Event
            }
            ResultType::RelevantSubjects
            | ResultType::MostRecentSubjects
            | ResultType::LeastRecentSubjects => Granularity::Subject,
        }
    }

    pub fn ordering(&self) -> Ordering {
        match self {
            ResultType::Relevancy | ResultType::RelevantSubjects => Ordering::Relevance,
            ResultType::MostRecentEvents | ResultType::MostRecentSubjects => Ordering::NewestFirst,
            ResultType::LeastRecentEvents | ResultType::LeastRecentSubjects => Ordering::OldestFirst,
        }
    }
}

/// A complete search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free text; empty means filters alone drive the match set
    pub text: String,

    pub time_range: TimeRange,

    /// Alternatives: a document matches if any template matches
    pub templates: Vec<EventTemplate>,

    /// Zero-based index of the first row to return
    pub offset: usize,

    /// Maximum number of rows to return
    pub count: usize,

    pub result_type: ResultType,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            time_range: TimeRange::always(),
            templates: Vec::new(),
            offset: 0,
            count: 20,
            result_type: ResultType::default(),
        }
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn with_template(mut self, template: EventTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn with_templates(mut self, templates: Vec<EventTemplate>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_result_type(mut self, result_type: ResultType) -> Self {
        self.result_type = result_type;
        self
    }

    /// Whether `subject` satisfies the subject constraints of any template
    pub fn matches_subject(&self, subject: &Subject, expander: &TypeExpander) -> bool {
        self.templates.is_empty()
            || self
                .templates
                .iter()
                .any(|template| template.matches_subject(subject, expander))
    }
}

/// Operators a field accepts
#[derive(Debug, Clone, Copy)]
struct Operators {
    negation: bool,
    wildcard: bool,
}

const TYPE_OPS: Operators = Operators {
    negation: true,
    wildcard: false,
};
const RAW_OPS: Operators = Operators {
    negation: true,
    wildcard: true,
};
const TEXT_OPS: Operators = Operators {
    negation: false,
    wildcard: true,
};
const STORAGE_OPS: Operators = Operators {
    negation: false,
    wildcard: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    /// Ontology type, widened through the hierarchy
    Type,
    /// Exact (or prefix) string
    Raw,
}

/// A parsed template field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldMatch<'a> {
    value: &'a str,
    negated: bool,
    prefix: bool,
}

impl<'a> FieldMatch<'a> {
    fn parse(raw: Option<&'a str>, ops: Operators) -> Option<Self> {
        let mut value = raw?;
        let mut negated = false;
        let mut prefix = false;

        if ops.negation {
            if let Some(rest) = value.strip_prefix('!') {
                negated = true;
                value = rest;
            }
        }
        if ops.wildcard {
            if let Some(rest) = value.strip_suffix('*') {
                prefix = true;
                value = rest;
            }
        }

        if value.is_empty() {
            return None;
        }

        Some(Self {
            value,
            negated,
            prefix,
        })
    }

    fn accepts(&self, candidate: &str, kind: FieldKind, expander: &TypeExpander) -> bool {
        let positive = match kind {
            FieldKind::Type => !candidate.is_empty() && expander.is_a(candidate, self.value),
            FieldKind::Raw if self.prefix => candidate.starts_with(self.value),
            FieldKind::Raw => candidate == self.value,
        };
        positive != self.negated
    }
}

static EVENT_SCHEMA: Lazy<Schema> = Lazy::new(build_event_schema);

/// True when some word of `text` looks like `name:value` and `name` is not a field
fn names_unknown_field(text: &str) -> bool {
    text.split_whitespace().any(|word| {
        let word = word.trim_start_matches(['+', '-', '(']);
        match word.split_once(':') {
            Some((name, _)) if !name.is_empty() => EVENT_SCHEMA.get_field(name).is_err(),
            _ => false,
        }
    })
}

/// Compiles templates, time ranges and free text into tantivy queries
pub struct QueryCompiler<'a> {
    fields: &'a EventFields,
    expander: &'a TypeExpander,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(fields: &'a EventFields, expander: &'a TypeExpander) -> Self {
        Self { fields, expander }
    }

    /// `(text) AND (templates) AND (time range)`; absent parts are omitted
    pub fn compile(
        &self,
        parser: &QueryParser,
        text: &str,
        templates: &[EventTemplate],
        time_range: TimeRange,
    ) -> SearchResult<Box<dyn Query>> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        let text = text.trim();
        if !text.is_empty() {
            if let Some(query) = self.compile_text(parser, text)? {
                clauses.push((Occur::Must, query));
            }
        }

        let mut filters: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        if let Some(filter) = self.compile_event_filter(templates)? {
            filters.push((Occur::Must, filter));
        }
        if let Some(range) = self.compile_time_range_filter(time_range) {
            filters.push((Occur::Must, range));
        }
        if !filters.is_empty() {
            // Filters restrict the match set without affecting relevance
            let filter: Box<dyn Query> = Box::new(BooleanQuery::new(filters));
            clauses.push((Occur::Must, Box::new(ConstScoreQuery::new(filter, 0.0))));
        }

        Ok(match clauses.len() {
            0 => Box::new(AllQuery),
            1 => clauses.remove(0).1,
            _ => Box::new(BooleanQuery::new(clauses)),
        })
    }

    /// Parse free text. A `name:value` pair whose name is not a field
    /// (`http://…`, `app:editor`) is read as plain words instead.
    ///
    /// Returns `None` when the text holds no indexable words.
    pub fn compile_text(&self, parser: &QueryParser, text: &str) -> SearchResult<Option<Box<dyn Query>>> {
        match parser.parse_query(text) {
            Ok(query) => Ok(Some(query)),
            Err(QueryParserError::FieldDoesNotExist(field)) => {
                debug!(field = %field, "Unknown field in query text, searching as plain words");
                Ok(self.compile_plain_text(text))
            }
            // The grammar may reject the value after an unknown prefix before
            // field resolution runs (`http://host/path`)
            Err(e) if names_unknown_field(text) => {
                debug!(error = %e, "Query text with an unknown field prefix, searching as plain words");
                Ok(self.compile_plain_text(text))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Conjunction of the analyzed words of `text` on the text field
    fn compile_plain_text(&self, text: &str) -> Option<Box<dyn Query>> {
        let mut analyzer = text_analyzer();
        let mut stream = analyzer.token_stream(text);
        let mut words = BTreeSet::new();
        while stream.advance() {
            words.insert(stream.token().text.clone());
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = words
            .into_iter()
            .map(|word| {
                let term = Term::from_field_text(self.fields.text, &word);
                let query: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Must, query)
            })
            .collect();

        if clauses.is_empty() {
            return None;
        }
        let query: Box<dyn Query> = Box::new(BooleanQuery::new(clauses));
        Some(query)
    }

    /// Disjunction over templates; `None` means no filtering
    pub fn compile_event_filter(
        &self,
        templates: &[EventTemplate],
    ) -> SearchResult<Option<Box<dyn Query>>> {
        let mut alternatives: Vec<Box<dyn Query>> = Vec::new();
        for template in templates {
            match self.compile_template(template)? {
                Some(query) => alternatives.push(query),
                // A template without constraints matches everything
                None => return Ok(None),
            }
        }

        Ok(Self::any_of(alternatives))
    }

    /// Range on the timestamp field; `None` when both sides are open
    pub fn compile_time_range_filter(&self, time_range: TimeRange) -> Option<Box<dyn Query>> {
        if time_range.is_unbounded() {
            return None;
        }

        let lower = time_range.start.map_or(Bound::Unbounded, Bound::Included);
        let upper = time_range.end.map_or(Bound::Unbounded, Bound::Included);
        Some(Box::new(RangeQuery::new_i64_bounds(
            TIMESTAMP_FIELD.to_string(),
            lower,
            upper,
        )))
    }

    fn compile_template(&self, template: &EventTemplate) -> SearchResult<Option<Box<dyn Query>>> {
        let fields = self.fields;
        let mut clauses = Vec::new();

        self.push_field(&mut clauses, fields.actor, &template.actor, RAW_OPS, FieldKind::Raw)?;
        self.push_field(
            &mut clauses,
            fields.interpretation,
            &template.interpretation,
            TYPE_OPS,
            FieldKind::Type,
        )?;
        self.push_field(
            &mut clauses,
            fields.manifestation,
            &template.manifestation,
            TYPE_OPS,
            FieldKind::Type,
        )?;
        self.push_field(&mut clauses, fields.origin, &template.origin, RAW_OPS, FieldKind::Raw)?;

        let mut subject_alternatives = Vec::new();
        let mut unconstrained_subject = false;
        for subject in &template.subjects {
            match self.compile_subject_template(subject)? {
                Some(query) => subject_alternatives.push(query),
                None => unconstrained_subject = true,
            }
        }
        if !unconstrained_subject {
            if let Some(query) = Self::any_of(subject_alternatives) {
                clauses.push((Occur::Must, query));
            }
        }

        Ok(Self::all_of(clauses))
    }

    fn compile_subject_template(
        &self,
        template: &SubjectTemplate,
    ) -> SearchResult<Option<Box<dyn Query>>> {
        let fields = self.fields;
        let mut clauses = Vec::new();

        self.push_field(&mut clauses, fields.subject_uri, &template.uri, RAW_OPS, FieldKind::Raw)?;
        self.push_field(
            &mut clauses,
            fields.subject_interpretation,
            &template.interpretation,
            TYPE_OPS,
            FieldKind::Type,
        )?;
        self.push_field(
            &mut clauses,
            fields.subject_manifestation,
            &template.manifestation,
            TYPE_OPS,
            FieldKind::Type,
        )?;
        self.push_field(&mut clauses, fields.subject_origin, &template.origin, RAW_OPS, FieldKind::Raw)?;
        self.push_field(
            &mut clauses,
            fields.subject_mimetype,
            &template.mimetype,
            RAW_OPS,
            FieldKind::Raw,
        )?;
        self.push_field(&mut clauses, fields.subject_text, &template.text, TEXT_OPS, FieldKind::Raw)?;
        self.push_field(
            &mut clauses,
            fields.subject_storage,
            &template.storage,
            STORAGE_OPS,
            FieldKind::Raw,
        )?;

        Ok(Self::all_of(clauses))
    }

    fn push_field(
        &self,
        clauses: &mut Vec<(Occur, Box<dyn Query>)>,
        field: Field,
        constraint: &Option<String>,
        ops: Operators,
        kind: FieldKind,
    ) -> SearchResult<()> {
        let Some(field_match) = FieldMatch::parse(constraint.as_deref(), ops) else {
            return Ok(());
        };

        let query: Box<dyn Query> = match kind {
            FieldKind::Type => self.expander.expand_type(field, field_match.value),
            FieldKind::Raw if field_match.prefix => {
                let pattern = format!("{}.*", regex::escape(field_match.value));
                Box::new(RegexQuery::from_pattern(&pattern, field).map_err(|e| {
                    SearchError::QueryParsingFailed(format!("Invalid prefix '{}': {}", field_match.value, e))
                })?)
            }
            FieldKind::Raw => Box::new(TermQuery::new(
                Term::from_field_text(field, field_match.value),
                IndexRecordOption::Basic,
            )),
        };

        let occur = if field_match.negated {
            Occur::MustNot
        } else {
            Occur::Must
        };
        clauses.push((occur, query));
        Ok(())
    }

    /// Conjunction of the clauses; purely negative sets are anchored on all documents
    fn all_of(mut clauses: Vec<(Occur, Box<dyn Query>)>) -> Option<Box<dyn Query>> {
        if clauses.is_empty() {
            return None;
        }
        if clauses.iter().all(|(occur, _)| *occur == Occur::MustNot) {
            clauses.push((Occur::Must, Box::new(AllQuery)));
        }
        if clauses.len() == 1 {
            return Some(clauses.remove(0).1);
        }
        Some(Box::new(BooleanQuery::new(clauses)))
    }

    fn any_of(mut alternatives: Vec<Box<dyn Query>>) -> Option<Box<dyn Query>> {
        match alternatives.len() {
            0 => None,
            1 => Some(alternatives.remove(0)),
            _ => Some(Box::new(BooleanQuery::new(
                alternatives
                    .into_iter()
                    .map(|query| (Occur::Should, query))
                    .collect(),
            ))),
        }
    }
}
