//! Type hierarchy traversal for interpretation and manifestation filters
//!
//! The ontology itself is supplied by the host through the [`Ontology`]
//! trait. [`TypeExpander`] walks it in both directions: at index time a
//! document is tagged with its type and every ancestor, at query time a
//! filter on a type is widened to the type and every descendant.

use crate::error::Result;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::Term;

/// Well-known namespace abbreviations
static NAMESPACES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("nie", "http://www.semanticdesktop.org/ontologies/2007/01/19/nie#"),
        ("nfo", "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#"),
        ("nco", "http://www.semanticdesktop.org/ontologies/2007/03/22/nco#"),
        ("nmo", "http://www.semanticdesktop.org/ontologies/2007/03/22/nmo#"),
        ("ncal", "http://www.semanticdesktop.org/ontologies/2007/04/02/ncal#"),
        ("nao", "http://www.semanticdesktop.org/ontologies/2007/08/15/nao#"),
        ("nmm", "http://www.tracker-project.org/temp/nmm#"),
        ("zg", "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#"),
        ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
        ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
        ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ])
});

/// Expand an abbreviated type URI such as `nfo:Document`.
///
/// Anything that is not `<known prefix>:<name>` is returned unchanged.
pub fn resolve_uri(uri: &str) -> String {
    if let Some((prefix, name)) = uri.split_once(':') {
        if !name.starts_with("//") {
            if let Some(namespace) = NAMESPACES.get(prefix) {
                return format!("{}{}", namespace, name);
            }
        }
    }
    uri.to_string()
}

/// Read-only view of the type hierarchy
pub trait Ontology: Send + Sync {
    /// Direct supertypes of `uri`
    fn parents(&self, uri: &str) -> Vec<String>;

    /// Direct subtypes of `uri`
    fn children(&self, uri: &str) -> Vec<String>;
}

/// In-memory type hierarchy populated by the host
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    parents: HashMap<String, Vec<String>>,
    children: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    types: Vec<TypeEntry>,
}

#[derive(Debug, Deserialize)]
struct TypeEntry {
    uri: String,
    #[serde(default)]
    parents: Vec<String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `child` as a direct subtype of `parent`
    pub fn add_subtype(&mut self, child: &str, parent: &str) {
        let child = resolve_uri(child);
        let parent = resolve_uri(parent);

        let parents = self.parents.entry(child.clone()).or_default();
        if !parents.contains(&parent) {
            parents.push(parent.clone());
        }
        let children = self.children.entry(parent).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
    }

    pub fn with_subtype(mut self, child: &str, parent: &str) -> Self {
        self.add_subtype(child, parent);
        self
    }

    /// Load a registry from TOML:
    ///
    /// ```toml
    /// [[types]]
    /// uri = "nfo:Audio"
    /// parents = ["nfo:Media"]
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(source)?;
        let mut registry = Self::new();
        for entry in &file.types {
            for parent in &entry.parents {
                registry.add_subtype(&entry.uri, parent);
            }
        }
        Ok(registry)
    }

    /// Number of types with at least one declared parent
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

impl Ontology for TypeRegistry {
    fn parents(&self, uri: &str) -> Vec<String> {
        self.parents.get(uri).cloned().unwrap_or_default()
    }

    fn children(&self, uri: &str) -> Vec<String> {
        self.children.get(uri).cloned().unwrap_or_default()
    }
}

/// Walks an [`Ontology`] to widen type filters
#[derive(Clone)]
pub struct TypeExpander {
    ontology: Arc<dyn Ontology>,
}

impl TypeExpander {
    pub fn new(ontology: Arc<dyn Ontology>) -> Self {
        Self { ontology }
    }

    /// The resolved type followed by all of its transitive supertypes
    pub fn ancestors(&self, uri: &str) -> Vec<String> {
        self.walk(uri, |ontology, current| ontology.parents(current))
    }

    /// The resolved type followed by all of its transitive subtypes
    pub fn descendants(&self, uri: &str) -> Vec<String> {
        self.walk(uri, |ontology, current| ontology.children(current))
    }

    /// Whether `uri` equals `ancestor` or derives from it
    pub fn is_a(&self, uri: &str, ancestor: &str) -> bool {
        let ancestor = resolve_uri(ancestor);
        self.ancestors(uri).iter().any(|candidate| *candidate == ancestor)
    }

    /// Compile a type constraint into a disjunction of exact terms on `field`
    /// covering the type and every subtype.
    pub fn expand_type(&self, field: Field, uri: &str) -> Box<dyn Query> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = self
            .descendants(uri)
            .into_iter()
            .map(|value| {
                let query: Box<dyn Query> = Box::new(TermQuery::new(
                    Term::from_field_text(field, &value),
                    IndexRecordOption::Basic,
                ));
                (Occur::Should, query)
            })
            .collect();

        if clauses.len() == 1 {
            clauses.remove(0).1
        } else {
            Box::new(BooleanQuery::new(clauses))
        }
    }

    fn walk<F>(&self, uri: &str, next: F) -> Vec<String>
    where
        F: Fn(&dyn Ontology, &str) -> Vec<String>,
    {
        let start = resolve_uri(uri);
        let mut seen = HashSet::from([start.clone()]);
        let mut ordered = vec![start.clone()];
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            for related in next(self.ontology.as_ref(), &current) {
                if seen.insert(related.clone()) {
                    ordered.push(related.clone());
                    queue.push_back(related);
                }
            }
        }

        ordered
    }
}

impl std::fmt::Debug for TypeExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeExpander").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_registry() -> TypeRegistry {
        TypeRegistry::new()
            .with_subtype("nfo:Audio", "nfo:Media")
            .with_subtype("nfo:Video", "nfo:Media")
            .with_subtype("nfo:Media", "nie:InformationElement")
            .with_subtype("nfo:Document", "nie:InformationElement")
    }

    #[test]
    fn test_resolve_uri() {
        assert_eq!(
            resolve_uri("nfo:Audio"),
            "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Audio"
        );
        assert_eq!(resolve_uri("stfu:OpenEvent"), "stfu:OpenEvent");
        assert_eq!(resolve_uri("file:///tmp/x"), "file:///tmp/x");
        assert_eq!(resolve_uri("Document"), "Document");
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let expander = TypeExpander::new(Arc::new(media_registry()));

        let ancestors = expander.ancestors("nfo:Audio");
        assert_eq!(ancestors.len(), 3);
        assert_eq!(ancestors[0], resolve_uri("nfo:Audio"));
        assert!(ancestors.contains(&resolve_uri("nie:InformationElement")));

        let descendants = expander.descendants("nie:InformationElement");
        assert_eq!(descendants.len(), 5);
        assert!(descendants.contains(&resolve_uri("nfo:Video")));
    }

    #[test]
    fn test_unknown_type_expands_to_itself() {
        let expander = TypeExpander::new(Arc::new(media_registry()));
        assert_eq!(expander.ancestors("WebPage"), vec!["WebPage".to_string()]);
        assert_eq!(expander.descendants("WebPage"), vec!["WebPage".to_string()]);
    }

    #[test]
    fn test_is_a() {
        let expander = TypeExpander::new(Arc::new(media_registry()));
        assert!(expander.is_a("nfo:Audio", "nfo:Media"));
        assert!(expander.is_a("nfo:Audio", "nfo:Audio"));
        assert!(!expander.is_a("nfo:Media", "nfo:Audio"));
        assert!(!expander.is_a("nfo:Document", "nfo:Media"));
    }

    #[test]
    fn test_cycles_terminate() {
        let registry = TypeRegistry::new()
            .with_subtype("A", "B")
            .with_subtype("B", "A");
        let expander = TypeExpander::new(Arc::new(registry));
        assert_eq!(expander.ancestors("A"), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_registry_from_toml() {
        let registry = TypeRegistry::from_toml_str(
            r#"
            [[types]]
            uri = "nfo:Audio"
            parents = ["nfo:Media"]

            [[types]]
            uri = "nfo:Media"
            parents = ["nie:InformationElement"]
            "#,
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.children(&resolve_uri("nfo:Media")),
            vec![resolve_uri("nfo:Audio")]
        );
    }
}
