//! Key-tagged persistence documents.
//!
//! The decomposition persists itself into a tree of key-tagged fields and
//! restores from the same shape. The wire format is the embedder's choice;
//! `StateDocument` derives serde so any format will do. Keys may repeat
//! within a level (e.g. one entry per component).

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One node of a persisted state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateDocument {
    Value(String),
    Level(Vec<(String, StateDocument)>),
}

/// Builds a `StateDocument` level field by field.
#[derive(Debug, Default)]
pub struct DocumentWriter {
    fields: Vec<(String, StateDocument)>,
}

impl DocumentWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scalar field. Values round-trip through `Display`/`FromStr`.
    pub fn field(&mut self, key: &str, value: impl Display) {
        self.fields.push((key.to_string(), StateDocument::Value(value.to_string())));
    }

    /// Add a nested level built by `build`.
    pub fn level(&mut self, key: &str, build: impl FnOnce(&mut DocumentWriter)) {
        let mut inner = DocumentWriter::new();
        build(&mut inner);
        self.fields.push((key.to_string(), inner.finish()));
    }

    pub fn finish(self) -> StateDocument {
        StateDocument::Level(self.fields)
    }
}

/// Reads fields back out of a `StateDocument` level.
#[derive(Debug, Clone, Copy)]
pub struct DocumentReader<'a> {
    fields: &'a [(String, StateDocument)],
}

impl<'a> DocumentReader<'a> {
    /// View a document as a level. Returns `None` for scalar nodes.
    pub fn new(document: &'a StateDocument) -> Option<Self> {
        match document {
            StateDocument::Level(fields) => Some(Self { fields }),
            StateDocument::Value(_) => None,
        }
    }

    /// The first key in the level, used for version dispatch.
    pub fn first_key(&self) -> Option<&'a str> {
        self.fields.first().map(|(key, _)| key.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == key)
    }

    /// The first scalar value stored under `key`.
    pub fn value(&self, key: &str) -> Option<&'a str> {
        self.fields.iter().find_map(|(name, node)| match node {
            StateDocument::Value(value) if name == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Parse the first scalar value stored under `key`.
    pub fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.value(key).and_then(|value| value.parse().ok())
    }

    /// The first nested level stored under `key`.
    pub fn level(&self, key: &str) -> Option<DocumentReader<'a>> {
        self.fields.iter().find_map(|(name, node)| match node {
            StateDocument::Level(fields) if name == key => Some(Self { fields }),
            _ => None,
        })
    }

    /// All nested levels stored under `key`, in order.
    pub fn levels(&self, key: &'a str) -> impl Iterator<Item = DocumentReader<'a>> + 'a {
        self.fields.iter().filter_map(move |(name, node)| match node {
            StateDocument::Level(fields) if name == key => Some(Self { fields }),
            _ => None,
        })
    }

    /// All scalar values stored under `key`, in order.
    pub fn values(&self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields.iter().filter_map(move |(name, node)| match node {
            StateDocument::Value(value) if name == key => Some(value.as_str()),
            _ => None,
        })
    }
}
