//! Schema matching and diffing.
//!
//! Reconciles extracted [`DependencyReference`]s with a flat snapshot of a
//! live database ([`SchemaEntry`] rows). A reference that names its schema
//! only looks there; one without a schema is tried against every schema
//! that holds the table.
//!
//! - [`match_schema`] expands references into the physical columns they
//!   cover and tags each row with whether the schema was named exactly.
//! - [`schema_diff`] answers "does this reference exist?" once per input
//!   row without expanding anything.

use crate::profile::{ColumnRef, DependencyReference};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// One physical column of a database snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub data_type: String,
}

impl SchemaEntry {
    pub fn new(schema: &str, table: &str, column: &str, data_type: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            data_type: data_type.to_string(),
        }
    }
}

/// A snapshot column (or bare table) covered by some reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRow {
    pub schema: String,
    pub table: String,
    pub column: Option<String>,
    pub data_type: Option<String>,
    /// The reference named this schema explicitly.
    pub exact_match: bool,
}

/// Existence check for one input reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRow {
    #[serde(flatten)]
    pub reference: DependencyReference,
    pub match_db: bool,
}

type MatchKey = (String, String, Option<String>, Option<String>);

/// Table → schema → columns lookup over a snapshot.
#[derive(Debug)]
pub struct SchemaIndex<'a> {
    tables: BTreeMap<&'a str, BTreeMap<&'a str, Vec<&'a SchemaEntry>>>,
}

impl<'a> SchemaIndex<'a> {
    pub fn new(corpus: &'a [SchemaEntry]) -> Self {
        let mut tables: BTreeMap<&str, BTreeMap<&str, Vec<&SchemaEntry>>> = BTreeMap::new();
        for entry in corpus {
            tables
                .entry(entry.table.as_str())
                .or_default()
                .entry(entry.schema.as_str())
                .or_default()
                .push(entry);
        }
        Self { tables }
    }

    /// Schemas the reference may resolve to, with their columns.
    ///
    /// Only schemas that actually hold the table are returned.
    pub fn candidates(&self, reference: &DependencyReference) -> Vec<(&'a str, &[&'a SchemaEntry])> {
        let Some(schemas) = self.tables.get(reference.table.as_str()) else {
            return Vec::new();
        };
        match &reference.schema {
            Some(schema) => schemas
                .get_key_value(schema.as_str())
                .map(|(name, columns)| (*name, columns.as_slice()))
                .into_iter()
                .collect(),
            None => schemas
                .iter()
                .map(|(name, columns)| (*name, columns.as_slice()))
                .collect(),
        }
    }

    /// Whether the reference exists in at least one candidate schema.
    pub fn contains(&self, reference: &DependencyReference) -> bool {
        self.candidates(reference)
            .into_iter()
            .any(|(_, columns)| match &reference.column {
                ColumnRef::Named(name) => columns.iter().any(|entry| entry.column == *name),
                ColumnRef::Wildcard | ColumnRef::Unspecified => true,
            })
    }

    fn matches(&self, reference: &DependencyReference) -> Vec<MatchKey> {
        let mut keys = Vec::new();
        for (schema, columns) in self.candidates(reference) {
            match &reference.column {
                ColumnRef::Wildcard => {
                    keys.extend(columns.iter().map(|entry| key_for(entry)));
                }
                ColumnRef::Unspecified => {
                    keys.push((schema.to_string(), reference.table.clone(), None, None));
                }
                ColumnRef::Named(name) => {
                    keys.extend(
                        columns
                            .iter()
                            .filter(|entry| entry.column == *name)
                            .map(|entry| key_for(entry)),
                    );
                }
            }
        }
        keys
    }
}

fn key_for(entry: &SchemaEntry) -> MatchKey {
    (
        entry.schema.clone(),
        entry.table.clone(),
        Some(entry.column.clone()),
        Some(entry.data_type.clone()),
    )
}

/// Expand references into the snapshot rows they cover.
///
/// Rows are unique by `(schema, table, column, data_type)`. When an exact
/// and a schema-agnostic reference reach the same row, the exact one wins:
/// exact references are inserted first and agnostic ones only fill gaps.
/// References that match nothing contribute no rows.
pub fn match_schema(queries: &[DependencyReference], corpus: &[SchemaEntry]) -> Vec<MatchRow> {
    let index = SchemaIndex::new(corpus);
    let (exact, agnostic): (Vec<_>, Vec<_>) = queries.iter().partition(|q| q.is_exact());

    let mut found: HashMap<MatchKey, bool> = HashMap::new();
    for query in exact {
        for key in index.matches(query) {
            found.insert(key, true);
        }
    }
    for query in agnostic {
        for key in index.matches(query) {
            found.entry(key).or_insert(false);
        }
    }

    let mut rows: Vec<MatchRow> = found
        .into_iter()
        .map(|((schema, table, column, data_type), exact_match)| MatchRow {
            schema,
            table,
            column,
            data_type,
            exact_match,
        })
        .collect();
    rows.sort_by(compare_rows);
    rows
}

/// Flag each reference with whether it exists in the snapshot.
///
/// One output row per input row, in input order.
pub fn schema_diff(queries: &[DependencyReference], corpus: &[SchemaEntry]) -> Vec<DiffRow> {
    let index = SchemaIndex::new(corpus);
    queries
        .iter()
        .map(|query| DiffRow {
            reference: query.clone(),
            match_db: index.contains(query),
        })
        .collect()
}

fn compare_rows(a: &MatchRow, b: &MatchRow) -> Ordering {
    a.schema
        .cmp(&b.schema)
        .then_with(|| a.table.cmp(&b.table))
        .then_with(|| nulls_last(&a.column, &b.column))
        .then_with(|| nulls_last(&a.data_type, &b.data_type))
        .then_with(|| b.exact_match.cmp(&a.exact_match))
}

fn nulls_last(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
