//! Dependency profiles and the merge engine.
//!
//! A [`Profile`] records the tables and columns one SQL source reads
//! (`dependencies`) and writes (`outputs`). Column lists are held as
//! [`ColumnSet`]s, so "all columns" is its own variant rather than a `"*"`
//! hidden inside a list.
//!
//! ```
//! use sqldeps::profile::{merge_profiles, ColumnSet, Profile};
//!
//! let a = Profile::new([("sales.orders", vec!["id", "user_id"])], []);
//! let b = Profile::new([("sales.orders", vec!["*"])], []);
//!
//! let merged = merge_profiles([&a, &b]);
//! assert_eq!(merged.dependencies()["sales.orders"], ColumnSet::Wildcard);
//! ```

use crate::error::{SqlDepsError, SqlDepsResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Column sentinel meaning "every column of the table".
pub const WILDCARD: &str = "*";

/// Columns referenced for one table.
///
/// `Explicit` with an empty set means the table is referenced but no
/// specific column is known. `Wildcard` absorbs everything it is joined with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnSet {
    Explicit(BTreeSet<String>),
    Wildcard,
}

impl Default for ColumnSet {
    fn default() -> Self {
        ColumnSet::Explicit(BTreeSet::new())
    }
}

impl ColumnSet {
    /// Build a column set. Any `"*"` collapses the whole set to the wildcard.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for column in columns {
            let column = column.into();
            if column == WILDCARD {
                return ColumnSet::Wildcard;
            }
            set.insert(column);
        }
        ColumnSet::Explicit(set)
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, ColumnSet::Wildcard)
    }

    /// True for a table referenced without any known column.
    pub fn is_empty(&self) -> bool {
        matches!(self, ColumnSet::Explicit(set) if set.is_empty())
    }

    /// Whether `column` is covered by this set.
    pub fn contains(&self, column: &str) -> bool {
        match self {
            ColumnSet::Wildcard => true,
            ColumnSet::Explicit(set) => set.contains(column),
        }
    }

    /// Lattice join: set union, with the wildcard as the absorbing element.
    pub fn join(&mut self, other: &ColumnSet) {
        if self.is_wildcard() {
            return;
        }
        match other {
            ColumnSet::Wildcard => *self = ColumnSet::Wildcard,
            ColumnSet::Explicit(theirs) => {
                if let ColumnSet::Explicit(mine) = self {
                    mine.extend(theirs.iter().cloned());
                }
            }
        }
    }

    /// Column names in canonical order; the wildcard renders as `["*"]`.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            ColumnSet::Wildcard => vec![WILDCARD],
            ColumnSet::Explicit(set) => set.iter().map(String::as_str).collect(),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.columns().into_iter().map(str::to_string).collect()
    }
}

impl Serialize for ColumnSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.columns())
    }
}

impl<'de> Deserialize<'de> for ColumnSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let columns = Option::<Vec<String>>::deserialize(deserializer)?;
        Ok(ColumnSet::new(columns.unwrap_or_default()))
    }
}

/// Table and column references extracted from one SQL source.
///
/// Tables are kept sorted and every column set is normalised, so two
/// profiles describing the same references compare equal. A profile is
/// never mutated after construction; merging builds a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    dependencies: BTreeMap<String, ColumnSet>,
    #[serde(default)]
    outputs: BTreeMap<String, ColumnSet>,
}

impl Profile {
    /// Build a profile from `(table, columns)` pairs.
    pub fn new<K, C, S>(
        dependencies: impl IntoIterator<Item = (K, C)>,
        outputs: impl IntoIterator<Item = (K, C)>,
    ) -> Self
    where
        K: Into<String>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dependencies: collect_tables(dependencies),
            outputs: collect_tables(outputs),
        }
    }

    /// Parse a raw extraction-provider response.
    ///
    /// Unlike cache deserialization this is strict: both `dependencies` and
    /// `outputs` must be present.
    pub fn from_response(response: &str) -> SqlDepsResult<Self> {
        let value: serde_json::Value = serde_json::from_str(response.trim())
            .map_err(|e| SqlDepsError::Response(format!("Failed to decode JSON: {}", e)))?;

        let missing: Vec<&str> = ["dependencies", "outputs"]
            .into_iter()
            .filter(|key| value.get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(SqlDepsError::Response(format!(
                "Missing required keys: {}",
                missing.join(", ")
            )));
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn dependencies(&self) -> &BTreeMap<String, ColumnSet> {
        &self.dependencies
    }

    pub fn outputs(&self) -> &BTreeMap<String, ColumnSet> {
        &self.outputs
    }

    /// Names of the tables read, sorted.
    pub fn dependency_tables(&self) -> Vec<&str> {
        self.dependencies.keys().map(String::as_str).collect()
    }

    /// Names of the tables written, sorted.
    pub fn output_tables(&self) -> Vec<&str> {
        self.outputs.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.outputs.is_empty()
    }

    /// Combine with another profile into a new one.
    pub fn merge(&self, other: &Profile) -> Profile {
        merge_profiles([self, other])
    }

    /// Flatten into one row per referenced column.
    ///
    /// A table without known columns yields a single row with no column.
    pub fn rows(&self) -> Vec<ProfileRow> {
        let mut rows = Vec::new();
        for (kind, tables) in [
            (RefKind::Dependency, &self.dependencies),
            (RefKind::Outcome, &self.outputs),
        ] {
            for (name, columns) in tables {
                let (schema, table) = split_table(name);
                let column_refs = match columns {
                    ColumnSet::Wildcard => vec![ColumnRef::Wildcard],
                    ColumnSet::Explicit(set) if set.is_empty() => vec![ColumnRef::Unspecified],
                    ColumnSet::Explicit(set) => {
                        set.iter().cloned().map(ColumnRef::Named).collect()
                    }
                };
                for column in column_refs {
                    rows.push(ProfileRow {
                        kind,
                        reference: DependencyReference {
                            schema: schema.map(str::to_string),
                            table: table.to_string(),
                            column,
                        },
                    });
                }
            }
        }
        rows
    }

    /// Distinct references over both dependencies and outputs, sorted.
    pub fn references(&self) -> Vec<DependencyReference> {
        self.rows()
            .into_iter()
            .map(|row| row.reference)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn collect_tables<K, C, S>(tables: impl IntoIterator<Item = (K, C)>) -> BTreeMap<String, ColumnSet>
where
    K: Into<String>,
    C: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: BTreeMap<String, ColumnSet> = BTreeMap::new();
    for (table, columns) in tables {
        out.entry(table.into())
            .or_default()
            .join(&ColumnSet::new(columns));
    }
    out
}

/// Merge profiles into one.
///
/// Column sets of the same table are joined, so the result does not depend
/// on input order and a wildcard anywhere wins for its table.
pub fn merge_profiles<'a, I>(profiles: I) -> Profile
where
    I: IntoIterator<Item = &'a Profile>,
{
    let mut merged = Profile::default();
    for profile in profiles {
        join_tables(&mut merged.dependencies, &profile.dependencies);
        join_tables(&mut merged.outputs, &profile.outputs);
    }
    merged
}

fn join_tables(acc: &mut BTreeMap<String, ColumnSet>, incoming: &BTreeMap<String, ColumnSet>) {
    for (table, columns) in incoming {
        acc.entry(table.clone()).or_default().join(columns);
    }
}

/// Split `schema.table` on its last dot.
pub fn split_table(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('.') {
        Some((schema, table)) if !schema.is_empty() => (Some(schema), table),
        _ => (None, name),
    }
}

/// Column part of a [`DependencyReference`].
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnRef {
    Named(String),
    Wildcard,
    /// Table referenced, no specific column known.
    #[default]
    Unspecified,
}

impl ColumnRef {
    pub fn parse(column: Option<&str>) -> Self {
        match column {
            None => ColumnRef::Unspecified,
            Some(WILDCARD) => ColumnRef::Wildcard,
            Some(name) => ColumnRef::Named(name.to_string()),
        }
    }

    pub fn as_option(&self) -> Option<&str> {
        match self {
            ColumnRef::Named(name) => Some(name),
            ColumnRef::Wildcard => Some(WILDCARD),
            ColumnRef::Unspecified => None,
        }
    }
}

impl From<Option<String>> for ColumnRef {
    fn from(column: Option<String>) -> Self {
        ColumnRef::parse(column.as_deref())
    }
}

impl From<ColumnRef> for Option<String> {
    fn from(column: ColumnRef) -> Self {
        column.as_option().map(str::to_string)
    }
}

impl Serialize for ColumnRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_option().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ColumnRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<String>::deserialize(deserializer).map(ColumnRef::from)
    }
}

/// One table/column reference to check against a schema.
///
/// `schema: None` matches the table in any schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyReference {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    #[serde(default)]
    pub column: ColumnRef,
}

impl DependencyReference {
    pub fn new(schema: Option<&str>, table: &str, column: Option<&str>) -> Self {
        Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
            column: ColumnRef::parse(column),
        }
    }

    /// A reference pinned to one schema.
    pub fn exact(schema: &str, table: &str, column: Option<&str>) -> Self {
        Self::new(Some(schema), table, column)
    }

    /// A reference matched against every schema holding the table.
    pub fn agnostic(table: &str, column: Option<&str>) -> Self {
        Self::new(None, table, column)
    }

    pub fn is_exact(&self) -> bool {
        self.schema.is_some()
    }
}

impl fmt::Display for DependencyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        write!(f, "{}", self.table)?;
        if let Some(column) = self.column.as_option() {
            write!(f, ".{}", column)?;
        }
        Ok(())
    }
}

/// Whether a row was read or written by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Dependency,
    Outcome,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Dependency => write!(f, "dependency"),
            RefKind::Outcome => write!(f, "outcome"),
        }
    }
}

/// Flat form of one profile entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    #[serde(rename = "type")]
    pub kind: RefKind,
    #[serde(flatten)]
    pub reference: DependencyReference,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_profile_is_sorted_and_deduplicated() {
        let profile = Profile::new(
            [
                ("table_b", vec!["col_c", "col_a", "col_b", "col_a"]),
                ("table_a", vec!["col_z", "col_y"]),
            ],
            [("schema.out", vec!["b", "a"])],
        );

        assert_eq!(profile.dependency_tables(), vec!["table_a", "table_b"]);
        assert_eq!(profile.dependencies()["table_a"].columns(), vec!["col_y", "col_z"]);
        assert_eq!(
            profile.dependencies()["table_b"].columns(),
            vec!["col_a", "col_b", "col_c"]
        );
        assert_eq!(profile.output_tables(), vec!["schema.out"]);
    }

    #[test]
    fn test_wildcard_is_the_only_column() {
        let profile = Profile::new([("users", vec!["id", "*", "name"])], []);
        assert_eq!(profile.dependencies()["users"], ColumnSet::Wildcard);
        assert_eq!(profile.dependencies()["users"].columns(), vec!["*"]);
    }

    fn analyses() -> Vec<Profile> {
        vec![
            Profile::new(
                [
                    ("public.users", vec!["id", "name"]),
                    ("sales.orders", vec!["order_id", "user_id"]),
                ],
                [("report.monthly_sales", vec!["month", "total_sales"])],
            ),
            Profile::new(
                [
                    ("sales.orders", vec!["*"]),
                    ("products", vec!["product_id", "name"]),
                ],
                [
                    ("report.monthly_sales", vec!["category"]),
                    ("temp.product_summary", vec!["product_id", "sales_count"]),
                ],
            ),
            Profile::new(
                [
                    ("public.users", vec!["email"]),
                    ("payments", vec!["payment_id", "user_id"]),
                ],
                [
                    ("report.user_activity", vec!["user_id", "last_login"]),
                    ("temp.product_summary", vec!["*"]),
                ],
            ),
        ]
    }

    #[test]
    fn test_merge_profiles() {
        let analyses = analyses();
        let merged = merge_profiles(&analyses);

        let expected = Profile::new(
            [
                ("payments", vec!["payment_id", "user_id"]),
                ("products", vec!["name", "product_id"]),
                ("public.users", vec!["email", "id", "name"]),
                ("sales.orders", vec!["*"]),
            ],
            [
                ("report.monthly_sales", vec!["category", "month", "total_sales"]),
                ("report.user_activity", vec!["last_login", "user_id"]),
                ("temp.product_summary", vec!["*"]),
            ],
        );
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let analyses = analyses();
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let reference = merge_profiles(&analyses);
        for order in orders {
            let merged = merge_profiles(order.iter().map(|&i| &analyses[i]));
            assert_eq!(merged, reference, "order {:?}", order);
        }

        // associativity: ((a b) c) == (a (b c))
        let left = analyses[0].merge(&analyses[1]).merge(&analyses[2]);
        let right = analyses[0].merge(&analyses[1].merge(&analyses[2]));
        assert_eq!(left, right);
    }

    #[test]
    fn test_wildcard_absorbs_in_both_directions() {
        let mut explicit = ColumnSet::new(["a", "b"]);
        explicit.join(&ColumnSet::Wildcard);
        assert_eq!(explicit, ColumnSet::Wildcard);

        let mut wildcard = ColumnSet::Wildcard;
        wildcard.join(&ColumnSet::new(["c"]));
        assert_eq!(wildcard, ColumnSet::Wildcard);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let profile = analyses().remove(0);
        assert_eq!(profile.merge(&profile), profile);
        assert_eq!(merge_profiles(std::iter::empty()), Profile::default());
    }

    #[test]
    fn test_empty_columns_serialize_as_empty_list() {
        let profile = Profile::new([("no_columns", Vec::<&str>::new())], []);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"dependencies": {"no_columns": []}, "outputs": {}})
        );
    }

    #[test]
    fn test_deserialize_normalizes() {
        let profile: Profile = serde_json::from_str(
            r#"{"dependencies": {"b": ["y", "x", "x"], "a": ["*", "z"]}}"#,
        )
        .unwrap();
        assert_eq!(profile.dependencies()["a"], ColumnSet::Wildcard);
        assert_eq!(profile.dependencies()["b"].columns(), vec!["x", "y"]);
        assert!(profile.outputs().is_empty());
    }

    #[test]
    fn test_rows() {
        let profile = Profile::new(
            [("schema.users", vec!["id", "name"]), ("bare", vec![])],
            [("public.report", vec!["*"])],
        );
        let rows = profile.rows();
        assert_eq!(rows.len(), 4);

        assert_eq!(rows[0].kind, RefKind::Dependency);
        assert_eq!(rows[0].reference, DependencyReference::agnostic("bare", None));
        assert_eq!(
            rows[1].reference,
            DependencyReference::exact("schema", "users", Some("id"))
        );
        assert_eq!(rows[3].kind, RefKind::Outcome);
        assert_eq!(rows[3].reference.column, ColumnRef::Wildcard);
        assert_eq!(rows[3].reference.schema.as_deref(), Some("public"));
    }

    #[test]
    fn test_row_serialization() {
        let row = ProfileRow {
            kind: RefKind::Outcome,
            reference: DependencyReference::agnostic("t", None),
        };
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            serde_json::json!({"type": "outcome", "schema": null, "table": "t", "column": null})
        );
    }

    #[test]
    fn test_references_are_distinct() {
        let profile = Profile::new([("s.t", vec!["a"])], [("s.t", vec!["a"])]);
        assert_eq!(
            profile.references(),
            vec![DependencyReference::exact("s", "t", Some("a"))]
        );
    }

    #[test]
    fn test_from_response() {
        let profile = Profile::from_response(
            r#"{"dependencies": {"table1": ["col2", "col1"]}, "outputs": {"table2": ["col3"]}}"#,
        )
        .unwrap();
        assert_eq!(profile.dependencies()["table1"].columns(), vec!["col1", "col2"]);
        assert_eq!(profile.outputs()["table2"].columns(), vec!["col3"]);
    }

    #[test]
    fn test_from_response_errors() {
        let err = Profile::from_response("Invalid JSON").unwrap_err();
        assert!(err.to_string().contains("Failed to decode JSON"));

        let err = Profile::from_response(r#"{"only_dependencies": {}}"#).unwrap_err();
        assert!(err.to_string().contains("Missing required keys"));
    }

    #[test]
    fn test_split_table() {
        assert_eq!(split_table("public.users"), (Some("public"), "users"));
        assert_eq!(split_table("db.public.users"), (Some("db.public"), "users"));
        assert_eq!(split_table("users"), (None, "users"));
    }

    #[test]
    fn test_reference_display() {
        assert_eq!(
            DependencyReference::exact("s", "t", Some("*")).to_string(),
            "s.t.*"
        );
        assert_eq!(DependencyReference::agnostic("t", None).to_string(), "t");
    }
}
