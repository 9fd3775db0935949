//! # sqldeps
//!
//! Collects the tables and columns SQL files read from (dependencies) and
//! write to (outputs), and reconciles them with a live database schema.
//!
//! Extraction itself is delegated to a provider behind the
//! [`Extractor`](extractor::Extractor) trait. This crate merges what the
//! provider returns, caches it per file, runs it over many files in
//! parallel under a shared rate limit, and matches the result against a
//! schema snapshot.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use sqldeps::prelude::*;
//!
//! let files = find_sql_files::<&str>(Path::new("queries"), true, None)?;
//! let extractor = Arc::new(CommandExtractor::new("my-extractor"));
//! let report = Executor::new(extractor, RunOptions::default())?.run(&files).await;
//!
//! let profile = report.merged();
//! let source = StaticSchema::from_json_file(Path::new("snapshot.json"))?;
//! let rows = validate_profile(&profile, &source, &[]).await?;
//! ```
//!
//! ## Profiles
//!
//! | Table entry        | Meaning                         |
//! |--------------------|---------------------------------|
//! | `["id", "email"]`  | Exactly these columns           |
//! | `["*"]`            | Every column (absorbs others)   |
//! | `[]`               | The table, no column known      |
//! | `sales.orders`     | Table qualified with its schema |

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod files;
pub mod limiter;
pub mod profile;
pub mod schema;

pub mod prelude {
    pub use crate::cache::Cache;
    pub use crate::config::Config;
    pub use crate::database::{validate_profile, Dialect, PgSchemaSource, SchemaSource, StaticSchema};
    pub use crate::error::*;
    pub use crate::executor::{Executor, FileOutcome, RunOptions, RunReport};
    pub use crate::extractor::{CommandExtractor, Extractor};
    pub use crate::files::find_sql_files;
    pub use crate::limiter::{RateLimiter, SharedRateLimiter};
    pub use crate::profile::{merge_profiles, ColumnSet, DependencyReference, Profile};
    pub use crate::schema::{match_schema, schema_diff, DiffRow, MatchRow, SchemaEntry};
}

pub use error::{SqlDepsError, SqlDepsResult};
pub use profile::{merge_profiles, Profile};
