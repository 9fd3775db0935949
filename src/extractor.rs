//! Extraction provider contract.
//!
//! An [`Extractor`] turns SQL text into a [`Profile`]. How it does so (a
//! model behind an HTTP API, a parser, a script) is its own business; the
//! executor only needs the trait.

use crate::error::{SqlDepsError, SqlDepsResult};
use crate::profile::Profile;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Extraction provider - implement this to plug in a backend.
pub trait Extractor: Send + Sync + 'static {
    /// Extract a profile from SQL text.
    fn extract_sql(&self, sql: &str) -> impl Future<Output = SqlDepsResult<Profile>> + Send;

    /// Extract a profile from a SQL file.
    fn extract_file(&self, path: &Path) -> impl Future<Output = SqlDepsResult<Profile>> + Send {
        async move {
            if !path.exists() {
                return Err(SqlDepsError::NotFound(path.to_path_buf()));
            }
            let sql = tokio::fs::read_to_string(path).await?;
            self.extract_sql(&sql).await
        }
    }
}

/// Runs an external program per query.
///
/// The SQL text goes to the program's stdin; its stdout must be a JSON
/// object with `dependencies` and `outputs`.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Extractor for CommandExtractor {
    async fn extract_sql(&self, sql: &str) -> SqlDepsResult<Profile> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SqlDepsError::Extraction(format!("Failed to start '{}': {}", self.program, e))
            })?;

        // Feed stdin concurrently so a chatty child cannot deadlock on a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            let input = sql.to_owned();
            tokio::spawn(async move { stdin.write_all(input.as_bytes()).await })
        });

        let output = child.wait_with_output().await?;
        // A child that exits without reading all input is judged by its status.
        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!("'{}' did not read all of its input: {}", self.program, e)
                }
                Err(e) => tracing::debug!("stdin writer for '{}' failed: {}", self.program, e),
            }
        }

        if !output.status.success() {
            return Err(SqlDepsError::Extraction(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Profile::from_response(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_parses_stdout() {
        // `cat` echoes the input, so the "SQL" here is the response itself
        let extractor = CommandExtractor::new("cat");
        let profile = extractor
            .extract_sql(r#"{"dependencies": {"users": ["id"]}, "outputs": {}}"#)
            .await
            .unwrap();
        assert_eq!(profile.dependency_tables(), vec!["users"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_failures() {
        let err = CommandExtractor::new("false")
            .extract_sql("SELECT 1")
            .await
            .unwrap_err();
        assert!(matches!(err, SqlDepsError::Extraction(_)));

        let err = CommandExtractor::new("cat")
            .extract_sql("SELECT 1")
            .await
            .unwrap_err();
        assert!(matches!(err, SqlDepsError::Response(_)));

        let err = CommandExtractor::new("/definitely/not/a/program")
            .extract_sql("SELECT 1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unread_input_is_not_an_error() {
        let extractor = CommandExtractor::new("sh")
            .args(["-c", r#"echo '{"dependencies": {"users": []}, "outputs": {}}'"#]);
        // far more than a pipe buffer, and the child never reads it
        let sql = "SELECT 1;\n".repeat(200_000);

        let profile = extractor.extract_sql(&sql).await.unwrap();
        assert_eq!(profile.dependency_tables(), vec!["users"]);
    }

    #[tokio::test]
    async fn test_extract_missing_file() {
        let err = CommandExtractor::new("cat")
            .extract_file(Path::new("does/not/exist.sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, SqlDepsError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extract_file_reads_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.sql");
        std::fs::write(&path, r#"{"dependencies": {}, "outputs": {"report": ["*"]}}"#).unwrap();

        let profile = CommandExtractor::new("cat").extract_file(&path).await.unwrap();
        assert_eq!(profile.output_tables(), vec!["report"]);
    }
}
