//! User record sources
//!
//! A [`UserSource`] yields the most recently active accounts. The stock
//! implementation reads pipe-delimited rows from any [`LogSource`], usually a
//! [`CommandLogSource`](crate::logs::CommandLogSource) running `sqlite3`
//! inside the front end's container.

use tracing::debug;

use usage_lens_core::users::{parse_user_rows, UserRecord, DEFAULT_USER_LIMIT};

use crate::logs::{LogSource, LogSourceError};

/// Query the front end's account table, most recent first.
pub const DEFAULT_USER_QUERY: &str =
    "SELECT email, name, role, last_active_at FROM user ORDER BY last_active_at DESC LIMIT 10;";

/// A source of account records.
#[async_trait::async_trait]
pub trait UserSource: Send + Sync {
    async fn users(&self) -> Result<Vec<UserRecord>, LogSourceError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Parses pipe-delimited rows out of a text source.
#[derive(Debug, Clone)]
pub struct RowUserSource<S> {
    inner: S,
    limit: usize,
}

impl<S: LogSource> RowUserSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            limit: DEFAULT_USER_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[async_trait::async_trait]
impl<S: LogSource> UserSource for RowUserSource<S> {
    async fn users(&self) -> Result<Vec<UserRecord>, LogSourceError> {
        let text = self.inner.read().await?;
        let users = parse_user_rows(&text, self.limit);
        debug!(source = %self.describe(), users = users.len(), "Parsed user records");
        Ok(users)
    }

    fn describe(&self) -> String {
        format!("user rows from {}", self.inner.describe())
    }
}
