//! User records exported from the chat front end's account store.
//!
//! Rows are pipe-delimited, as `sqlite3` prints them by default:
//!
//! ```text
//! alice@example.com|Alice|admin|1714557600
//! ```
//!
//! Columns are email, name, role and last activity; the last one is optional.

use serde::{Deserialize, Serialize};

/// Default number of records kept from a query.
pub const DEFAULT_USER_LIMIT: usize = 10;

/// One account row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<String>,
}

impl UserRecord {
    /// Parse one row. Rows with fewer than three columns or an empty email
    /// are rejected.
    pub fn parse_row(line: &str) -> Option<Self> {
        let mut cols = line.trim().split('|').map(str::trim);
        let email = cols.next().filter(|e| !e.is_empty())?;
        let name = cols.next()?;
        let role = cols.next()?;
        let last_active = cols.next().filter(|s| !s.is_empty());
        Some(Self {
            email: email.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            last_active: last_active.map(str::to_string),
        })
    }
}

/// Parse every well-formed row of `text`, keeping at most `limit` in input
/// order. Short or malformed rows are skipped.
pub fn parse_user_rows(text: &str, limit: usize) -> Vec<UserRecord> {
    text.lines()
        .filter_map(UserRecord::parse_row)
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_and_short_rows() {
        let full = UserRecord::parse_row("alice@example.com|Alice|admin|1714557600").unwrap();
        assert_eq!(full.email, "alice@example.com");
        assert_eq!(full.name, "Alice");
        assert_eq!(full.role, "admin");
        assert_eq!(full.last_active.as_deref(), Some("1714557600"));

        let three = UserRecord::parse_row("bob@example.com||user").unwrap();
        assert_eq!(three.name, "");
        assert_eq!(three.last_active, None);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let text = "\
Error: no such table: user
alice@example.com|Alice|admin|1714557600
bob@example.com|Bob

|nobody|user|1
carol@example.com|Carol|user|";
        let users = parse_user_rows(text, DEFAULT_USER_LIMIT);
        let emails: Vec<_> = users.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, ["alice@example.com", "carol@example.com"]);
        assert_eq!(users[1].last_active, None);
    }

    #[test]
    fn limit_keeps_leading_rows() {
        let text = (0..20)
            .map(|i| format!("u{i}@example.com|U{i}|user|{i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let users = parse_user_rows(&text, 3);
        assert_eq!(users.len(), 3);
        assert_eq!(users[2].email, "u2@example.com");
    }
}
