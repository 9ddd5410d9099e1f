//! Leading-keyword table-name extraction for the Lock Manager.
//! Deliberately shallow — the middleware does not parse SQL
//! beyond what it needs to pick a lock key, matching the Backend Adapter
//! treating `statement` as an opaque string to hand the engine.

/// Pulls the table name out of the one statement shape each write/DDL
/// keyword supports. Returns `None` for anything the middleware cannot
/// classify a lock key for; callers fall back to a fixed key in that case.
pub fn extract_table_name(sql: &str) -> Option<String> {
    let trimmed = sql.trim();
    let upper = trimmed.to_ascii_uppercase();

    let after = |kw: &str| -> Option<&str> {
        if upper.starts_with(kw) {
            Some(trimmed[kw.len()..].trim_start())
        } else {
            None
        }
    };

    let rest = after("INSERT INTO ")
        .or_else(|| after("UPDATE "))
        .or_else(|| after("DELETE FROM "))
        .or_else(|| after("CREATE TABLE "))
        .or_else(|| after("ALTER TABLE "))
        .or_else(|| after("DROP TABLE "))
        .or_else(|| after("TRUNCATE TABLE "))
        .or_else(|| after("TRUNCATE "))
        .or_else(|| {
            if upper.starts_with("SELECT") {
                let from_idx = upper.find(" FROM ")?;
                Some(trimmed[from_idx + 6..].trim_start())
            } else {
                None
            }
        })?;

    let end = rest
        .find(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .unwrap_or(rest.len());
    let name = rest[..end].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.trim_matches(|c| c == '"' || c == '`').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_table_from_every_supported_statement_shape() {
        assert_eq!(
            extract_table_name("INSERT INTO users(name,email) VALUES('X','x@e')"),
            Some("users".into())
        );
        assert_eq!(
            extract_table_name("UPDATE accounts SET balance = 1 WHERE id = 2"),
            Some("accounts".into())
        );
        assert_eq!(extract_table_name("DELETE FROM orders WHERE id = 1"), Some("orders".into()));
        assert_eq!(
            extract_table_name("CREATE TABLE widgets (id INT PRIMARY KEY)"),
            Some("widgets".into())
        );
        assert_eq!(extract_table_name("DROP TABLE widgets"), Some("widgets".into()));
        assert_eq!(
            extract_table_name("SELECT email FROM users WHERE name='X'"),
            Some("users".into())
        );
    }

    #[test]
    fn unrecognized_statement_yields_none() {
        assert_eq!(extract_table_name("EXPLAIN SELECT 1"), None);
    }
}
