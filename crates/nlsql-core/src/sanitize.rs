use std::collections::HashSet;
use std::fmt;

/// Keywords that indicate a mutating or administrative statement.
///
/// Matched case-insensitively as whole words anywhere in the statement. The select-only shape
/// check is the primary gate; this list is defense-in-depth against a mutating sub-clause
/// smuggled into a statement that still starts with `SELECT`.
const DENY_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "TRUNCATE", "GRANT", "REVOKE",
    "VACUUM", "COPY", "CALL", "DO", "EXECUTE", "MERGE",
];

/// Process-wide query constraints, established once at startup.
#[derive(Debug, Clone)]
pub struct QueryPolicy {
    allowed_tables: HashSet<String>,
    max_limit: u64,
}

impl QueryPolicy {
    pub fn new<I, S>(tables: I, max_limit: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_tables = tables
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            allowed_tables,
            max_limit,
        }
    }

    pub fn max_limit(&self) -> u64 {
        self.max_limit
    }
}

/// Why a candidate statement was refused.
///
/// A rejection is a value, not a fault: candidate SQL comes from a model that may ignore its
/// instructions, so refusing it is an expected outcome. The variants carry the matched keyword
/// or table for observability; no partial/rewritten SQL is ever carried out of the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MultipleStatements,
    NotSelect,
    ForbiddenKeyword(String),
    TableNotAllowed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MultipleStatements => write!(f, "multiple statements are not allowed"),
            RejectReason::NotSelect => write!(f, "only SELECT statements are allowed"),
            RejectReason::ForbiddenKeyword(kw) => write!(f, "disallowed keyword {kw}"),
            RejectReason::TableNotAllowed(table) => {
                write!(f, "table {table} is not in the allow-list")
            }
        }
    }
}

impl std::error::Error for RejectReason {}

/// Fail-closed sanitizer for model-generated SQL.
///
/// Checks run in a fixed order and short-circuit on the first violation:
/// 1. strip a markdown code fence (optionally tagged `sql`)
/// 2. at most one `;` anywhere
/// 3. statement begins with `SELECT`
/// 4. no denylisted keyword as a whole word
/// 5. every bare identifier directly after `FROM`/`JOIN` is in the allow-set
/// 6. exactly one enforced `LIMIT` value, capped at the policy maximum
///
/// Inspection is heuristic word-token scanning and intentionally not a SQL parser: no
/// awareness of subqueries, CTEs, aliases used as qualifiers, or quoted identifiers, and
/// matching extends into string literals.
pub fn sanitize_sql(policy: &QueryPolicy, candidate: &str) -> Result<String, RejectReason> {
    let sql = strip_code_fence(candidate.trim());

    if sql.matches(';').count() > 1 {
        return Err(RejectReason::MultipleStatements);
    }
    if !starts_with_select(sql) {
        return Err(RejectReason::NotSelect);
    }
    if let Some(keyword) = find_denylisted_keyword(sql) {
        return Err(RejectReason::ForbiddenKeyword(keyword));
    }
    if let Some(table) = first_disallowed_table(sql, &policy.allowed_tables) {
        return Err(RejectReason::TableNotAllowed(table));
    }

    Ok(enforce_limit(sql, policy.max_limit))
}

fn strip_code_fence(raw: &str) -> &str {
    let mut sql = raw;
    if let Some(rest) = sql.strip_prefix("```") {
        let rest = match rest.get(..3) {
            Some(tag) if tag.eq_ignore_ascii_case("sql") => &rest[3..],
            _ => rest,
        };
        sql = rest.trim_start();
    }
    if let Some(rest) = sql.strip_suffix("```") {
        sql = rest.trim_end();
    }
    sql
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte ranges of every identifier-shaped token: a leading ASCII letter or underscore followed
/// by word characters. Digit-led runs are not tokens, matching the bare-identifier shape the
/// table extractor looks for.
fn word_spans(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            i += 1;
            while i < bytes.len() && is_word_byte(bytes[i]) {
                i += 1;
            }
            spans.push((start, i));
        } else {
            i += 1;
        }
    }
    spans
}

fn starts_with_select(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    if bytes.len() < 6 || !bytes[..6].eq_ignore_ascii_case(b"SELECT") {
        return false;
    }
    match bytes.get(6) {
        Some(b) => !is_word_byte(*b),
        None => true,
    }
}

fn find_denylisted_keyword(sql: &str) -> Option<String> {
    for (start, end) in word_spans(sql.as_bytes()) {
        let token = &sql[start..end];
        if let Some(keyword) = DENY_KEYWORDS.iter().find(|kw| kw.eq_ignore_ascii_case(token)) {
            return Some((*keyword).to_string());
        }
    }
    None
}

/// First table reference outside the allow-set, lowercased.
///
/// A table reference is a bare identifier separated from a preceding `FROM`/`JOIN` by
/// whitespace only; `FROM (SELECT ...` therefore contributes nothing at that position, while
/// the inner clauses are still scanned on their own.
fn first_disallowed_table(sql: &str, allowed: &HashSet<String>) -> Option<String> {
    let bytes = sql.as_bytes();
    let spans = word_spans(bytes);

    for pair in spans.windows(2) {
        let (kw_start, kw_end) = pair[0];
        let (id_start, id_end) = pair[1];

        let keyword = &sql[kw_start..kw_end];
        if !keyword.eq_ignore_ascii_case("FROM") && !keyword.eq_ignore_ascii_case("JOIN") {
            continue;
        }
        if !bytes[kw_end..id_start].iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }

        let table = sql[id_start..id_end].to_ascii_lowercase();
        if !allowed.contains(&table) {
            return Some(table);
        }
    }
    None
}

/// Idempotent rewrite guaranteeing an enforced `LIMIT`.
///
/// Every `LIMIT <integer>` occurrence is clamped to the policy maximum; an integer too large to
/// parse, or a bare-word operand such as `LIMIT ALL`, is replaced with the maximum outright.
/// A `LIMIT` followed by punctuation or end-of-input is left untouched. When no `LIMIT` token
/// exists at all, one is appended after stripping trailing semicolons/whitespace.
fn enforce_limit(sql: &str, max_limit: u64) -> String {
    let bytes = sql.as_bytes();

    let mut has_limit = false;
    let mut out = String::with_capacity(sql.len() + 16);
    let mut copied = 0usize;

    for &(start, end) in &word_spans(bytes) {
        if start < copied || !sql[start..end].eq_ignore_ascii_case("LIMIT") {
            continue;
        }
        has_limit = true;

        let mut j = end;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j == end || j >= bytes.len() {
            continue;
        }

        if bytes[j].is_ascii_digit() {
            let operand_start = j;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j < bytes.len() && is_word_byte(bytes[j]) {
                // Not an integer literal (e.g. `LIMIT 10x`): fail safe.
                while j < bytes.len() && is_word_byte(bytes[j]) {
                    j += 1;
                }
                out.push_str(&sql[copied..operand_start]);
                out.push_str(&max_limit.to_string());
                copied = j;
                continue;
            }
            let value = sql[operand_start..j].parse::<u64>().unwrap_or(u64::MAX);
            out.push_str(&sql[copied..operand_start]);
            out.push_str(&value.min(max_limit).to_string());
            copied = j;
        } else if bytes[j].is_ascii_alphabetic() || bytes[j] == b'_' {
            // `LIMIT ALL` and friends: replace the operand with the cap.
            let operand_start = j;
            while j < bytes.len() && is_word_byte(bytes[j]) {
                j += 1;
            }
            out.push_str(&sql[copied..operand_start]);
            out.push_str(&max_limit.to_string());
            copied = j;
        }
    }

    if has_limit {
        out.push_str(&sql[copied..]);
        return out;
    }

    let trimmed = sql.trim_end_matches([';', ' ', '\n', '\t']);
    format!("{trimmed} LIMIT {max_limit}")
}

#[cfg(test)]
mod tests {
    use super::{sanitize_sql, QueryPolicy, RejectReason};

    fn policy() -> QueryPolicy {
        QueryPolicy::new(["customers", "products", "orders"], 200)
    }

    fn assert_rejected(sql: &str) -> RejectReason {
        sanitize_sql(&policy(), sql).expect_err(&format!("expected rejection: {sql}"))
    }

    #[test]
    fn accepts_plain_select() {
        let out = sanitize_sql(&policy(), "SELECT id FROM customers LIMIT 10").unwrap();
        assert_eq!(out, "SELECT id FROM customers LIMIT 10");
    }

    #[test]
    fn strips_markdown_fence_and_clamps_limit() {
        let out = sanitize_sql(
            &policy(),
            "```sql\nSELECT id, name FROM customers LIMIT 10000\n```",
        )
        .unwrap();
        assert_eq!(out, "SELECT id, name FROM customers LIMIT 200");
    }

    #[test]
    fn strips_untagged_fence() {
        let out = sanitize_sql(&policy(), "```\nSELECT 1\n```").unwrap();
        assert_eq!(out, "SELECT 1 LIMIT 200");
    }

    #[test]
    fn appends_missing_limit() {
        let small = QueryPolicy::new(["customers"], 50);
        let out = sanitize_sql(&small, "SELECT name FROM customers;").unwrap();
        assert_eq!(out, "SELECT name FROM customers LIMIT 50");
    }

    #[test]
    fn appends_limit_to_join_query() {
        let out = sanitize_sql(
            &policy(),
            "SELECT c.name, o.order_date FROM customers c JOIN orders o ON o.customer_id=c.id",
        )
        .unwrap();
        assert_eq!(
            out,
            "SELECT c.name, o.order_date FROM customers c JOIN orders o ON o.customer_id=c.id LIMIT 200"
        );
    }

    #[test]
    fn never_raises_an_existing_limit() {
        let out = sanitize_sql(&policy(), "SELECT id FROM orders LIMIT 10").unwrap();
        assert_eq!(out, "SELECT id FROM orders LIMIT 10");
    }

    #[test]
    fn clamps_every_limit_occurrence() {
        let out = sanitize_sql(
            &policy(),
            "SELECT * FROM (SELECT id FROM orders LIMIT 9000) AS sub LIMIT 500",
        )
        .unwrap();
        assert_eq!(
            out,
            "SELECT * FROM (SELECT id FROM orders LIMIT 200) AS sub LIMIT 200"
        );
    }

    #[test]
    fn replaces_non_integer_limit_operand() {
        let out = sanitize_sql(&policy(), "SELECT id FROM orders LIMIT ALL").unwrap();
        assert_eq!(out, "SELECT id FROM orders LIMIT 200");
    }

    #[test]
    fn replaces_overflowing_limit() {
        let out =
            sanitize_sql(&policy(), "SELECT id FROM orders LIMIT 99999999999999999999").unwrap();
        assert_eq!(out, "SELECT id FROM orders LIMIT 200");
    }

    #[test]
    fn rejects_multiple_statements_before_keywords() {
        // The stacked DROP would also trip the denylist; ordering says the
        // statement-count check wins.
        let reason = assert_rejected("SELECT * FROM customers; DROP TABLE customers;");
        assert_eq!(reason, RejectReason::MultipleStatements);
    }

    #[test]
    fn rejects_non_select() {
        let reason = assert_rejected("UPDATE customers SET name='x'");
        assert_eq!(reason, RejectReason::NotSelect);
    }

    #[test]
    fn rejects_embedded_mutating_keyword() {
        let reason =
            assert_rejected("SELECT * FROM customers WHERE id IN (DELETE FROM orders RETURNING id)");
        assert_eq!(reason, RejectReason::ForbiddenKeyword("DELETE".to_string()));
    }

    #[test]
    fn keyword_match_is_whole_word() {
        // `created_at` must not trip CREATE, `dropout` must not trip DROP.
        let out =
            sanitize_sql(&policy(), "SELECT created_at, dropout FROM customers LIMIT 5").unwrap();
        assert_eq!(out, "SELECT created_at, dropout FROM customers LIMIT 5");
    }

    #[test]
    fn rejects_table_outside_allowlist() {
        let reason = assert_rejected("SELECT name FROM staff");
        assert_eq!(reason, RejectReason::TableNotAllowed("staff".to_string()));
    }

    #[test]
    fn rejects_join_target_outside_allowlist() {
        let reason = assert_rejected(
            "SELECT * FROM customers JOIN audit_log ON audit_log.customer_id = customers.id",
        );
        assert_eq!(reason, RejectReason::TableNotAllowed("audit_log".to_string()));
    }

    #[test]
    fn table_check_is_case_insensitive() {
        sanitize_sql(&policy(), "SELECT * FROM Customers LIMIT 1").unwrap();
    }

    #[test]
    fn no_from_clause_trivially_passes() {
        let out = sanitize_sql(&policy(), "SELECT 1").unwrap();
        assert_eq!(out, "SELECT 1 LIMIT 200");
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(assert_rejected(""), RejectReason::NotSelect);
    }

    #[test]
    fn sanitized_output_is_a_fixed_point() {
        for sql in [
            "SELECT id FROM customers",
            "```sql\nSELECT id FROM customers LIMIT 9999\n```",
            "SELECT c.name FROM customers c JOIN orders o ON o.customer_id = c.id LIMIT 7;",
        ] {
            let once = sanitize_sql(&policy(), sql).unwrap();
            let twice = sanitize_sql(&policy(), &once).unwrap();
            assert_eq!(once, twice, "not idempotent for: {sql}");
        }
    }
}
