//! Shared core for the NL→SQL query service.
//!
//! This crate holds the pieces the service and its tests share: the fail-closed SQL sanitizer,
//! the question→SQL generator seam, and the Gemini-backed implementation of it.

use async_trait::async_trait;

pub mod gemini;
pub mod prompt;
pub mod sanitize;

/// Translates a natural-language question into a single candidate SQL statement.
///
/// Implementations are request-scoped I/O against an upstream model. Their output is untrusted
/// and MUST pass [`sanitize::sanitize_sql`] before it touches a database connection.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate_sql(&self, question: &str) -> anyhow::Result<String>;
}
