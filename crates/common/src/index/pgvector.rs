//! Postgres + pgvector backend
//!
//! SeaORM has no native `vector` type, so embeddings travel as text literals
//! (`[0.1,0.2,...]`) cast with `::vector` in raw statements.

use super::{FragmentStore, FragmentWriter, ScoredId, SimilarityProvider, SourceFilter};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::models::{Fragment, FragmentId, IndexedFragment};
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, FromQueryResult, Statement, TransactionTrait, Value};
use std::collections::HashSet;
use tracing::debug;

/// Fragment index stored in a `fragments` table
pub struct PgVectorIndex {
    db: DbPool,
}

#[derive(Debug, FromQueryResult)]
struct FragmentRow {
    id: String,
    source_id: String,
    page: i32,
    offset_start: i64,
    offset_end: i64,
    content: String,
}

impl From<FragmentRow> for Fragment {
    fn from(row: FragmentRow) -> Self {
        Fragment {
            id: FragmentId::from(row.id),
            source_id: row.source_id,
            page: row.page.max(0) as u32,
            offset_start: row.offset_start.max(0) as usize,
            offset_end: row.offset_end.max(0) as usize,
            text: row.content,
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct ScoredRow {
    id: String,
    score: f64,
}

#[derive(Debug, FromQueryResult)]
struct IdRow {
    id: String,
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    n: i64,
}

/// Convert an embedding to pgvector's text format "[1.0,2.0,...]"
pub(crate) fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(",")
    )
}

/// `$from, $from+1, ...` for an `IN (...)` list
fn placeholders(from: usize, count: usize) -> String {
    (from..from + count).map(|i| format!("${}", i)).collect::<Vec<_>>().join(", ")
}

impl PgVectorIndex {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Create the extension, table and source index if missing
    pub async fn ensure_schema(&self, dimension: usize) -> Result<()> {
        let conn = self.db.write();
        conn.execute_unprepared("CREATE EXTENSION IF NOT EXISTS vector").await?;
        conn.execute_unprepared(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS fragments (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                page INTEGER NOT NULL,
                offset_start BIGINT NOT NULL,
                offset_end BIGINT NOT NULL,
                content TEXT NOT NULL,
                embedding vector({dimension}) NOT NULL
            )
            "#
        ))
        .await?;
        conn.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS fragments_source_id_idx ON fragments (source_id)",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FragmentStore for PgVectorIndex {
    async fn get_by_ids(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, source_id, page, offset_start, offset_end, content FROM fragments WHERE id IN ({})",
            placeholders(1, ids.len())
        );
        let values: Vec<Value> = ids.iter().map(|id| id.as_str().into()).collect();

        let rows = FragmentRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            values,
        ))
        .all(self.db.read())
        .await?;

        // Preserve the caller's order; missing ids simply do not appear
        let mut by_id: std::collections::HashMap<String, Fragment> =
            rows.into_iter().map(|r| (r.id.clone(), Fragment::from(r))).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id.as_str())).collect())
    }

    async fn filter_candidates(&self, filter: &SourceFilter) -> Result<HashSet<FragmentId>> {
        if filter.source_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let sql = format!(
            "SELECT id FROM fragments WHERE source_id IN ({})",
            placeholders(1, filter.source_ids.len())
        );
        let values: Vec<Value> = filter.source_ids.iter().map(|s| s.as_str().into()).collect();

        let rows = IdRow::find_by_statement(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
            .all(self.db.read())
            .await?;

        Ok(rows.into_iter().map(|r| FragmentId::from(r.id)).collect())
    }
}

fn upsert_statement(entry: IndexedFragment) -> Statement {
    let fragment = entry.fragment;
    Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"
        INSERT INTO fragments (id, source_id, page, offset_start, offset_end, content, embedding)
        VALUES ($1, $2, $3, $4, $5, $6, $7::vector)
        ON CONFLICT (id) DO UPDATE SET
            source_id = EXCLUDED.source_id,
            page = EXCLUDED.page,
            offset_start = EXCLUDED.offset_start,
            offset_end = EXCLUDED.offset_end,
            content = EXCLUDED.content,
            embedding = EXCLUDED.embedding
        "#,
        vec![
            fragment.id.as_str().into(),
            fragment.source_id.into(),
            (fragment.page as i32).into(),
            (fragment.offset_start as i64).into(),
            (fragment.offset_end as i64).into(),
            fragment.text.into(),
            vector_literal(&entry.embedding).into(),
        ],
    )
}

fn delete_source_statement(source_id: &str) -> Statement {
    Statement::from_sql_and_values(
        DbBackend::Postgres,
        "DELETE FROM fragments WHERE source_id = $1",
        vec![source_id.into()],
    )
}

#[async_trait]
impl FragmentWriter for PgVectorIndex {
    async fn upsert(&self, batch: Vec<IndexedFragment>) -> Result<usize> {
        let written = batch.len();
        let txn = self.db.write().begin().await?;
        for entry in batch {
            txn.execute(upsert_statement(entry)).await?;
        }
        txn.commit().await?;
        debug!(written, "Upserted fragments into pgvector");
        Ok(written)
    }

    async fn replace_source(&self, source_id: &str, batch: Vec<IndexedFragment>) -> Result<(usize, usize)> {
        let written = batch.len();
        // Dropped without commit on any error, which rolls the delete back
        let txn = self.db.write().begin().await?;
        let removed = txn
            .execute(delete_source_statement(source_id))
            .await?
            .rows_affected() as usize;
        for entry in batch {
            txn.execute(upsert_statement(entry)).await?;
        }
        txn.commit().await?;
        debug!(source_id, removed, written, "Replaced source fragments in pgvector");
        Ok((removed, written))
    }

    async fn clear_source(&self, source_id: &str) -> Result<usize> {
        let result = self.db.write().execute(delete_source_statement(source_id)).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize> {
        let row = CountRow::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            "SELECT COUNT(*)::BIGINT AS n FROM fragments",
        ))
        .one(self.db.read())
        .await?;
        Ok(row.map(|r| r.n.max(0) as usize).unwrap_or(0))
    }
}

#[async_trait]
impl SimilarityProvider for PgVectorIndex {
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SourceFilter>,
    ) -> Result<Vec<ScoredId>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut values: Vec<Value> = vec![vector_literal(query).into()];
        let mut sql = String::from(
            "SELECT id, 1 - (embedding <=> $1::vector) AS score FROM fragments",
        );
        if let Some(filter) = filter {
            if filter.source_ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" WHERE source_id IN ({})", placeholders(2, filter.source_ids.len())));
            values.extend(filter.source_ids.iter().map(|s| Value::from(s.as_str())));
        }
        sql.push_str(&format!(
            " ORDER BY embedding <=> $1::vector, source_id, page, offset_start LIMIT {}",
            k
        ));

        let rows = ScoredRow::find_by_statement(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
            .all(self.db.read())
            .await
            .map_err(|e| AppError::ProviderUnavailable {
                message: format!("pgvector search failed: {}", e),
            })?;

        Ok(rows
            .into_iter()
            .map(|r| ScoredId {
                id: FragmentId::from(r.id),
                score: r.score as f32,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(2, 3), "$2, $3, $4");
        assert_eq!(placeholders(1, 1), "$1");
    }
}
