//! RAG document access: ICP context, fundamentals, and learned patterns.

use sqlx::Row;

use super::{Store, StoreError};

/// One retrievable document fed into prompt composition.
#[derive(Debug, Clone)]
pub struct RagDocument {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Brand scope, when brand-specific.
    pub brand_id: Option<i64>,
    /// "icp", "fundamentals", or "learned".
    pub doc_type: String,
    /// Pattern behind a learned doc.
    pub source_pattern_id: Option<i64>,
    /// Title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Deprecated docs are excluded from composition.
    pub deprecated: bool,
}

impl Store {
    /// Documents of a type for prompt composition, brand-scoped rows
    /// first, capped at `limit`. Deprecated documents are excluded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_rag_documents(
        &self,
        tenant_id: i64,
        brand_id: Option<i64>,
        doc_type: &str,
        limit: u32,
    ) -> Result<Vec<RagDocument>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM rag_documents \
             WHERE tenant_id = ?1 AND doc_type = ?2 AND deprecated = 0 \
             AND (brand_id IS NULL OR brand_id = ?3) \
             ORDER BY (brand_id IS NULL), id LIMIT ?4",
        )
        .bind(tenant_id)
        .bind(doc_type)
        .bind(brand_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(doc_from_row).collect()
    }

    /// Insert or update the learned RAG document for a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn upsert_learned_document(
        &self,
        tenant_id: i64,
        pattern_id: i64,
        title: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rag_documents (tenant_id, doc_type, source_pattern_id, title, \
             content, deprecated) VALUES (?1, 'learned', ?2, ?3, ?4, 0) \
             ON CONFLICT(source_pattern_id) DO UPDATE SET \
             title = excluded.title, content = excluded.content, deprecated = 0, \
             updated_at = datetime('now')",
        )
        .bind(tenant_id)
        .bind(pattern_id)
        .bind(title)
        .bind(content)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Mark the learned document for a retired pattern deprecated
    /// (never deleted).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn deprecate_learned_document(
        &self,
        tenant_id: i64,
        pattern_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE rag_documents SET deprecated = 1, updated_at = datetime('now') \
             WHERE tenant_id = ?1 AND source_pattern_id = ?2",
        )
        .bind(tenant_id)
        .bind(pattern_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

fn doc_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RagDocument, StoreError> {
    Ok(RagDocument {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        brand_id: row.try_get("brand_id")?,
        doc_type: row.try_get("doc_type")?,
        source_pattern_id: row.try_get("source_pattern_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        deprecated: row.try_get::<i64, _>("deprecated")? != 0,
    })
}
