//! Document repository backing the collection API.
//!
//! Writes run in transactions and bump the revision counter in the same transaction.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::{
    Collection, Contact, Demand, DemandStats, Interaction, MatchKey, RemoteQuery, RevisionInfo,
    User,
};

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    // ==================== READS ====================

    /// Select documents, applying filters, order, limit and projection.
    pub async fn select(
        &self,
        collection: Collection,
        query: &RemoteQuery,
    ) -> Result<Vec<Value>, AppError> {
        let rows = match collection {
            Collection::DemandStats => vec![self.demand_stats().await?],
            _ => self.load_documents(collection).await?,
        };
        Ok(query.apply(rows))
    }

    /// All documents of a collection in insertion order.
    pub async fn load_documents(&self, collection: Collection) -> Result<Vec<Value>, AppError> {
        let rows = sqlx::query("SELECT id, body FROM documents WHERE collection = ? ORDER BY rowid")
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| parse_body(collection, row.get("id"), row.get("body")))
            .collect())
    }

    pub async fn get_document(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>, AppError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| parse_body(collection, id, r.get("body"))))
    }

    /// Typed demands, skipping documents that no longer decode.
    pub async fn list_demands(&self) -> Result<Vec<Demand>, AppError> {
        Ok(self
            .load_documents(Collection::Demands)
            .await?
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc).ok())
            .collect())
    }

    /// Dashboard counters computed from the current demands.
    pub async fn demand_stats(&self) -> Result<Value, AppError> {
        let demands = self.list_demands().await?;
        let stats = DemandStats::from_demands(&demands, Utc::now().date_naive());
        serde_json::to_value(stats).map_err(|e| AppError::Internal(e.to_string()))
    }

    // ==================== WRITES ====================

    /// Insert a new document. A missing id is generated; an existing id is a conflict.
    pub async fn insert(&self, collection: Collection, document: Value) -> Result<Value, AppError> {
        ensure_writable(collection)?;
        let mut document = into_object(document)?;
        let id = match document.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            None | Some(Value::Null) => {
                let id = uuid::Uuid::new_v4().to_string();
                document.insert("id".to_string(), Value::String(id.clone()));
                id
            }
            Some(_) => return Err(AppError::Validation("id must be a non-empty string".to_string())),
        };
        let document = Value::Object(document);
        validate(collection, &document)?;

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO documents (collection, id, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(collection, id) DO NOTHING",
        )
        .bind(collection.as_str())
        .bind(&id)
        .bind(document.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Document {} already exists in {}",
                id, collection
            )));
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        debug!("Inserted {}/{}", collection, id);
        Ok(document)
    }

    /// Insert or replace a document by id.
    pub async fn upsert(&self, collection: Collection, document: Value) -> Result<Value, AppError> {
        ensure_writable(collection)?;
        let id = document_id(&document)
            .ok_or_else(|| AppError::Validation("Upsert requires an id".to_string()))?
            .to_string();
        validate(collection, &document)?;

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO documents (collection, id, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(collection.as_str())
        .bind(&id)
        .bind(document.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        debug!("Upserted {}/{}", collection, id);
        Ok(document)
    }

    /// Merge `patch` into every document matching `key`. The id is never changed.
    pub async fn update(
        &self,
        collection: Collection,
        patch: Value,
        key: &MatchKey,
    ) -> Result<Vec<Value>, AppError> {
        ensure_writable(collection)?;
        let mut patch = into_object(patch)?;
        patch.remove("id");

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT id, body FROM documents WHERE collection = ? ORDER BY rowid")
            .bind(collection.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let now = Utc::now().to_rfc3339();
        let mut updated = Vec::new();
        for row in &rows {
            let id: String = row.get("id");
            let Some(mut document) = parse_body(collection, &id, row.get("body")) else {
                continue;
            };
            if !key.matches(&document) {
                continue;
            }
            if let Value::Object(fields) = &mut document {
                for (field, value) in &patch {
                    fields.insert(field.clone(), value.clone());
                }
            }
            validate(collection, &document)?;

            sqlx::query(
                "UPDATE documents SET body = ?, updated_at = ? WHERE collection = ? AND id = ?",
            )
            .bind(document.to_string())
            .bind(&now)
            .bind(collection.as_str())
            .bind(&id)
            .execute(&mut *tx)
            .await?;
            updated.push(document);
        }

        if !updated.is_empty() {
            bump_revision(&mut tx).await?;
        }
        tx.commit().await?;

        debug!("Updated {} document(s) in {}", updated.len(), collection);
        Ok(updated)
    }

    /// Delete every document matching `key`, returning the removed ids.
    pub async fn delete(&self, collection: Collection, key: &MatchKey) -> Result<Vec<String>, AppError> {
        ensure_writable(collection)?;

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT id, body FROM documents WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let mut removed = Vec::new();
        for row in &rows {
            let id: String = row.get("id");
            let matched = parse_body(collection, &id, row.get("body"))
                .is_some_and(|document| key.matches(&document));
            if !matched {
                continue;
            }
            sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                .bind(collection.as_str())
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            removed.push(id);
        }

        if !removed.is_empty() {
            bump_revision(&mut tx).await?;
        }
        tx.commit().await?;

        debug!("Deleted {} document(s) from {}", removed.len(), collection);
        Ok(removed)
    }
}

async fn bump_revision(tx: &mut Transaction<'_, Sqlite>) -> Result<(), AppError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(&now)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn parse_body(collection: Collection, id: &str, body: &str) -> Option<Value> {
    match serde_json::from_str(body) {
        Ok(document) => Some(document),
        Err(e) => {
            warn!("Skipping unreadable document {}/{}: {}", collection, id, e);
            None
        }
    }
}

fn document_id(document: &Value) -> Option<&str> {
    document
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
}

fn into_object(value: Value) -> Result<Map<String, Value>, AppError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Validation("Document must be a JSON object".to_string())),
    }
}

fn ensure_writable(collection: Collection) -> Result<(), AppError> {
    if collection.is_read_only() {
        return Err(AppError::ReadOnly(format!("{} is read-only", collection)));
    }
    Ok(())
}

/// Reject documents that do not decode as their collection's model.
fn validate(collection: Collection, document: &Value) -> Result<(), AppError> {
    fn check<T: serde::de::DeserializeOwned>(document: &Value) -> Result<T, AppError> {
        serde_json::from_value(document.clone()).map_err(|e| AppError::Validation(e.to_string()))
    }

    match collection {
        Collection::Demands => {
            let demand: Demand = check(document)?;
            if demand.title.trim().is_empty() {
                return Err(AppError::Validation("Title is required".to_string()));
            }
        }
        Collection::Contacts => {
            let contact: Contact = check(document)?;
            if contact.name.trim().is_empty() {
                return Err(AppError::Validation("Name is required".to_string()));
            }
        }
        Collection::Users => {
            check::<User>(document)?;
        }
        Collection::Interactions => {
            check::<Interaction>(document)?;
        }
        Collection::Settings => {
            if document.get("value").is_none() {
                return Err(AppError::Validation("Settings require a value".to_string()));
            }
        }
        Collection::DemandStats => return ensure_writable(collection),
    }
    Ok(())
}
