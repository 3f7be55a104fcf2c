//! Tantivy-based search index over demands.
//!
//! Provides full-text search with per-field boosting.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Demand;

const BOOST_TITLE: f32 = 10.0;
const BOOST_TAGS: f32 = 6.0;
const BOOST_CLASSIFICATION: f32 = 5.0;
const BOOST_TYPE: f32 = 4.0;
const BOOST_DESCRIPTION: f32 = 3.0;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub demand_id: String,
    pub score: f32,
}

struct SearchFields {
    demand_id: Field,
    title: Field,
    description: Field,
    tags: Field,
    demand_type: Field,
    classification: Field,
}

/// Tantivy search index for demands.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let demand_id = schema_builder.add_text_field("demand_id", STRING | STORED);
        let title = schema_builder.add_text_field("title", TEXT | STORED);
        let description = schema_builder.add_text_field("description", TEXT);
        let tags = schema_builder.add_text_field("tags", TEXT);
        let demand_type = schema_builder.add_text_field("type", TEXT);
        let classification = schema_builder.add_text_field("classification", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            demand_id,
            title,
            description,
            tags,
            demand_type,
            classification,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Replace the index contents with `demands`.
    pub async fn rebuild(&self, demands: &[Demand]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for demand in demands {
            writer.add_document(self.create_document(demand))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} demands", demands.len());
        Ok(())
    }

    /// Index or re-index a single demand.
    pub async fn index_demand(&self, demand: &Demand) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.demand_id, &demand.id));
        writer.add_document(self.create_document(demand))?;
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    pub async fn remove_demand(&self, demand_id: &str) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.demand_id, demand_id));
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Search demands, best match first.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(
            &self.index,
            vec![
                self.fields.title,
                self.fields.description,
                self.fields.tags,
                self.fields.demand_type,
                self.fields.classification,
            ],
        );
        let base_query = query_parser
            .parse_query(query_str)
            .map_err(|e| AppError::Search(format!("Invalid search query: {}", e)))?;

        let mut subqueries: Vec<(Occur, Box<dyn tantivy::query::Query>)> = Vec::new();
        let field_queries = [
            (self.fields.title, BOOST_TITLE),
            (self.fields.tags, BOOST_TAGS),
            (self.fields.classification, BOOST_CLASSIFICATION),
            (self.fields.demand_type, BOOST_TYPE),
            (self.fields.description, BOOST_DESCRIPTION),
        ];
        for (field, boost) in field_queries {
            let field_parser = QueryParser::for_index(&self.index, vec![field]);
            if let Ok(field_query) = field_parser.parse_query(query_str) {
                subqueries.push((Occur::Should, Box::new(BoostQuery::new(field_query, boost))));
            }
        }

        let combined_query = if subqueries.is_empty() {
            base_query
        } else {
            Box::new(BooleanQuery::new(subqueries))
        };

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        Ok(top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let demand_id = doc.get_first(self.fields.demand_id)?.as_str()?.to_string();
                Some(SearchHit { demand_id, score })
            })
            .collect())
    }

    fn create_document(&self, demand: &Demand) -> TantivyDocument {
        doc!(
            self.fields.demand_id => demand.id.clone(),
            self.fields.title => demand.title.clone(),
            self.fields.description => demand.description.clone(),
            self.fields.tags => demand.tags.as_deref().unwrap_or_default().join(" "),
            self.fields.demand_type => demand.demand_type.clone(),
            self.fields.classification => demand.classification.clone()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewDemand;
    use tempfile::TempDir;

    fn demand(id: &str, title: &str, description: &str) -> Demand {
        let mut demand = Demand::from_draft(NewDemand {
            title: title.to_string(),
            description: description.to_string(),
            ..Default::default()
        });
        demand.id = id.to_string();
        demand
    }

    #[tokio::test]
    async fn test_title_match_ranks_first() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        index
            .rebuild(&[
                demand("1", "Street light out", "Reported near the pothole on Rua A"),
                demand("2", "Pothole on Rua B", "Deep hole"),
            ])
            .await
            .unwrap();

        let hits = index.search("pothole", 10, 0).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].demand_id, "2");
    }

    #[tokio::test]
    async fn test_reindex_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        let mut d = demand("1", "Pothole", "");
        index.index_demand(&d).await.unwrap();
        d.title = "Flooding".to_string();
        index.index_demand(&d).await.unwrap();

        assert!(index.search("pothole", 10, 0).unwrap().is_empty());
        assert_eq!(index.search("flooding", 10, 0).unwrap().len(), 1);

        index.remove_demand("1").await.unwrap();
        assert!(index.search("flooding", 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_empty_query() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        assert!(index.search("", 10, 0).unwrap().is_empty());
    }
}
