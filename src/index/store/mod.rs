
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection,
    query::{ExecutableQuery, QueryBase},
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::IndexError;
use crate::loader::Document;

const TABLE_NAME: &str = "documents";

/// One row of the index table
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub position: u32,
    pub document: Document,
}

/// A stored document together with its distance from the query vector
#[derive(Debug, Clone)]
pub struct StoredHit {
    pub position: u32,
    pub distance: f32,
    pub document: Document,
}

/// LanceDB table holding `(id, vector, position, text, metadata)` rows
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    vector_dimension: usize,
}

impl VectorStore {
    /// Create a fresh store with an empty table at `path`
    pub async fn create(path: &Path, vector_dimension: usize) -> Result<Self, IndexError> {
        std::fs::create_dir_all(path)?;
        let connection = connect(path).await?;

        let schema = create_schema(list_size(vector_dimension)?);
        connection
            .create_empty_table(TABLE_NAME, schema)
            .execute()
            .await
            .map_err(|e| storage("Failed to create table", e))?;

        info!(
            "Created index table at {} with {} dimensions",
            path.display(),
            vector_dimension
        );

        Ok(Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension,
        })
    }

    /// Open an existing store and check its vector column has the expected dimension
    pub async fn open(path: &Path, vector_dimension: usize) -> Result<Self, IndexError> {
        let connection = connect(path).await?;

        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| storage("Failed to list tables", e))?;

        if !table_names.iter().any(|name| name == TABLE_NAME) {
            return Err(IndexError::Storage(format!(
                "index table missing from {}",
                path.display()
            )));
        }

        let store = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension,
        };

        let stored_dimension = store.detect_vector_dimension().await?;
        if stored_dimension != vector_dimension {
            return Err(IndexError::DimensionMismatch {
                expected: vector_dimension,
                actual: stored_dimension,
            });
        }

        Ok(store)
    }

    #[inline]
    pub fn vector_dimension(&self) -> usize {
        self.vector_dimension
    }

    async fn open_table(&self) -> Result<lancedb::Table, IndexError> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| storage("Failed to open table", e))
    }

    async fn detect_vector_dimension(&self) -> Result<usize, IndexError> {
        let schema = self
            .open_table()
            .await?
            .schema()
            .await
            .map_err(|e| storage("Failed to get table schema", e))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return usize::try_from(*size)
                        .map_err(|_| IndexError::Storage(format!("bad vector size {size}")));
                }
            }
        }

        Err(IndexError::Storage(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// Append records in one write
    pub async fn add_records(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            debug!("No records to store");
            return Ok(());
        }

        let record_batch = self.create_record_batch(records)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        self.open_table()
            .await?
            .add(reader)
            .execute()
            .await
            .map_err(|e| storage("Failed to insert records", e))?;

        debug!("Stored {} records", records.len());
        Ok(())
    }

    fn create_record_batch(&self, records: &[IndexRecord]) -> Result<RecordBatch, IndexError> {
        let len = records.len();
        let dimension = self.vector_dimension;

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * dimension);
        let mut positions = Vec::with_capacity(len);
        let mut texts = Vec::with_capacity(len);
        let mut metadata = Vec::with_capacity(len);

        for record in records {
            if record.vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }

            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            positions.push(record.position);
            texts.push(record.document.text.as_str());
            metadata.push(
                serde_json::to_string(&record.document.metadata)
                    .map_err(|e| IndexError::Storage(format!("Failed to encode metadata: {e}")))?,
            );
        }

        let size = list_size(dimension)?;
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            size,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| storage("Failed to create vector array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(UInt32Array::from(positions)),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(metadata)),
        ];

        RecordBatch::try_new(create_schema(size), arrays)
            .map_err(|e| storage("Failed to create record batch", e))
    }

    /// Exact nearest-neighbour search by L2 distance, closest first
    pub async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<StoredHit>, IndexError> {
        debug!("Searching for similar vectors with limit: {}", limit);

        let table = self.open_table().await?;
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| storage("Failed to count rows", e))?;
        if limit == 0 || rows == 0 {
            return Ok(Vec::new());
        }

        // Rank every row so ties at the cut fall back to position
        let mut results = table
            .vector_search(query_vector)
            .map_err(|e| storage("Failed to create vector search", e))?
            .column("vector")
            .limit(rows)
            .execute()
            .await
            .map_err(|e| storage("Failed to execute search", e))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| storage("Failed to read result stream", e))?
        {
            hits.extend(parse_search_batch(&batch)?);
        }

        // Equal distances fall back to insertion order
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(limit);

        debug!("Parsed {} search results", hits.len());
        Ok(hits)
    }

    #[inline]
    pub async fn count(&self) -> Result<usize, IndexError> {
        self.open_table()
            .await?
            .count_rows(None)
            .await
            .map_err(|e| storage("Failed to count rows", e))
    }
}

async fn connect(path: &Path) -> Result<Connection, IndexError> {
    let uri = path.display().to_string();
    debug!("Connecting to LanceDB at {}", uri);

    lancedb::connect(&uri)
        .execute()
        .await
        .map_err(|e| storage("Failed to connect to LanceDB", e))
}

fn create_schema(vector_size: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                vector_size,
            ),
            false,
        ),
        Field::new("position", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
    ]))
}

fn list_size(dimension: usize) -> Result<i32, IndexError> {
    i32::try_from(dimension)
        .map_err(|_| IndexError::Storage(format!("vector dimension {dimension} is too large")))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<StoredHit>, IndexError> {
    let positions = column::<UInt32Array>(batch, "position")?;
    let texts = column::<StringArray>(batch, "text")?;
    let metadata = column::<StringArray>(batch, "metadata")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut hits = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let metadata: BTreeMap<String, String> = serde_json::from_str(metadata.value(row))
            .map_err(|e| IndexError::Storage(format!("Corrupt metadata in row {row}: {e}")))?;

        let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        hits.push(StoredHit {
            position: positions.value(row),
            distance,
            document: Document::new(texts.value(row), metadata),
        });
    }

    Ok(hits)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, IndexError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::Storage(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| IndexError::Storage(format!("Invalid {name} column type")))
}

fn storage(context: &str, error: impl std::fmt::Display) -> IndexError {
    IndexError::Storage(format!("{context}: {error}"))
}
