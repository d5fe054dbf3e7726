use crate::chunking::{Chunk, ChunkMetadata};
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use arrow_array::types::Float32Type;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt64Array,
};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use log::{debug, info, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TABLE_NAME: &str = "chunks";
const DISTANCE_COLUMN: &str = "_distance";

/// A chunk and its vector, persisted as a unit
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStoreEntry {
    pub chunk: Chunk,
    pub vector: Embedding,
}

/// One similarity search result; smaller distance is closer
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: VectorStoreEntry,
    pub distance: f32,
}

/// One row read back from the table
struct Row {
    ordinal: u64,
    entry: VectorStoreEntry,
    distance: Option<f32>,
}

/// Arrow schema of the chunk table. `ordinal` is the insertion position.
pub fn build_arrow_schema(dimension: i32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("ordinal", DataType::UInt64, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("start_index", DataType::UInt64, false),
        Field::new("overlap", DataType::UInt64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dimension),
            true,
        ),
    ]))
}

/// Handle to a LanceDB vector store persisted in a directory.
///
/// Search is exact (no ANN index) over squared Euclidean distance.
#[derive(Clone)]
pub struct VectorStore {
    path: PathBuf,
    dimension: usize,
    len: usize,
    table: Table,
}

impl fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStore")
            .field("path", &self.path)
            .field("dimension", &self.dimension)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Replace whatever is stored at `persist_dir` with `entries`.
    ///
    /// The new table is written to a staging directory first and swapped in
    /// by rename, so a failed rebuild leaves the previous store untouched.
    pub async fn rebuild<P: AsRef<Path>>(
        entries: Vec<VectorStoreEntry>,
        dimension: usize,
        persist_dir: P,
    ) -> Result<Self> {
        let persist_dir = persist_dir.as_ref();
        if dimension == 0 {
            return Err(RagError::Config("store dimension must be positive".into()));
        }
        let list_size = i32::try_from(dimension)
            .map_err(|_| RagError::Config(format!("store dimension {} is too large", dimension)))?;
        if let Some(actual) = first_mismatch(&entries, dimension) {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual,
            });
        }

        let parent = match persist_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| RagError::io(&parent, e))?;
        let name = persist_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.staging-", name))
            .tempdir_in(&parent)
            .map_err(|e| RagError::io(&parent, e))?;

        write_table(staging.path(), &entries, list_size).await?;
        debug!("Staged {} entries in {}", entries.len(), staging.path().display());

        // renamed into place below, or discarded on failure
        let staged = staging.keep();

        let backup = if persist_dir.exists() {
            let backup = parent.join(format!(".{}.previous-{}", name, std::process::id()));
            if backup.exists() {
                if let Err(e) = remove_path(&backup) {
                    discard(&staged);
                    return Err(RagError::io(&backup, e));
                }
            }
            if let Err(e) = fs::rename(persist_dir, &backup) {
                discard(&staged);
                return Err(RagError::io(persist_dir, e));
            }
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(&staged, persist_dir) {
            discard(&staged);
            if let Some(backup) = &backup {
                if let Err(restore) = fs::rename(backup, persist_dir) {
                    warn!(
                        "Could not restore previous store from {}: {}",
                        backup.display(),
                        restore
                    );
                }
            }
            return Err(RagError::io(persist_dir, e));
        }

        if let Some(backup) = backup {
            if let Err(e) = remove_path(&backup) {
                warn!("Failed to delete old store at {}: {}", backup.display(), e);
            }
        }

        info!(
            "Persisted {} entries to {}",
            entries.len(),
            persist_dir.display()
        );

        Self::open(persist_dir).await
    }

    /// Open a store written by `rebuild`
    pub async fn open<P: AsRef<Path>>(persist_dir: P) -> Result<Self> {
        let persist_dir = persist_dir.as_ref();
        if !persist_dir.is_dir() {
            return Err(RagError::StoreNotBuilt(persist_dir.to_path_buf()));
        }

        let db = open_db(persist_dir).await?;
        let names = db
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::store(persist_dir, e))?;
        if !names.iter().any(|n| n == TABLE_NAME) {
            return Err(RagError::StoreNotBuilt(persist_dir.to_path_buf()));
        }

        let table = db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| corrupt(persist_dir, e))?;
        let schema = table.schema().await.map_err(|e| corrupt(persist_dir, e))?;
        let dimension = vector_dimension(&schema).ok_or_else(|| RagError::CorruptStore {
            path: persist_dir.to_path_buf(),
            detail: "table has no fixed-size float vector column".to_string(),
        })?;
        let expected = build_arrow_schema(dimension as i32);
        for field in expected.fields().iter().filter(|f| f.name() != "vector") {
            match schema.field_with_name(field.name()) {
                Ok(found) if found.data_type() == field.data_type() => {}
                _ => {
                    return Err(RagError::CorruptStore {
                        path: persist_dir.to_path_buf(),
                        detail: format!("column '{}' is missing or mistyped", field.name()),
                    })
                }
            }
        }

        let len = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::store(persist_dir, e))?;

        debug!(
            "Opened store at {} with {} entries",
            persist_dir.display(),
            len
        );

        Ok(VectorStore {
            path: persist_dir.to_path_buf(),
            dimension,
            len,
            table,
        })
    }

    /// The `k` entries nearest to `query`, closest first. Equal distances
    /// keep insertion order.
    pub async fn similarity_search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchHit>> {
        if query.dimension() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.dimension(),
            });
        }
        if k == 0 || self.len == 0 {
            return Ok(Vec::new());
        }

        let mut limit = k.min(self.len);
        let mut rows = loop {
            let mut rows = self.nearest(query, limit).await?;
            rows.sort_by(|a, b| {
                distance_of(a)
                    .total_cmp(&distance_of(b))
                    .then(a.ordinal.cmp(&b.ordinal))
            });

            // Unfetched rows are no closer than the last fetched one, so once
            // that one is strictly farther than the k-th, no tie is missing.
            let settled = match (rows.get(k.min(rows.len()).saturating_sub(1)), rows.last()) {
                (Some(kth), Some(last)) => distance_of(last) > distance_of(kth),
                _ => true,
            };
            if settled || rows.len() < limit || limit >= self.len {
                break rows;
            }
            limit = (limit * 2).min(self.len);
        };
        rows.truncate(k);

        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                distance: distance_of(&row),
                entry: row.entry,
            })
            .collect())
    }

    async fn nearest(&self, query: &Embedding, limit: usize) -> Result<Vec<Row>> {
        let mut stream = self
            .table
            .vector_search(query.values.clone())
            .map_err(|e| RagError::store(&self.path, e))?
            .distance_type(DistanceType::L2)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::store(&self.path, e))?;

        let mut rows = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::store(&self.path, e))?
        {
            rows.extend(read_rows(&batch, &self.path)?);
        }
        Ok(rows)
    }

    /// Every entry, in insertion order
    pub async fn entries(&self) -> Result<Vec<VectorStoreEntry>> {
        if self.len == 0 {
            return Ok(Vec::new());
        }

        let mut stream = self
            .table
            .query()
            .limit(self.len)
            .execute()
            .await
            .map_err(|e| RagError::store(&self.path, e))?;

        let mut rows = Vec::with_capacity(self.len);
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::store(&self.path, e))?
        {
            rows.extend(read_rows(&batch, &self.path)?);
        }
        rows.sort_by_key(|row| row.ordinal);
        Ok(rows.into_iter().map(|row| row.entry).collect())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

async fn open_db(path: &Path) -> Result<Connection> {
    connect(path.to_string_lossy().as_ref())
        .execute()
        .await
        .map_err(|e| RagError::store(path, e))
}

async fn write_table(dir: &Path, entries: &[VectorStoreEntry], dimension: i32) -> Result<()> {
    let schema = build_arrow_schema(dimension);
    let batches = if entries.is_empty() {
        Vec::new()
    } else {
        let batch = entries_to_record_batch(entries, schema.clone(), dimension)
            .map_err(|e| RagError::store(dir, e.into()))?;
        vec![Ok(batch)]
    };
    let reader = Box::new(RecordBatchIterator::new(batches.into_iter(), schema));

    let db = open_db(dir).await?;
    db.create_table(TABLE_NAME, reader)
        .execute()
        .await
        .map_err(|e| RagError::store(dir, e))?;
    Ok(())
}

fn entries_to_record_batch(
    entries: &[VectorStoreEntry],
    schema: SchemaRef,
    dimension: i32,
) -> std::result::Result<RecordBatch, ArrowError> {
    let ordinals: Vec<u64> = (0..entries.len() as u64).collect();
    let contents: Vec<&str> = entries.iter().map(|e| e.chunk.content.as_str()).collect();
    let sources: Vec<&str> = entries
        .iter()
        .map(|e| e.chunk.metadata.source.as_str())
        .collect();
    let start_indices: Vec<u64> = entries
        .iter()
        .map(|e| e.chunk.metadata.start_index as u64)
        .collect();
    let overlaps: Vec<u64> = entries.iter().map(|e| e.chunk.overlap as u64).collect();
    let vectors = entries
        .iter()
        .map(|e| Some(e.vector.values.iter().map(|&x| Some(x)).collect::<Vec<_>>()));

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt64Array::from(ordinals)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(sources)),
            Arc::new(UInt64Array::from(start_indices)),
            Arc::new(UInt64Array::from(overlaps)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                vectors, dimension,
            )),
        ],
    )
}

fn read_rows(batch: &RecordBatch, path: &Path) -> Result<Vec<Row>> {
    let ordinals = column::<UInt64Array>(batch, "ordinal", path)?;
    let contents = column::<StringArray>(batch, "content", path)?;
    let sources = column::<StringArray>(batch, "source", path)?;
    let start_indices = column::<UInt64Array>(batch, "start_index", path)?;
    let overlaps = column::<UInt64Array>(batch, "overlap", path)?;
    let vectors = column::<FixedSizeListArray>(batch, "vector", path)?;
    let distances = batch
        .column_by_name(DISTANCE_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let values = vectors.value(i);
        let values = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| RagError::CorruptStore {
                path: path.to_path_buf(),
                detail: "vector items are not f32".to_string(),
            })?;

        rows.push(Row {
            ordinal: ordinals.value(i),
            entry: VectorStoreEntry {
                chunk: Chunk {
                    content: contents.value(i).to_string(),
                    metadata: ChunkMetadata {
                        source: sources.value(i).to_string(),
                        start_index: start_indices.value(i) as usize,
                    },
                    overlap: overlaps.value(i) as usize,
                },
                vector: Embedding::from(values.values().to_vec()),
            },
            distance: distances.map(|d| d.value(i)),
        });
    }
    Ok(rows)
}

fn column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    path: &Path,
) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| RagError::CorruptStore {
            path: path.to_path_buf(),
            detail: format!("column '{}' is missing or mistyped", name),
        })
}

fn vector_dimension(schema: &Schema) -> Option<usize> {
    match schema.field_with_name("vector").ok()?.data_type() {
        DataType::FixedSizeList(item, size)
            if item.data_type() == &DataType::Float32 && *size > 0 =>
        {
            Some(*size as usize)
        }
        _ => None,
    }
}

fn distance_of(row: &Row) -> f32 {
    row.distance.unwrap_or(f32::INFINITY)
}

fn corrupt(path: &Path, err: lancedb::Error) -> RagError {
    RagError::CorruptStore {
        path: path.to_path_buf(),
        detail: err.to_string(),
    }
}

fn first_mismatch(entries: &[VectorStoreEntry], dimension: usize) -> Option<usize> {
    entries
        .iter()
        .map(|e| e.vector.dimension())
        .find(|d| *d != dimension)
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn discard(staged: &Path) {
    if let Err(e) = remove_path(staged) {
        warn!("Failed to delete staging directory {}: {}", staged.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(source: &str, content: &str, values: &[f32]) -> VectorStoreEntry {
        VectorStoreEntry {
            chunk: Chunk {
                content: content.to_string(),
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    start_index: 0,
                },
                overlap: 0,
            },
            vector: Embedding::from(values.to_vec()),
        }
    }

    fn contents(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.entry.chunk.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_open_before_build() {
        let tmp = TempDir::new().unwrap();
        let err = VectorStore::open(tmp.path().join("kb_store")).await.unwrap_err();
        assert!(matches!(err, RagError::StoreNotBuilt(_)));

        // an existing directory without the table is not a store either
        let err = VectorStore::open(tmp.path()).await.unwrap_err();
        assert!(matches!(err, RagError::StoreNotBuilt(_)));
    }

    #[tokio::test]
    async fn test_rebuild_persists_across_open() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("kb_store");
        let mut second = entry("b.md", "bravo", &[0.0, 1.0]);
        second.chunk.metadata.start_index = 42;
        second.chunk.overlap = 3;
        let entries = vec![entry("a.md", "alpha", &[1.0, 0.0]), second];

        let built = VectorStore::rebuild(entries.clone(), 2, &dir).await.unwrap();
        let opened = VectorStore::open(&dir).await.unwrap();

        assert_eq!(built.len(), 2);
        assert_eq!(built.path(), dir.as_path());
        assert_eq!(opened.dimension(), 2);
        assert_eq!(opened.entries().await.unwrap(), entries);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_entries() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("kb_store");

        VectorStore::rebuild(vec![entry("old.md", "old", &[1.0, 1.0])], 2, &dir)
            .await
            .unwrap();
        fs::write(dir.join("stray.bin"), b"leftover").unwrap();
        VectorStore::rebuild(vec![entry("new.md", "new", &[5.0, 5.0])], 2, &dir)
            .await
            .unwrap();

        let store = VectorStore::open(&dir).await.unwrap();
        let hits = store
            .similarity_search(&Embedding::from(vec![1.0, 1.0]), 10)
            .await
            .unwrap();
        assert_eq!(contents(&hits), vec!["new"]);
        assert!(!dir.join("stray.bin").exists());

        // no staging or backup directories are left next to the store
        let siblings: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(siblings.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_old_store() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("kb_store");
        VectorStore::rebuild(vec![entry("old.md", "old", &[1.0, 1.0])], 2, &dir)
            .await
            .unwrap();

        let err = VectorStore::rebuild(vec![entry("bad.md", "bad", &[1.0, 2.0, 3.0])], 2, &dir)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));

        let store = VectorStore::open(&dir).await.unwrap();
        assert_eq!(store.entries().await.unwrap()[0].chunk.content, "old");
    }

    #[tokio::test]
    async fn test_search_ranks_by_distance_with_stable_ties() {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::rebuild(
            vec![
                entry("a.md", "far", &[10.0, 0.0]),
                entry("a.md", "tie-first", &[1.0, 0.0]),
                entry("b.md", "exact", &[0.0, 0.0]),
                entry("b.md", "tie-second", &[0.0, 1.0]),
            ],
            2,
            tmp.path().join("kb_store"),
        )
        .await
        .unwrap();

        let hits = store.similarity_search(&Embedding::zeros(2), 3).await.unwrap();
        assert_eq!(contents(&hits), vec!["exact", "tie-first", "tie-second"]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].distance, 1.0);
    }

    #[tokio::test]
    async fn test_ties_at_the_cutoff_keep_insertion_order() {
        let tmp = TempDir::new().unwrap();
        let entries: Vec<_> = (0..12)
            .map(|i| entry("same.md", &format!("copy-{}", i), &[3.0, 4.0]))
            .collect();
        let store = VectorStore::rebuild(entries, 2, tmp.path().join("kb_store"))
            .await
            .unwrap();

        let hits = store.similarity_search(&Embedding::zeros(2), 2).await.unwrap();
        assert_eq!(contents(&hits), vec!["copy-0", "copy-1"]);
        assert_eq!(hits[0].distance, 25.0);
    }

    #[tokio::test]
    async fn test_search_edge_cases() {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::rebuild(
            vec![entry("a.md", "only", &[1.0, 2.0])],
            2,
            tmp.path().join("kb_store"),
        )
        .await
        .unwrap();

        assert_eq!(
            store.similarity_search(&Embedding::zeros(2), 5).await.unwrap().len(),
            1
        );
        assert!(store
            .similarity_search(&Embedding::zeros(2), 0)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            store.similarity_search(&Embedding::zeros(3), 1).await,
            Err(RagError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_store_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("kb_store");
        VectorStore::rebuild(Vec::new(), 4, &dir).await.unwrap();

        let store = VectorStore::open(&dir).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.dimension(), 4);
        assert!(store
            .similarity_search(&Embedding::zeros(4), 3)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_foreign_table_is_reported_as_corrupt() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("kb_store");
        fs::create_dir_all(&dir).unwrap();

        let schema = Arc::new(Schema::new(vec![Field::new("name", DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec!["not a chunk"]))],
        )
        .unwrap();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let db = open_db(&dir).await.unwrap();
        db.create_table(TABLE_NAME, reader).execute().await.unwrap();

        let err = VectorStore::open(&dir).await.unwrap_err();
        assert!(matches!(err, RagError::CorruptStore { .. }));
    }

    #[tokio::test]
    async fn test_rebuild_over_plain_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("kb_store");
        fs::write(&dir, "not a directory").unwrap();

        VectorStore::rebuild(vec![entry("a.md", "alpha", &[0.5])], 1, &dir)
            .await
            .unwrap();
        assert_eq!(VectorStore::open(&dir).await.unwrap().len(), 1);
    }
}
