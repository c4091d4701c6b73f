use crate::config::StoreConfig;
use crate::embeddings::{build_provider, EmbeddingProvider};
use crate::error::{Result, VectorStoreError};
use crate::index::{check_vector, SimilarityIndex};
use crate::snapshot::SnapshotFile;
use crate::types::{
    ChunkDetail, ChunkRecord, DocumentContent, GroupSummary, Metadata, SearchHit, StoreStatus,
    CHUNK_INDEX_KEY, SOURCE_KEY,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Records and the index built from them. Always replaced together.
struct StoreState {
    records: Vec<ChunkRecord>,
    index: SimilarityIndex,
}

impl StoreState {
    fn build(dimension: usize, records: Vec<ChunkRecord>) -> Result<Self> {
        let index = SimilarityIndex::build(
            dimension,
            records
                .iter()
                .map(|r| (r.id.as_str(), r.embedding.as_slice())),
        )?;
        Ok(Self { records, index })
    }

    fn is_consistent(&self) -> bool {
        self.records.len() == self.index.len()
            && self
                .records
                .iter()
                .zip(self.index.ids())
                .all(|(record, id)| record.id == *id)
    }
}

/// Embedding-indexed store of document chunks.
///
/// `add` and `delete` hold the write lock while they embed, rebuild the index
/// and rewrite the snapshot; the new state is only installed once the snapshot
/// is durable. Reads share the lock.
pub struct ChunkStore {
    provider: Arc<dyn EmbeddingProvider>,
    snapshot: SnapshotFile,
    state: RwLock<StoreState>,
}

impl ChunkStore {
    /// Opens the store described by `config`, choosing the embedding backend once.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let provider = build_provider(&config.embedding)?;
        Self::open(SnapshotFile::in_dir(&config.data_dir), provider)
    }

    /// Loads `snapshot` (empty if missing or unreadable) and builds the index.
    pub fn open(snapshot: SnapshotFile, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        log::info!("Opening chunk store at {:?}", snapshot.path());
        let dimension = provider.dimension();
        let mut records = dedupe_ids(snapshot.load_or_empty());
        for record in &records {
            check_vector(dimension, &record.embedding)?;
        }
        let upgraded = records
            .iter_mut()
            .map(ChunkRecord::upgrade_legacy_metadata)
            .filter(|changed| *changed)
            .count();
        if upgraded > 0 {
            log::info!("Upgraded metadata of {upgraded} legacy chunks");
        }
        let state = StoreState::build(dimension, records)?;

        log::info!(
            "Loaded {} chunks (model '{}', dim {}{})",
            state.records.len(),
            provider.model_id(),
            dimension,
            if provider.is_degraded() { ", degraded" } else { "" }
        );

        Ok(Self {
            provider,
            snapshot,
            state: RwLock::new(state),
        })
    }

    /// Embeds `texts` as chunks `0..n` of `group_id` and persists them.
    ///
    /// Chunks already stored under `group_id` are replaced. Nothing is
    /// committed unless every chunk embeds and the snapshot write succeeds.
    pub fn add<S: AsRef<str>>(
        &self,
        group_id: &str,
        texts: &[S],
        metadata: Metadata,
    ) -> Result<usize> {
        if group_id.trim().is_empty() {
            return Err(VectorStoreError::Validation(
                "group id must not be empty".to_string(),
            ));
        }
        if !metadata.get(SOURCE_KEY).is_some_and(Value::is_string) {
            return Err(VectorStoreError::Validation(format!(
                "metadata for '{group_id}' must contain a string '{SOURCE_KEY}'"
            )));
        }
        if texts.is_empty() {
            return Ok(0);
        }

        let mut state = self.write()?;
        log::info!("Adding {} chunks to group '{group_id}'", texts.len());

        let contents: Vec<&str> = texts.iter().map(AsRef::as_ref).collect();
        let vectors = self.provider.encode_batch(&contents)?;
        if vectors.len() != contents.len() {
            return Err(VectorStoreError::provider(format!(
                "expected {} embeddings, got {}",
                contents.len(),
                vectors.len()
            )));
        }

        let dimension = self.provider.dimension();
        let created_at = Utc::now();
        let mut records: Vec<ChunkRecord> = state
            .records
            .iter()
            .filter(|r| r.group_id != group_id)
            .cloned()
            .collect();
        let replaced = state.records.len() - records.len();

        for (index, (content, embedding)) in contents.iter().zip(vectors).enumerate() {
            check_vector(dimension, &embedding)?;
            let mut chunk_metadata = metadata.clone();
            chunk_metadata.insert(CHUNK_INDEX_KEY.to_string(), Value::from(index));
            records.push(ChunkRecord {
                id: ChunkRecord::chunk_id(group_id, index),
                group_id: group_id.to_string(),
                content: (*content).to_string(),
                embedding,
                metadata: chunk_metadata,
                created_at,
            });
        }

        self.commit(&mut state, records)?;
        if replaced > 0 {
            log::info!("Replaced {replaced} existing chunks of group '{group_id}'");
        }
        log::info!(
            "Added {} chunks. Total: {}",
            contents.len(),
            state.records.len()
        );
        Ok(contents.len())
    }

    /// Removes every chunk of `group_id`. Returns `false` if there were none.
    pub fn delete(&self, group_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        if !state.records.iter().any(|r| r.group_id == group_id) {
            return Ok(false);
        }

        let records: Vec<ChunkRecord> = state
            .records
            .iter()
            .filter(|r| r.group_id != group_id)
            .cloned()
            .collect();
        let removed = state.records.len() - records.len();

        self.commit(&mut state, records)?;
        log::info!(
            "Deleted group '{group_id}' ({removed} chunks). Total: {}",
            state.records.len()
        );
        Ok(true)
    }

    /// Returns up to `limit` chunks most similar to `query`, best first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let state = self.read()?;
        log::debug!("Searching for: '{query}' (limit: {limit})");
        if state.records.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.provider.encode(query)?;
        let neighbors = state.index.search(&query_vector, limit)?;

        let results: Vec<SearchHit> = neighbors
            .into_iter()
            .filter_map(|(row, similarity)| {
                state.records.get(row).map(|record| SearchHit {
                    id: record.id.clone(),
                    group_id: record.group_id.clone(),
                    content: record.content.clone(),
                    metadata: record.metadata.clone(),
                    similarity,
                })
            })
            .collect();

        log::debug!("Found {} results", results.len());
        Ok(results)
    }

    /// Reassembles the document stored under `group_id` in chunk order.
    pub fn get_content(&self, group_id: &str) -> Result<Option<DocumentContent>> {
        let state = self.read()?;
        let mut chunks: Vec<&ChunkRecord> = state
            .records
            .iter()
            .filter(|r| r.group_id == group_id)
            .collect();
        if chunks.is_empty() {
            return Ok(None);
        }
        chunks.sort_by_key(|r| r.chunk_index());

        let full_content = chunks
            .iter()
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join(PARAGRAPH_SEPARATOR);

        Ok(Some(DocumentContent {
            doc_id: group_id.to_string(),
            name: chunks[0].display_name(),
            chunk_count: chunks.len(),
            full_content,
            chunks: chunks
                .iter()
                .map(|r| ChunkDetail {
                    index: r.chunk_index(),
                    content: r.content.clone(),
                })
                .collect(),
        }))
    }

    /// One summary per stored group, in order of first appearance.
    pub fn list_groups(&self) -> Result<Vec<GroupSummary>> {
        let state = self.read()?;
        Ok(summarize_groups(&state.records))
    }

    /// Record and group counts plus the active embedding backend.
    pub fn status(&self) -> Result<StoreStatus> {
        let state = self.read()?;
        let groups = state
            .records
            .iter()
            .map(|r| r.group_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        Ok(StoreStatus {
            records: state.records.len(),
            groups,
            dimension: self.provider.dimension(),
            model_id: self.provider.model_id().to_string(),
            degraded: self.provider.is_degraded(),
            snapshot_path: self.snapshot.path().to_path_buf(),
        })
    }

    /// Rewrites the snapshot from the current state.
    pub fn flush(&self) -> Result<()> {
        let state = self.read()?;
        self.snapshot.write(&state.records)?;
        log::info!("Flushed {} chunks to {:?}", state.records.len(), self.snapshot.path());
        Ok(())
    }

    /// Number of stored chunks.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }

    /// True when no chunks are stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.records.is_empty())
    }

    /// Vector length of the active embedding backend.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// True when the hash fallback produces the embeddings.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.provider.is_degraded()
    }

    /// The snapshot file this store persists to.
    #[must_use]
    pub fn snapshot(&self) -> &SnapshotFile {
        &self.snapshot
    }

    /// Rebuilds the index for `records`, persists them, then installs both.
    fn commit(&self, state: &mut StoreState, records: Vec<ChunkRecord>) -> Result<()> {
        let next = StoreState::build(self.provider.dimension(), records)?;
        self.snapshot.write(&next.records)?;
        *state = next;
        debug_assert!(state.is_consistent());
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| VectorStoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| VectorStoreError::LockPoisoned)
    }

    #[cfg(test)]
    fn index_len(&self) -> usize {
        self.state.read().map(|s| s.index.len()).unwrap_or(0)
    }
}

fn summarize_groups(records: &[ChunkRecord]) -> Vec<GroupSummary> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<GroupSummary> = Vec::new();
    for record in records {
        if let Some(&pos) = positions.get(record.group_id.as_str()) {
            groups[pos].chunk_count += 1;
            continue;
        }
        positions.insert(record.group_id.as_str(), groups.len());
        groups.push(GroupSummary {
            id: record.group_id.clone(),
            name: record.display_name(),
            chunk_count: 1,
        });
    }
    groups
}

/// Keeps the last record for each id, at the position of that last record.
fn dedupe_ids(records: Vec<ChunkRecord>) -> Vec<ChunkRecord> {
    let mut last: HashMap<String, usize> = HashMap::with_capacity(records.len());
    for (pos, record) in records.iter().enumerate() {
        last.insert(record.id.clone(), pos);
    }
    if last.len() == records.len() {
        return records;
    }
    log::warn!(
        "Snapshot holds {} duplicate chunk ids; keeping the last copy of each",
        records.len() - last.len()
    );
    records
        .into_iter()
        .enumerate()
        .filter(|(pos, record)| last.get(&record.id) == Some(pos))
        .map(|(_, record)| record)
        .collect()
}
