use anyhow::{Context, Result};
use rag_vector_store::{
    ChunkStore, DocumentContent, EmbeddingMode, GroupSummary, Metadata, SearchHit, StoreConfig,
    StoreStatus, SOURCE_KEY,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};

/// One store operation requested on the command line.
#[derive(Debug)]
pub enum StoreAction {
    Add {
        group_id: String,
        source: String,
        metadata: Metadata,
        chunks: Vec<String>,
        chunks_file: Option<PathBuf>,
    },
    Delete {
        group_id: String,
    },
    Search {
        query: String,
        limit: Option<usize>,
    },
    Get {
        group_id: String,
    },
    List,
    Status,
    Flush,
}

/// Flag values layered over `RAG_*` environment configuration.
#[derive(Debug, Default, Clone)]
pub struct StoreOverrides {
    pub data_dir: Option<PathBuf>,
    pub embed_mode: Option<EmbeddingMode>,
    pub embed_model: Option<String>,
    pub model_dir: Option<PathBuf>,
}

impl StoreOverrides {
    pub fn resolve(&self) -> Result<StoreConfig> {
        let mut config = StoreConfig::from_env().context("Invalid RAG_* configuration")?;
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut StoreConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(mode) = self.embed_mode {
            config.embedding.mode = mode;
        }
        if let Some(model) = &self.embed_model {
            config.embedding.model_id = model.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.embedding.model_dir = dir.clone();
        }
    }
}

#[derive(Debug)]
pub enum CommandOutput {
    Added {
        group_id: String,
        added: usize,
    },
    Deleted {
        group_id: String,
        deleted: bool,
    },
    Hits {
        query: String,
        limit: usize,
        hits: Vec<SearchHit>,
    },
    Document {
        group_id: String,
        content: Option<DocumentContent>,
    },
    Groups(Vec<GroupSummary>),
    Status(StoreStatus),
    Flushed(StoreStatus),
}

impl CommandOutput {
    pub fn message(&self) -> String {
        match self {
            Self::Added { group_id, added } => format!("Added {added} chunks to '{group_id}'"),
            Self::Deleted {
                group_id,
                deleted: true,
            } => format!("Deleted '{group_id}'"),
            Self::Deleted { group_id, .. } | Self::Document {
                group_id,
                content: None,
            } => format!("Document '{group_id}' not found"),
            Self::Document {
                content: Some(content),
                ..
            } => format!("{} chunks from '{}'", content.chunk_count, content.name),
            Self::Hits { hits, .. } => format!("{} results", hits.len()),
            Self::Groups(groups) => format!("{} documents", groups.len()),
            Self::Status(status) => status_line(status),
            Self::Flushed(status) => format!(
                "Wrote {} chunks to {}",
                status.records,
                status.snapshot_path.display()
            ),
        }
    }

    pub fn data(&self) -> serde_json::Result<Value> {
        match self {
            Self::Added { group_id, added } => Ok(json!({ "groupId": group_id, "added": added })),
            Self::Deleted { group_id, deleted } => {
                Ok(json!({ "groupId": group_id, "deleted": deleted }))
            }
            Self::Hits { query, limit, hits } => Ok(json!({
                "query": query,
                "limit": limit,
                "hits": serde_json::to_value(hits)?,
            })),
            Self::Document { content, .. } => serde_json::to_value(content),
            Self::Groups(groups) => Ok(json!({ "groups": serde_json::to_value(groups)? })),
            Self::Status(status) | Self::Flushed(status) => serde_json::to_value(status),
        }
    }
}

fn status_line(status: &StoreStatus) -> String {
    let backend = if status.degraded {
        format!("{} (degraded)", status.model_id)
    } else {
        status.model_id.clone()
    };
    format!(
        "{} chunks in {} documents, embeddings: {backend}",
        status.records, status.groups
    )
}

/// Envelope printed by `--json`.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Ok,
    Error,
}

impl CommandResponse {
    pub fn from_output(output: &CommandOutput) -> Result<Self> {
        Ok(Self {
            status: CommandStatus::Ok,
            message: Some(output.message()),
            data: output.data()?,
        })
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            status: CommandStatus::Error,
            message: Some(format!("{err:#}")),
            data: Value::Null,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, CommandStatus::Error)
    }
}

/// Opens the store described by `config` and runs one action against it.
///
/// Blocking: embedding and snapshot writes happen on the calling thread.
pub fn execute(config: &StoreConfig, action: StoreAction) -> Result<CommandOutput> {
    let store = ChunkStore::from_config(config).with_context(|| {
        format!(
            "Failed to open chunk store in {}",
            config.data_dir.display()
        )
    })?;

    let output = match action {
        StoreAction::Add {
            group_id,
            source,
            mut metadata,
            mut chunks,
            chunks_file,
        } => {
            if let Some(path) = chunks_file {
                chunks.extend(load_chunks(&path)?);
            }
            if chunks.is_empty() {
                anyhow::bail!("No chunks given (pass CHUNK arguments or --chunks-file)");
            }
            metadata.insert(SOURCE_KEY.to_string(), Value::String(source));
            let added = store
                .add(&group_id, chunks.as_slice(), metadata)
                .with_context(|| format!("Failed to add '{group_id}'"))?;
            CommandOutput::Added { group_id, added }
        }
        StoreAction::Delete { group_id } => {
            let deleted = store
                .delete(&group_id)
                .with_context(|| format!("Failed to delete '{group_id}'"))?;
            CommandOutput::Deleted { group_id, deleted }
        }
        StoreAction::Search { query, limit } => {
            let limit = limit.unwrap_or(config.top_k);
            let hits = store.search(&query, limit).context("Search failed")?;
            CommandOutput::Hits { query, limit, hits }
        }
        StoreAction::Get { group_id } => {
            let content = store.get_content(&group_id)?;
            CommandOutput::Document { group_id, content }
        }
        StoreAction::List => CommandOutput::Groups(store.list_groups()?),
        StoreAction::Status => CommandOutput::Status(store.status()?),
        StoreAction::Flush => {
            store.flush().context("Failed to rewrite snapshot")?;
            CommandOutput::Flushed(store.status()?)
        }
    };
    Ok(output)
}

/// Reads a JSON array of chunk strings from `path`, or from stdin for `-`.
fn load_chunks(path: &Path) -> Result<Vec<String>> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read chunks from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chunks file {}", path.display()))?
    };
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of strings", path.display()))
}

/// Parses `key=value`; the value is taken as JSON when it parses, otherwise as a string.
pub fn parse_meta(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty metadata key in '{raw}'"));
    }
    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
