use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Result, SquallError};
use crate::message::Message;

/// Persistence contract for per-thread transcripts and context. A thread
/// comes into existence on first use; reading an unknown thread yields the
/// empty transcript, not an error. Implementations must allow concurrent
/// access across distinct threads while keeping mutations on one thread
/// mutually exclusive, so appends never interleave or reorder.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn append(&self, thread_id: &str, message: Message) -> Result<()>;

    /// Append several messages as one unit: either all land, in order, or
    /// none do.
    async fn append_all(&self, thread_id: &str, messages: Vec<Message>) -> Result<()>;

    /// The full ordered transcript as of this call.
    async fn snapshot(&self, thread_id: &str) -> Result<Vec<Message>>;

    async fn context(&self, thread_id: &str) -> Result<Map<String, Value>>;

    /// Shallow merge: keys in `partial` overwrite, unrelated keys are
    /// retained.
    async fn merge_context(&self, thread_id: &str, partial: Map<String, Value>) -> Result<()>;
}

#[derive(Default)]
struct ThreadState {
    messages: Vec<Message>,
    context: Map<String, Value>,
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryThreadStore {
    threads: RwLock<HashMap<String, Arc<Mutex<ThreadState>>>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, thread_id: &str) -> Arc<Mutex<ThreadState>> {
        if let Some(entry) = self.threads.read().await.get(thread_id) {
            return entry.clone();
        }
        let mut threads = self.threads.write().await;
        threads.entry(thread_id.to_string()).or_default().clone()
    }

    async fn peek(&self, thread_id: &str) -> Option<Arc<Mutex<ThreadState>>> {
        self.threads.read().await.get(thread_id).cloned()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn append(&self, thread_id: &str, message: Message) -> Result<()> {
        let entry = self.entry(thread_id).await;
        let mut state = entry.lock().await;
        state.messages.push(message);
        Ok(())
    }

    async fn append_all(&self, thread_id: &str, messages: Vec<Message>) -> Result<()> {
        let entry = self.entry(thread_id).await;
        let mut state = entry.lock().await;
        state.messages.extend(messages);
        Ok(())
    }

    async fn snapshot(&self, thread_id: &str) -> Result<Vec<Message>> {
        match self.peek(thread_id).await {
            Some(entry) => Ok(entry.lock().await.messages.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn context(&self, thread_id: &str) -> Result<Map<String, Value>> {
        match self.peek(thread_id).await {
            Some(entry) => Ok(entry.lock().await.context.clone()),
            None => Ok(Map::new()),
        }
    }

    async fn merge_context(&self, thread_id: &str, partial: Map<String, Value>) -> Result<()> {
        let entry = self.entry(thread_id).await;
        let mut state = entry.lock().await;
        for (key, value) in partial {
            state.context.insert(key, value);
        }
        Ok(())
    }
}

/// Durable JSONL store: one `<id>.jsonl` transcript and one `<id>.ctx.json`
/// context document per thread under `root`.
pub struct FileThreadStore {
    root: PathBuf,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileThreadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, thread_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(thread_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks.entry(thread_id.to_string()).or_default().clone()
    }

    fn transcript_path(&self, thread_id: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", sanitize(thread_id)))
    }

    fn context_path(&self, thread_id: &str) -> PathBuf {
        self.root.join(format!("{}.ctx.json", sanitize(thread_id)))
    }

    async fn write_lines(&self, thread_id: &str, messages: &[Message]) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|err| {
            SquallError::Storage(format!("failed to create `{}`: {err}", self.root.display()))
        })?;

        let mut buffer = String::new();
        for message in messages {
            buffer.push_str(&serde_json::to_string(message)?);
            buffer.push('\n');
        }

        let path = self.transcript_path(thread_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| SquallError::Storage(format!("failed to open `{}`: {err}", path.display())))?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|err| SquallError::Storage(format!("failed to persist messages: {err}")))
    }
}

fn sanitize(thread_id: &str) -> String {
    thread_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ThreadStore for FileThreadStore {
    async fn append(&self, thread_id: &str, message: Message) -> Result<()> {
        let lock = self.lock_for(thread_id).await;
        let _guard = lock.lock().await;
        self.write_lines(thread_id, std::slice::from_ref(&message)).await
    }

    async fn append_all(&self, thread_id: &str, messages: Vec<Message>) -> Result<()> {
        let lock = self.lock_for(thread_id).await;
        let _guard = lock.lock().await;
        self.write_lines(thread_id, &messages).await
    }

    async fn snapshot(&self, thread_id: &str) -> Result<Vec<Message>> {
        let lock = self.lock_for(thread_id).await;
        let _guard = lock.lock().await;

        let path = self.transcript_path(thread_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(SquallError::Storage(format!(
                    "failed to read transcript `{}`: {err}",
                    path.display()
                )))
            }
        };

        let mut messages = Vec::new();
        for line in content.lines() {
            messages.push(serde_json::from_str(line)?);
        }
        Ok(messages)
    }

    async fn context(&self, thread_id: &str) -> Result<Map<String, Value>> {
        let lock = self.lock_for(thread_id).await;
        let _guard = lock.lock().await;

        let path = self.context_path(thread_id);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(SquallError::Storage(format!(
                "failed to read context `{}`: {err}",
                path.display()
            ))),
        }
    }

    async fn merge_context(&self, thread_id: &str, partial: Map<String, Value>) -> Result<()> {
        let lock = self.lock_for(thread_id).await;
        let _guard = lock.lock().await;

        let path = self.context_path(thread_id);
        let mut current: Map<String, Value> = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => {
                return Err(SquallError::Storage(format!(
                    "failed to read context `{}`: {err}",
                    path.display()
                )))
            }
        };

        for (key, value) in partial {
            current.insert(key, value);
        }

        fs::create_dir_all(&self.root).await.map_err(|err| {
            SquallError::Storage(format!("failed to create `{}`: {err}", self.root.display()))
        })?;
        fs::write(&path, serde_json::to_vec(&current)?)
            .await
            .map_err(|err| SquallError::Storage(format!("failed to persist context: {err}")))
    }
}
