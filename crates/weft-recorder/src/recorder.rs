//! The recorder proper: cache, per-record locks, atomic persistence, and the
//! lazy assistant-turn summarizer.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use weft_agent::client::{AgentClient, ClassifyRequest};

use crate::error::{RecorderError, Result};
use crate::types::{ConversationRecord, Turn};

/// Default bound on cached records.
const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Insertion-ordered bounded cache. Eviction follows insertion order
/// (least-recently-inserted first); the disk remains authoritative, so an
/// evicted record re-hydrates on the next touch.
struct RecordCache {
    capacity: usize,
    order: VecDeque<String>,
    records: HashMap<String, ConversationRecord>,
}

impl RecordCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            records: HashMap::new(),
        }
    }

    /// Insert or replace. Returns the evicted record id, if any.
    fn put(&mut self, record: ConversationRecord) -> Option<String> {
        if self.records.insert(record.id.clone(), record.clone()).is_none() {
            self.order.push_back(record.id.clone());
        }
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.records.remove(&evicted);
                return Some(evicted);
            }
        }
        None
    }

    fn get(&self, id: &str) -> Option<&ConversationRecord> {
        self.records.get(id)
    }
}

struct Inner {
    cache: RecordCache,
    /// Per-record write serialization. The lock entry is dropped alongside a
    /// cache eviction and recreated on the next write.
    locks: HashMap<String, Arc<Mutex<()>>>,
}

pub struct Recorder {
    dir: PathBuf,
    inner: Mutex<Inner>,
    /// Cheap model used for lazy assistant-turn summaries.
    summarizer: Option<(Arc<dyn AgentClient>, String)>,
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Arc::new(Self {
            dir,
            inner: Mutex::new(Inner {
                cache: RecordCache::new(DEFAULT_CACHE_CAPACITY),
                locks: HashMap::new(),
            }),
            summarizer: None,
        }))
    }

    pub fn with_summarizer(
        dir: impl Into<PathBuf>,
        client: Arc<dyn AgentClient>,
        model: impl Into<String>,
    ) -> Result<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Arc::new(Self {
            dir,
            inner: Mutex::new(Inner {
                cache: RecordCache::new(DEFAULT_CACHE_CAPACITY),
                locks: HashMap::new(),
            }),
            summarizer: Some((client, model.into())),
        }))
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Create a new record, cache it, and persist it asynchronously.
    pub async fn create_conversation(
        self: &Arc<Self>,
        channel: &str,
        thread_ts: Option<&str>,
        owner: &str,
        title: Option<&str>,
        workflow: Option<&str>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let record = ConversationRecord::new(
            id.clone(),
            channel,
            thread_ts.map(String::from),
            owner,
            title.map(String::from),
            workflow.map(String::from),
        );

        {
            let mut inner = self.inner.lock().await;
            if let Some(evicted) = inner.cache.put(record.clone()) {
                inner.locks.remove(&evicted);
            }
        }

        let recorder = Arc::clone(self);
        let persist_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = recorder.mutate(&persist_id, |_| {}).await {
                warn!(record = %persist_id, error = %e, "initial record persist failed");
            }
        });
        id
    }

    /// Append a user turn. Fire-and-forget: errors are logged, the caller's
    /// turn proceeds regardless.
    pub fn record_user_turn(self: &Arc<Self>, id: &str, user: &str, text: &str) {
        let recorder = Arc::clone(self);
        let (id, user, text) = (id.to_string(), user.to_string(), text.to_string());
        tokio::spawn(async move {
            let result = recorder
                .mutate(&id, |record| {
                    record.turns.push(Turn::User {
                        text,
                        user,
                        at: Utc::now(),
                    });
                })
                .await;
            if let Err(e) = result {
                warn!(record = %id, error = %e, "user turn write failed");
            }
        });
    }

    /// Append an assistant turn with raw content, then schedule the lazy
    /// title + summary pass.
    pub fn record_assistant_turn(self: &Arc<Self>, id: &str, text: &str) {
        let recorder = Arc::clone(self);
        let (id, text) = (id.to_string(), text.to_string());
        tokio::spawn(async move {
            let mut turn_index = 0;
            let result = recorder
                .mutate(&id, |record| {
                    record.turns.push(Turn::Assistant {
                        text,
                        title: None,
                        summary: None,
                        at: Utc::now(),
                    });
                    turn_index = record.turns.len() - 1;
                })
                .await;
            match result {
                Ok(()) => recorder.summarize_turn(&id, turn_index).await,
                Err(e) => warn!(record = %id, error = %e, "assistant turn write failed"),
            }
        });
    }

    /// Load a record: cache hit, else disk re-hydration.
    pub async fn load(&self, id: &str) -> Result<ConversationRecord> {
        {
            let inner = self.inner.lock().await;
            if let Some(record) = inner.cache.get(id) {
                return Ok(record.clone());
            }
        }
        let record = read_record(&self.path_for(id))?;
        let mut inner = self.inner.lock().await;
        if let Some(evicted) = inner.cache.put(record.clone()) {
            inner.locks.remove(&evicted);
        }
        Ok(record)
    }

    /// List all records, newest `updated_at` first. Corrupt files are skipped
    /// with a warning rather than failing the listing.
    pub async fn list(&self) -> Result<Vec<ConversationRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt record"),
            }
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    // --- internals ---------------------------------------------------------

    /// Run one serialized read-modify-write cycle against the record.
    ///
    /// The per-record lock is taken for the whole cycle, so two concurrent
    /// writes to the same file can never overlap; different records proceed
    /// in parallel. When the record fell out of the cache, disk re-hydrates
    /// it under the same lock.
    async fn mutate<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ConversationRecord),
    {
        let lock = {
            let mut inner = self.inner.lock().await;
            Arc::clone(
                inner
                    .locks
                    .entry(id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _write_guard = lock.lock().await;

        let mut record = {
            let inner = self.inner.lock().await;
            inner.cache.get(id).cloned()
        };
        if record.is_none() {
            record = Some(read_record(&self.path_for(id))?);
        }
        let mut record = record.expect("record resolved above");

        apply(&mut record);
        record.updated_at = Utc::now();

        write_record_atomic(&self.dir, &self.path_for(id), &record)?;

        let mut inner = self.inner.lock().await;
        if let Some(evicted) = inner.cache.put(record) {
            inner.locks.remove(&evicted);
        }
        debug!(record = %id, "record persisted");
        Ok(())
    }

    /// Lazy pass: ask the cheap model for a title and a 3-line summary, then
    /// patch the assistant turn in place. Best-effort.
    async fn summarize_turn(self: &Arc<Self>, id: &str, turn_index: usize) {
        let Some((client, model)) = &self.summarizer else {
            return;
        };
        let Ok(record) = self.load(id).await else {
            return;
        };
        let Some(Turn::Assistant { text, .. }) = record.turns.get(turn_index) else {
            return;
        };

        let request = ClassifyRequest {
            model: model.clone(),
            system: Some(
                "Reply with JSON {\"title\": \"...\", \"summary\": \"three lines at most\"} \
                 describing the assistant message."
                    .to_string(),
            ),
            prompt: text.clone(),
            max_tokens: 256,
            temperature: 0.0,
        };
        let Ok(response) = client.classify(request).await else {
            return;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(response.trim()) else {
            return;
        };
        let title = value["title"].as_str().map(String::from);
        let summary = value["summary"].as_str().map(String::from);

        let result = self
            .mutate(id, |record| {
                if record.title.is_none() {
                    record.title = title.clone();
                }
                if let Some(Turn::Assistant {
                    title: turn_title,
                    summary: turn_summary,
                    ..
                }) = record.turns.get_mut(turn_index)
                {
                    *turn_title = title;
                    *turn_summary = summary;
                }
            })
            .await;
        if let Err(e) = result {
            warn!(record = %id, error = %e, "summary patch failed");
        }
    }
}

fn read_record(path: &Path) -> Result<ConversationRecord> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RecorderError::NotFound {
                id: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            }
        } else {
            RecorderError::Io(e)
        }
    })?;
    serde_json::from_str(&data).map_err(|e| RecorderError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Atomic write: temp file in the same directory, then rename over the
/// destination.
fn write_record_atomic(dir: &Path, path: &Path, record: &ConversationRecord) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, record)?;
    tmp.persist(path)
        .map_err(|e| RecorderError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn create_and_record_turns() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path()).unwrap();

        let id = recorder
            .create_conversation("C1", Some("1.0"), "U1", Some("t"), Some("pr-review"))
            .await;

        recorder.record_user_turn(&id, "U1", "hello");
        recorder.record_assistant_turn(&id, "hi there");

        let path = dir.path().join(format!("{id}.json"));
        wait_for(|| {
            std::fs::read_to_string(&path)
                .map(|s| s.matches("\"role\"").count() >= 2)
                .unwrap_or(false)
        })
        .await;

        let record = read_record(&path).unwrap();
        assert_eq!(record.owner, "U1");
        assert_eq!(record.workflow.as_deref(), Some("pr-review"));
        assert_eq!(record.turns.len(), 2);
    }

    #[tokio::test]
    async fn serialized_writes_keep_all_turns() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path()).unwrap();
        let id = recorder
            .create_conversation("C1", None, "U1", None, None)
            .await;

        for i in 0..20 {
            recorder.record_user_turn(&id, "U1", &format!("turn {i}"));
        }

        let path = dir.path().join(format!("{id}.json"));
        wait_for(|| {
            std::fs::read_to_string(&path)
                .map(|s| s.matches("\"role\"").count() == 20)
                .unwrap_or(false)
        })
        .await;

        let record = read_record(&path).unwrap();
        assert_eq!(record.turns.len(), 20);
    }

    #[tokio::test]
    async fn eviction_rehydrates_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path()).unwrap();

        let first = recorder
            .create_conversation("C1", None, "U1", None, None)
            .await;
        // Synchronous write so the file exists before eviction.
        recorder.mutate(&first, |_| {}).await.unwrap();

        // Fill past capacity; `first` is least-recently-inserted.
        for _ in 0..DEFAULT_CACHE_CAPACITY {
            let id = recorder
                .create_conversation("C1", None, "U1", None, None)
                .await;
            recorder.mutate(&id, |_| {}).await.unwrap();
        }
        {
            let inner = recorder.inner.lock().await;
            assert!(inner.cache.get(&first).is_none());
            assert!(!inner.locks.contains_key(&first));
        }

        // A later write re-hydrates from disk and still lands.
        recorder
            .mutate(&first, |r| {
                r.turns.push(Turn::User {
                    text: "after eviction".into(),
                    user: "U1".into(),
                    at: Utc::now(),
                })
            })
            .await
            .unwrap();
        let record = recorder.load(&first).await.unwrap();
        assert_eq!(record.turns.len(), 1);
    }

    #[tokio::test]
    async fn listing_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path()).unwrap();

        let id = recorder
            .create_conversation("C1", None, "U1", None, None)
            .await;
        recorder.mutate(&id, |_| {}).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let listed = recorder.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }

    #[tokio::test]
    async fn listing_sorts_by_updated_desc() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path()).unwrap();

        let a = recorder.create_conversation("C1", None, "U1", None, None).await;
        recorder.mutate(&a, |_| {}).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let b = recorder.create_conversation("C1", None, "U1", None, None).await;
        recorder.mutate(&b, |_| {}).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        recorder
            .mutate(&a, |r| {
                r.turns.push(Turn::User {
                    text: "bump".into(),
                    user: "U1".into(),
                    at: Utc::now(),
                })
            })
            .await
            .unwrap();

        let listed = recorder.list().await.unwrap();
        assert_eq!(listed[0].id, a);
        assert_eq!(listed[1].id, b);
    }
}
