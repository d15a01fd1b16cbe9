//! Sessions: one batch of uploaded files, and everything derived from it.
//!
//! A session holds the latest transcript, plus a summary, a translation and
//! questions asked about that transcript. Sessions expire a fixed time after
//! they're created.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use clap::Args;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    input::InputFileMeta,
    orchestrator::UnitReport,
    prelude::*,
    text_service::{Summary, Translation},
    transcript::CombinedTranscript,
};

/// Options for where sessions live.
#[derive(Args, Clone, Debug)]
pub struct SessionOpts {
    /// Directory holding one JSON file per session.
    #[clap(long, env = "STUDY_LENS_SESSION_DIR", default_value = ".study-lens/sessions")]
    pub session_dir: PathBuf,

    /// Delete sessions this many minutes after they were created.
    #[clap(long, env = "SESSION_TTL_MINUTES", default_value_t = 60)]
    pub session_ttl_minutes: u32,
}

impl SessionOpts {
    /// How long sessions live.
    pub fn ttl(&self) -> Duration {
        Duration::minutes(i64::from(self.session_ttl_minutes))
    }

    /// Open the session store described by these options.
    pub fn store(&self) -> FileSessionStore {
        FileSessionStore::new(&self.session_dir)
    }
}

/// A question and its answer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct QaEntry {
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

impl QaEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            asked_at: Utc::now(),
        }
    }
}

/// Everything we know about one batch of files.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub input_files: Vec<InputFileMeta>,
    #[serde(default)]
    pub transcript: Option<CombinedTranscript>,
    /// How each unit of the last successful run was recognized.
    #[serde(default)]
    pub units: Vec<UnitReport>,
    #[serde(default)]
    pub summary: Option<Summary>,
    #[serde(default)]
    pub translation: Option<Translation>,
    #[serde(default)]
    pub qa_history: Vec<QaEntry>,
}

impl Session {
    /// Create a session for a batch of files, with no results yet.
    pub fn new(input_files: Vec<InputFileMeta>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            input_files,
            transcript: None,
            units: vec![],
            summary: None,
            translation: None,
            qa_history: vec![],
        }
    }

    /// Has this session outlived `ttl` as of `now`?
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }

    /// Apply an update.
    pub fn apply(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::ClearDerived => {
                self.summary = None;
                self.translation = None;
                self.qa_history.clear();
            }
            SessionUpdate::Transcript {
                input_files,
                transcript,
                units,
            } => {
                self.input_files = input_files;
                self.transcript = Some(transcript);
                self.units = units;
            }
            SessionUpdate::Summary(summary) => self.summary = Some(summary),
            SessionUpdate::Translation(translation) => {
                self.translation = Some(translation)
            }
        }
    }
}

/// A change to a session's results.
#[derive(Clone, Debug)]
pub enum SessionUpdate {
    /// Forget the summary, translation and questions. Sent before a new OCR
    /// run starts.
    ClearDerived,
    /// Replace the transcript after a successful OCR run.
    Transcript {
        input_files: Vec<InputFileMeta>,
        transcript: CombinedTranscript,
        units: Vec<UnitReport>,
    },
    Summary(Summary),
    Translation(Translation),
}

/// Where sessions are kept.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Create and save a new session for these input files.
    async fn create_session(&self, input_files: Vec<InputFileMeta>) -> Result<Session>;

    /// Apply `update` to a session, returning the updated session.
    async fn update_session_result(&self, id: Uuid, update: SessionUpdate) -> Result<Session>;

    /// Record a question and answer.
    async fn append_qa(&self, id: Uuid, entry: QaEntry) -> Result<Session>;

    /// Look up a session. Returns `None` if it doesn't exist.
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// All sessions, oldest first.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Delete a session. Returns `false` if it didn't exist.
    async fn delete_session(&self, id: Uuid) -> Result<bool>;

    /// Delete every session older than `ttl`, returning how many we deleted.
    async fn cleanup_expired(&self, ttl: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut deleted = 0;
        for session in self.list_sessions().await? {
            if session.is_expired(now, ttl) && self.delete_session(session.id).await? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(deleted, "cleaned up expired sessions");
        }
        Ok(deleted)
    }
}

fn not_found(id: Uuid) -> anyhow::Error {
    anyhow!("session {id} not found")
}

/// Sessions kept in memory, for tests and one-shot runs.
#[derive(Clone, Debug, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session as-is.
    pub async fn insert(&self, session: Session) {
        self.sessions.write().await.insert(session.id, session);
    }

    async fn modify(&self, id: Uuid, f: impl FnOnce(&mut Session) + Send) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or_else(|| not_found(id))?;
        f(session);
        Ok(session.clone())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, input_files: Vec<InputFileMeta>) -> Result<Session> {
        let session = Session::new(input_files);
        self.insert(session.clone()).await;
        debug!(session_id = %session.id, "created session");
        Ok(session)
    }

    async fn update_session_result(&self, id: Uuid, update: SessionUpdate) -> Result<Session> {
        self.modify(id, |session| session.apply(update)).await
    }

    async fn append_qa(&self, id: Uuid, entry: QaEntry) -> Result<Session> {
        self.modify(id, |session| session.qa_history.push(entry)).await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions = self
            .sessions
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool> {
        Ok(self.sessions.write().await.remove(&id).is_some())
    }
}

/// Sessions stored as `<id>.json` files in a directory.
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Arc<Mutex<()>>,
}

impl FileSessionStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_owned(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn load(&self, id: Uuid) -> Result<Option<Session>> {
        let path = self.path_for(id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {:?}", path.display()));
            }
        };
        let session = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse {:?}", path.display()))?;
        Ok(Some(session))
    }

    /// Write to a temporary file and rename it, so readers never see a
    /// half-written session.
    async fn save(&self, session: &Session) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {:?}", self.dir.display()))?;
        let path = self.path_for(session.id);
        let tmp_path = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&tmp_path, data)
            .await
            .with_context(|| format!("failed to write {:?}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("failed to rename {:?}", tmp_path.display()))?;
        Ok(())
    }

    async fn modify(&self, id: Uuid, f: impl FnOnce(&mut Session) + Send) -> Result<Session> {
        let _guard = self.lock.lock().await;
        let mut session = self.load(id).await?.ok_or_else(|| not_found(id))?;
        f(&mut session);
        self.save(&session).await?;
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create_session(&self, input_files: Vec<InputFileMeta>) -> Result<Session> {
        let _guard = self.lock.lock().await;
        let session = Session::new(input_files);
        self.save(&session).await?;
        debug!(session_id = %session.id, dir = %self.dir.display(), "created session");
        Ok(session)
    }

    async fn update_session_result(&self, id: Uuid, update: SessionUpdate) -> Result<Session> {
        self.modify(id, |session| session.apply(update)).await
    }

    async fn append_qa(&self, id: Uuid, entry: QaEntry) -> Result<Session> {
        self.modify(id, |session| session.qa_history.push(entry)).await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        self.load(id).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list {:?}", self.dir.display()));
            }
        };
        let mut sessions = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(".json"))
                .and_then(|stem| Uuid::parse_str(stem).ok())
            else {
                continue;
            };
            match self.load(id).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), "skipping session: {err:#}"),
            }
        }
        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete {:?}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::input::InputKind;

    use super::*;

    fn summary() -> Summary {
        Summary {
            summary: "Plants use light.".to_owned(),
            grade_level: "4".to_owned(),
            original_length: 40,
            summary_length: 17,
        }
    }

    fn quiz_meta() -> InputFileMeta {
        InputFileMeta {
            name: "quiz.pdf".to_owned(),
            mime_type: "application/pdf".to_owned(),
            byte_size: 1024,
            kind: InputKind::Pdf,
        }
    }

    async fn exercise_store(store: &dyn SessionStore) {
        let session = store.create_session(vec![quiz_meta()]).await.unwrap();
        let id = session.id;
        let loaded = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(loaded.input_files, [quiz_meta()]);

        store
            .update_session_result(id, SessionUpdate::Summary(summary()))
            .await
            .unwrap();
        store
            .append_qa(id, QaEntry::new("Why?", "Because."))
            .await
            .unwrap();

        // A new run clears everything derived from the old transcript.
        let cleared = store
            .update_session_result(id, SessionUpdate::ClearDerived)
            .await
            .unwrap();
        assert!(cleared.summary.is_none());
        assert!(cleared.qa_history.is_empty());

        store
            .update_session_result(
                id,
                SessionUpdate::Transcript {
                    input_files: vec![],
                    transcript: CombinedTranscript::from_text("line one\nline two"),
                    units: vec![],
                },
            )
            .await
            .unwrap();
        let loaded = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(loaded.transcript.unwrap().lines, ["line one", "line two"]);

        assert!(store.get_session(Uuid::new_v4()).await.unwrap().is_none());
        assert!(
            store
                .append_qa(Uuid::new_v4(), QaEntry::new("q", "a"))
                .await
                .is_err()
        );
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_store_round_trips_results() {
        exercise_store(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn file_store_round_trips_results() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let store = FileSessionStore::new(&tmpdir.path().join("sessions"));
        exercise_store(&store).await;

        // Nothing half-written is left behind.
        let names = std::fs::read_dir(tmpdir.path().join("sessions"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let store = FileSessionStore::new(&tmpdir.path().join("nope"));
        assert!(store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_sessions_are_cleaned_up() {
        let store = MemorySessionStore::new();
        let mut old = Session::new(vec![]);
        old.created_at = Utc::now() - Duration::minutes(90);
        let fresh = Session::new(vec![]);
        store.insert(old.clone()).await;
        store.insert(fresh.clone()).await;

        let deleted = store.cleanup_expired(Duration::minutes(60)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_session(old.id).await.unwrap().is_none());
        assert!(store.get_session(fresh.id).await.unwrap().is_some());
    }

    #[test]
    fn sessions_expire_after_ttl() {
        let session = Session::new(vec![]);
        let ttl = Duration::minutes(60);
        assert!(!session.is_expired(session.created_at + Duration::minutes(59), ttl));
        assert!(session.is_expired(session.created_at + Duration::minutes(61), ttl));
    }
}
