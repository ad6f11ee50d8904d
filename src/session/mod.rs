//! Per-session working directories.
//!
//! Each session lives in `<root>/<uuid>/` with `uploads/`, `index/` and
//! `transcript.json`. Sessions untouched for longer than the retention
//! window are removed by [`SessionStore::sweep`].

pub mod transcript;


use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::composer::{Answer, AnswerComposer, AnswerEvent};
use crate::config::Config;
use crate::embeddings::Embedder;
use crate::index::{BuildReport, DocumentIndex, IndexBuilder, IndexError};
use crate::loader::{DocumentLoader, LoadReport};
use crate::retriever::Retriever;

pub use transcript::{GREETING, QuestionRecord, Transcript};

const UPLOADS_DIR: &str = "uploads";
const INDEX_DIR: &str = "index";
const TRANSCRIPT_FILE: &str = "transcript.json";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} does not exist")]
    NotFound(String),
    #[error("invalid session id: {0}")]
    InvalidId(String),
    #[error("corrupt transcript in {path}: {message}")]
    Transcript { path: PathBuf, message: String },
    #[error("no files or links to ingest")]
    NothingToIngest,
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A session directory on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: Uuid,
    dir: PathBuf,
}

/// Listing entry for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
    retention: Duration,
}

impl SessionStore {
    #[inline]
    pub fn new(root: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sessions_root(), config.sessions.retention())
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new session directory with an empty transcript
    pub fn create(&self) -> Result<Session, SessionError> {
        let id = Uuid::new_v4();
        let session = Session {
            id,
            dir: self.root.join(id.to_string()),
        };

        fs::create_dir_all(session.uploads_dir())?;
        session.save_transcript(&Transcript::new())?;

        info!("Created session {}", id);
        Ok(session)
    }

    pub fn open(&self, id: &str) -> Result<Session, SessionError> {
        let id = parse_id(id)?;
        let dir = self.root.join(id.to_string());

        if !dir.is_dir() {
            return Err(SessionError::NotFound(id.to_string()));
        }

        Ok(Session { id, dir })
    }

    /// All sessions, most recently modified first
    pub fn list(&self) -> Result<Vec<SessionInfo>, SessionError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type()?.is_dir() || Uuid::parse_str(&name).is_err() {
                continue;
            }

            sessions.push(SessionInfo {
                id: name,
                modified: entry.metadata()?.modified()?.into(),
            });
        }

        sessions.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(sessions)
    }

    pub fn delete(&self, id: &str) -> Result<(), SessionError> {
        let session = self.open(id)?;
        fs::remove_dir_all(&session.dir)?;
        info!("Deleted session {}", session.id);
        Ok(())
    }

    /// Remove sessions whose directory was last modified more than the
    /// retention window before `now`. Returns the removed ids. A session
    /// that cannot be removed is logged and left for the next sweep.
    pub fn sweep(&self, now: SystemTime) -> Result<Vec<String>, SessionError> {
        let mut removed = Vec::new();

        for info in self.list()? {
            let modified = SystemTime::from(info.modified);
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.retention {
                continue;
            }

            let dir = self.root.join(&info.id);
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    info!("Cleaned up old session: {}", info.id);
                    removed.push(info.id);
                }
                Err(e) => warn!("Error cleaning up session {}: {}", info.id, e),
            }
        }

        Ok(removed)
    }
}

/// `uploads/name`, or `uploads/<n>-name` when that is already taken
fn unused_target(uploads: &Path, name: &str, taken: &HashSet<PathBuf>) -> PathBuf {
    let mut target = uploads.join(name);
    let mut n = 1;
    while taken.contains(&target) {
        target = uploads.join(format!("{n}-{name}"));
        n += 1;
    }
    target
}

fn parse_id(id: &str) -> Result<Uuid, SessionError> {
    Uuid::parse_str(id.trim()).map_err(|_| SessionError::InvalidId(id.to_string()))
}

impl Session {
    #[inline]
    pub fn id(&self) -> String {
        self.id.to_string()
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn uploads_dir(&self) -> PathBuf {
        self.dir.join(UPLOADS_DIR)
    }

    #[inline]
    pub fn index_dir(&self) -> PathBuf {
        self.dir.join(INDEX_DIR)
    }

    #[inline]
    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join(TRANSCRIPT_FILE)
    }

    /// The stored transcript, or a fresh one if none was saved yet
    pub fn load_transcript(&self) -> Result<Transcript, SessionError> {
        let path = self.transcript_path();
        if !path.exists() {
            return Ok(Transcript::new());
        }

        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| SessionError::Transcript {
            path,
            message: e.to_string(),
        })
    }

    /// Empty the stored chat and question history without touching the index
    pub fn clear_transcript(&self) -> Result<Transcript, SessionError> {
        let mut transcript = self.load_transcript()?;
        transcript.clear();
        self.save_transcript(&transcript)?;
        Ok(transcript)
    }

    /// Write through a temp file and rename, which also bumps the session
    /// directory's modification time
    pub fn save_transcript(&self, transcript: &Transcript) -> Result<(), SessionError> {
        let path = self.transcript_path();
        let temp_path = self.dir.join(format!(".{TRANSCRIPT_FILE}.tmp"));

        let content =
            serde_json::to_string_pretty(transcript).map_err(|e| SessionError::Transcript {
                path: path.clone(),
                message: e.to_string(),
            })?;

        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &path)?;
        debug!("Saved transcript for session {}", self.id);
        Ok(())
    }

    /// Copy files into `uploads/` and return the paths to load. Files that
    /// already live in `uploads/` are used in place. Name clashes within one
    /// call get a numeric prefix, so every input keeps its own copy.
    pub fn import_files(&self, sources: &[PathBuf]) -> Result<Vec<PathBuf>, SessionError> {
        let uploads = self.uploads_dir();
        fs::create_dir_all(&uploads)?;
        let uploads = uploads.canonicalize()?;

        let resolved = sources
            .iter()
            .map(|source| {
                source.canonicalize().map_err(|e| {
                    std::io::Error::new(e.kind(), format!("{}: {}", source.display(), e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut taken: HashSet<PathBuf> = resolved
            .iter()
            .filter(|path| path.parent() == Some(uploads.as_path()))
            .cloned()
            .collect();

        let mut imported = Vec::with_capacity(resolved.len());
        for source in resolved {
            if source.parent() == Some(uploads.as_path()) {
                debug!("{} is already uploaded", source.display());
                imported.push(source);
                continue;
            }

            let name = source.file_name().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", source.display()),
                )
            })?;
            let target = unused_target(&uploads, &name.to_string_lossy(), &taken);

            fs::copy(&source, &target)?;
            taken.insert(target.clone());
            imported.push(target);
        }

        Ok(imported)
    }
}

/// What one ingest run loaded and indexed
#[derive(Debug)]
pub struct IngestReport {
    pub files: usize,
    pub links: usize,
    pub load: LoadReport,
    pub build: BuildReport,
}

/// Everything a pipeline call needs about one session: its directory, its
/// transcript and, once documents were ingested, its retriever.
pub struct SessionContext {
    session: Session,
    transcript: Transcript,
    retriever: Option<Retriever>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session", &self.session)
            .field("messages", &self.transcript.messages.len())
            .field("retriever", &self.retriever)
            .field("embedder", &self.embedder.model_id())
            .finish()
    }
}

impl SessionContext {
    /// Load the session's transcript and, if present, its index. An index
    /// built with another embedding model is an error.
    pub async fn load(
        session: Session,
        embedder: Arc<dyn Embedder>,
        top_k: usize,
    ) -> Result<Self, SessionError> {
        let transcript = session.load_transcript()?;
        let retriever = DocumentIndex::open_if_exists(&session.index_dir(), embedder.model_id())
            .await?
            .map(|index| Retriever::new(Arc::new(index), Arc::clone(&embedder)).with_top_k(top_k));

        Ok(Self {
            session,
            transcript,
            retriever,
            embedder,
            top_k,
        })
    }

    #[inline]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[inline]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[inline]
    pub fn retriever(&self) -> Option<&Retriever> {
        self.retriever.as_ref()
    }

    /// Copy files into the session, load them with the links, and rebuild
    /// the session index from scratch
    pub async fn ingest(
        &mut self,
        loader: &DocumentLoader,
        builder: &IndexBuilder,
        files: &[PathBuf],
        links: &[String],
    ) -> Result<IngestReport, SessionError> {
        if files.is_empty() && links.is_empty() {
            return Err(SessionError::NothingToIngest);
        }

        let copied = self.session.import_files(files)?;

        let mut load = loader.load(&copied, links).await;
        let documents = std::mem::take(&mut load.documents);
        let document_count = documents.len();

        let (index, build) = builder.build(documents, &self.session.index_dir()).await?;
        self.retriever = Some(
            Retriever::new(Arc::new(index), Arc::clone(&self.embedder)).with_top_k(self.top_k),
        );

        info!(
            "Ingested {} files and {} links into session {} ({} documents)",
            files.len(),
            links.len(),
            self.session.id,
            document_count
        );

        Ok(IngestReport {
            files: files.len(),
            links: links.len(),
            load,
            build,
        })
    }

    /// Answer a question and record the exchange. With `use_rag` off, or
    /// before anything was ingested, the answer is ungrounded.
    pub async fn ask<F>(
        &mut self,
        composer: &AnswerComposer,
        question: &str,
        use_rag: bool,
        api_key: Option<String>,
        on_event: F,
    ) -> crate::Result<Answer>
    where
        F: FnMut(AnswerEvent<'_>),
    {
        self.transcript.record_question(question, Utc::now());
        self.session.save_transcript(&self.transcript)?;

        let retriever = if use_rag { self.retriever.as_ref() } else { None };
        let history = self.transcript.history_before_last_question();
        let answer = match composer
            .answer(question, retriever, history, api_key, on_event)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                // Keep the question log entry, but not a user turn with no reply
                self.transcript.discard_unanswered();
                self.session.save_transcript(&self.transcript)?;
                return Err(e.into());
            }
        };

        self.transcript.record_answer(&answer.text);
        self.session.save_transcript(&self.transcript)?;
        Ok(answer)
    }

    /// Clear the chat and question history
    pub fn clear_chat(&mut self) -> Result<(), SessionError> {
        self.transcript = self.session.clear_transcript()?;
        Ok(())
    }
}
