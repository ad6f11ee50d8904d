use anyhow::{Context, Result, anyhow};
use console::style;
use dialoguer::{Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::composer::{Answer, AnswerComposer, AnswerEvent};
use crate::config::{Config, Provider};
use crate::embeddings::{Embedder, OllamaClient, build_embedder};
use crate::index::IndexBuilder;
use crate::llm::{CredentialStatus, build_chat_model};
use crate::loader::DocumentLoader;
use crate::service;
use crate::session::{IngestReport, SessionContext, SessionStore};

/// Create a new session, sweeping expired ones first
#[inline]
pub fn new_session(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;
    let store = SessionStore::from_config(&config);

    sweep_expired(&store);

    let session = store.create().context("Failed to create session")?;
    println!("✅ Created session {}", style(session.id()).bold());
    println!("   Directory: {}", session.dir().display());
    println!(
        "   Add documents with 'ask-docs ingest {} <FILES> --url <URL>'",
        session.id()
    );

    Ok(())
}

/// List all sessions, most recently used first
#[inline]
pub fn list_sessions(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;
    let store = SessionStore::from_config(&config);

    let sessions = store.list().context("Failed to list sessions")?;
    if sessions.is_empty() {
        println!("No sessions yet.");
        println!("Use 'ask-docs session new' to start one.");
        return Ok(());
    }

    println!("Sessions ({} total):", sessions.len());
    println!();

    for info in &sessions {
        println!("💬 {}", info.id);
        println!(
            "   Last Active: {}",
            info.modified.format("%Y-%m-%d %H:%M:%S")
        );

        if let Ok(session) = store.open(&info.id) {
            match session.load_transcript() {
                Ok(transcript) => println!("   Questions: {}", transcript.questions.len()),
                Err(e) => println!("   ⚠️  Transcript: {}", e),
            }
            let indexed = session.index_dir().exists();
            println!("   Indexed: {}", if indexed { "yes" } else { "no" });
        }
        println!();
    }

    Ok(())
}

/// Delete a session and everything in it
#[inline]
pub fn delete_session(config_dir: &Path, id: &str, assume_yes: bool) -> Result<()> {
    let config = Config::load(config_dir)?;
    let store = SessionStore::from_config(&config);
    let session = store.open(id)?;

    println!("Found session {} ({})", session.id(), session.dir().display());
    println!("This will delete its uploads, index and chat history.");

    let confirmed = assume_yes
        || Confirm::new()
            .with_prompt("Delete this session? This action cannot be undone.")
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

    if !confirmed {
        println!("Cancelled.");
        return Ok(());
    }

    store.delete(id)?;
    println!("✓ Session deleted: {}", id);
    Ok(())
}

/// Remove sessions older than the retention window
#[inline]
pub fn sweep_sessions(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;
    let store = SessionStore::from_config(&config);

    let removed = store
        .sweep(SystemTime::now())
        .context("Failed to sweep sessions")?;

    if removed.is_empty() {
        println!("No expired sessions.");
    } else {
        println!("🧹 Removed {} expired sessions:", removed.len());
        for id in &removed {
            println!("   {}", id);
        }
    }

    Ok(())
}

fn sweep_expired(store: &SessionStore) {
    match store.sweep(SystemTime::now()) {
        Ok(removed) if !removed.is_empty() => {
            info!("Swept {} expired sessions", removed.len());
        }
        Ok(_) => {}
        Err(e) => warn!("Session sweep failed: {}", e),
    }
}

/// Load files and links into a session and rebuild its index
#[inline]
pub async fn ingest(
    config_dir: &Path,
    session_id: &str,
    files: &[PathBuf],
    urls: &[String],
) -> Result<()> {
    let config = Config::load(config_dir)?;
    let embedder = build_embedder(&config.embedding)?;
    let mut context = open_context(&config, session_id, Arc::clone(&embedder)).await?;

    let loader = DocumentLoader::new(&config.loader);
    let builder = IndexBuilder::new(embedder, &config.embedding).with_splitting(&config.splitting);

    let bar = if console::user_attended_stderr() {
        let bar = ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .expect("style template is valid"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(format!(
        "Processing {} files and {} links",
        files.len(),
        urls.len()
    ));

    let result = context.ingest(&loader, &builder, files, urls).await;
    bar.finish_and_clear();

    let report = result.context("Failed to process documents")?;
    print_ingest_report(&report);
    Ok(())
}

fn print_ingest_report(report: &IngestReport) {
    println!("✅ Documents processed");
    println!("   Files: {}", report.files);
    println!("   Links: {}", report.links);
    println!("   Indexed entries: {}", report.build.indexed);
    if let Some(dimension) = report.build.dimension {
        println!("   Vector dimension: {}", dimension);
    }

    for path in &report.load.skipped {
        println!("   ⏭️  Skipped unsupported file: {}", path.display());
    }
    for failure in &report.load.failures {
        println!("   ⚠️  Failed to load {}: {}", failure.source, failure.error);
    }
    for failure in &report.build.failures {
        println!("   ⚠️  Failed to embed {}: {}", failure.source, failure.error);
    }
}

/// Everything needed to answer questions in one session
struct Conversation {
    context: SessionContext,
    composer: AnswerComposer,
    use_rag: bool,
}

impl Conversation {
    async fn open(config_dir: &Path, session_id: &str, no_rag: bool) -> Result<Self> {
        let config = Config::load(config_dir)?;
        let embedder = build_embedder(&config.embedding)?;
        let context = open_context(&config, session_id, embedder).await?;
        let composer = AnswerComposer::new(build_chat_model(&config.llm)?, &config.llm);

        let use_rag = config.retrieval.use_rag && !no_rag;
        if use_rag && context.retriever().is_none() {
            println!(
                "{}",
                style("No documents ingested yet; answering without retrieval.").dim()
            );
        }

        Ok(Self {
            context,
            composer,
            use_rag,
        })
    }

    async fn ask(&mut self, question: &str) -> Result<Answer> {
        let mut stdout = std::io::stdout();

        let answer = self
            .context
            .ask(&self.composer, question, self.use_rag, None, |event| {
                match event {
                    AnswerEvent::Chunk(text) => print!("{}", text),
                    AnswerEvent::Restart => {
                        println!();
                        println!("{}", style("⚠️  Stream interrupted, retrying...").yellow());
                    }
                }
                // Broken stdout only loses display, the transcript still records the answer
                let _ = stdout.flush();
            })
            .await
            .context("Failed to answer question")?;

        println!();
        if !answer.sources.is_empty() {
            println!();
            println!("{}", style("Sources:").bold());
            for source in &answer.sources {
                println!("  📄 {}", source);
            }
        }

        Ok(answer)
    }
}

async fn open_context(
    config: &Config,
    session_id: &str,
    embedder: Arc<dyn Embedder>,
) -> Result<SessionContext> {
    let store = SessionStore::from_config(config);
    let session = store.open(session_id)?;
    SessionContext::load(session, embedder, config.retrieval.top_k)
        .await
        .with_context(|| format!("Failed to load session {}", session_id))
}

/// Answer one question, streaming the answer to stdout
#[inline]
pub async fn ask(config_dir: &Path, session_id: &str, question: &str, no_rag: bool) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        return Err(anyhow!("Question cannot be empty"));
    }

    let mut conversation = Conversation::open(config_dir, session_id, no_rag).await?;
    conversation.ask(question).await?;
    Ok(())
}

/// Interactive question loop; an empty line, `exit` or `quit` ends it
#[inline]
pub async fn chat(config_dir: &Path, session_id: &str, no_rag: bool) -> Result<()> {
    let mut conversation = Conversation::open(config_dir, session_id, no_rag).await?;

    if let Some(message) = conversation.context.transcript().messages.last() {
        println!("{} {}", style("Assistant:").bold().cyan(), message.content);
    }

    loop {
        println!();
        let question: String = Input::new()
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read question")?;

        let question = question.trim();
        if question.is_empty() || question == "exit" || question == "quit" {
            break;
        }

        print!("{} ", style("Assistant:").bold().cyan());
        if let Err(e) = conversation.ask(question).await {
            println!();
            println!("❌ {:#}", e);
        }
    }

    Ok(())
}

/// Print the question history of a session
#[inline]
pub fn show_history(config_dir: &Path, session_id: &str) -> Result<()> {
    let config = Config::load(config_dir)?;
    let session = SessionStore::from_config(&config).open(session_id)?;
    let transcript = session.load_transcript()?;

    if transcript.questions.is_empty() {
        println!("No questions asked yet.");
        return Ok(());
    }

    println!("Question History ({} total):", transcript.questions.len());
    for record in &transcript.questions {
        println!(
            "  {}  {}",
            style(record.asked_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            record.question
        );
    }

    Ok(())
}

/// Clear the chat and question history of a session
#[inline]
pub fn clear_chat(config_dir: &Path, session_id: &str) -> Result<()> {
    let config = Config::load(config_dir)?;
    let session = SessionStore::from_config(&config).open(session_id)?;

    session.clear_transcript()?;
    println!("✓ Chat history cleared for session {}", session_id);
    Ok(())
}

/// Check that the embedding model is served, then validate the chat
/// service credentials
#[inline]
pub async fn check_credentials(config_dir: &Path, api_key: Option<String>) -> Result<()> {
    let config = Config::load(config_dir)?;
    let model = build_chat_model(&config.llm)?;

    println!("🧮 Embedding Service:");
    println!("   Provider: {}", config.embedding.provider);
    println!("   Endpoint: {}", config.embedding.endpoint);
    println!("   Model: {}", config.embedding.model);

    match config.embedding.provider {
        Provider::Ollama => {
            let client = OllamaClient::new(&config.embedding)?;
            match service::run_blocking(move || client.health_check()).await {
                Ok(()) => println!("   ✅ Model is available"),
                Err(e) => {
                    println!("   ❌ {}", e);
                    return Err(anyhow!(
                        "Embedding model {} is not usable at {}",
                        config.embedding.model,
                        config.embedding.endpoint
                    ));
                }
            }
        }
        Provider::OpenAi => println!("   ⏭️  Model listing not checked for this provider"),
    }
    println!();

    println!("🤖 Chat Service:");
    println!("   Provider: {}", config.llm.provider);
    println!("   Endpoint: {}", config.llm.endpoint);
    println!("   Model: {}", config.llm.model);

    match model.check_credentials(api_key).await {
        CredentialStatus::Valid => {
            println!("   ✅ Credentials are valid");
            Ok(())
        }
        CredentialStatus::Invalid(reason) => {
            println!("   ❌ Credentials rejected: {}", reason);
            Err(anyhow!("Invalid credentials for {}", config.llm.endpoint))
        }
        CredentialStatus::Unreachable(reason) => {
            println!("   ⚠️  Service unreachable: {}", reason);
            Err(anyhow!("Could not reach {}", config.llm.endpoint))
        }
    }
}
