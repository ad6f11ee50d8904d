#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end pipeline tests: load files and pages, build and reload the
// index, retrieve, and compose a grounded answer.

mod common;

use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ask_docs::composer::{AnswerComposer, AnswerEvent, ComposeError};
use ask_docs::config::{EmbeddingConfig, LlmConfig, LoaderConfig, PromptStyle};
use ask_docs::embeddings::Embedder;
use ask_docs::index::{DocumentIndex, IndexBuilder, IndexError};
use ask_docs::loader::{DocumentLoader, TITLE_KEY};
use ask_docs::retriever::{RetrieveError, Retriever};
use common::{CannedChatModel, VocabularyEmbedder, init_test_tracing, write_file};

const VOCABULARY: &[&str] = &[
    "paris", "capital", "france", "nile", "longest", "river", "africa", "rust", "memory",
    "safety", "borrow", "checker", "tokio", "runtime", "async",
];

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(VocabularyEmbedder::new(VOCABULARY))
}

fn builder(embedder: &Arc<dyn Embedder>) -> IndexBuilder {
    IndexBuilder::new(Arc::clone(embedder), &EmbeddingConfig::default())
}

#[tokio::test(flavor = "multi_thread")]
async fn text_files_load_verbatim_and_unsupported_files_are_skipped() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let first = write_file(temp_dir.path(), "first.txt", "Line one.\nLine two.\n");
    let second = write_file(temp_dir.path(), "SECOND.TXT", "  padded  ");
    let image = write_file(temp_dir.path(), "diagram.png", "not really an image");

    let loader = DocumentLoader::new(&LoaderConfig::default());
    let report = loader.load(&[first.clone(), image.clone(), second], &[]).await;

    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.documents[0].text, "Line one.\nLine two.\n");
    assert_eq!(report.documents[0].source(), first.display().to_string());
    assert_eq!(report.documents[1].text, "  padded  ");
    assert_eq!(report.skipped, vec![image]);
    assert!(report.failures.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn persisted_index_reloads_and_finds_each_document() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let index_dir = temp_dir.path().join("index");
    let files = vec![
        write_file(temp_dir.path(), "paris.txt", "Paris is the capital of France."),
        write_file(temp_dir.path(), "nile.txt", "The Nile is the longest river in Africa."),
        write_file(
            temp_dir.path(),
            "rust.txt",
            "Rust gets memory safety from the borrow checker.",
        ),
    ];

    let embedder = embedder();
    let report = DocumentLoader::new(&LoaderConfig::default())
        .load(&files, &[])
        .await;
    let documents = report.documents.clone();

    let (built, build_report) = builder(&embedder)
        .build(report.documents, &index_dir)
        .await
        .expect("should build index");
    assert_eq!(build_report.indexed, 3);
    assert_eq!(built.manifest().model_id, "test/vocabulary");
    drop(built);

    let reloaded = DocumentIndex::open(&index_dir, embedder.model_id())
        .await
        .expect("should reopen index");
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded.dimension(), Some(VOCABULARY.len()));

    let retriever = Retriever::new(Arc::new(reloaded), Arc::clone(&embedder));
    for document in &documents {
        let results = retriever
            .retrieve(&document.text)
            .await
            .expect("should retrieve");
        assert_eq!(results[0], *document);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reloading_with_another_model_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let index_dir = temp_dir.path().join("index");
    let file = write_file(temp_dir.path(), "notes.txt", "Tokio is an async runtime.");

    let report = DocumentLoader::new(&LoaderConfig::default())
        .load(&[file], &[])
        .await;
    drop(
        builder(&embedder())
            .build(report.documents, &index_dir)
            .await
            .expect("should build index"),
    );

    let other = VocabularyEmbedder::new(VOCABULARY).with_model("test/other");
    let result = DocumentIndex::open(&index_dir, other.model_id()).await;
    assert!(matches!(result, Err(IndexError::ModelMismatch { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_query_dimension_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let index_dir = temp_dir.path().join("index");
    let file = write_file(temp_dir.path(), "notes.txt", "Paris is the capital of France.");

    let report = DocumentLoader::new(&LoaderConfig::default())
        .load(&[file], &[])
        .await;
    let (index, _) = builder(&embedder())
        .build(report.documents, &index_dir)
        .await
        .expect("should build index");

    // Same model id, smaller vocabulary, so a shorter query vector
    let narrow: Arc<dyn Embedder> = Arc::new(VocabularyEmbedder::new(&["paris", "france"]));
    let retriever = Retriever::new(Arc::new(index), narrow);

    let result = retriever.retrieve("capital of France").await;
    assert!(matches!(
        result,
        Err(RetrieveError::DimensionMismatch {
            expected,
            actual: 2,
        }) if expected == VOCABULARY.len()
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn grounded_answer_about_paris() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("should create temp dir");
    let index_dir = temp_dir.path().join("index");
    let notes = write_file(temp_dir.path(), "notes.txt", "Paris is the capital of France.");
    let nile = write_file(temp_dir.path(), "nile.txt", "The Nile is the longest river in Africa.");

    let embedder = embedder();
    let report = DocumentLoader::new(&LoaderConfig::default())
        .load(&[notes.clone(), nile], &[])
        .await;
    let (index, _) = builder(&embedder)
        .build(report.documents, &index_dir)
        .await
        .expect("should build index");
    let retriever = Retriever::new(Arc::new(index), embedder).with_top_k(1);

    let top = retriever
        .retrieve("capital of France")
        .await
        .expect("should retrieve");
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].text, "Paris is the capital of France.");

    let model = Arc::new(CannedChatModel::new(&["The capital ", "of France is ", "Paris."]));
    let composer = AnswerComposer::new(model.clone(), &LlmConfig::default());

    let mut streamed = Vec::new();
    let answer = composer
        .answer(
            "What is the capital of France?",
            Some(&retriever),
            &[],
            None,
            |event| {
                if let AnswerEvent::Chunk(text) = event {
                    streamed.push(text.to_string());
                }
            },
        )
        .await
        .expect("should answer");

    assert!(answer.grounded);
    assert!(!answer.fallback_used);
    assert_eq!(answer.text, "The capital of France is Paris.");
    assert_eq!(streamed, vec!["The capital ", "of France is ", "Paris."]);
    assert_eq!(answer.sources, vec![notes.display().to_string()]);

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(
        requests[0].messages[0].content,
        "Based on the retrieved information: Paris is the capital of France. \
         Answer the following question: What is the capital of France?"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn web_pages_are_indexed_with_files() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/guide"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><head><title>Rust Guide</title></head><body>\
             <nav>Home Docs Blog</nav>\
             <main><p>The borrow checker gives Rust memory safety.</p></main>\
             <footer>Copyright</footer></body></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let notes = write_file(temp_dir.path(), "notes.txt", "The Nile is the longest river in Africa.");
    let url = format!("{}/guide", server.uri());

    let embedder = embedder();
    let report = DocumentLoader::new(&LoaderConfig::default())
        .load(&[notes], std::slice::from_ref(&url))
        .await;
    assert_eq!(report.documents.len(), 2);

    let page = &report.documents[1];
    assert_eq!(page.source(), url);
    assert_eq!(page.metadata.get(TITLE_KEY).map(String::as_str), Some("Rust Guide"));
    assert!(page.text.contains("borrow checker"));
    assert!(!page.text.contains("Copyright"));

    let (index, _) = builder(&embedder)
        .build(report.documents, &temp_dir.path().join("index"))
        .await
        .expect("should build index");
    let retriever = Retriever::new(Arc::new(index), embedder).with_top_k(1);

    let top = retriever
        .retrieve("How does Rust achieve memory safety?")
        .await
        .expect("should retrieve");
    assert_eq!(top[0].source(), url);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_index_answers_ungrounded() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let embedder = embedder();
    let (index, report) = builder(&embedder)
        .build(Vec::new(), &temp_dir.path().join("index"))
        .await
        .expect("should build empty index");
    assert_eq!(report.indexed, 0);

    let retriever = Retriever::new(Arc::new(index), embedder);
    assert!(
        retriever
            .retrieve("anything at all")
            .await
            .expect("should retrieve")
            .is_empty()
    );

    let model = Arc::new(CannedChatModel::new(&["I don't know."]));
    let composer = AnswerComposer::new(model.clone(), &LlmConfig::default());
    let answer = composer
        .answer("anything at all", Some(&retriever), &[], None, |_| {})
        .await
        .expect("should answer");

    assert!(!answer.grounded);
    assert!(answer.sources.is_empty());
    assert_eq!(model.requests()[0].messages.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_context_is_rejected_before_calling_the_model() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let long_text = "Paris capital France ".repeat(400);
    let file = write_file(temp_dir.path(), "long.txt", &long_text);

    let embedder = embedder();
    let report = DocumentLoader::new(&LoaderConfig::default())
        .load(&[file], &[])
        .await;
    let (index, _) = builder(&embedder)
        .build(report.documents, &temp_dir.path().join("index"))
        .await
        .expect("should build index");
    let retriever = Retriever::new(Arc::new(index), embedder);

    let model = Arc::new(CannedChatModel::new(&["unused"]));
    let config = LlmConfig {
        max_context_tokens: 256,
        prompt_style: PromptStyle::RetrievalQa,
        ..LlmConfig::default()
    };
    let composer = AnswerComposer::new(model.clone(), &config);

    let result = composer
        .answer("capital of France", Some(&retriever), &[], None, |_| {})
        .await;

    assert!(matches!(
        result,
        Err(ComposeError::ContextTooLarge { limit: 256, .. })
    ));
    assert!(model.requests().is_empty());
}
