use super::*;
use crate::config::EmbeddingConfig;
use crate::index::IndexBuilder;
use crate::test_support::HashingEmbedder;
use tempfile::TempDir;

async fn retriever_over(dir: &std::path::Path, texts: &[&str], embedder: Arc<dyn Embedder>) -> Retriever {
    let documents = texts
        .iter()
        .map(|text| Document::from_source(*text, "notes.txt"))
        .collect();
    let builder = IndexBuilder::new(Arc::new(HashingEmbedder::new()), &EmbeddingConfig::default());
    let (index, _) = builder
        .build(documents, &dir.join("index"))
        .await
        .expect("should build index");
    Retriever::new(Arc::new(index), embedder)
}

#[tokio::test]
async fn finds_capital_of_france() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let retriever = retriever_over(
        temp_dir.path(),
        &[
            "The Nile is the longest river in Africa.",
            "Paris is the capital of France.",
            "Rust is a systems programming language.",
        ],
        Arc::new(HashingEmbedder::new()),
    )
    .await;

    let documents = retriever
        .retrieve("capital of France")
        .await
        .expect("should retrieve");

    assert_eq!(documents.len(), 3);
    assert_eq!(documents[0].text, "Paris is the capital of France.");
}

#[tokio::test]
async fn default_k_is_four() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let retriever = retriever_over(
        temp_dir.path(),
        &["a one", "b two", "c three", "d four", "e five", "f six"],
        Arc::new(HashingEmbedder::new()),
    )
    .await;

    assert_eq!(retriever.top_k(), 4);
    assert_eq!(retriever.retrieve("one").await.expect("should retrieve").len(), 4);

    let narrow = retriever.with_top_k(2);
    assert_eq!(narrow.retrieve("one").await.expect("should retrieve").len(), 2);
}

#[tokio::test]
async fn empty_index_returns_empty_result() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let embedder = Arc::new(HashingEmbedder::new());
    let retriever = retriever_over(temp_dir.path(), &[], embedder.clone()).await;

    let documents = retriever.retrieve("anything").await.expect("should retrieve");
    assert!(documents.is_empty());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn query_embedder_with_other_dimension_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let retriever = retriever_over(
        temp_dir.path(),
        &["some stored text"],
        Arc::new(HashingEmbedder::new().with_dimension(16)),
    )
    .await;

    let result = retriever.retrieve("stored").await;
    assert!(matches!(
        result,
        Err(RetrieveError::DimensionMismatch {
            expected: 64,
            actual: 16
        })
    ));
}

#[tokio::test]
async fn embedding_failure_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let retriever = retriever_over(
        temp_dir.path(),
        &["some stored text"],
        Arc::new(HashingEmbedder::new().always_failing(ServiceError::Quota)),
    )
    .await;

    let result = retriever.retrieve("stored").await;
    assert!(matches!(result, Err(RetrieveError::Embedding(ServiceError::Quota))));
}
