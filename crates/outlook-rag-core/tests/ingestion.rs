mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use common::HashingEmbedder;
use outlook_rag_core::RagError;
use outlook_rag_core::ingestion::{
    CatalogEntry, DocumentCatalog, DocumentProcessor, IngestionService, TextExtractor,
    TextSplitter,
};
use outlook_rag_core::vectorstore::{LocalVectorStore, MetadataFilter, VectorStore};
use tempfile::tempdir;

fn catalog() -> DocumentCatalog {
    let mut catalog = DocumentCatalog::empty();
    catalog.insert(
        "forecast.txt",
        CatalogEntry {
            doc_type: "forecast".into(),
            doc_name: "J.P. Morgan Outlook 2025".into(),
            date_context: "Published late 2024".into(),
        },
    );
    catalog
}

#[tokio::test]
async fn directory_ingestion_tags_chunks_and_persists_index() {
    let docs = tempdir().unwrap();
    fs::write(
        docs.path().join("forecast.txt"),
        "AI equities should lead.\n\nPower and infrastructure demand will grow.\n\nBond yields stay elevated.",
    )
    .unwrap();
    fs::write(docs.path().join("notes.md"), "Uncatalogued market notes.").unwrap();
    fs::write(docs.path().join("prices.csv"), "ticker,price\nAAPL,1").unwrap();

    let index_dir = tempdir().unwrap();
    let index_path = index_dir.path().join("jpm_outlook.json");
    let store = Arc::new(
        LocalVectorStore::open(&index_path, Arc::new(HashingEmbedder))
            .await
            .unwrap(),
    );
    let service = IngestionService::new(
        Arc::new(TextExtractor::new()),
        store.clone(),
        TextSplitter::new(50, 10),
    );

    let total = service.ingest_directory(docs.path(), &catalog()).await.unwrap();
    assert!(total >= 3, "expected several chunks, got {total}");
    assert_eq!(store.len().await, total);

    let filter = MetadataFilter::doc_type("forecast");
    let hits = store
        .similarity_search_with_score("AI equities", 10, Some(&filter))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    for (doc, distance) in &hits {
        assert_eq!(doc.metadata_str("doc_type"), Some("forecast"));
        assert_eq!(doc.metadata_str("doc_name"), Some("J.P. Morgan Outlook 2025"));
        assert_eq!(doc.metadata_str("filename"), Some("forecast.txt"));
        assert_eq!(doc.metadata["page_number"], 1);
        assert!(doc.metadata.contains_key("chunk_id"));
        assert!(doc.metadata.contains_key("start_index"));
        assert!((0.0..=2.0).contains(distance));
    }
    assert!(hits.windows(2).all(|pair| pair[0].1 <= pair[1].1));

    let reopened = LocalVectorStore::open(&index_path, Arc::new(HashingEmbedder))
        .await
        .unwrap();
    assert_eq!(reopened.len().await, total);
}

#[tokio::test]
async fn unsupported_and_missing_files_are_rejected() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("prices.csv");
    fs::write(&csv, "ticker,price").unwrap();

    let store = Arc::new(LocalVectorStore::in_memory(Arc::new(HashingEmbedder)));
    let service = IngestionService::new(
        Arc::new(TextExtractor::new()),
        store.clone(),
        TextSplitter::new(100, 0),
    );

    let err = service.ingest_file(&csv, None).await.unwrap_err();
    assert_eq!(err.to_string(), "Unsupported file type: .csv");
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::UnsupportedFile(_))
    ));

    let missing = service
        .ingest_file(&dir.path().join("missing.txt"), None)
        .await
        .unwrap_err();
    assert!(missing.to_string().contains("File not found"));
    assert!(store.is_empty().await);
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn pdf_pages_become_separate_documents() {
    let processed = TextExtractor::new().process(&fixture("two_pages.pdf"));

    assert_eq!(processed.error, None);
    assert_eq!(processed.source_file, "two_pages.pdf");
    assert_eq!(processed.page_count, Some(2));
    assert_eq!(processed.documents.len(), 2);

    let first = &processed.documents[0];
    assert_eq!(first.metadata["page_number"], 1);
    assert_eq!(first.metadata_str("element_id"), Some("two_pages.pdf#page=1"));
    assert!(first.page_content.contains("Alpha page one"));
    assert!(!first.page_content.contains("Beta"));

    let second = &processed.documents[1];
    assert_eq!(second.metadata["page_number"], 2);
    assert!(second.page_content.contains("Beta page two"));
    assert!(!second.page_content.contains("Alpha"));
}

#[tokio::test]
async fn indexed_pdf_chunks_cite_their_page() {
    let store = Arc::new(LocalVectorStore::in_memory(Arc::new(HashingEmbedder)));
    let service = IngestionService::new(
        Arc::new(TextExtractor::new()),
        store.clone(),
        TextSplitter::new(100, 0),
    );

    let total = service
        .ingest_file(&fixture("two_pages.pdf"), None)
        .await
        .unwrap();
    assert_eq!(total, 2);

    let hits = store
        .similarity_search_with_score("Beta page two", 1, None)
        .await
        .unwrap();
    assert_eq!(hits[0].0.metadata["page_number"], 2);
    assert_eq!(hits[0].0.page_label(), "2");
}
