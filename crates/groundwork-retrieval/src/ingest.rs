use std::path::{Path, PathBuf};
use std::sync::Arc;

use groundwork_core::{GroundworkError, GroundworkResult};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::chunker::Chunker;
use crate::config::IngestConfig;
use crate::embedding::EmbeddingProvider;
use crate::extract::extract_or_empty;
use crate::store::{Chunk, EmbeddingIndex};

/// One document found under an ingestion root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSource {
    /// Name of the top-level directory.
    pub company: String,
    /// Name of the directory under the company.
    pub category: String,
    /// Full path of the file.
    pub path: PathBuf,
}

impl DocumentSource {
    /// The document's file name, used as its provenance identifier.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents discovered under the root.
    pub documents_found: usize,
    /// Documents whose chunks were merged into the index.
    pub documents_indexed: usize,
    /// Documents that failed or yielded no text.
    pub documents_skipped: usize,
    /// Chunks appended to the index.
    pub chunks_indexed: usize,
    /// Chunks the index refused on append.
    pub chunks_rejected: usize,
}

/// Walk `root/<company>/<category>/*` and list the documents to ingest,
/// sorted by company, category, then file name.
///
/// Hidden entries, non-directories at the company and category levels, and
/// files whose extension is not accepted are ignored.
pub async fn discover_documents(
    root: &Path,
    config: &IngestConfig,
) -> GroundworkResult<Vec<DocumentSource>> {
    let mut documents = Vec::new();

    for (company, company_path) in list_entries(root, EntryKind::Dir).await? {
        if !config.accepts_company(&company) {
            debug!(company = %company, "Company not selected, skipping");
            continue;
        }
        for (category, category_path) in list_entries(&company_path, EntryKind::Dir).await? {
            if !config.accepts_category(&category) {
                continue;
            }
            for (_, path) in list_entries(&category_path, EntryKind::File).await? {
                let accepted = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| config.accepts_extension(e));
                if accepted {
                    documents.push(DocumentSource {
                        company: company.clone(),
                        category: category.clone(),
                        path,
                    });
                }
            }
        }
    }

    Ok(documents)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
}

/// Non-hidden entries of one kind in `dir`, sorted by name.
async fn list_entries(dir: &Path, kind: EntryKind) -> GroundworkResult<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().await?;
        let wanted = match kind {
            EntryKind::Dir => file_type.is_dir(),
            EntryKind::File => file_type.is_file(),
        };
        if wanted {
            entries.push((name, entry.path()));
        }
    }
    entries.sort();
    Ok(entries)
}

/// Builds an [`EmbeddingIndex`] from a directory tree of documents.
///
/// Documents are extracted, chunked, and embedded concurrently (bounded by
/// [`IngestConfig::concurrency`]). Their chunks are then appended in document
/// order, so the resulting index does not depend on which task finished
/// first. A document that fails to extract or embed is logged and skipped.
pub struct Ingestor {
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    config: IngestConfig,
}

impl Ingestor {
    /// Create an ingestor with the default chunker and settings.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            chunker: Chunker::default(),
            config: IngestConfig::default(),
        }
    }

    /// Use `chunker` instead of the default one.
    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Replace discovery and concurrency settings.
    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// Ingest every document under `root` into a fresh index.
    pub async fn ingest(&self, root: &Path) -> GroundworkResult<(EmbeddingIndex, IngestReport)> {
        let mut index = EmbeddingIndex::new();
        let report = self.ingest_into(root, &mut index).await?;
        Ok((index, report))
    }

    /// Ingest every document under `root`, appending to an existing index.
    pub async fn ingest_into(
        &self,
        root: &Path,
        index: &mut EmbeddingIndex,
    ) -> GroundworkResult<IngestReport> {
        if let Some(expected) = index.dimension() {
            if expected != self.embedder.dimension() {
                return Err(GroundworkError::DimensionMismatch {
                    expected,
                    actual: self.embedder.dimension(),
                });
            }
        }

        let documents = discover_documents(root, &self.config).await?;
        let mut report = IngestReport {
            documents_found: documents.len(),
            ..IngestReport::default()
        };
        info!(
            root = %root.display(),
            documents = documents.len(),
            concurrency = self.config.concurrency,
            "Starting ingestion"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (position, source) in documents.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let embedder = Arc::clone(&self.embedder);
            let chunker = self.chunker;
            tasks.spawn(async move {
                let chunks = match semaphore.acquire_owned().await {
                    Ok(_permit) => process_document(&source, chunker, embedder.as_ref()).await,
                    Err(_) => None,
                };
                (position, chunks)
            });
        }

        let mut outcomes: Vec<Option<Vec<Chunk>>> = vec![None; documents.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, chunks)) => outcomes[position] = chunks,
                Err(e) => warn!(error = %e, "Document task failed"),
            }
        }

        for (source, outcome) in documents.iter().zip(outcomes) {
            let Some(chunks) = outcome else {
                report.documents_skipped += 1;
                continue;
            };
            report.documents_indexed += 1;
            for chunk in chunks {
                match index.append(chunk) {
                    Ok(_) => report.chunks_indexed += 1,
                    Err(e) => {
                        warn!(path = %source.path.display(), error = %e, "Chunk rejected");
                        report.chunks_rejected += 1;
                    }
                }
            }
        }

        info!(
            indexed = report.documents_indexed,
            skipped = report.documents_skipped,
            chunks = report.chunks_indexed,
            rejected = report.chunks_rejected,
            "Ingestion finished"
        );
        Ok(report)
    }
}

/// Extract, chunk, and embed one document. `None` means the document is
/// skipped.
async fn process_document(
    source: &DocumentSource,
    chunker: Chunker,
    embedder: &dyn EmbeddingProvider,
) -> Option<Vec<Chunk>> {
    let path = source.path.clone();
    let text = match tokio::task::spawn_blocking(move || extract_or_empty(&path)).await {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %source.path.display(), error = %e, "Extraction task failed");
            return None;
        }
    };

    let pieces = chunker.chunk(&text);
    if pieces.is_empty() {
        warn!(path = %source.path.display(), "Skipping document, no text extracted");
        return None;
    }

    let refs: Vec<&str> = pieces.iter().map(String::as_str).collect();
    let embeddings = match embedder.embed_batch(&refs).await {
        Ok(embeddings) if embeddings.len() == pieces.len() => embeddings,
        Ok(embeddings) => {
            warn!(
                path = %source.path.display(),
                expected = pieces.len(),
                actual = embeddings.len(),
                "Skipping document, embedder returned wrong number of vectors"
            );
            return None;
        }
        Err(e) => {
            warn!(path = %source.path.display(), error = %e, "Skipping document, embedding failed");
            return None;
        }
    };

    let file_name = source.file_name();
    debug!(path = %source.path.display(), chunks = pieces.len(), "Document processed");
    Some(
        pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (text, embedding))| Chunk {
                company: source.company.clone(),
                category: source.category.clone(),
                source_file: file_name.clone(),
                chunk_index,
                text,
                embedding,
            })
            .collect(),
    )
}
