//! Loading profile documents into the document collection.

use crate::documents::{document_schema, DocumentChunk, DocumentMetadata};
use crate::embedding::EmbeddingProvider;
use crate::index::{IndexSpec, VectorIndex};
use crate::pdf;
use folio_core::{FolioError, FolioResult};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File extensions picked up by ingestion.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "txt", "md", "markdown"];

const EMBED_BATCH_SIZE: usize = 64;

/// Recursive character splitter.
///
/// Splits on the first separator that occurs in the text, recursing into
/// pieces that are still too long with the remaining separators, then merges
/// neighbouring pieces into chunks of at most `chunk_size` characters that
/// overlap by up to `chunk_overlap` characters.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

impl TextSplitter {
    /// Splitter with paragraph, line, word and character separators.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: ["\n\n", "\n", " ", ""].iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Split `text` into chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(*s))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut short: Vec<&str> = Vec::new();
        for piece in pieces {
            if piece.chars().count() < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge(&short, separator));
                short.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }
        if !short.is_empty() {
            chunks.extend(self.merge(&short, separator));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = separator.chars().count();
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = piece.chars().count();
            let joined_len = if window.is_empty() { 0 } else { sep_len };
            if total + len + joined_len > self.chunk_size && !window.is_empty() {
                push_chunk(&mut chunks, &window, separator);
                // Drop from the front until the window fits the overlap and
                // leaves room for the next piece.
                while total > self.chunk_overlap
                    || (total > 0 && total + len + sep_len > self.chunk_size)
                {
                    let Some(first) = window.pop_front() else {
                        break;
                    };
                    let first_len = first.chars().count();
                    let trailing = if window.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(first_len + trailing);
                }
            }
            window.push_back(piece);
            total += len + if window.len() > 1 { sep_len } else { 0 };
        }
        push_chunk(&mut chunks, &window, separator);
        chunks
    }
}

fn push_chunk(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Files that were loaded.
    pub files: Vec<PathBuf>,
    /// Chunks inserted into the collection.
    pub total_chunks: usize,
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Supported files named directly or found recursively under `directories`,
/// sorted within each directory for a stable order.
pub async fn discover_files(
    file: Option<&Path>,
    directories: &[PathBuf],
) -> FolioResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    if let Some(path) = file {
        if is_supported(path) && tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()) {
            files.push(path.to_path_buf());
        }
    }

    for dir in directories {
        let mut pending = vec![dir.clone()];
        let mut found = Vec::new();
        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %current.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && is_supported(&path) {
                    found.push(path);
                }
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

/// Loads, splits, embeds and stores profile documents.
pub struct Ingestor {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: String,
    splitter: TextSplitter,
}

impl Ingestor {
    /// Ingestor writing to `collection`.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            index,
            embedder,
            collection: collection.into(),
            splitter: TextSplitter::default(),
        }
    }

    /// Replace the splitter.
    pub fn with_splitter(mut self, splitter: TextSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Split a loaded file into schema-complete chunks.
    pub fn chunk_file(&self, path: &Path, content: &str) -> Vec<DocumentChunk> {
        let source = path.display().to_string();
        self.splitter
            .split_text(content)
            .into_iter()
            .map(|text| DocumentChunk::new(text, DocumentMetadata::for_source(source.clone())))
            .collect()
    }

    /// Load and split one file. PDFs are split page by page so every chunk
    /// keeps its page number; other files are read as UTF-8 text.
    pub async fn load_file(&self, path: &Path) -> FolioResult<Vec<DocumentChunk>> {
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            let content = tokio::fs::read_to_string(path).await?;
            return Ok(self.chunk_file(path, &content));
        }

        let bytes = tokio::fs::read(path).await?;
        let source = path.display().to_string();
        let pages = tokio::task::spawn_blocking(move || pdf::load_pages(&bytes, &source))
            .await
            .map_err(|e| FolioError::Ingest(format!("PDF loader task failed: {e}")))??;

        Ok(pages
            .into_iter()
            .flat_map(|page| {
                self.splitter
                    .split_text(&page.text)
                    .into_iter()
                    .map(move |text| DocumentChunk::new(text, page.metadata.clone()))
            })
            .collect())
    }

    /// Ingest `file` and every supported file under `directories`.
    pub async fn ingest(
        &self,
        file: Option<&Path>,
        directories: &[PathBuf],
    ) -> FolioResult<IngestReport> {
        let files = discover_files(file, directories).await?;
        if files.is_empty() {
            return Err(FolioError::Ingest(
                "no supported files found in the provided paths".to_string(),
            ));
        }

        let mut chunks = Vec::new();
        for path in &files {
            let file_chunks = self.load_file(path).await?;
            debug!(file = %path.display(), chunks = file_chunks.len(), "Split file");
            chunks.extend(file_chunks);
        }

        let schema = document_schema(&self.collection, self.embedder.dimension());
        self.index
            .ensure_collection(&schema, &IndexSpec::cosine_autoindex())
            .await?;

        let mut total_chunks = 0;
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|c| c.page_content.as_str()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            let records = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| chunk.to_record(vector))
                .collect::<FolioResult<Vec<_>>>()?;
            total_chunks += self.index.insert(&self.collection, records).await?;
        }

        info!(
            files = files.len(),
            chunks = total_chunks,
            collection = %self.collection,
            "Ingestion complete"
        );
        Ok(IngestReport {
            files,
            total_chunks,
        })
    }
}
