use crate::config::FolioConfig;
use folio_agent::{AskService, ConversationMemory, LlmClient, RagPipeline};
use folio_memory::{
    DocumentRetriever, EmbeddingProvider, Ingestor, MilvusVectorIndex, OpenAiEmbedding,
    SemanticCache, TextSplitter, VectorIndex,
};
use std::sync::Arc;
use tracing::info;

/// Everything the commands need, wired from one configuration.
pub struct Components {
    pub service: AskService,
    /// `None` without a vector index.
    pub ingestor: Option<Arc<Ingestor>>,
}

/// Build the providers, index, cache, memory and pipeline.
///
/// Without a Milvus URI the cache and memory run disabled and retrieval is
/// empty. Collections are created eagerly; failures there are retried on
/// first use.
pub async fn build(config: &FolioConfig) -> anyhow::Result<Components> {
    let api_key = config.require_api_key()?;
    let http = config.model.http_client()?;

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbedding::new(
        http.clone(),
        api_key,
        config.embedding.clone(),
    ));
    let llm = Arc::new(LlmClient::new(config.model.clone(), http.clone()));

    let index: Option<Arc<dyn VectorIndex>> = config.milvus_uri().map(|uri| {
        info!(uri = %uri, collection = %config.milvus.collection, "Using Milvus vector index");
        Arc::new(MilvusVectorIndex::new(
            http.clone(),
            uri,
            config.milvus.token.clone(),
        )) as Arc<dyn VectorIndex>
    });

    let (cache, memory) = match &index {
        Some(index) => (
            SemanticCache::new(index.clone(), embedder.clone(), config.cache.clone()),
            ConversationMemory::new(
                index.clone(),
                embedder.clone(),
                llm.clone(),
                config.memory.clone(),
            ),
        ),
        None => (
            SemanticCache::disabled(config.cache.clone()),
            ConversationMemory::disabled(config.memory.clone()),
        ),
    };

    let retriever = DocumentRetriever::new(
        index.clone(),
        embedder.clone(),
        config.milvus.collection.clone(),
    )
    .with_k(config.retrieval.k);

    let ingestor = index.map(|index| {
        Arc::new(
            Ingestor::new(index, embedder, config.milvus.collection.clone()).with_splitter(
                TextSplitter::new(config.retrieval.chunk_size, config.retrieval.chunk_overlap),
            ),
        )
    });

    let service = AskService::new(
        Arc::new(cache),
        Arc::new(memory),
        Arc::new(RagPipeline::new(retriever, llm)),
    );
    service.initialize().await;

    Ok(Components { service, ingestor })
}
