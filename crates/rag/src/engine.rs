//! Engine assembly
//!
//! Builds the long-lived service graph from settings: one HTTP client pool
//! shared across providers, singleton adapters for both stores, the
//! router with its registry and classifier, and the pipeline plus corpus
//! manager on top. Call once at startup and share the handles.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use lexrag_config::RagSettings;
use lexrag_core::DocumentRegistry;
use lexrag_llm::{HttpChatBackend, LlmBackend, LlmConfig};

use crate::corpus::{CorpusManager, InMemoryRegistry};
use crate::expansion::{ExpansionConfig, QueryExpander};
use crate::lexical::{LexicalConfig, TantivyBackend};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::providers::{
    jurisbert::JurisBertConfig, kanon::KanonConfig, openai::OpenAiConfig, voyage::VoyageConfig,
    JurisBertProvider, KanonProvider, OpenAiProvider, ProviderRegistry, VoyageProvider,
};
use crate::reranker::{CrossEncoderReranker, RerankerConfig};
use crate::router::{EmbeddingRouter, RouterConfig};
use crate::vector::{QdrantBackend, VectorConfig};
use crate::RagError;

/// A fully wired retrieval engine
pub struct Engine {
    pub pipeline: Arc<Pipeline>,
    pub corpus: Arc<CorpusManager>,
    pub router: Arc<EmbeddingRouter>,
}

/// Assemble the engine against live backends. `registry` is the external
/// metadata store adapter; pass [`InMemoryRegistry`] for single-node use.
pub fn build_engine(
    settings: Arc<RagSettings>,
    registry: Option<Arc<dyn DocumentRegistry>>,
) -> Result<Engine, RagError> {
    let http = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default();

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(OpenAiProvider::new(
        OpenAiConfig {
            endpoint: settings.openai_url.clone(),
            api_key: settings.openai_api_key.clone(),
            ..OpenAiConfig::default()
        },
        http.clone(),
    )));
    providers.register(Arc::new(VoyageProvider::v4(
        VoyageConfig {
            endpoint: settings.voyage_url.clone(),
            api_key: settings.voyage_api_key.clone(),
            ..VoyageConfig::v4()
        },
        http.clone(),
    )));
    providers.register(Arc::new(VoyageProvider::law(
        VoyageConfig {
            endpoint: settings.voyage_url.clone(),
            api_key: settings.voyage_api_key.clone(),
            ..VoyageConfig::law()
        },
        http.clone(),
    )));
    providers.register(Arc::new(KanonProvider::new(
        KanonConfig {
            endpoint: settings.kanon_url.clone(),
            api_key: settings.kanon_api_key.clone(),
            ..KanonConfig::default()
        },
        http.clone(),
    )));
    providers.register(Arc::new(JurisBertProvider::new(
        JurisBertConfig {
            endpoint: settings.jurisbert_url.clone(),
            ..JurisBertConfig::default()
        },
        http.clone(),
    )));
    let providers = Arc::new(providers);

    let llm: Arc<dyn LlmBackend> = Arc::new(HttpChatBackend::with_client(
        LlmConfig {
            model: settings.hyde_model.clone(),
            endpoint: settings.llm_url.clone(),
            max_tokens: settings.hyde_max_tokens,
            ..LlmConfig::default()
        },
        http.clone(),
    ));

    let router = Arc::new(
        EmbeddingRouter::new(
            RouterConfig {
                skip_rag_chars: settings.skip_rag_chars,
                ..RouterConfig::default()
            },
            Arc::clone(&settings),
            Arc::clone(&providers),
        )
        .with_llm(Arc::clone(&llm)),
    );

    let lexical = Arc::new(TantivyBackend::new(LexicalConfig::default()));
    let vector = QdrantBackend::new(VectorConfig {
        endpoint: settings.qdrant_url.clone(),
        api_key: settings.qdrant_api_key.clone(),
        ..VectorConfig::default()
    })?;

    let expander = Arc::new(
        QueryExpander::new(ExpansionConfig {
            max_variants: settings.multiquery_max,
            ..ExpansionConfig::default()
        })
        .with_llm(Arc::clone(&llm)),
    );

    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        Arc::clone(&settings),
        Arc::clone(&router),
        Arc::clone(&providers),
        lexical.clone(),
        vector.clone(),
        expander,
    );
    if let Some(reranker) = CrossEncoderReranker::try_load(RerankerConfig {
        model: settings.rerank_model.clone(),
        top_k: settings.rerank_top_k,
        max_chars: settings.rerank_max_chars,
        ..RerankerConfig::default()
    }) {
        pipeline = pipeline.with_reranker(Arc::new(reranker));
    }

    let registry = registry.unwrap_or_else(|| InMemoryRegistry::new() as _);
    let corpus = Arc::new(CorpusManager::new(
        Arc::clone(&settings),
        Arc::clone(&router),
        lexical,
        vector,
        registry,
    ));

    Ok(Engine {
        pipeline: Arc::new(pipeline),
        corpus,
        router,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_engine_wires_without_io() {
        // Construction touches no backend; connections are lazy
        let settings = Arc::new(RagSettings::from_env_with(|_| None));
        let engine = build_engine(settings, None).unwrap();
        assert_eq!(engine.router.usage().total_routes, 0);
    }
}
