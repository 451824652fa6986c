//! Embedding router
//!
//! Decides (provider, collection) for a text in three layers:
//!
//! 1. Heuristic: seed-word language scoring with a detection library as
//!    backup, jurisdiction keywords plus strong citation-pattern signals,
//!    document-type regex groups. Sub-millisecond, no external calls.
//! 2. LLM classification: line-oriented prompt, cached by text hash.
//! 3. Fallback: the layer-1 best guess when minimally supported,
//!    otherwise GENERAL + OpenAI.
//!
//! The route carries the provider's dimension contract; any decision whose
//! provider and collection disagree on dimensions is rejected here, before
//! a vector store ever sees it.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use lexrag_config::constants::{collection_dimensions, provider_dimensions, rag};
use lexrag_config::RagSettings;
use lexrag_core::{
    Chunk, DocumentType, EmbeddingRoute, Jurisdiction, ProviderName, RouteMethod, RoutingDecision,
    VectorBackend,
};
use lexrag_llm::{classification_prompt, LlmBackend};

use crate::cache::LruTtlCache;
use crate::providers::{InputType, ProviderRegistry};
use crate::RagError;

// Strong citation signals, worth +3 each
static CNJ_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}").expect("cnj regex"));
static USC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\s+U\.?S\.?C\.?\s*§?\s*\d+").expect("usc regex"));
static EU_REG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:Regulation|Directive|Decision)\s*\((?:EU|EC|EEC)\)\s*(?:No\.?\s*)?\d+/\d+")
        .expect("eu regex")
});

const BR_KEYWORDS: &[&str] = &[
    // Tribunais
    "stf", "stj", "tst", "trf", "tjsp", "tjrj", "tjmg", "tjrs", "tre", "trt",
    // Legislação
    "lei nº", "lei número", "lei n.", "decreto nº", "decreto-lei",
    "medida provisória", "emenda constitucional", "constituição federal",
    "código civil", "código penal", "código de processo", "cpc", "cpp",
    "clt", "cdc", "eca",
    // Termos processuais
    "recurso especial", "recurso extraordinário", "habeas corpus",
    "mandado de segurança", "ação direta", "adi", "adpf",
    "súmula vinculante", "repercussão geral",
    // Estrutura de artigos
    "art.", "artigo", "inciso", "parágrafo", "alínea", "caput",
];

const US_KEYWORDS: &[&str] = &[
    "supreme court", "circuit court", "district court", "court of appeals",
    "scotus", "federal court",
    "usc", "u.s.c.", "cfr", "c.f.r.", "united states code",
    "federal register", "public law", "stat.",
    "amendment", "bill of rights", "due process", "equal protection",
    "commerce clause", "first amendment", "fourth amendment",
    "fifth amendment", "fourteenth amendment",
    "stare decisis", "certiorari", "amicus curiae",
    "federal rules", "frcp", "fre",
];

const UK_KEYWORDS: &[&str] = &[
    "house of lords", "house of commons", "privy council",
    "crown court", "high court", "court of appeal",
    "supreme court of the united kingdom",
    "statutory instrument", "act of parliament",
    "queen's bench", "king's bench", "chancery division",
    "common law", "equity", "tort",
    "uksc", "ewca", "ewhc",
];

const EU_KEYWORDS: &[&str] = &[
    "european court of justice", "ecj", "cjeu",
    "european court of human rights", "echr",
    "european commission", "european parliament",
    "court of justice of the european union",
    "eu regulation", "eu directive", "gdpr",
    "treaty of lisbon", "treaty of rome",
    "richtlinie", "verordnung", "règlement",
    "acquis communautaire", "subsidiarity",
    "preliminary ruling", "infringement procedure",
];

const PT_INDICATORS: &[&str] = &[
    "de", "da", "do", "dos", "das", "que", "para", "com", "não", "uma", "por",
    "mais", "como", "pelo", "pela", "artigo", "lei", "tribunal", "recurso", "direito",
];
const EN_INDICATORS: &[&str] = &[
    "the", "of", "and", "to", "in", "for", "is", "that", "with", "by",
    "court", "law", "section", "shall",
];
const DE_INDICATORS: &[&str] = &[
    "der", "die", "das", "und", "von", "für", "mit", "ist", "nicht", "den",
    "ein", "eine", "gesetz", "recht",
];
const FR_INDICATORS: &[&str] = &[
    "le", "la", "les", "du", "des", "un", "une", "est", "dans", "par",
    "pour", "loi", "droit", "tribunal",
];

/// Document-type regex groups, scored independently
static LEGISLATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"art(?:igo)?\.?\s*\d+",
        r"§\s*\d+",
        r"lei\s+n",
        r"decreto\s+n",
        r"section\s+\d+",
        r"regulation\s*\(",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("legislation pattern"))
    .collect()
});
static JURISPRUDENCE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"acórdão",
        r"ementa",
        r"voto\s+do\s+relator",
        r"tribunal",
        r"holding",
        r"opinion\s+of\s+the\s+court",
        r"dissenting\s+opinion",
        r"judgment",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("jurisprudence pattern"))
    .collect()
});
static CONTRACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"cláusula",
        r"contratante",
        r"contratad[oa]",
        r"clause",
        r"party\s+(?:a|b|of\s+the\s+first)",
        r"hereby\s+agrees",
        r"term\s+(?:of|and)\s+condition",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("contract pattern"))
    .collect()
});
static PLEADING_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"excelentíssimo",
        r"meritíssimo",
        r"requer(?:ente|ida)",
        r"plaintiff",
        r"defendant",
        r"motion\s+(?:to|for)",
        r"prayer\s+for\s+relief",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("pleading pattern"))
    .collect()
});
static DOCTRINE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"segundo\s+a\s+doutrina",
        r"conforme\s+ensina",
        r"na\s+lição\s+de",
        r"doutrina\s+majoritária",
        r"according\s+to\s+scholars",
        r"treatise",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("doctrine pattern"))
    .collect()
});

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub heuristic_threshold: f32,
    pub llm_threshold: f32,
    /// Minimum layer-1 jurisdiction confidence the fallback layer trusts
    pub fallback_juris_confidence: f32,
    pub skip_rag_chars: usize,
    pub skip_rag_max_pages: usize,
    pub cache_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            heuristic_threshold: rag::HEURISTIC_CONFIDENCE_THRESHOLD,
            llm_threshold: rag::LLM_CONFIDENCE_THRESHOLD,
            fallback_juris_confidence: rag::FALLBACK_JURIS_CONFIDENCE,
            skip_rag_chars: rag::SKIP_RAG_CHAR_THRESHOLD,
            skip_rag_max_pages: rag::SKIP_RAG_MAX_PAGES,
            cache_capacity: rag::ROUTER_CACHE_CAPACITY,
        }
    }
}

/// Usage counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterUsage {
    pub total_routes: u64,
    pub by_provider: HashMap<String, u64>,
    pub by_jurisdiction: HashMap<String, u64>,
    pub by_method: HashMap<String, u64>,
    pub cache_hits: u64,
}

#[derive(Default)]
struct UsageInner {
    total: u64,
    by_provider: HashMap<String, u64>,
    by_jurisdiction: HashMap<String, u64>,
    by_method: HashMap<String, u64>,
}

/// Routes texts to the correct embedding family and collection
pub struct EmbeddingRouter {
    config: RouterConfig,
    settings: Arc<RagSettings>,
    registry: Arc<ProviderRegistry>,
    llm: Option<Arc<dyn LlmBackend>>,
    cache: LruTtlCache<RoutingDecision>,
    usage: Mutex<UsageInner>,
}

impl EmbeddingRouter {
    pub fn new(
        config: RouterConfig,
        settings: Arc<RagSettings>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        let cache = LruTtlCache::new(config.cache_capacity, None);
        tracing::info!(
            threshold = config.heuristic_threshold,
            "embedding router initialized"
        );
        Self {
            config,
            settings,
            registry,
            llm: None,
            cache,
            usage: Mutex::new(UsageInner::default()),
        }
    }

    /// Attach the layer-2 classifier
    pub fn with_llm(mut self, llm: Arc<dyn LlmBackend>) -> Self {
        self.llm = Some(llm);
        self
    }

    // ------------------------------------------------------------------
    // Layer 1: heuristics
    // ------------------------------------------------------------------

    fn count_indicators(sample: &str, indicators: &[&str]) -> usize {
        let padded = format!(" {sample} ");
        indicators
            .iter()
            .filter(|w| padded.contains(&format!(" {w} ")))
            .count()
    }

    /// (language code, confidence)
    pub fn detect_language(&self, text: &str) -> (String, f32) {
        if text.trim().is_empty() {
            return ("unknown".into(), 0.0);
        }

        let sample: String = text.chars().take(1000).collect::<String>().to_lowercase();

        let counts = [
            ("pt", Self::count_indicators(&sample, PT_INDICATORS)),
            ("en", Self::count_indicators(&sample, EN_INDICATORS)),
            ("de", Self::count_indicators(&sample, DE_INDICATORS)),
            ("fr", Self::count_indicators(&sample, FR_INDICATORS)),
        ];

        let total: usize = counts.iter().map(|(_, c)| c).sum();
        let (best_lang, best_count) = counts
            .iter()
            .max_by_key(|(_, c)| *c)
            .copied()
            .unwrap_or(("unknown", 0));

        if total == 0 {
            if let Some(code) = Self::whatlang_code(text) {
                return (code, 0.7);
            }
            return ("unknown".into(), 0.0);
        }

        let confidence = (best_count as f32 / total.max(1) as f32 * 1.5).min(1.0);
        if confidence < 0.6 {
            if let Some(code) = Self::whatlang_code(text) {
                return (code, 0.75);
            }
        }
        (best_lang.to_string(), confidence)
    }

    fn whatlang_code(text: &str) -> Option<String> {
        let sample: String = text.chars().take(500).collect();
        let info = whatlang::detect(&sample)?;
        let code = match info.lang() {
            whatlang::Lang::Por => "pt",
            whatlang::Lang::Eng => "en",
            whatlang::Lang::Deu => "de",
            whatlang::Lang::Fra => "fr",
            whatlang::Lang::Spa => "es",
            whatlang::Lang::Ita => "it",
            whatlang::Lang::Nld => "nl",
            _ => return None,
        };
        Some(code.to_string())
    }

    /// (jurisdiction, confidence) by keyword and citation-pattern scoring
    pub fn detect_jurisdiction(&self, text: &str, language: &str) -> (Jurisdiction, f32) {
        if text.trim().is_empty() {
            return (Jurisdiction::General, 0.0);
        }

        let lower: String = text.chars().take(3000).collect::<String>().to_lowercase();

        let mut scores: HashMap<Jurisdiction, f32> = HashMap::from([
            (Jurisdiction::Br, 0.0),
            (Jurisdiction::Us, 0.0),
            (Jurisdiction::Uk, 0.0),
            (Jurisdiction::Eu, 0.0),
            // Minimal bias so empty evidence resolves to GENERAL
            (Jurisdiction::General, 0.1),
        ]);

        for kw in BR_KEYWORDS {
            if lower.contains(kw) {
                *scores.get_mut(&Jurisdiction::Br).expect("seeded") += 1.0;
            }
        }
        if CNJ_PATTERN.is_match(text) {
            *scores.get_mut(&Jurisdiction::Br).expect("seeded") += 3.0;
        }
        for kw in US_KEYWORDS {
            if lower.contains(kw) {
                *scores.get_mut(&Jurisdiction::Us).expect("seeded") += 1.0;
            }
        }
        if USC_PATTERN.is_match(text) {
            *scores.get_mut(&Jurisdiction::Us).expect("seeded") += 3.0;
        }
        for kw in UK_KEYWORDS {
            if lower.contains(kw) {
                *scores.get_mut(&Jurisdiction::Uk).expect("seeded") += 1.0;
            }
        }
        for kw in EU_KEYWORDS {
            if lower.contains(kw) {
                *scores.get_mut(&Jurisdiction::Eu).expect("seeded") += 1.0;
            }
        }
        if EU_REG_PATTERN.is_match(text) {
            *scores.get_mut(&Jurisdiction::Eu).expect("seeded") += 3.0;
        }

        match language {
            "pt" => *scores.get_mut(&Jurisdiction::Br).expect("seeded") += 2.0,
            "en" => {
                *scores.get_mut(&Jurisdiction::Us).expect("seeded") += 0.5;
                *scores.get_mut(&Jurisdiction::Uk).expect("seeded") += 0.5;
            },
            "de" | "fr" | "it" | "es" | "nl" => {
                *scores.get_mut(&Jurisdiction::Eu).expect("seeded") += 1.5;
            },
            _ => {},
        }

        let (best, best_score) = scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.as_str().cmp(a.0.as_str())))
            .map(|(j, s)| (*j, *s))
            .expect("scores is non-empty");

        if best_score <= 0.1 {
            return (Jurisdiction::General, 0.3);
        }

        // Confidence: dominance share, damped by evidence mass so one
        // weak keyword never saturates while one +3 citation signal does
        let total: f32 = scores.values().sum();
        let share = (best_score / total.max(1.0) * 2.0).min(1.0);
        let mass = (best_score / 3.0).min(1.0);
        let confidence = share * mass;

        // Too close to call between US and UK reads as international
        let us = scores[&Jurisdiction::Us];
        let uk = scores[&Jurisdiction::Uk];
        if matches!(best, Jurisdiction::Us | Jurisdiction::Uk)
            && us > 0.0
            && uk > 0.0
            && (us - uk).abs() < us.max(uk) * 0.3
        {
            return (Jurisdiction::Int, confidence * 0.9);
        }

        (best, confidence)
    }

    pub fn detect_document_type(&self, text: &str) -> DocumentType {
        let lower: String = text.chars().take(2000).collect::<String>().to_lowercase();
        let score = |patterns: &[Regex]| -> f32 {
            patterns.iter().filter(|p| p.is_match(&lower)).count() as f32
        };

        let scores = [
            (DocumentType::Legislation, score(&LEGISLATION_PATTERNS)),
            (DocumentType::Jurisprudence, score(&JURISPRUDENCE_PATTERNS)),
            (DocumentType::Contract, score(&CONTRACT_PATTERNS)),
            (DocumentType::Pleading, score(&PLEADING_PATTERNS)),
            (DocumentType::Doctrine, score(&DOCTRINE_PATTERNS)),
            (DocumentType::General, 0.5),
        ];

        scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(t, _)| *t)
            .unwrap_or(DocumentType::General)
    }

    /// ~500 words per page
    fn estimate_pages(text: &str) -> usize {
        (text.split_whitespace().count() / rag::WORDS_PER_PAGE).max(1)
    }

    fn skip_rag(&self, text: &str, pages: usize) -> bool {
        text.chars().count() < self.config.skip_rag_chars && pages < self.config.skip_rag_max_pages
    }

    // ------------------------------------------------------------------
    // Layer 2: LLM classification
    // ------------------------------------------------------------------

    fn cache_key(text: &str) -> String {
        let snippet: String = text.chars().take(rag::ROUTER_CACHE_KEY_CHARS).collect();
        LruTtlCache::<RoutingDecision>::key_for(&snippet)
    }

    async fn classify_with_llm(&self, text: &str) -> Result<Option<RoutingDecision>, RagError> {
        let llm = match self.llm {
            Some(ref llm) => Arc::clone(llm),
            None => return Ok(None),
        };

        let snippet: String = text.chars().take(1500).collect();
        let messages = classification_prompt(&snippet);
        let result = llm
            .generate(&messages)
            .await
            .map_err(|e| RagError::Routing(format!("classification failed: {e}")))?;

        Ok(self.parse_llm_response(&result.text))
    }

    fn parse_llm_response(&self, response: &str) -> Option<RoutingDecision> {
        let mut parsed: HashMap<String, String> = HashMap::new();
        for line in response.lines() {
            if let Some((key, value)) = line.split_once(':') {
                parsed.insert(key.trim().to_uppercase(), value.trim().to_string());
            }
        }

        let jurisdiction = parsed
            .get("JURISDICTION")
            .and_then(|s| Jurisdiction::parse(s))
            .unwrap_or(Jurisdiction::General);
        let document_type = parsed
            .get("DOCUMENT_TYPE")
            .and_then(|s| DocumentType::parse(s))
            .unwrap_or(DocumentType::General);
        let confidence = parsed
            .get("CONFIDENCE")
            .and_then(|s| s.parse::<f32>().ok())
            .unwrap_or(0.7)
            .clamp(0.0, 1.0);
        let language = parsed
            .get("LANGUAGE")
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|| "unknown".into());
        let reason = parsed
            .get("REASON")
            .cloned()
            .unwrap_or_else(|| "classified via llm".into());

        let (provider, collection) = self.settings.route_for(jurisdiction);

        Some(RoutingDecision {
            jurisdiction,
            document_type,
            language,
            provider,
            collection,
            confidence,
            method: RouteMethod::Llm,
            reason,
            skip_rag: false,
            estimated_pages: 0,
        })
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    fn record_usage(&self, decision: &RoutingDecision) {
        let mut usage = self.usage.lock();
        usage.total += 1;
        *usage
            .by_provider
            .entry(decision.provider.as_str().to_string())
            .or_insert(0) += 1;
        *usage
            .by_jurisdiction
            .entry(decision.jurisdiction.as_str().to_string())
            .or_insert(0) += 1;
        let method = format!("{:?}", decision.method).to_lowercase();
        *usage.by_method.entry(method).or_insert(0) += 1;
    }

    pub fn usage(&self) -> RouterUsage {
        let usage = self.usage.lock();
        RouterUsage {
            total_routes: usage.total,
            by_provider: usage.by_provider.clone(),
            by_jurisdiction: usage.by_jurisdiction.clone(),
            by_method: usage.by_method.clone(),
            cache_hits: self.cache.stats().hits,
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Validate the provider/collection dimension contract and build the
    /// final route
    fn make_route(&self, decision: RoutingDecision) -> Result<EmbeddingRoute, RagError> {
        let provider_dims = provider_dimensions(decision.provider);
        let collection_dims = collection_dimensions(&decision.collection);
        if provider_dims != collection_dims {
            return Err(RagError::Routing(format!(
                "rejected route: provider {} emits {}d but collection '{}' stores {}d",
                decision.provider.as_str(),
                provider_dims,
                decision.collection,
                collection_dims
            )));
        }
        self.record_usage(&decision);
        Ok(EmbeddingRoute {
            provider: decision.provider,
            collection: decision.collection.clone(),
            dimensions: provider_dims,
            decision,
        })
    }

    /// Route a text. Hints short-circuit; otherwise the three layers run
    /// in order.
    pub async fn route(
        &self,
        text: &str,
        jurisdiction_hint: Option<&str>,
        language_hint: Option<&str>,
    ) -> Result<EmbeddingRoute, RagError> {
        let pages = Self::estimate_pages(text);
        let skip_rag = self.skip_rag(text, pages);

        // User hint wins outright
        if let Some(jurisdiction) = jurisdiction_hint.and_then(Jurisdiction::parse) {
            let (provider, collection) = self.settings.route_for(jurisdiction);
            let language = language_hint
                .map(str::to_string)
                .unwrap_or_else(|| self.detect_language(text).0);
            return self.make_route(RoutingDecision {
                jurisdiction,
                document_type: self.detect_document_type(text),
                language,
                provider,
                collection,
                confidence: 1.0,
                method: RouteMethod::UserHint,
                reason: "jurisdiction provided by caller".into(),
                skip_rag,
                estimated_pages: pages,
            });
        }

        // Layer 1
        let (language, lang_conf) = match language_hint {
            Some(hint) => (hint.to_string(), 1.0),
            None => self.detect_language(text),
        };
        let (jurisdiction, juris_conf) = self.detect_jurisdiction(text, &language);
        let combined = 0.7 * juris_conf + 0.3 * lang_conf;

        if combined >= self.config.heuristic_threshold {
            let (provider, collection) = self.settings.route_for(jurisdiction);
            return self.make_route(RoutingDecision {
                jurisdiction,
                document_type: self.detect_document_type(text),
                language: language.clone(),
                provider,
                collection,
                confidence: combined,
                method: RouteMethod::Heuristic,
                reason: format!(
                    "keyword/citation score {juris_conf:.2}, language {language} ({lang_conf:.2})"
                ),
                skip_rag,
                estimated_pages: pages,
            });
        }

        // Layer 2, read-through cached
        let key = Self::cache_key(text);
        if let Some(mut cached) = self.cache.get(&key) {
            cached.skip_rag = skip_rag;
            cached.estimated_pages = pages;
            return self.make_route(cached);
        }

        let mut llm_failed = false;
        match self.classify_with_llm(text).await {
            Ok(Some(mut decision)) if decision.confidence >= self.config.llm_threshold => {
                decision.skip_rag = skip_rag;
                decision.estimated_pages = pages;
                self.cache.insert(key, decision.clone());
                return self.make_route(decision);
            },
            Ok(_) => {},
            Err(e) => {
                tracing::warn!(error = %e, "LLM classification layer failed");
                llm_failed = true;
            },
        }

        // Layer 3
        let method = if llm_failed {
            RouteMethod::FallbackError
        } else {
            RouteMethod::Fallback
        };
        let (jurisdiction, reason) = if juris_conf > self.config.fallback_juris_confidence {
            (
                jurisdiction,
                format!("heuristic best guess at {juris_conf:.2}"),
            )
        } else {
            (
                Jurisdiction::General,
                "no reliable jurisdiction signal".to_string(),
            )
        };
        let (provider, collection) = self.settings.route_for(jurisdiction);
        self.make_route(RoutingDecision {
            jurisdiction,
            document_type: self.detect_document_type(text),
            language,
            provider,
            collection,
            confidence: juris_conf.max(0.3),
            method,
            reason,
            skip_rag,
            estimated_pages: pages,
        })
    }

    // ------------------------------------------------------------------
    // Embedding through the route
    // ------------------------------------------------------------------

    /// Embed texts via the routed provider, degrading per the provider
    /// failure policy: routed provider → OpenAI fallback → zero vectors.
    /// Returns the vectors and whether degradation happened.
    pub async fn embed_routed(
        &self,
        route: &EmbeddingRoute,
        texts: &[String],
        input_type: InputType,
    ) -> (Vec<Vec<f32>>, bool) {
        match self.registry.get(route.provider) {
            Ok(provider) => match provider.embed_batch(texts, input_type).await {
                Ok(vectors) => return (vectors, false),
                Err(e) => {
                    tracing::warn!(
                        provider = route.provider.as_str(),
                        error = %e,
                        "routed provider failed, falling back to openai"
                    );
                },
            },
            Err(e) => {
                tracing::warn!(error = %e, "routed provider missing, falling back to openai");
            },
        }

        if route.provider != ProviderName::Openai {
            if let Ok(fallback) = self.registry.get(ProviderName::Openai) {
                if let Ok(vectors) = fallback.embed_batch(texts, input_type).await {
                    // Fallback vectors only fit the route if dimensions agree
                    if vectors.first().map(|v| v.len()) == Some(route.dimensions) {
                        return (vectors, true);
                    }
                }
            }
        }

        tracing::error!(
            provider = route.provider.as_str(),
            "all providers failed, emitting zero vectors"
        );
        (vec![vec![0.0; route.dimensions]; texts.len()], true)
    }

    // ------------------------------------------------------------------
    // Migration
    // ------------------------------------------------------------------

    /// Re-embed a legacy collection into the target jurisdiction's routed
    /// collection. The legacy collection is never modified; migrated
    /// points carry a `migrated_from` payload stamp.
    pub async fn migrate_collection(
        &self,
        vector_backend: &dyn VectorBackend,
        source_collection: &str,
        target_jurisdiction: Jurisdiction,
        batch_size: usize,
        limit: Option<usize>,
    ) -> Result<usize, RagError> {
        let (provider_name, target_collection) = self.settings.route_for(target_jurisdiction);
        let provider = self.registry.get(provider_name)?;
        let dims = provider.dimensions();

        vector_backend
            .ensure_collection(&target_collection, dims)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        let mut migrated = 0usize;
        let mut offset: Option<String> = None;

        loop {
            let page = vector_backend
                .scroll(source_collection, None, batch_size.max(1), offset.clone())
                .await
                .map_err(|e| RagError::VectorStore(e.to_string()))?;

            if page.hits.is_empty() {
                break;
            }

            let texts: Vec<String> = page.hits.iter().map(|h| h.text.clone()).collect();
            let vectors = provider
                .embed_batch(&texts, InputType::Document)
                .await?;

            for (hit, vector) in page.hits.iter().zip(vectors) {
                let mut chunk = hit_to_chunk(hit);
                chunk
                    .metadata
                    .extra
                    .insert("migrated_from".to_string(), source_collection.to_string());
                vector_backend
                    .upsert(&target_collection, &chunk, &vector)
                    .await
                    .map_err(|e| RagError::VectorStore(e.to_string()))?;
                migrated += 1;
                if let Some(limit) = limit {
                    if migrated >= limit {
                        tracing::info!(migrated, source_collection, "migration limit reached");
                        return Ok(migrated);
                    }
                }
            }

            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        tracing::info!(
            migrated,
            source_collection,
            target = %target_collection,
            "collection migration complete"
        );
        Ok(migrated)
    }
}

/// Rebuild an ingestable chunk from a scrolled hit
fn hit_to_chunk(hit: &lexrag_core::Hit) -> Chunk {
    use lexrag_core::{ChunkMetadata, Scope};

    let tenant = hit.metadata_str("tenant_id").unwrap_or_default().to_string();
    let scope = match hit.metadata_str("scope") {
        Some("private") => Scope::Private { tenant_id: tenant },
        Some("group") => Scope::Group {
            tenant_id: tenant,
            group_ids: hit
                .metadata
                .get("group_ids")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        },
        Some("local") => Scope::Local {
            tenant_id: tenant,
            case_id: hit.metadata_str("case_id").unwrap_or_default().to_string(),
        },
        _ => Scope::Global,
    };

    let mut metadata = ChunkMetadata::new(scope);
    metadata.jurisdiction = hit.metadata_str("jurisdiction").map(str::to_string);
    metadata.source_id = hit.metadata_str("source_id").map(str::to_string);

    Chunk {
        id: hit.chunk_id.clone(),
        text: hit.text.clone(),
        position: hit.position.unwrap_or(0),
        doc_id: hit.doc_id.clone().unwrap_or_default(),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexrag_llm::{GenerationResult, LlmError, Message};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn router() -> EmbeddingRouter {
        EmbeddingRouter::new(
            RouterConfig::default(),
            Arc::new(RagSettings::from_env_with(|_| None)),
            Arc::new(ProviderRegistry::new()),
        )
    }

    struct StubLlm {
        response: String,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmBackend for StubLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerationResult {
                text: self.response.clone(),
                total_time_ms: 1,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn test_br_constitutional_query_routes_heuristically() {
        let route = router()
            .route("Art. 37, §6º da CF e o recurso extraordinário no STF", None, None)
            .await
            .unwrap();
        assert_eq!(route.decision.jurisdiction, Jurisdiction::Br);
        assert_eq!(route.decision.method, RouteMethod::Heuristic);
        assert_eq!(route.collection, "legal_br_v4");
        assert_eq!(route.provider, ProviderName::VoyageV4);
        assert_eq!(route.dimensions, 1024);
    }

    #[tokio::test]
    async fn test_cnj_number_is_strong_br_signal() {
        let r = router();
        let (juris, conf) = r.detect_jurisdiction("processo 0001234-56.2023.8.26.0100", "unknown");
        assert_eq!(juris, Jurisdiction::Br);
        assert!(conf > 0.5);
    }

    #[tokio::test]
    async fn test_usc_citation_routes_to_international() {
        let route = router()
            .route(
                "Requirements for a claim under 42 U.S.C. § 1983 in federal court",
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(route.decision.jurisdiction, Jurisdiction::Us);
        assert_eq!(route.decision.method, RouteMethod::Heuristic);
        assert_eq!(route.collection, "legal_international");
        assert_eq!(route.provider, ProviderName::Kanon2);
    }

    #[tokio::test]
    async fn test_eu_regulation_pattern() {
        let r = router();
        let (juris, _) = r.detect_jurisdiction(
            "Data processing under Regulation (EU) 2016/679 and the EDPB guidelines",
            "en",
        );
        assert_eq!(juris, Jurisdiction::Eu);
    }

    #[tokio::test]
    async fn test_us_uk_tie_resolves_to_int() {
        let r = router();
        let text = "The supreme court weighed due process while the high court \
                    applied common law equity on certiorari";
        let (juris, _) = r.detect_jurisdiction(text, "en");
        assert_eq!(juris, Jurisdiction::Int);
    }

    #[tokio::test]
    async fn test_ambiguous_query_uses_llm_and_caches() {
        let llm = Arc::new(StubLlm {
            response: "JURISDICTION: INT\nDOCUMENT_TYPE: general\nLANGUAGE: en\n\
                       CONFIDENCE: 0.85\nREASON: comparative question"
                .into(),
            calls: AtomicU32::new(0),
        });
        let r = router().with_llm(Arc::clone(&llm) as Arc<dyn LlmBackend>);

        let first = r.route("due process", None, None).await.unwrap();
        assert_eq!(first.decision.method, RouteMethod::Llm);
        assert_eq!(first.decision.jurisdiction, Jurisdiction::Int);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

        let second = r.route("due process", None, None).await.unwrap();
        assert_eq!(second.decision.method, RouteMethod::Llm);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1, "second call must hit the cache");
        assert!(r.usage().cache_hits >= 1);
    }

    #[tokio::test]
    async fn test_fallback_without_llm() {
        let route = router().route("due process", None, None).await.unwrap();
        assert_eq!(route.decision.method, RouteMethod::Fallback);
    }

    #[tokio::test]
    async fn test_fallback_error_when_llm_fails() {
        struct FailingLlm;
        #[async_trait]
        impl LlmBackend for FailingLlm {
            async fn generate(&self, _m: &[Message]) -> Result<GenerationResult, LlmError> {
                Err(LlmError::EmptyResponse)
            }
            async fn is_available(&self) -> bool {
                false
            }
            fn model_name(&self) -> &str {
                "failing"
            }
        }

        let r = router().with_llm(Arc::new(FailingLlm));
        let route = r.route("due process", None, None).await.unwrap();
        assert_eq!(route.decision.method, RouteMethod::FallbackError);
    }

    #[tokio::test]
    async fn test_user_hint_short_circuits() {
        let route = router()
            .route("short text", Some("EU"), Some("de"))
            .await
            .unwrap();
        assert_eq!(route.decision.method, RouteMethod::UserHint);
        assert_eq!(route.decision.jurisdiction, Jurisdiction::Eu);
        assert_eq!(route.decision.language, "de");
        assert_eq!(route.decision.confidence, 1.0);
        assert_eq!(route.collection, "legal_eu");
    }

    #[tokio::test]
    async fn test_mismatched_override_is_rejected() {
        let settings = RagSettings::from_env_with(|key| match key {
            // OpenAI emits 3072d, legal_br_v4 stores 1024d
            "RAG_ROUTER_BR_PROVIDER" => Some("openai".to_string()),
            _ => None,
        });
        let r = EmbeddingRouter::new(
            RouterConfig::default(),
            Arc::new(settings),
            Arc::new(ProviderRegistry::new()),
        );
        let err = r.route("texto", Some("BR"), None).await;
        assert!(matches!(err, Err(RagError::Routing(_))));
    }

    #[tokio::test]
    async fn test_skip_rag_policy() {
        let r = router();
        let small = r.route("Art. 5º da CF", Some("BR"), None).await.unwrap();
        assert!(small.decision.skip_rag);

        let huge = "palavra ".repeat(60_000);
        let big = r.route(&huge, Some("BR"), None).await.unwrap();
        assert!(!big.decision.skip_rag, "estimated pages should disable skip_rag");
    }

    #[tokio::test]
    async fn test_document_type_detection() {
        let r = router();
        assert_eq!(
            r.detect_document_type("Art. 5º desta lei nº 8.112, § 2º"),
            DocumentType::Legislation
        );
        assert_eq!(
            r.detect_document_type("EMENTA: acórdão do tribunal, voto do relator"),
            DocumentType::Jurisprudence
        );
        assert_eq!(
            r.detect_document_type("cláusula primeira: a contratante hereby agrees"),
            DocumentType::Contract
        );
        assert_eq!(
            r.detect_document_type("Excelentíssimo Senhor Doutor Juiz, a requerente expõe"),
            DocumentType::Pleading
        );
        assert_eq!(r.detect_document_type("bom dia"), DocumentType::General);
    }

    #[tokio::test]
    async fn test_usage_counters_accumulate() {
        let r = router();
        r.route("Art. 37 da CF e súmula vinculante", None, None)
            .await
            .unwrap();
        r.route("texto", Some("EU"), None).await.unwrap();
        let usage = r.usage();
        assert_eq!(usage.total_routes, 2);
        assert_eq!(usage.by_method.get("heuristic"), Some(&1));
        assert_eq!(usage.by_method.get("userhint"), Some(&1));
        assert_eq!(usage.by_jurisdiction.get("EU"), Some(&1));
    }

    #[test]
    fn test_language_detection() {
        let r = router();
        let (pt, _) = r.detect_language("o tribunal julgou que a lei para o recurso não se aplica");
        assert_eq!(pt, "pt");
        let (en, _) = r.detect_language("the court held that the law shall not apply in that case");
        assert_eq!(en, "en");
    }
}
