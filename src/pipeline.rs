//! Per-request question answering.
//!
//! ```text
//! retrieve ──▶ no hits?            ── NoContent
//!    │
//! assemble ──▶ no provider?        ── UpstreamUnavailable (sources kept)
//!    │         context too short?  ── DegradedContext     (sources kept)
//!    ▼
//! generate ──▶ error?              ── GenerationFailed    (sources kept)
//!    │
//!    ▼
//! Answered
//! ```
//!
//! Every outcome carries a user-facing answer text; nothing here returns an
//! error to the caller. In streaming mode the sources line is always first,
//! and every outcome other than `Answered` becomes a single text line.
//!
//! A blank answer is a [`GenerationError::EmptyResponse`] in both modes. The
//! streaming path therefore waits for the first non-blank fragment before it
//! commits to [`AnswerStream::Live`], so a provider that fails up front is
//! reported as a settled outcome.

use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

use crate::config::SearchConfig;
use crate::context::ContextAssembler;
use crate::error::GenerationError;
use crate::index::DocumentIndex;
use crate::llm::{GenerationOptions, LanguageModel, Prompt, ProviderChain};
use crate::models::Source;
use crate::retriever::NamespaceRetriever;
use crate::stream::LineEvent;

pub const NO_CONTENT_ANSWER: &str =
    "Jeg har ikke indekseret indhold for dette website. Sørg for at siden er blevet importeret først.";

pub const UPSTREAM_UNAVAILABLE_ANSWER: &str =
    "AI-tjenesten er ikke konfigureret. Angiv GROQ_API_KEY, OPENAI_API_KEY eller ANTHROPIC_API_KEY i miljøvariablerne.";

pub const DEGRADED_CONTEXT_ANSWER: &str =
    "Jeg fandt relevante sider, men kunne ikke udlede nok indhold til at besvare dit spørgsmål. Prøv at importere hjemmesiden igen med en højere sidelimit.";

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub namespace: String,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Answered,
    NoContent,
    UpstreamUnavailable,
    DegradedContext,
    GenerationFailed(GenerationError),
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub outcome: Outcome,
}

impl Answer {
    fn fixed(answer: impl Into<String>, sources: Vec<Source>, outcome: Outcome) -> Self {
        Self {
            answer: answer.into(),
            sources,
            outcome,
        }
    }

    fn failed(error: GenerationError, sources: Vec<Source>) -> Self {
        Self {
            answer: error.user_message(),
            sources,
            outcome: Outcome::GenerationFailed(error),
        }
    }
}

/// Result of [`QueryPipeline::answer_stream`].
pub enum AnswerStream {
    /// The provider produced text; `events` starts with the sources line.
    Live {
        events: BoxStream<'static, LineEvent>,
    },
    /// Nothing will be generated; the answer is final.
    Settled(Answer),
}

impl AnswerStream {
    /// The settled outcome, or `None` while text is being generated.
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            AnswerStream::Live { .. } => None,
            AnswerStream::Settled(answer) => Some(&answer.outcome),
        }
    }

    /// Line-protocol events: sources first, then text.
    pub fn into_events(self) -> BoxStream<'static, LineEvent> {
        match self {
            AnswerStream::Live { events } => events,
            AnswerStream::Settled(answer) => stream::iter(vec![
                LineEvent::Sources(answer.sources),
                LineEvent::Text(answer.answer),
            ])
            .boxed(),
        }
    }
}

/// Retrieval and assembly done; either ready to generate or already settled.
enum Prepared {
    Ready {
        model: Arc<dyn LanguageModel>,
        prompt: Prompt,
        sources: Vec<Source>,
    },
    Settled(Answer),
}

pub struct QueryPipeline {
    retriever: NamespaceRetriever,
    assembler: ContextAssembler,
    providers: ProviderChain,
    options: GenerationOptions,
    min_context_length: usize,
}

impl QueryPipeline {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        providers: ProviderChain,
        search: &SearchConfig,
        options: GenerationOptions,
    ) -> Self {
        Self {
            retriever: NamespaceRetriever::new(index, search.max_results),
            assembler: ContextAssembler::new(search),
            providers,
            options,
            min_context_length: search.min_context_length,
        }
    }

    pub fn providers(&self) -> &ProviderChain {
        &self.providers
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    async fn prepare(&self, request: &QueryRequest) -> Prepared {
        let retrieval = self
            .retriever
            .retrieve(&request.query, &request.namespace)
            .await;
        tracing::debug!(
            namespace = %request.namespace,
            tier = ?retrieval.tier,
            hits = retrieval.hits.len(),
            "retrieval finished"
        );

        if retrieval.hits.is_empty() {
            return Prepared::Settled(Answer::fixed(NO_CONTENT_ANSWER, Vec::new(), Outcome::NoContent));
        }

        let assembled = self.assembler.assemble(&retrieval.hits);

        let Some(model) = self.providers.active() else {
            tracing::warn!(namespace = %request.namespace, "no language model provider configured");
            return Prepared::Settled(Answer::fixed(
                UPSTREAM_UNAVAILABLE_ANSWER,
                assembled.sources,
                Outcome::UpstreamUnavailable,
            ));
        };

        if assembled.is_degraded(self.min_context_length) {
            tracing::warn!(
                namespace = %request.namespace,
                docs = assembled.blocks.len(),
                "context too short"
            );
            return Prepared::Settled(Answer::fixed(
                DEGRADED_CONTEXT_ANSWER,
                assembled.sources,
                Outcome::DegradedContext,
            ));
        }

        Prepared::Ready {
            model,
            prompt: Prompt::grounded(&request.query, &assembled.context, self.options.clone()),
            sources: assembled.sources,
        }
    }

    /// Answer in one piece.
    pub async fn answer(&self, request: &QueryRequest) -> Answer {
        let (model, prompt, sources) = match self.prepare(request).await {
            Prepared::Settled(answer) => return answer,
            Prepared::Ready {
                model,
                prompt,
                sources,
            } => (model, prompt, sources),
        };

        let generated = model.generate(&prompt).await.and_then(|text| {
            if text.trim().is_empty() {
                Err(GenerationError::EmptyResponse {
                    provider: model.name().to_string(),
                })
            } else {
                Ok(text)
            }
        });

        match generated {
            Ok(text) => Answer::fixed(text, sources, Outcome::Answered),
            Err(e) => {
                tracing::error!(
                    namespace = %request.namespace,
                    provider = model.name(),
                    error = %e,
                    "generation failed"
                );
                Answer::failed(e, sources)
            }
        }
    }

    /// Answer as line-protocol events: sources first, then text.
    ///
    /// Leading blank fragments are held back until the first non-blank one
    /// and then sent together, so the concatenated text still equals the
    /// blocking answer. A provider error after that point is logged and ends
    /// the stream.
    pub async fn answer_stream(&self, request: &QueryRequest) -> AnswerStream {
        let (model, prompt, sources) = match self.prepare(request).await {
            Prepared::Settled(answer) => return AnswerStream::Settled(answer),
            Prepared::Ready {
                model,
                prompt,
                sources,
            } => (model, prompt, sources),
        };

        let failed = |e: GenerationError, sources: Vec<Source>| {
            tracing::error!(
                namespace = %request.namespace,
                provider = model.name(),
                error = %e,
                "generation failed"
            );
            AnswerStream::Settled(Answer::failed(e, sources))
        };

        let mut fragments = match model.generate_stream(&prompt).await {
            Ok(fragments) => fragments,
            Err(e) => return failed(e, sources),
        };

        let mut head = String::new();
        while head.trim().is_empty() {
            match fragments.next().await {
                Some(Ok(fragment)) => head.push_str(&fragment),
                Some(Err(e)) => return failed(e, sources),
                None => {
                    let e = GenerationError::EmptyResponse {
                        provider: model.name().to_string(),
                    };
                    return failed(e, sources);
                }
            }
        }

        let namespace = request.namespace.clone();
        let provider = model.name().to_string();
        let rest = fragments.scan((), move |_, item| {
            future::ready(match item {
                Ok(fragment) => Some(fragment),
                Err(e) => {
                    tracing::error!(
                        namespace = %namespace,
                        provider = %provider,
                        error = %e,
                        "stream interrupted"
                    );
                    None
                }
            })
        });

        let text = stream::once(future::ready(head))
            .chain(rest)
            .filter(|fragment| future::ready(!fragment.is_empty()))
            .map(LineEvent::Text);

        AnswerStream::Live {
            events: stream::once(future::ready(LineEvent::Sources(sources)))
                .chain(text)
                .boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::local::LocalIndex;
    use crate::llm::test_support::StaticModel;
    use crate::llm::FragmentStream;
    use crate::models::Document;
    use async_trait::async_trait;

    const NS: &str = "example-com-1700000000000";

    fn doc(id: &str, ns: &str, body: &str) -> Document {
        Document {
            id: id.to_string(),
            namespace: ns.to_string(),
            searchable_text: format!("namespace:{} Udlejning {}", ns, body),
            full_content: body.to_string(),
            url: format!("https://example.com/{}", id),
            title: "Udlejning".to_string(),
            description: "Boliger til leje".to_string(),
            crawl_date: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn depositum_index() -> Arc<dyn DocumentIndex> {
        Arc::new(LocalIndex::with_documents(vec![doc(
            "0",
            NS,
            "Depositum svarer til tre måneders husleje og betales inden indflytning. Forudbetalt leje er en måned.",
        )]))
    }

    fn pipeline(index: Arc<dyn DocumentIndex>, models: Vec<Arc<dyn LanguageModel>>) -> QueryPipeline {
        QueryPipeline::new(
            index,
            ProviderChain::new(models),
            &SearchConfig::default(),
            GenerationOptions::default(),
        )
    }

    fn request(query: &str, namespace: &str) -> QueryRequest {
        QueryRequest {
            query: query.to_string(),
            namespace: namespace.to_string(),
        }
    }

    fn answering() -> Arc<dyn LanguageModel> {
        Arc::new(StaticModel::answering(
            "groq",
            vec!["Depositum er ", "tre måneders ", "husleje."],
        ))
    }

    #[tokio::test]
    async fn test_depositum_answered_with_source() {
        let p = pipeline(depositum_index(), vec![answering()]);
        let answer = p.answer(&request("Hvad er depositum?", NS)).await;

        assert!(matches!(answer.outcome, Outcome::Answered));
        assert_eq!(answer.answer, "Depositum er tre måneders husleje.");
        assert!(answer
            .sources
            .iter()
            .any(|s| s.url == "https://example.com/0"));
    }

    #[tokio::test]
    async fn test_empty_namespace_has_no_content() {
        let p = pipeline(depositum_index(), vec![answering()]);
        let answer = p.answer(&request("Hvad som helst", "empty-ns")).await;

        assert!(matches!(answer.outcome, Outcome::NoContent));
        assert_eq!(answer.answer, NO_CONTENT_ANSWER);
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn test_no_provider_keeps_sources() {
        let p = pipeline(
            depositum_index(),
            vec![Arc::new(StaticModel::unavailable("openai"))],
        );
        let answer = p.answer(&request("Hvad er depositum?", NS)).await;

        assert!(matches!(answer.outcome, Outcome::UpstreamUnavailable));
        assert_eq!(answer.answer, UPSTREAM_UNAVAILABLE_ANSWER);
        assert_eq!(answer.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_short_context_is_degraded() {
        let index: Arc<dyn DocumentIndex> = Arc::new(LocalIndex::with_documents(vec![Document {
            id: "0".to_string(),
            namespace: NS.to_string(),
            searchable_text: format!("namespace:{}", NS),
            full_content: String::new(),
            url: "https://e.dk".to_string(),
            title: "x".to_string(),
            description: String::new(),
            crawl_date: String::new(),
        }]));
        let p = pipeline(index, vec![answering()]);
        let answer = p.answer(&request("Hvad er depositum?", NS)).await;

        assert!(matches!(answer.outcome, Outcome::DegradedContext));
        assert_eq!(answer.answer, DEGRADED_CONTEXT_ANSWER);
        assert_eq!(answer.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_becomes_answer_text() {
        let failing: Arc<dyn LanguageModel> = Arc::new(StaticModel::failing(
            "groq",
            GenerationError::RateLimited {
                provider: "groq".to_string(),
            },
        ));
        let p = pipeline(depositum_index(), vec![failing]);
        let answer = p.answer(&request("Hvad er depositum?", NS)).await;

        assert!(matches!(
            answer.outcome,
            Outcome::GenerationFailed(GenerationError::RateLimited { .. })
        ));
        assert_eq!(answer.answer, "Fejl: Groq API-rate limit er nået. Prøv igen senere.");
        assert_eq!(answer.sources.len(), 1);

        let events: Vec<LineEvent> = p
            .answer_stream(&request("Hvad er depositum?", NS))
            .await
            .into_events()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], LineEvent::Sources(s) if s.len() == 1));
        assert_eq!(events[1], LineEvent::Text(answer.answer));
    }

    #[tokio::test]
    async fn test_stream_concatenates_to_blocking_answer() {
        let p = pipeline(depositum_index(), vec![answering()]);
        let req = request("Hvad er depositum?", NS);

        let blocking = p.answer(&req).await;
        let events: Vec<LineEvent> = p.answer_stream(&req).await.into_events().collect().await;

        let source_lines = events
            .iter()
            .filter(|e| matches!(e, LineEvent::Sources(_)))
            .count();
        assert_eq!(source_lines, 1);
        assert_eq!(events[0], LineEvent::Sources(blocking.sources.clone()));

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                LineEvent::Text(t) => Some(t.as_str()),
                LineEvent::Sources(_) => None,
            })
            .collect();
        assert_eq!(text, blocking.answer);
    }

    #[tokio::test]
    async fn test_stream_no_content() {
        let p = pipeline(depositum_index(), vec![answering()]);
        let events: Vec<LineEvent> = p
            .answer_stream(&request("x", "empty-ns"))
            .await
            .into_events()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                LineEvent::Sources(vec![]),
                LineEvent::Text(NO_CONTENT_ANSWER.to_string())
            ]
        );
    }

    struct InterruptedModel;

    #[async_trait]
    impl LanguageModel for InterruptedModel {
        fn name(&self) -> &str {
            "openai"
        }

        fn model(&self) -> &str {
            "stub"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn generate(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
            Ok("Første del".to_string())
        }

        async fn generate_stream(&self, _prompt: &Prompt) -> Result<FragmentStream, GenerationError> {
            Ok(stream::iter(vec![
                Ok("Første del".to_string()),
                Err(GenerationError::Timeout {
                    provider: "openai".to_string(),
                }),
                Ok("aldrig".to_string()),
            ])
            .boxed())
        }
    }

    #[tokio::test]
    async fn test_mid_stream_error_ends_stream() {
        let p = pipeline(depositum_index(), vec![Arc::new(InterruptedModel)]);
        let events: Vec<LineEvent> = p
            .answer_stream(&request("Hvad er depositum?", NS))
            .await
            .into_events()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1], LineEvent::Text("Første del".to_string()));
    }

    #[tokio::test]
    async fn test_blank_answer_fails_in_both_modes() {
        let blank: Arc<dyn LanguageModel> = Arc::new(StaticModel::answering("groq", vec!["", "  "]));
        let p = pipeline(depositum_index(), vec![blank]);
        let req = request("Hvad er depositum?", NS);

        let blocking = p.answer(&req).await;
        assert!(matches!(
            blocking.outcome,
            Outcome::GenerationFailed(GenerationError::EmptyResponse { .. })
        ));

        let streamed = p.answer_stream(&req).await;
        assert!(matches!(
            streamed.outcome(),
            Some(Outcome::GenerationFailed(GenerationError::EmptyResponse { .. }))
        ));
        let events: Vec<LineEvent> = streamed.into_events().collect().await;
        assert_eq!(events[1], LineEvent::Text(blocking.answer));
    }

    #[tokio::test]
    async fn test_upfront_stream_failure_is_settled() {
        let failing: Arc<dyn LanguageModel> = Arc::new(StaticModel::failing(
            "groq",
            GenerationError::Auth {
                provider: "groq".to_string(),
                status: 401,
            },
        ));
        let p = pipeline(depositum_index(), vec![failing]);
        let streamed = p.answer_stream(&request("Hvad er depositum?", NS)).await;

        assert!(matches!(
            streamed.outcome(),
            Some(Outcome::GenerationFailed(GenerationError::Auth { status: 401, .. }))
        ));
    }

    #[tokio::test]
    async fn test_leading_blank_fragments_are_kept() {
        let model: Arc<dyn LanguageModel> =
            Arc::new(StaticModel::answering("groq", vec!["", "\n", "Tre ", "måneder."]));
        let p = pipeline(depositum_index(), vec![model]);
        let req = request("Hvad er depositum?", NS);

        let streamed = p.answer_stream(&req).await;
        assert!(streamed.outcome().is_none());
        let events: Vec<LineEvent> = streamed.into_events().collect().await;
        assert_eq!(
            &events[1..],
            &[
                LineEvent::Text("\nTre ".to_string()),
                LineEvent::Text("måneder.".to_string())
            ]
        );
        assert_eq!(p.answer(&req).await.answer, "\nTre måneder.");
    }
}
