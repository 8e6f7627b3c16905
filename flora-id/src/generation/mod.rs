//! Response generation through an ordered provider fallback chain
//!
//! Remote providers are tried in configured order, each under its own
//! timeout. An error, a timeout or an empty answer moves on to the next
//! one. The offline [`TemplateGenerator`] always closes the chain, so
//! [`GenerationChain::generate`] has no failure path.

pub mod openai;
pub mod prompt;
pub mod template;

pub use openai::OpenAiCompatibleGenerator;
pub use prompt::{build_prompt, classify_intent, GenerationContext, Intent, Prompt};
pub use template::TemplateGenerator;

use crate::error::PipelineError;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remote natural-language provider
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Generate an answer; an empty string counts as failure
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Final answer and the provider that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedResponse {
    pub text: String,
    pub provider: String,
}

impl GeneratedResponse {
    /// Produced by the offline template generator
    pub fn is_template(&self) -> bool {
        self.provider == crate::config::TEMPLATE_PROVIDER
    }
}

pub struct GenerationChain {
    remote: Vec<(Arc<dyn TextGenerator>, Duration)>,
    template: TemplateGenerator,
}

impl Default for GenerationChain {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationChain {
    /// Chain holding only the template generator
    pub fn new() -> Self {
        Self {
            remote: Vec::new(),
            template: TemplateGenerator,
        }
    }

    /// Append a remote provider ahead of the template
    pub fn with_provider(mut self, generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        self.remote.push((generator, timeout));
        self
    }

    /// Provider names in the order they are tried
    pub fn provider_names(&self) -> Vec<String> {
        self.remote
            .iter()
            .map(|(g, _)| g.name().to_string())
            .chain(std::iter::once(self.template.name().to_string()))
            .collect()
    }

    /// Run the chain; always returns a non-empty answer
    pub async fn generate(&self, context: &GenerationContext) -> GeneratedResponse {
        if !self.remote.is_empty() {
            let prompt = build_prompt(context);
            for (generator, timeout) in &self.remote {
                match self.try_provider(generator.as_ref(), *timeout, &prompt).await {
                    Ok(text) => {
                        info!(provider = %generator.name(), chars = text.len(), "Response generated");
                        return GeneratedResponse {
                            text,
                            provider: generator.name().to_string(),
                        };
                    }
                    Err(e) => warn!("{}", e),
                }
            }
        }

        debug!("Falling back to template response");
        GeneratedResponse {
            text: self.template.render(context),
            provider: self.template.name().to_string(),
        }
    }

    async fn try_provider(
        &self,
        generator: &dyn TextGenerator,
        timeout: Duration,
        prompt: &Prompt,
    ) -> Result<String, PipelineError> {
        let failure = |reason: String| PipelineError::GenerationProvider {
            provider: generator.name().to_string(),
            reason,
        };
        match tokio::time::timeout(timeout, generator.generate(prompt)).await {
            Err(_) => Err(failure(format!("timed out after {} ms", timeout.as_millis()))),
            Ok(Err(e)) => Err(failure(format!("{:#}", e))),
            Ok(Ok(text)) if text.trim().is_empty() => Err(failure("empty response".to_string())),
            Ok(Ok(text)) => Ok(text),
        }
    }
}
