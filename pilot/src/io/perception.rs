//! Screen capture plus vision-model analysis.

use async_trait::async_trait;
use minijinja::context;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::PerceptionError;
use crate::io::llm::{ChatClient, ChatMessage, parse_json_reply};
use crate::io::prompt::{self, PromptLibrary};

/// PNG-encoded image of the target window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub png: Vec<u8>,
}

impl Screenshot {
    pub fn new(png: Vec<u8>) -> Self {
        Self { png }
    }
}

/// Raw pixel source.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    async fn capture(&self) -> Result<Screenshot, PerceptionError>;
}

/// The perception oracle consumed by step handlers.
#[async_trait]
pub trait Perception: Send + Sync {
    async fn capture(&self) -> Result<Screenshot, PerceptionError>;

    /// Ask the oracle about `screenshot`.
    ///
    /// With no `override_prompt` the default perceive-and-reason prompt is
    /// used with `instruction` substituted; otherwise the override is sent as
    /// is and `instruction` is ignored.
    async fn analyze(
        &self,
        screenshot: &Screenshot,
        instruction: &str,
        override_prompt: Option<&str>,
    ) -> Result<Value, PerceptionError>;
}

#[async_trait]
impl<T: Perception + ?Sized> Perception for Box<T> {
    async fn capture(&self) -> Result<Screenshot, PerceptionError> {
        (**self).capture().await
    }

    async fn analyze(
        &self,
        screenshot: &Screenshot,
        instruction: &str,
        override_prompt: Option<&str>,
    ) -> Result<Value, PerceptionError> {
        (**self).analyze(screenshot, instruction, override_prompt).await
    }
}

#[async_trait]
impl<T: ScreenSource + ?Sized> ScreenSource for Box<T> {
    async fn capture(&self) -> Result<Screenshot, PerceptionError> {
        (**self).capture().await
    }
}

/// [`Perception`] backed by a screen source and a vision chat model.
pub struct VisionPerception<S> {
    source: S,
    client: ChatClient,
    prompts: PromptLibrary,
}

impl<S: ScreenSource> VisionPerception<S> {
    pub fn new(source: S, client: ChatClient, prompts: PromptLibrary) -> Self {
        Self {
            source,
            client,
            prompts,
        }
    }
}

#[async_trait]
impl<S: ScreenSource> Perception for VisionPerception<S> {
    async fn capture(&self) -> Result<Screenshot, PerceptionError> {
        self.source.capture().await
    }

    #[instrument(skip_all, fields(image_bytes = screenshot.png.len(), custom = override_prompt.is_some()))]
    async fn analyze(
        &self,
        screenshot: &Screenshot,
        instruction: &str,
        override_prompt: Option<&str>,
    ) -> Result<Value, PerceptionError> {
        let text = match override_prompt {
            Some(text) => text.to_string(),
            None => self
                .prompts
                .render(prompt::SYSTEM, context! { instruction })
                .map_err(|e| PerceptionError::Request(e.to_string()))?,
        };
        let message = ChatMessage::user_with_image(text, self.client.image_url(&screenshot.png));
        let reply = self
            .client
            .complete(&[message])
            .await
            .map_err(|e| PerceptionError::Request(e.to_string()))?;
        let value = parse_json_reply(&reply).map_err(PerceptionError::Parse)?;
        debug!(result = %value, "vision analysis");
        Ok(value)
    }
}
