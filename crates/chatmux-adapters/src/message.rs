//! Message: the provider-agnostic request envelope.
//!
//! A [`ModelRequest`] holds an ordered conversation plus generation
//! parameters. Adapters translate it into their provider's wire format.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderId;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Content attached to a message alongside its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum Attachment {
    /// An image, base64-encoded.
    Image { mime_type: String, data: String },
    /// A text document whose content is inlined into the prompt.
    File { name: String, content: String },
}

impl Attachment {
    /// Encode raw image bytes.
    pub fn image(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Attachment::Image {
            mime_type: mime_type.into(),
            data: BASE64.encode(bytes),
        }
    }

    pub fn file(name: impl Into<String>, content: impl Into<String>) -> Self {
        Attachment::File {
            name: name.into(),
            content: content.into(),
        }
    }

    /// `data:` URL for image attachments.
    pub fn data_url(&self) -> Option<String> {
        match self {
            Attachment::Image { mime_type, data } => Some(format!("data:{mime_type};base64,{data}")),
            Attachment::File { .. } => None,
        }
    }
}

/// A single turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Image attachments only.
    pub fn images(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments
            .iter()
            .filter(|a| matches!(a, Attachment::Image { .. }))
    }

    /// Message text with any file attachments appended inline.
    pub fn text_with_files(&self) -> String {
        let mut text = self.content.clone();
        for attachment in &self.attachments {
            if let Attachment::File { name, content } = attachment {
                text.push_str(&format!("\n\n--- {name} ---\n{content}"));
            }
        }
        text
    }
}

/// A provider-agnostic chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    /// Target model id (e.g. `gpt-4o`).
    pub model: String,

    /// Ordered conversation.
    pub messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

impl ModelRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    /// All system messages joined, for providers that take the system
    /// prompt out of band.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// User and assistant turns, in order.
    pub fn conversation(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Reject requests no provider would accept.
    pub fn validate(&self, provider: ProviderId) -> ProviderResult<()> {
        if self.model.trim().is_empty() {
            return Err(ProviderError::validation(provider, "model id is empty"));
        }
        if self.conversation().next().is_none() {
            return Err(ProviderError::validation(
                provider,
                "request contains no user or assistant messages",
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ProviderError::validation(
                    provider,
                    format!("temperature {t} is outside 0.0..=2.0"),
                ));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(ProviderError::validation(
                    provider,
                    format!("top_p {p} is outside 0.0..=1.0"),
                ));
            }
        }
        for (name, value) in [
            ("frequency_penalty", self.frequency_penalty),
            ("presence_penalty", self.presence_penalty),
        ] {
            if let Some(v) = value {
                if !(-2.0..=2.0).contains(&v) {
                    return Err(ProviderError::validation(
                        provider,
                        format!("{name} {v} is outside -2.0..=2.0"),
                    ));
                }
            }
        }
        if self.max_tokens == Some(0) {
            return Err(ProviderError::validation(provider, "max_tokens must be positive"));
        }
        Ok(())
    }
}
