//! Text-generation provider used by handlers.
//!
//! Handlers only see the [`TextGenerator`] trait; [`AnthropicClient`] is the
//! production implementation and tests plug in scripted fakes.

mod anthropic;
mod error;
mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use anthropic::AnthropicClient;
pub use error::TextGenError;

/// A generated reply and the tokens it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub tokens: u64,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation, TextGenError>;
}

/// Generates and parses a JSON object reply, returning it with the tokens
/// spent. On parse failure the raw reply is kept in
/// [`TextGenError::InvalidJson`].
pub async fn generate_json(generator: &dyn TextGenerator, prompt: &str) -> Result<(Value, u64), TextGenError> {
    let Generation { text: raw, tokens } = generator.generate(prompt).await?;
    match first_json::<Value>(&raw, '{') {
        Some(value @ Value::Object(_)) => Ok((value, tokens)),
        _ => Err(TextGenError::InvalidJson {
            reason: "reply contains no JSON object".to_string(),
            raw,
        }),
    }
}

/// First JSON array embedded in free text, e.g. a "next jobs" list inside a
/// markdown answer.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    match first_json::<Value>(text, '[')? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

/// Tries every `open` position in turn and returns the first value that
/// parses from there. Trailing text after the value is ignored.
fn first_json<T: serde::de::DeserializeOwned>(text: &str, open: char) -> Option<T> {
    text.match_indices(open).find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<T>()
            .next()
            .and_then(Result::ok)
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Tokens reported for every scripted reply.
    pub const SCRIPTED_TOKENS: u64 = 42;

    /// Replays canned replies and records prompts.
    pub struct ScriptedGenerator {
        replies: Mutex<Vec<Result<String, String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn ok(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }

        pub fn failing(message: &str) -> Self {
            Self::new(vec![Err(message.to_string())])
        }

        pub fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<Generation, TextGenError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies.first().cloned().unwrap_or(Err("no reply scripted".into()))
            };
            reply
                .map(|text| Generation {
                    text,
                    tokens: SCRIPTED_TOKENS,
                })
                .map_err(|message| TextGenError::Api { status: 500, message })
        }
    }
}
