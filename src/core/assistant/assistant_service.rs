// Completion boundary: the provider port, the failure taxonomy and the
// mapping from each failure class to a distinct user-facing fallback reply.
// Raw errors never reach the end user.

use async_trait::async_trait;
use thiserror::Error;

/// Failure classes at the completion boundary.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request timed out")]
    Timeout,

    #[error("completion connection failed: {0}")]
    Connection(String),

    #[error("completion returned status {0}")]
    BadStatus(u16),

    #[error("completion payload malformed: {0}")]
    Malformed(String),
}

impl CompletionError {
    /// Each failure class maps to its own fallback reply.
    pub fn fallback_reply(&self) -> &'static str {
        match self {
            CompletionError::Timeout => "The assistant took too long to answer. Try again later.",
            CompletionError::Connection(_) => {
                "Could not reach the assistant service. Try again later."
            }
            CompletionError::BadStatus(_) => {
                "The assistant service is having trouble right now. Try again later."
            }
            CompletionError::Malformed(_) => {
                "The assistant gave an unusable answer. Try again later."
            }
        }
    }
}

/// Port to the external completion API.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        session_key: &str,
        image_url: Option<&str>,
    ) -> Result<String, CompletionError>;
}

pub struct AssistantService<P: CompletionProvider> {
    provider: P,
    persona: String,
    max_reply_length: usize,
}

impl<P: CompletionProvider> AssistantService<P> {
    pub fn new(provider: P, persona: String, max_reply_length: usize) -> Self {
        Self {
            provider,
            persona,
            max_reply_length,
        }
    }

    /// Ask the assistant on behalf of a user. Never fails: errors are
    /// classified, logged and turned into their fallback reply.
    pub async fn reply(&self, text: &str, user_id: i64, image_url: Option<&str>) -> String {
        let session_key = format!("user_{user_id}");
        let prompt = format!("{}\n\n{}", self.persona, text);

        match self.provider.complete(&prompt, &session_key, image_url).await {
            Ok(answer) if answer.is_empty() => {
                tracing::warn!(user_id, "completion returned an empty answer");
                CompletionError::Malformed("empty answer".to_string()).fallback_reply().to_string()
            }
            Ok(mut answer) => {
                if answer.chars().count() > self.max_reply_length {
                    let truncated: String =
                        answer.chars().take(self.max_reply_length - 50).collect();
                    answer = format!("{truncated}... (reply truncated)");
                }
                answer
            }
            Err(err) => {
                tracing::error!(user_id, error = %err, "completion request failed");
                err.fallback_reply().to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        result: Result<String, CompletionError>,
    }

    #[async_trait]
    impl CompletionProvider for StubProvider {
        async fn complete(
            &self,
            _prompt: &str,
            _session_key: &str,
            _image_url: Option<&str>,
        ) -> Result<String, CompletionError> {
            match &self.result {
                Ok(text) => Ok(text.clone()),
                Err(CompletionError::Timeout) => Err(CompletionError::Timeout),
                Err(CompletionError::Connection(m)) => Err(CompletionError::Connection(m.clone())),
                Err(CompletionError::BadStatus(s)) => Err(CompletionError::BadStatus(*s)),
                Err(CompletionError::Malformed(m)) => Err(CompletionError::Malformed(m.clone())),
            }
        }
    }

    fn service(result: Result<String, CompletionError>) -> AssistantService<StubProvider> {
        AssistantService::new(StubProvider { result }, "persona".to_string(), 4000)
    }

    #[tokio::test]
    async fn successful_answer_passes_through() {
        let reply = service(Ok("hello!".to_string())).reply("hi", 42, None).await;
        assert_eq!(reply, "hello!");
    }

    #[tokio::test]
    async fn oversized_answer_is_truncated() {
        let reply = service(Ok("x".repeat(5000))).reply("hi", 42, None).await;
        assert!(reply.chars().count() <= 4000);
        assert!(reply.ends_with("(reply truncated)"));
    }

    #[tokio::test]
    async fn each_error_class_gets_its_own_fallback() {
        let timeout = service(Err(CompletionError::Timeout)).reply("hi", 1, None).await;
        let connection = service(Err(CompletionError::Connection("refused".into())))
            .reply("hi", 1, None)
            .await;
        let status = service(Err(CompletionError::BadStatus(503))).reply("hi", 1, None).await;
        let malformed = service(Err(CompletionError::Malformed("no field".into())))
            .reply("hi", 1, None)
            .await;

        let replies = [&timeout, &connection, &status, &malformed];
        for (i, a) in replies.iter().enumerate() {
            for b in replies.iter().skip(i + 1) {
                assert_ne!(a, b, "fallback replies must be distinct");
            }
        }
    }

    #[tokio::test]
    async fn empty_answer_falls_back() {
        let reply = service(Ok(String::new())).reply("hi", 42, None).await;
        assert_eq!(
            reply,
            CompletionError::Malformed(String::new()).fallback_reply()
        );
    }
}
