//! Completion client abstraction and lazy, injectable resolution.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::chat::core::errors::ChatResult;

/// Boxed future type for completion operations.
pub type CompletionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stateless prompt-to-text function backed by an external model.
pub trait CompletionClient: Send + Sync {
    /// Generate a reply for `prompt`.
    ///
    /// # Errors
    /// Returns an error if the request fails or the response carries no text.
    fn generate(&self, prompt: &str) -> CompletionFuture<'_, ChatResult<String>>;

    /// Model name used in logs.
    fn model_name(&self) -> &str;
}

/// Produces a completion client on demand, at send time.
pub trait CompletionResolver: Send + Sync {
    /// Build (or hand out) a client.
    ///
    /// # Errors
    /// Returns `ChatError::MissingCredential` when no API key is available,
    /// or another error if the client cannot be constructed.
    fn resolve(&self) -> CompletionFuture<'_, ChatResult<Arc<dyn CompletionClient>>>;
}

/// Resolver that always hands out the same client.
#[derive(Clone)]
pub struct StaticResolver {
    client: Arc<dyn CompletionClient>,
}

impl StaticResolver {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

impl CompletionResolver for StaticResolver {
    fn resolve(&self) -> CompletionFuture<'_, ChatResult<Arc<dyn CompletionClient>>> {
        let client = Arc::clone(&self.client);
        Box::pin(async move { Ok(client) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl CompletionClient for Echo {
        fn generate(&self, prompt: &str) -> CompletionFuture<'_, ChatResult<String>> {
            let prompt = prompt.to_string();
            Box::pin(async move { Ok(prompt) })
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_static_resolver_hands_out_client() {
        let resolver = StaticResolver::new(Arc::new(Echo));
        let client = resolver.resolve().await.expect("client");
        assert_eq!(client.model_name(), "echo");
        assert_eq!(client.generate("ping").await.expect("reply"), "ping");
    }
}
