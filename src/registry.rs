use crate::batch::{BatchJob, DEFAULT_RETRY_LIMIT};
use crate::errors::HandlerError;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased handler invocation: context plus raw payload in, result out.
pub type RunFn<Context> =
    dyn Fn(Context, Value) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync;

struct Registration<Context> {
    run: Arc<RunFn<Context>>,
    retry_limit: i32,
}

impl<Context> Clone for Registration<Context> {
    fn clone(&self) -> Self {
        Self {
            run: self.run.clone(),
            retry_limit: self.retry_limit,
        }
    }
}

/// Maps `batch_type` tags to handler implementations.
///
/// Handlers are opaque to the engine: they receive the batch payload and
/// may enqueue child batches, but they never touch batch status. Aliases
/// let several tags share one handler, and an unknown tag resolves to a
/// handler name identical to itself, so operators can register new kinds
/// without touching the dispatcher.
pub struct HandlerRegistry<Context> {
    handlers: HashMap<String, Registration<Context>>,
    aliases: HashMap<String, String>,
}

impl<Context> Default for HandlerRegistry<Context> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            aliases: HashMap::new(),
        }
    }
}

impl<Context> Clone for HandlerRegistry<Context> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            aliases: self.aliases.clone(),
        }
    }
}

impl<Context: Clone + Send + 'static> HandlerRegistry<Context> {
    /// Register a batch job type with this registry.
    pub fn register<J: BatchJob<Context = Context>>(&mut self) {
        let registration = Registration {
            run: Arc::new(|ctx, payload| runnable::<J>(ctx, payload)),
            retry_limit: J::RETRY_LIMIT,
        };

        self.handlers.insert(J::BATCH_TYPE.to_string(), registration);
    }

    /// Register `alias` as another tag resolving to `target`'s handler.
    pub fn alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(alias.to_string(), target.to_string());
    }

    /// Resolve a tag through the alias table. Unknown tags resolve to
    /// themselves.
    pub fn resolve<'a>(&'a self, batch_type: &'a str) -> &'a str {
        self.aliases
            .get(batch_type)
            .map(String::as_str)
            .unwrap_or(batch_type)
    }

    /// Look up the run function for a tag, following aliases.
    pub fn get(&self, batch_type: &str) -> Option<Arc<RunFn<Context>>> {
        self.handlers
            .get(self.resolve(batch_type))
            .map(|registration| registration.run.clone())
    }

    /// Retry limit for a tag, following aliases; unregistered tags get the
    /// default.
    pub fn retry_limit(&self, batch_type: &str) -> i32 {
        self.handlers
            .get(self.resolve(batch_type))
            .map(|registration| registration.retry_limit)
            .unwrap_or(DEFAULT_RETRY_LIMIT)
    }

    /// All registered batch types.
    pub fn batch_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

fn runnable<J: BatchJob>(
    ctx: J::Context,
    payload: Value,
) -> BoxFuture<'static, Result<(), HandlerError>> {
    async move {
        let job: J = serde_json::from_value(payload).map_err(|e| {
            HandlerError::Permanent(format!("invalid {} payload: {e}", J::BATCH_TYPE).into())
        })?;
        job.run(ctx).await
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct PageJob;

    impl BatchJob for PageJob {
        const BATCH_TYPE: &'static str = "album_page";
        const RETRY_LIMIT: i32 = 5;
        type Context = ();

        async fn run(&self, _ctx: Self::Context) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn registry() -> HandlerRegistry<()> {
        let mut registry = HandlerRegistry::default();
        registry.register::<PageJob>();
        registry.alias("album_discovery", "album_page");
        registry
    }

    #[test]
    fn aliases_resolve_to_their_target() {
        let registry = registry();
        assert_eq!(registry.resolve("album_discovery"), "album_page");
        assert!(registry.get("album_discovery").is_some());
        assert_eq!(registry.retry_limit("album_discovery"), 5);
    }

    #[test]
    fn unknown_types_resolve_to_themselves() {
        let registry = registry();
        assert_eq!(registry.resolve("brand_new_kind"), "brand_new_kind");
        assert!(registry.get("brand_new_kind").is_none());
        assert_eq!(registry.retry_limit("brand_new_kind"), DEFAULT_RETRY_LIMIT);
    }

    #[tokio::test]
    async fn malformed_payloads_are_permanent_failures() {
        let registry = registry();
        let run = registry.get("album_page").unwrap();
        let result = run((), serde_json::json!(["not", "a", "page"])).await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));
    }
}
