//! Knowledge-base query port (spec.md §1): out of scope beyond its
//! interface — only the query contract is implemented here, not a search
//! backend.

use async_trait::async_trait;

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Best-effort lookup; `None` means no match or the backend is absent.
    async fn query(&self, text: &str) -> Option<String>;
}

/// The default, always-absent backend. Orchestrators that don't plug in a
/// real knowledge-base hold this.
pub struct NullKnowledgeBase;

#[async_trait]
impl KnowledgeBase for NullKnowledgeBase {
    async fn query(&self, _text: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_backend_always_misses() {
        let kb = NullKnowledgeBase;
        assert_eq!(kb.query("anything").await, None);
    }
}
