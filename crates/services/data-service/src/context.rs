//! Per-request context: acting identity and translator.

use std::fmt;
use std::sync::Arc;

use common::{DefaultTranslator, Translator, Vars};
use domain::Actor;

/// Request-scoped values threaded explicitly through options.
#[derive(Clone)]
pub struct RequestContext {
    pub actor: Option<Actor>,
    translator: Arc<dyn Translator>,
}

impl RequestContext {
    /// Anonymous context with the given translator
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self {
            actor: None,
            translator,
        }
    }

    /// Anonymous context with the default English catalog
    pub fn anonymous() -> Self {
        Self::new(Arc::new(DefaultTranslator))
    }

    /// Default-catalog context acting as `actor`
    pub fn for_actor(actor: Actor) -> Self {
        Self::anonymous().with_actor(actor)
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    /// Translate a message key
    pub fn t(&self, key: &str, vars: &Vars) -> String {
        self.translator.t(key, vars)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

/// Translate with the context's translator, or the default catalog without one
pub(crate) fn translate(ctx: Option<&RequestContext>, key: &str, vars: &Vars) -> String {
    match ctx {
        Some(ctx) => ctx.t(key, vars),
        None => DefaultTranslator.t(key, vars),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::i18n::MSG_NOT_FOUND;
    use common::MockTranslator;

    #[test]
    fn test_translate_without_context_uses_default_catalog() {
        let vars = common::i18n::vars([("entity", "Tag".to_string())]);
        assert_eq!(translate(None, MSG_NOT_FOUND, &vars), "Tag not found");
    }

    #[test]
    fn test_context_translator_is_used() {
        let mut mock = MockTranslator::new();
        mock.expect_t()
            .times(1)
            .returning(|_, _| "introuvable".to_string());

        let ctx = RequestContext::new(Arc::new(mock));
        assert_eq!(translate(Some(&ctx), MSG_NOT_FOUND, &Vars::new()), "introuvable");
    }
}
