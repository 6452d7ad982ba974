//! Facts describing the guest engine itself

use hostfacts_core::{Collection, FactError, Resolver, Value};
use tracing::warn;

use crate::api::{GuestApi, GuestRef};
use crate::call::Scope;
use crate::error::GuestError;

/// Resolves `rubyversion`, `rubyplatform` and `rubysitedir` from the running engine
#[derive(Debug)]
pub struct EngineResolver {
    api: &'static GuestApi,
}

impl EngineResolver {
    /// Create a resolver over an initialized engine
    #[must_use]
    pub fn new(api: &'static GuestApi) -> Self {
        Self { api }
    }

    /// Read a string constant; `None` when it is not defined
    fn constant(scope: &Scope<'_>, names: &[&str]) -> Result<Option<String>, GuestError> {
        match scope.lookup(names) {
            Ok(value) => Self::text(scope, value),
            Err(GuestError::Lookup { name, message }) => {
                warn!(constant = %name, error = %message, "guest constant not available");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn sitedir(scope: &Scope<'_>) -> Result<Option<String>, GuestError> {
        let config = match scope.lookup(&["RbConfig", "CONFIG"]) {
            Ok(config) => config,
            Err(GuestError::Lookup { name, message }) => {
                warn!(constant = %name, error = %message, "guest configuration not available");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let value = scope.hash_lookup(config, scope.string("sitelibdir"))?;
        Self::text(scope, value)
    }

    fn text(scope: &Scope<'_>, value: GuestRef<'_>) -> Result<Option<String>, GuestError> {
        if scope.is_nil(value) {
            return Ok(None);
        }
        scope.try_to_string(value).map(Some)
    }
}

impl Resolver for EngineResolver {
    fn name(&self) -> &str {
        "ruby"
    }

    fn names(&self) -> Vec<String> {
        vec![
            "rubyversion".to_string(),
            "rubyplatform".to_string(),
            "rubysitedir".to_string(),
        ]
    }

    fn resolve(&mut self, facts: &mut Collection) -> Result<(), FactError> {
        let failed = |e: GuestError| FactError::resolution(self.name(), e.to_string());

        let (version, platform, sitedir) = self
            .api
            .protect(|scope| -> Result<_, GuestError> {
                // Creates a guest string directly, so it runs before native text is held
                let sitedir = Self::sitedir(scope)?;
                let version = Self::constant(scope, &["RUBY_VERSION"])?;
                let platform = Self::constant(scope, &["RUBY_PLATFORM"])?;
                Ok((version, platform, sitedir))
            })
            .and_then(|read| read)
            .map_err(failed)?;

        facts.add("rubyversion", version.map(Value::from))?;
        facts.add("rubyplatform", platform.map(Value::from))?;
        facts.add("rubysitedir", sitedir.map(Value::from))
    }
}
