//! Resolver contract

use regex::Regex;

use crate::collection::Collection;
use crate::error::FactError;

/// Stable identifier of a resolver registered in a [`Collection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolverId(pub(crate) u64);

/// A producer of facts
///
/// A collection runs `resolve` at most once per registered resolver: the
/// resolver is taken out of the registry before it runs, so it can freely
/// call back into the collection.
pub trait Resolver {
    /// Human-readable resolver name, used in logs and errors
    fn name(&self) -> &str;

    /// Fact names this resolver produces directly
    fn names(&self) -> Vec<String>;

    /// Whether this resolver also answers for names matched by [`Resolver::is_match`]
    fn has_patterns(&self) -> bool {
        false
    }

    /// Check whether an unlisted fact name is produced by this resolver
    fn is_match(&self, _name: &str) -> bool {
        false
    }

    /// Produce facts into the collection
    ///
    /// # Errors
    /// Returns an error if the facts cannot be resolved.
    fn resolve(&mut self, facts: &mut Collection) -> Result<(), FactError>;
}

/// A set of regular expressions over fact names
#[derive(Debug, Clone, Default)]
pub struct Patterns {
    regexes: Vec<Regex>,
}

impl Patterns {
    /// Compile the given patterns
    ///
    /// # Errors
    /// Returns `FactError::InvalidPattern` if a pattern does not compile.
    pub fn new<I, S>(patterns: I) -> Result<Self, FactError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let regexes = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { regexes })
    }

    /// Whether there are any patterns at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty()
    }

    /// Check whether any pattern matches the name
    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        self.regexes.iter().any(|r| r.is_match(name))
    }
}
