//! Lazily-resolved fact collection

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;

use tracing::{debug, instrument};

use crate::error::FactError;
use crate::format::{self, Format};
use crate::resolver::{Resolver, ResolverId};
use crate::resolvers::{MemoryResolver, PlatformResolver};
use crate::value::Value;

/// Prefix of environment variables that are turned into facts
pub const ENVIRONMENT_PREFIX: &str = "FACT_";

/// A registered resolver together with the index keys it was filed under
struct Registered {
    resolver: Box<dyn Resolver>,
    names: Vec<String>,
    pattern: bool,
}

/// A name → value store backed by a registry of pending resolvers
///
/// Resolvers are stored once, keyed by [`ResolverId`]; the name index and the
/// pattern list only hold identifiers. A resolver is taken out of every index
/// before it runs, so each one runs at most once.
#[derive(Default)]
pub struct Collection {
    /// Resolved facts
    facts: BTreeMap<String, Value>,
    /// Pending resolvers in registration order
    resolvers: BTreeMap<ResolverId, Registered>,
    /// Fact name to pending resolvers producing it
    by_name: HashMap<String, Vec<ResolverId>>,
    /// Pending resolvers that match names by pattern
    patterns: Vec<ResolverId>,
    next_id: u64,
}

impl Collection {
    /// Create an empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the version fact and register the built-in resolvers
    ///
    /// # Errors
    /// Returns an error if replacing an existing version fact fails to resolve.
    pub fn add_default_facts(&mut self) -> Result<(), FactError> {
        self.add("hostfactsversion", Value::from(env!("CARGO_PKG_VERSION")))?;
        self.add_resolver(Box::new(PlatformResolver::new()));
        self.add_resolver(Box::new(MemoryResolver::new()));
        Ok(())
    }

    /// Add facts from `FACT_<name>` environment variables
    ///
    /// The prefix is matched case-insensitively and the remaining name is
    /// lowercased. Environment facts replace any resolved value.
    ///
    /// # Errors
    /// Returns an error if a replaced fact fails to resolve.
    pub fn add_environment_facts(&mut self) -> Result<(), FactError> {
        self.add_environment_facts_from(std::env::vars())
    }

    pub(crate) fn add_environment_facts_from<I>(&mut self, vars: I) -> Result<(), FactError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(prefix) = key.get(..ENVIRONMENT_PREFIX.len()) else {
                continue;
            };
            if !prefix.eq_ignore_ascii_case(ENVIRONMENT_PREFIX) || key.len() == prefix.len() {
                continue;
            }
            let name = key[ENVIRONMENT_PREFIX.len()..].to_lowercase();
            debug!(fact = %name, variable = %key, "adding fact from environment");
            self.add(name, Value::from(value))?;
        }
        Ok(())
    }

    /// Register a resolver
    ///
    /// The resolver is filed under every name it produces and, if it declares
    /// patterns, in the pattern list.
    pub fn add_resolver(&mut self, resolver: Box<dyn Resolver>) -> ResolverId {
        let id = ResolverId(self.next_id);
        self.next_id += 1;

        let names = resolver.names();
        let pattern = resolver.has_patterns();

        for name in &names {
            self.by_name.entry(name.clone()).or_default().push(id);
        }
        if pattern {
            self.patterns.push(id);
        }

        debug!(resolver = resolver.name(), facts = ?names, pattern, "registered resolver");

        self.resolvers.insert(
            id,
            Registered {
                resolver,
                names,
                pattern,
            },
        );
        id
    }

    /// Unregister a resolver without running it
    pub fn remove_resolver(&mut self, id: ResolverId) -> Option<Box<dyn Resolver>> {
        let registered = self.resolvers.remove(&id)?;

        for name in &registered.names {
            if let Some(ids) = self.by_name.get_mut(name) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.by_name.remove(name);
                }
            }
        }
        if registered.pattern {
            self.patterns.retain(|other| *other != id);
        }

        Some(registered.resolver)
    }

    /// Add, replace or remove a fact
    ///
    /// A `None` value removes the fact if it exists. Any pending resolver for
    /// the name runs first so it cannot overwrite this value later.
    ///
    /// # Errors
    /// Returns an error if a pending resolver for the name fails.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Option<Value>>,
    ) -> Result<(), FactError> {
        let name = name.into();
        let value = value.into();

        let existed = match self.get_value(&name, true)? {
            Some(old) => {
                match &value {
                    Some(new) => {
                        debug!(fact = %name, old = %old.text(true), new = %new.text(true), "fact has changed");
                    }
                    None => {
                        debug!(fact = %name, old = %old.text(true), "fact resolved to nothing and will be removed");
                    }
                }
                true
            }
            None => {
                match &value {
                    Some(new) => debug!(fact = %name, value = %new.text(true), "fact resolved"),
                    None => debug!(fact = %name, "fact resolved to nothing and will not be added"),
                }
                false
            }
        };

        match value {
            Some(value) => {
                self.facts.insert(name, value);
            }
            None if existed => {
                self.facts.remove(&name);
            }
            None => {}
        }
        Ok(())
    }

    /// Remove a fact, resolving it first
    ///
    /// # Errors
    /// Returns an error if a pending resolver for the name fails.
    pub fn remove(&mut self, name: &str) -> Result<Option<Value>, FactError> {
        if self.get_value(name, true)?.is_none() {
            return Ok(None);
        }
        Ok(self.facts.remove(name))
    }

    /// Drop every fact and every pending resolver
    pub fn clear(&mut self) {
        self.facts.clear();
        self.resolvers.clear();
        self.by_name.clear();
        self.patterns.clear();
    }

    /// Whether there are no facts and nothing left to resolve
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.resolvers.is_empty()
    }

    /// Number of pending resolvers
    #[must_use]
    pub fn pending_resolvers(&self) -> usize {
        self.resolvers.len()
    }

    /// Number of facts once everything is resolved
    ///
    /// # Errors
    /// Returns an error if any resolver fails.
    pub fn size(&mut self) -> Result<usize, FactError> {
        self.resolve_all()?;
        Ok(self.facts.len())
    }

    /// Get a fact, resolving it on demand
    ///
    /// # Errors
    /// Returns an error if a resolver for the name fails.
    pub fn get(&mut self, name: &str) -> Result<Option<&Value>, FactError> {
        self.get_value(name, true)
    }

    /// Get a fact, optionally running the resolvers that produce it first
    ///
    /// With `resolve` set, every resolver filed under `name` runs, then every
    /// pattern resolver matching `name`.
    ///
    /// # Errors
    /// Returns an error if a resolver for the name fails.
    pub fn get_value(&mut self, name: &str, resolve: bool) -> Result<Option<&Value>, FactError> {
        if resolve {
            self.resolve_fact(name)?;
        }
        Ok(self.facts.get(name))
    }

    /// Run every pending resolver
    ///
    /// # Errors
    /// Returns the first resolver failure; resolvers after it stay pending.
    #[instrument(skip(self), fields(pending = self.resolvers.len()))]
    pub fn resolve_all(&mut self) -> Result<(), FactError> {
        while let Some(id) = self.resolvers.keys().next().copied() {
            self.run(id)?;
        }
        Ok(())
    }

    /// Narrow the collection to exactly the given names
    ///
    /// Each name is resolved; with `add_missing`, names that resolve to
    /// nothing are added as empty strings. Afterwards the resolver registry
    /// is discarded and the collection no longer resolves anything.
    ///
    /// # Errors
    /// Returns an error if a resolver for one of the names fails.
    #[instrument(skip(self, names))]
    pub fn filter<I, S>(&mut self, names: I, add_missing: bool) -> Result<(), FactError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();

        for name in &names {
            if self.get_value(name, true)?.is_none() && add_missing {
                debug!(fact = %name, "fact was requested but not resolved; adding empty string value");
                self.add(name.clone(), Value::from(""))?;
            }
        }

        let mut facts = std::mem::take(&mut self.facts);
        self.clear();
        self.facts = names
            .iter()
            .filter_map(|name| facts.remove_entry(name))
            .collect();

        Ok(())
    }

    /// Visit every fact in name order until the callback returns `false`
    ///
    /// # Errors
    /// Returns an error if any resolver fails.
    pub fn each<F>(&mut self, mut callback: F) -> Result<(), FactError>
    where
        F: FnMut(&str, &Value) -> bool,
    {
        self.resolve_all()?;

        for (name, value) in &self.facts {
            if !callback(name, value) {
                break;
            }
        }
        Ok(())
    }

    /// Resolve everything and write it in the given format
    ///
    /// # Errors
    /// Returns an error if any resolver fails or the output cannot be written.
    pub fn write<W: Write>(&mut self, out: &mut W, format: Format) -> Result<(), FactError> {
        self.resolve_all()?;

        match format {
            Format::Hash => format::hash::write(&self.facts, out),
            Format::Json => format::json::write(&self.facts, out),
            Format::Yaml => format::yaml::write(&self.facts, out),
        }
    }

    /// Run every resolver producing `name`, directly or by pattern
    fn resolve_fact(&mut self, name: &str) -> Result<(), FactError> {
        while let Some(id) = self.by_name.get(name).and_then(|ids| ids.first().copied()) {
            self.run(id)?;
        }

        while let Some(id) = self.patterns.iter().copied().find(|id| {
            self.resolvers
                .get(id)
                .is_some_and(|r| r.resolver.is_match(name))
        }) {
            self.run(id)?;
        }
        Ok(())
    }

    /// Take a resolver out of the registry and run it
    fn run(&mut self, id: ResolverId) -> Result<(), FactError> {
        let Some(mut resolver) = self.remove_resolver(id) else {
            return Ok(());
        };
        debug!(resolver = resolver.name(), "resolving facts");
        resolver.resolve(self)
    }
}
