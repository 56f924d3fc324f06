use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{MapperError, Result};
use crate::rule::{ErasedRule, MappingRule, Rule, RuleBuilder};
use crate::{Shape, ShapeId, SourceView, TypePair};

/// A group of registrations, applied together with [RuleRegistry::apply].
pub trait Profile {
    fn configure(&self, registry: &RuleRegistry) -> Result<()>;
}

/// Every registered mapping, keyed by source and destination type.
///
/// Registration is expected to happen up front, from one thread.  Lookups and the polymorphic memo are safe to use from
/// any number of threads afterwards.
pub struct RuleRegistry {
    rules: RwLock<HashMap<TypePair, Arc<dyn ErasedRule>>>,
    finalized: AtomicBool,
    // Never reused, so an accessor built from a replaced rule can be told apart.
    generations: AtomicU64,
    // destination -> source type found by the last polymorphic search.
    resolved: DashMap<ShapeId, ShapeId>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        RuleRegistry {
            rules: RwLock::new(HashMap::new()),
            finalized: AtomicBool::new(false),
            generations: AtomicU64::new(0),
            resolved: DashMap::new(),
        }
    }

    /// Register a mapping from `S` to `D` and return a builder to configure it.
    ///
    /// Fails with [MapperError::DuplicateMapping] if the pair is already registered, leaving the existing rule alone.
    pub fn register<S, D>(&self) -> Result<RuleBuilder<S, D>>
    where
        S: ?Sized + SourceView,
        D: Shape,
    {
        let pair = TypePair::of::<S, D>();
        let mut rules = self.rules.write();
        if rules.contains_key(&pair) {
            return Err(MapperError::DuplicateMapping { pair });
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let rule = Arc::new(MappingRule::<S, D>::new(generation));
        rules.insert(pair, rule.clone());
        self.finalized.store(false, Ordering::Release);

        debug!(%pair, generation, "registered mapping");
        Ok(RuleBuilder::new(rule))
    }

    pub fn apply<P: Profile + ?Sized>(&self, profile: &P) -> Result<()> {
        profile.configure(self)
    }

    /// Work out the auto-copy members of every rule and freeze them.
    ///
    /// Cheap once done; registering another rule makes the next call do the work again.
    pub fn finalize(&self) {
        if self.finalized.load(Ordering::Acquire) {
            return;
        }

        let rules = self.rules.read();
        for rule in rules.values() {
            rule.finalize();
        }
        self.finalized.store(true, Ordering::Release);

        debug!(rules = rules.len(), "finalized mapping registry");
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    pub fn get_rule(&self, pair: TypePair) -> Option<Arc<dyn Rule>> {
        self.erased(pair).map(|rule| rule.into_rule())
    }

    pub(crate) fn erased(&self, pair: TypePair) -> Option<Arc<dyn ErasedRule>> {
        self.rules.read().get(&pair).cloned()
    }

    pub fn contains(&self, pair: TypePair) -> bool {
        self.rules.read().contains_key(&pair)
    }

    /// Registered pairs, sorted by name.
    pub fn pairs(&self) -> Vec<TypePair> {
        let mut pairs: Vec<TypePair> = self.rules.read().keys().copied().collect();
        pairs.sort_by_key(|p| (p.source.name(), p.destination.name()));
        pairs
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Forget every rule and memoized resolution.
    pub fn reset(&self) {
        self.rules.write().clear();
        self.resolved.clear();
        self.finalized.store(false, Ordering::Release);
        debug!("reset mapping registry");
    }

    pub(crate) fn memoized_source(&self, destination: ShapeId) -> Option<ShapeId> {
        self.resolved.get(&destination).map(|e| *e.value())
    }

    /// Remember `source` for `destination` unless something is already remembered.  Returns the stored type.
    pub(crate) fn memoize_source(&self, destination: ShapeId, source: ShapeId) -> ShapeId {
        *self.resolved.entry(destination).or_insert(source).value()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("pairs", &self.pairs())
            .field("finalized", &self.is_finalized())
            .finish()
    }
}
