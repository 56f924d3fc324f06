//! Finding the registered source type for a value whose static type isn't known.
use tracing::trace;

use crate::config::ProxyStrategy;
use crate::registry::RuleRegistry;
use crate::{Mappable, ShapeId, TypePair};

/// The outcome of a successful resolution.
#[derive(Copy, Clone)]
pub struct Resolved<'a> {
    /// The source type of the matching rule.  Either the value's own type or one of its capabilities.
    pub source_type: ShapeId,
    /// The value to map.  Differs from the input when a proxy was unwrapped.
    pub value: &'a dyn Mappable,
}

impl<'a> std::fmt::Debug for Resolved<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("source_type", &self.source_type)
            .field("value", &self.value.shape_id())
            .finish()
    }
}

pub struct PolymorphicResolver<'r> {
    registry: &'r RuleRegistry,
    proxies: Option<&'r dyn ProxyStrategy>,
}

impl<'r> PolymorphicResolver<'r> {
    pub fn new(registry: &'r RuleRegistry, proxies: Option<&'r dyn ProxyStrategy>) -> Self {
        PolymorphicResolver { registry, proxies }
    }

    /// The value a mapping should actually read: the base of a proxy, or the value itself.
    pub fn effective<'a>(&self, source: &'a dyn Mappable) -> &'a dyn Mappable {
        match (self.proxies, source.proxy_target()) {
            (Some(proxies), Some(base)) if proxies.is_proxy(source.shape_id()) => {
                trace!(proxy = %source.shape_id(), base = %base.shape_id(), "unwrapped proxy");
                base
            }
            _ => source,
        }
    }

    /// Find the registered source type for mapping `source` into `destination`.
    ///
    /// An exact rule for the value's type always wins.  Otherwise the type remembered for `destination` is reused if it
    /// applies to the value, and failing that the value's type and then its capabilities are tried in declaration order.
    /// Only the first winner found for a destination is remembered; later searches never replace it.
    pub fn resolve<'a>(&self, source: &'a dyn Mappable, destination: ShapeId) -> Option<Resolved<'a>> {
        let value = self.effective(source);
        let own = value.shape_id();

        if self.registry.contains(TypePair::new(own, destination)) {
            return Some(Resolved {
                source_type: own,
                value,
            });
        }

        let capabilities = value.capabilities();
        let applies = |candidate: ShapeId| candidate == own || capabilities.iter().any(|c| c.id() == candidate);

        if let Some(memo) = self.registry.memoized_source(destination) {
            if applies(memo) && self.registry.contains(TypePair::new(memo, destination)) {
                trace!(source = %own, %destination, resolved = %memo, "memoized resolution");
                return Some(Resolved {
                    source_type: memo,
                    value,
                });
            }
        }

        let winner = std::iter::once(own)
            .chain(capabilities.iter().map(|c| c.id()))
            .find(|candidate| self.registry.contains(TypePair::new(*candidate, destination)))?;

        // The first stored winner stays.  A racing search may have stored one which also applies to this value.
        let stored = self.registry.memoize_source(destination, winner);
        let source_type = if applies(stored) && self.registry.contains(TypePair::new(stored, destination)) {
            stored
        } else {
            winner
        };

        trace!(source = %own, %destination, resolved = %source_type, "resolved source type");
        Some(Resolved { source_type, value })
    }
}
