//! The consumer-facing entry point.
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use crate::compile::{AccessorCache, CompiledAccessor, CopyFn};
use crate::config::MapperConfig;
use crate::error::{MapperError, Result};
use crate::registry::RuleRegistry;
use crate::resolver::PolymorphicResolver;
use crate::{Mappable, Rule, ShapeId, TypePair};

/// How a call finds its accessor.
enum Call<'a> {
    /// Both types are known statically; only an exact rule will do.
    Typed(TypePair),
    /// Only the destination is known; the source type is resolved from the value.
    Runtime {
        source: &'a dyn Mappable,
        destination: ShapeId,
    },
}

/// Maps values using the rules of a [RuleRegistry], compiling each rule on first use.
///
/// The registry is finalized lazily before every dispatch, so registration code never has to call
/// [RuleRegistry::finalize] itself.
pub struct Mapper {
    registry: Arc<RuleRegistry>,
    cache: AccessorCache,
    config: MapperConfig,
}

impl Mapper {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self::with_config(registry, MapperConfig::new())
    }

    pub fn with_config(registry: Arc<RuleRegistry>, config: MapperConfig) -> Self {
        Mapper {
            registry,
            cache: AccessorCache::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &AccessorCache {
        &self.cache
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn resolver(&self) -> PolymorphicResolver<'_> {
        PolymorphicResolver::new(&self.registry, self.config.proxy_strategy())
    }

    fn accessor(&self, pair: TypePair) -> Result<CompiledAccessor> {
        let rule = self
            .registry
            .erased(pair)
            .ok_or_else(|| MapperError::not_found(pair.source, pair.destination))?;
        self.cache
            .get_or_build(pair, rule.generation(), || rule.compile(self.config.conversions()))
    }

    /// Find the accessor for a call, along with the value it should read when the source was resolved at runtime.
    fn locate<'a>(&self, call: Call<'a>) -> Result<(CompiledAccessor, Option<&'a dyn Mappable>)> {
        self.registry.finalize();

        match call {
            Call::Typed(pair) => {
                trace!(%pair, "typed dispatch");
                Ok((self.accessor(pair)?, None))
            }
            Call::Runtime {
                source,
                destination,
            } => {
                let resolved = self
                    .resolver()
                    .resolve(source, destination)
                    .ok_or_else(|| MapperError::not_found(source.shape_id(), destination))?;
                let pair = TypePair::new(resolved.source_type, destination);
                trace!(%pair, runtime = %source.shape_id(), "runtime dispatch");
                Ok((self.accessor(pair)?, Some(resolved.value)))
            }
        }
    }

    fn typed_copy<S, D>(&self) -> Result<Arc<CopyFn<S, D>>>
    where
        S: ?Sized + 'static,
        D: 'static,
    {
        let pair = TypePair::of::<S, D>();
        let (accessor, _) = self.locate(Call::Typed(pair))?;
        accessor
            .typed::<S, D>()
            .ok_or_else(|| MapperError::not_found(pair.source, pair.destination))
    }

    fn copy_dyn<D: 'static>(&self, source: &dyn Mappable, destination: &mut D) -> Result<()> {
        let target = ShapeId::of::<D>();
        let (accessor, value) = self.locate(Call::Runtime {
            source,
            destination: target,
        })?;
        let copy = accessor
            .runtime::<D>()
            .ok_or_else(|| MapperError::not_found(source.shape_id(), target))?;
        copy(value.unwrap_or(source), destination)
    }

    /// Map `source` into an existing destination, and hand the destination back.
    ///
    /// Needs a rule for exactly `S -> D`.  If a member derivation fails, members assigned before it keep their new
    /// values.
    pub fn map_into<'d, S, D>(&self, source: &S, destination: &'d mut D) -> Result<&'d mut D>
    where
        S: ?Sized + 'static,
        D: 'static,
    {
        let copy = self.typed_copy::<S, D>()?;
        copy(source, &mut *destination)?;
        Ok(destination)
    }

    /// Map `source` into a new, default-constructed `D`.
    pub fn map<S, D>(&self, source: &S) -> Result<D>
    where
        S: ?Sized + 'static,
        D: Default + 'static,
    {
        let mut destination = D::default();
        self.map_into(source, &mut destination)?;
        Ok(destination)
    }

    /// Map a value whose type is only known at runtime.  An absent source maps to `None`.
    pub fn map_dyn_into<'d, D: 'static>(
        &self,
        source: Option<&dyn Mappable>,
        destination: &'d mut D,
    ) -> Result<Option<&'d mut D>> {
        match source {
            Some(source) => {
                self.copy_dyn(source, destination)?;
                Ok(Some(destination))
            }
            None => Ok(None),
        }
    }

    pub fn map_dyn<D: Default + 'static>(&self, source: Option<&dyn Mappable>) -> Result<Option<D>> {
        match source {
            Some(source) => {
                let mut destination = D::default();
                self.copy_dyn(source, &mut destination)?;
                Ok(Some(destination))
            }
            None => Ok(None),
        }
    }

    /// Lazily map every element of `sources`.
    ///
    /// The rule is looked up (and compiled) now, so a missing rule fails here rather than per element.
    pub fn map_all<'a, S, D>(&self, sources: &'a [S]) -> Result<MappedSeq<'a, S, D>>
    where
        S: 'static,
        D: Default + 'static,
    {
        Ok(MappedSeq {
            copy: self.typed_copy::<S, D>()?,
            sources,
        })
    }

    /// Lazily map every element of `sources`, resolving each one at runtime.
    pub fn map_all_dyn<'m, 'a, D>(&'m self, sources: &'a [&'a dyn Mappable]) -> MappedDynSeq<'m, 'a, D>
    where
        D: Default + 'static,
    {
        MappedDynSeq {
            mapper: self,
            sources,
            destination: PhantomData,
        }
    }

    /// Finalize the registry and compile every rule now, instead of on first use.
    ///
    /// Returns the number of rules compiled, or the first build error.
    pub fn compile_all(&self) -> Result<usize> {
        self.registry.finalize();
        let pairs = self.registry.pairs();
        for pair in pairs.iter() {
            self.accessor(*pair)?;
        }
        trace!(compiled = pairs.len(), "compiled every mapping");
        Ok(pairs.len())
    }

    /// Forget every rule and every compiled accessor.
    pub fn reset(&self) {
        self.registry.reset();
        self.cache.clear();
    }
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

/// The result of [Mapper::map_all].  Nothing is mapped until it is iterated, and it can be iterated any number of
/// times.
pub struct MappedSeq<'a, S: 'static, D: 'static> {
    copy: Arc<CopyFn<S, D>>,
    sources: &'a [S],
}

impl<'a, S: 'static, D: Default + 'static> MappedSeq<'a, S, D> {
    pub fn iter(&self) -> MappedIter<'a, S, D> {
        MappedIter {
            copy: self.copy.clone(),
            sources: self.sources.iter(),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl<'a, S: 'static, D: Default + 'static> IntoIterator for MappedSeq<'a, S, D> {
    type Item = Result<D>;
    type IntoIter = MappedIter<'a, S, D>;

    fn into_iter(self) -> Self::IntoIter {
        MappedIter {
            copy: self.copy,
            sources: self.sources.iter(),
        }
    }
}

impl<'s, 'a, S: 'static, D: Default + 'static> IntoIterator for &'s MappedSeq<'a, S, D> {
    type Item = Result<D>;
    type IntoIter = MappedIter<'a, S, D>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct MappedIter<'a, S: 'static, D: 'static> {
    copy: Arc<CopyFn<S, D>>,
    sources: std::slice::Iter<'a, S>,
}

impl<'a, S: 'static, D: Default + 'static> Iterator for MappedIter<'a, S, D> {
    type Item = Result<D>;

    fn next(&mut self) -> Option<Self::Item> {
        let source = self.sources.next()?;
        let mut destination = D::default();
        Some((self.copy)(source, &mut destination).map(|()| destination))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.sources.size_hint()
    }
}

/// The result of [Mapper::map_all_dyn].  Each element is resolved when it is reached.
pub struct MappedDynSeq<'m, 'a, D> {
    mapper: &'m Mapper,
    sources: &'a [&'a dyn Mappable],
    destination: PhantomData<fn() -> D>,
}

impl<'m, 'a, D: Default + 'static> MappedDynSeq<'m, 'a, D> {
    pub fn iter(&self) -> MappedDynIter<'m, 'a, D> {
        MappedDynIter {
            mapper: self.mapper,
            sources: self.sources.iter(),
            destination: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl<'m, 'a, D: Default + 'static> IntoIterator for MappedDynSeq<'m, 'a, D> {
    type Item = Result<D>;
    type IntoIter = MappedDynIter<'m, 'a, D>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'s, 'm, 'a, D: Default + 'static> IntoIterator for &'s MappedDynSeq<'m, 'a, D> {
    type Item = Result<D>;
    type IntoIter = MappedDynIter<'m, 'a, D>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct MappedDynIter<'m, 'a, D> {
    mapper: &'m Mapper,
    sources: std::slice::Iter<'a, &'a dyn Mappable>,
    destination: PhantomData<fn() -> D>,
}

impl<'m, 'a, D: Default + 'static> Iterator for MappedDynIter<'m, 'a, D> {
    type Item = Result<D>;

    fn next(&mut self) -> Option<Self::Item> {
        let source = *self.sources.next()?;
        let mut destination = D::default();
        Some(
            self.mapper
                .copy_dyn(source, &mut destination)
                .map(|()| destination),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.sources.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example::*;
    use crate::NamespaceProxies;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mapper_with<F: FnOnce(&RuleRegistry)>(register: F) -> Mapper {
        let registry = Arc::new(RuleRegistry::new());
        register(&registry);
        Mapper::new(registry)
    }

    fn named_badges(registry: &RuleRegistry) {
        registry
            .register::<dyn Named, Badge>()
            .unwrap()
            .map_member("label", |n| format!("<{}>", n.name()))
            .unwrap();
    }

    #[test]
    fn test_auto_copy() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
        });

        let dto: SimpleDto = mapper.map(&Simple::new(1, "A")).unwrap();
        assert_eq!(
            dto,
            SimpleDto {
                id: 1,
                name: "A".into(),
                extra: String::new(),
            }
        );
    }

    #[test]
    fn test_custom_member() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, Renamed>()
                .unwrap()
                .map_member("dest_name", |s: &Simple| format!("{}!", s.name))
                .unwrap();
        });

        let renamed: Renamed = mapper.map(&Simple::new(3, "A")).unwrap();
        assert_eq!(renamed.dest_name, "A!");
        assert_eq!(renamed.id, 3);
    }

    #[test]
    fn test_map_into_returns_destination() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
        });

        let mut dto = SimpleDto {
            extra: "kept".into(),
            ..Default::default()
        };
        let returned = mapper.map_into(&Simple::new(5, "E"), &mut dto).unwrap();
        returned.extra.push('!');
        assert_eq!(dto.id, 5);
        assert_eq!(dto.extra, "kept!");
    }

    #[test]
    fn test_idempotent() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
        });
        let source = Simple::new(8, "same");

        let mut dto = SimpleDto::default();
        mapper.map_into(&source, &mut dto).unwrap();
        let first = dto.clone();
        mapper.map_into(&source, &mut dto).unwrap();
        assert_eq!(dto, first);
    }

    #[test]
    fn test_unregistered_pair() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
        });

        let err = mapper.map::<Simple, Renamed>(&Simple::new(1, "A")).unwrap_err();
        match err {
            MapperError::MappingNotFound {
                source_type,
                destination,
            } => {
                assert_eq!(source_type, ShapeId::of::<Simple>());
                assert_eq!(destination, ShapeId::of::<Renamed>());
            }
            other => panic!("unexpected error {}", other),
        }

        let err = mapper.map_dyn::<Renamed>(Some(&Plain::default())).unwrap_err();
        assert!(matches!(err, MapperError::MappingNotFound { .. }));
    }

    #[test]
    fn test_absent_source() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
        });

        assert!(mapper.map_dyn::<SimpleDto>(None).unwrap().is_none());
        // Even without any rule for the destination.
        assert!(mapper.map_dyn::<Renamed>(None).unwrap().is_none());

        let mut dto = SimpleDto::default();
        assert!(mapper.map_dyn_into(None, &mut dto).unwrap().is_none());
    }

    #[test]
    fn test_map_dyn_through_capability() {
        let mapper = mapper_with(named_badges);
        let person = Person::new(1, "Ada", 36);

        let badge: Badge = mapper.map_dyn(Some(&person)).unwrap().unwrap();
        assert_eq!(
            badge,
            Badge {
                id: 0,
                name: "Ada".into(),
                label: "<Ada>".into(),
            }
        );

        let robot = Robot::new(7, "R2");
        let mut badge = Badge::default();
        mapper.map_dyn_into(Some(&robot), &mut badge).unwrap();
        assert_eq!(badge.label, "<R2>");
    }

    #[test]
    fn test_map_dyn_prefers_exact_rule() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
        });
        let simple = Simple::new(2, "B");
        let dto: SimpleDto = mapper.map_dyn(Some(&simple)).unwrap().unwrap();
        assert_eq!(dto.name, "B");
    }

    #[test]
    fn test_proxy_is_mapped_as_base() {
        let registry = Arc::new(RuleRegistry::new());
        registry.register::<Simple, SimpleDto>().unwrap();
        let proxy = lazy_proxies::SimpleProxy::new(Simple::new(4, "lazy"));

        let plain = Mapper::new(registry.clone());
        assert!(matches!(
            plain.map_dyn::<SimpleDto>(Some(&proxy)),
            Err(MapperError::MappingNotFound { .. })
        ));

        let config = MapperConfig::new().with_proxy_strategy(NamespaceProxies::new(["lazy_proxies"]));
        let mapper = Mapper::with_config(registry, config);
        let dto: SimpleDto = mapper.map_dyn(Some(&proxy)).unwrap().unwrap();
        assert_eq!(dto.id, 4);
        assert_eq!(dto.name, "lazy");
    }

    #[test]
    fn test_map_all_is_lazy_and_restartable() {
        let hooks = Arc::new(AtomicUsize::new(0));
        let counter = hooks.clone();
        let mapper = mapper_with(move |r| {
            r.register::<Simple, SimpleDto>()
                .unwrap()
                .after_map(move |_: &Simple, _: &mut SimpleDto| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        });
        let sources = vec![Simple::new(1, "A"), Simple::new(2, "B"), Simple::new(3, "C")];

        let seq = mapper.map_all::<Simple, SimpleDto>(&sources).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(hooks.load(Ordering::SeqCst), 0);

        let first = seq.iter().next().unwrap().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);

        let all: Vec<SimpleDto> = seq.iter().collect::<Result<_>>().unwrap();
        let again: Vec<SimpleDto> = (&seq).into_iter().collect::<Result<_>>().unwrap();
        assert_eq!(all, again);
        assert_eq!(
            all.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            vec!["A", "B", "C"]
        );
        assert_eq!(hooks.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_map_all_unregistered_fails_up_front() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
        });
        let sources = vec![Simple::new(1, "A")];
        assert!(matches!(
            mapper.map_all::<Simple, Renamed>(&sources),
            Err(MapperError::MappingNotFound { .. })
        ));
    }

    #[test]
    fn test_map_all_dyn() {
        let mapper = mapper_with(named_badges);
        let person = Person::new(1, "Ada", 36);
        let robot = Robot::new(7, "R2");
        let plain = Plain::default();

        let sources = vec![&person as &dyn Mappable, &robot as &dyn Mappable];
        let badges: Vec<Badge> = mapper
            .map_all_dyn::<Badge>(&sources)
            .iter()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            badges.iter().map(|b| b.label.as_str()).collect::<Vec<_>>(),
            vec!["<Ada>", "<R2>"]
        );

        // One element without a rule fails the whole collection.
        let sources = vec![
            &person as &dyn Mappable,
            &plain as &dyn Mappable,
            &robot as &dyn Mappable,
        ];
        let result: Result<Vec<Badge>> = mapper.map_all_dyn::<Badge>(&sources).into_iter().collect();
        assert!(matches!(result, Err(MapperError::MappingNotFound { .. })));
    }

    #[test]
    fn test_failed_derivation_leaves_partial_destination() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>()
                .unwrap()
                .map_member("extra", |_: &Simple| String::from("set"))
                .unwrap()
                .try_map_member("name", |s: &Simple| -> std::result::Result<String, String> {
                    Err(format!("no name for {}", s.id))
                })
                .unwrap();
        });

        let mut dto = SimpleDto::default();
        let err = mapper.map_into(&Simple::new(9, "I"), &mut dto).unwrap_err();
        match err {
            MapperError::MemberDerivation { member, source, .. } => {
                assert_eq!(member, "name");
                assert_eq!(source.to_string(), "no name for 9");
            }
            other => panic!("unexpected error {}", other),
        }
        // `extra` was assigned before the failure; `id` would have been copied after it.
        assert_eq!(dto.extra, "set");
        assert_eq!(dto.id, 0);
    }

    #[test]
    fn test_after_map_hook() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>()
                .unwrap()
                .after_map(|s: &Simple, d: &mut SimpleDto| d.extra = format!("{}#{}", d.name, s.id))
                .unwrap();
        });

        let dto: SimpleDto = mapper.map(&Simple::new(2, "B")).unwrap();
        assert_eq!(dto.extra, "B#2");
    }

    #[test]
    fn test_configuration_after_finalize_is_rejected() {
        let registry = Arc::new(RuleRegistry::new());
        let builder = registry.register::<Simple, SimpleDto>().unwrap();
        let mapper = Mapper::new(registry.clone());
        mapper.map::<Simple, SimpleDto>(&Simple::new(1, "A")).unwrap();

        let err = builder.ignore("extra").err().unwrap();
        assert!(matches!(err, MapperError::InvalidMemberExpression { .. }));
    }

    #[test]
    fn test_nested_member_is_rejected() {
        let registry = RuleRegistry::new();
        let err = registry
            .register::<Simple, Renamed>()
            .unwrap()
            .map_from("dest_name", "name.len")
            .err()
            .unwrap();
        match err {
            MapperError::InvalidMemberExpression { expression, .. } => {
                assert_eq!(expression, "name.len")
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_compile_all() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
            r.register::<Narrow, Wide>().unwrap();
        });
        assert_eq!(mapper.compile_all().unwrap(), 2);
        assert_eq!(mapper.cache().count(), 2);
        assert!(mapper.cache().contains(TypePair::of::<Narrow, Wide>()));

        mapper.registry().register::<Wide, Narrow>().unwrap();
        assert!(matches!(
            mapper.compile_all(),
            Err(MapperError::IncompatibleMemberType { .. })
        ));
    }

    #[test]
    fn test_reset() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
        });
        mapper.map::<Simple, SimpleDto>(&Simple::new(1, "A")).unwrap();
        assert_eq!(mapper.cache().count(), 1);

        mapper.reset();
        assert_eq!(mapper.cache().count(), 0);
        assert!(mapper.registry().is_empty());
        assert!(mapper.map::<Simple, SimpleDto>(&Simple::new(1, "A")).is_err());
    }

    #[test]
    fn test_rule_replaced_through_shared_registry() {
        let registry = Arc::new(RuleRegistry::new());
        registry.register::<Simple, SimpleDto>().unwrap();
        let mapper = Mapper::new(registry.clone());

        let dto: SimpleDto = mapper.map(&Simple::new(1, "a")).unwrap();
        assert_eq!(dto.name, "a");

        // Only the registry is reset; the mapper's cache still holds the old accessor.
        registry.reset();
        registry
            .register::<Simple, SimpleDto>()
            .unwrap()
            .map_member("name", |s: &Simple| s.name.to_uppercase())
            .unwrap();

        let dto: SimpleDto = mapper.map(&Simple::new(1, "a")).unwrap();
        assert_eq!(dto.name, "A");
        assert_eq!(mapper.cache().count(), 1);
    }

    #[test]
    fn test_concurrent_mapping() {
        let mapper = mapper_with(|r| {
            r.register::<Simple, SimpleDto>().unwrap();
            named_badges(r);
        });

        std::thread::scope(|scope| {
            for t in 0..8u64 {
                let mapper = &mapper;
                scope.spawn(move || {
                    for i in 0..50u64 {
                        let id = t * 100 + i;
                        let dto: SimpleDto = mapper.map(&Simple::new(id, "T")).unwrap();
                        assert_eq!(dto.id, id);

                        let person = Person::new(id, "P", 1);
                        let badge: Badge = mapper.map_dyn(Some(&person)).unwrap().unwrap();
                        assert_eq!(badge.label, "<P>");
                    }
                });
            }
        });

        assert_eq!(mapper.cache().count(), 2);
    }
}
