//! Turning a finalized rule into a copy closure, and caching the result.
//!
//! The closure only holds function pointers taken from the shapes and the rule's derivations, so running it never looks
//! anything up by name.
use std::any::Any;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::convert::{Converter, Conversions};
use crate::error::{MapperError, Result};
use crate::key::AccessorKey;
use crate::rule::{Derivation, Derive, Hook, RuleState};
use crate::{Mappable, Member, Reader, Shape, ShapeId, SourceView, TypePair, Writer};

pub(crate) type CopyFn<S, D> = dyn Fn(&S, &mut D) -> Result<()> + Send + Sync;
pub(crate) type RuntimeCopyFn<D> = dyn Fn(&dyn Mappable, &mut D) -> Result<()> + Send + Sync;

enum Read<S: ?Sized> {
    Member(Reader<S>),
    Derived(Derive<S>),
}

/// One planned write into the destination.
struct Assignment<S: ?Sized, D> {
    member: &'static str,
    read: Read<S>,
    from: ShapeId,
    to: ShapeId,
    convert: Option<Converter>,
    write: Writer<D>,
}

impl<S: ?Sized, D> Assignment<S, D> {
    fn apply(&self, pair: TypePair, source: &S, destination: &mut D) -> Result<()> {
        let value = match &self.read {
            Read::Member(read) => read(source),
            Read::Derived(produce) => {
                produce(source).map_err(|e| MapperError::derivation(pair, self.member, e))?
            }
        };

        let value = match self.convert {
            Some(convert) => convert(value)
                .map_err(|_| MapperError::incompatible(pair, self.member, self.from, self.to))?,
            None => value,
        };

        (self.write)(destination, value)
            .map_err(|_| MapperError::incompatible(pair, self.member, self.from, self.to))
    }
}

fn find<'m, T: ?Sized>(members: &'m [Member<T>], name: &str) -> Option<&'m Member<T>> {
    members.iter().find(|m| m.name == name)
}

fn writer_for<D>(pair: TypePair, member: &Member<D>) -> Result<Writer<D>> {
    member.write.ok_or_else(|| {
        MapperError::invalid_expression(pair, member.name, "destination member is read-only")
    })
}

/// The converter needed to write a `from` into a `to`, if any.
fn coercion(
    pair: TypePair,
    conversions: &Conversions,
    member: &'static str,
    from: ShapeId,
    to: ShapeId,
) -> Result<Option<Converter>> {
    if from == to {
        return Ok(None);
    }

    conversions
        .find(from, to)
        .map(Some)
        .ok_or_else(|| MapperError::incompatible(pair, member, from, to))
}

/// Build the copy closures for a finalized rule.
pub(crate) fn build<S, D>(
    pair: TypePair,
    generation: u64,
    state: &RuleState<S, D>,
    conversions: &Conversions,
) -> Result<CompiledAccessor>
where
    S: ?Sized + SourceView,
    D: Shape,
{
    let sources = S::members();
    let destinations = D::members();
    let mut plan: Vec<Assignment<S, D>> = vec![];

    for custom in state.custom.iter() {
        let target = find(&destinations, custom.destination).ok_or_else(|| {
            MapperError::invalid_expression(pair, custom.destination, "no such destination member")
        })?;

        let (read, from) = match &custom.derivation {
            Derivation::Function { produce, produces } => (Read::Derived(produce.clone()), *produces),
            Derivation::Member { read, produces } => (Read::Member(*read), *produces),
        };

        plan.push(Assignment {
            member: target.name,
            read,
            from,
            to: target.value_type,
            convert: coercion(pair, conversions, target.name, from, target.value_type)?,
            write: writer_for(pair, target)?,
        });
    }

    for name in state.auto_copy.iter() {
        // Custom mappings win.
        if plan.iter().any(|a| a.member == *name) {
            continue;
        }

        let (source, target) = match (find(&sources, name), find(&destinations, name)) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                return Err(MapperError::invalid_expression(
                    pair,
                    *name,
                    "member is no longer present on both sides",
                ))
            }
        };
        let read = source.read.ok_or_else(|| {
            MapperError::invalid_expression(pair, *name, "source member can't be read")
        })?;

        plan.push(Assignment {
            member: target.name,
            read: Read::Member(read),
            from: source.value_type,
            to: target.value_type,
            convert: coercion(pair, conversions, target.name, source.value_type, target.value_type)?,
            write: writer_for(pair, target)?,
        });
    }

    debug!(
        %pair,
        assignments = plan.len(),
        hooks = state.after.len(),
        "compiled mapping accessor"
    );

    let plan: Arc<[Assignment<S, D>]> = plan.into();
    let hooks: Arc<[Hook<S, D>]> = state.after.clone().into();

    let typed: Arc<CopyFn<S, D>> = Arc::new(move |source: &S, destination: &mut D| -> Result<()> {
        for assignment in plan.iter() {
            assignment.apply(pair, source, &mut *destination)?;
        }
        for hook in hooks.iter() {
            hook(source, &mut *destination);
        }
        Ok(())
    });

    let copy = typed.clone();
    let runtime: Arc<RuntimeCopyFn<D>> =
        Arc::new(move |source: &dyn Mappable, destination: &mut D| -> Result<()> {
            let view = S::view(source)
                .ok_or_else(|| MapperError::not_found(source.shape_id(), pair.destination))?;
            copy(view, destination)
        });

    Ok(CompiledAccessor::new(pair, generation, typed, runtime))
}

/// A compiled mapping, with its closures type-erased so that accessors for every pair can share one cache.
#[derive(Clone)]
pub struct CompiledAccessor {
    pair: TypePair,
    generation: u64,
    // `Arc<CopyFn<S, D>>`
    typed: Arc<dyn Any + Send + Sync>,
    // `Arc<RuntimeCopyFn<D>>`
    runtime: Arc<dyn Any + Send + Sync>,
}

impl CompiledAccessor {
    fn new<S: ?Sized + 'static, D: 'static>(
        pair: TypePair,
        generation: u64,
        typed: Arc<CopyFn<S, D>>,
        runtime: Arc<RuntimeCopyFn<D>>,
    ) -> Self {
        CompiledAccessor {
            pair,
            generation,
            typed: Arc::new(typed),
            runtime: Arc::new(runtime),
        }
    }

    pub fn pair(&self) -> TypePair {
        self.pair
    }

    /// The [crate::Rule::generation] this was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn typed<S: ?Sized + 'static, D: 'static>(&self) -> Option<Arc<CopyFn<S, D>>> {
        self.typed.downcast_ref::<Arc<CopyFn<S, D>>>().cloned()
    }

    pub(crate) fn runtime<D: 'static>(&self) -> Option<Arc<RuntimeCopyFn<D>>> {
        self.runtime.downcast_ref::<Arc<RuntimeCopyFn<D>>>().cloned()
    }
}

impl std::fmt::Debug for CompiledAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledAccessor")
            .field("pair", &self.pair)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Compiled accessors, built at most once per pair.
#[derive(Default)]
pub struct AccessorCache {
    entries: DashMap<AccessorKey, CompiledAccessor>,
}

impl AccessorCache {
    pub fn new() -> Self {
        Default::default()
    }

    /// Return the accessor for `pair` built from rule `generation`, building it first if needed.
    ///
    /// `build` runs without any lock held.  Threads racing on the first build may each run it, but only the first
    /// result is stored and every caller gets that one back.  An entry from an older generation is replaced.
    pub fn get_or_build<F>(&self, pair: TypePair, generation: u64, build: F) -> Result<CompiledAccessor>
    where
        F: FnOnce() -> Result<CompiledAccessor>,
    {
        let key = AccessorKey::compiled(pair);
        if let Some(hit) = self.entries.get(&key).map(|e| e.value().clone()) {
            if hit.generation == generation {
                return Ok(hit);
            }
        }

        let built = build()?;
        let stored = match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().generation < generation {
                    debug!(%pair, generation, "replacing accessor of an older rule");
                    entry.insert(built);
                    entry.get().clone()
                } else if entry.get().generation == generation {
                    entry.get().clone()
                } else {
                    // A newer rule is already cached; leave it for the callers that want it.
                    built
                }
            }
            Entry::Vacant(entry) => entry.insert(built).value().clone(),
        };
        Ok(stored)
    }

    pub fn contains(&self, pair: TypePair) -> bool {
        self.entries.contains_key(&AccessorKey::compiled(pair))
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for AccessorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorCache")
            .field("count", &self.count())
            .finish()
    }
}
