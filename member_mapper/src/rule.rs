use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::compile::{self, CompiledAccessor};
use crate::convert::Conversions;
use crate::error::{BoxError, MapperError, Result};
use crate::{Reader, Shape, ShapeId, SourceView, TypePair, Value};

pub(crate) type Derive<S> =
    Arc<dyn Fn(&S) -> std::result::Result<Value, BoxError> + Send + Sync>;
pub(crate) type Hook<S, D> = Arc<dyn Fn(&S, &mut D) + Send + Sync>;

/// Where a custom member gets its value from.
pub(crate) enum Derivation<S: ?Sized> {
    Function { produce: Derive<S>, produces: ShapeId },
    Member { read: Reader<S>, produces: ShapeId },
}

pub(crate) struct CustomMember<S: ?Sized> {
    pub destination: &'static str,
    pub derivation: Derivation<S>,
}

pub(crate) struct RuleState<S: ?Sized, D> {
    pub custom: Vec<CustomMember<S>>,
    pub collections: Vec<&'static str>,
    pub ignored: Vec<&'static str>,
    pub after: Vec<Hook<S, D>>,
    pub auto_copy: Vec<&'static str>,
    pub finalized: bool,
}

impl<S: ?Sized, D> RuleState<S, D> {
    fn is_custom(&self, member: &str) -> bool {
        self.custom.iter().any(|c| c.destination == member)
    }

    fn is_excluded(&self, member: &str) -> bool {
        self.collections.iter().any(|m| *m == member) || self.ignored.iter().any(|m| *m == member)
    }
}

/// Read-only view of a registered mapping.
pub trait Rule: Send + Sync {
    fn key(&self) -> TypePair;

    /// Identifies this registration.  Registering the pair again, after a reset, gives a new generation.
    fn generation(&self) -> u64;

    fn is_finalized(&self) -> bool;

    /// Members copied by name.  Empty until the registry is finalized.
    fn auto_copy_members(&self) -> Vec<&'static str>;

    fn custom_members(&self) -> Vec<&'static str>;

    fn collection_members(&self) -> Vec<&'static str>;

    fn ignored_members(&self) -> Vec<&'static str>;

    /// Writable destination members which nothing writes.
    fn unmapped_members(&self) -> Vec<&'static str>;
}

pub(crate) trait ErasedRule: Rule {
    /// Work out the auto-copy members and freeze the rule.  Safe to repeat.
    fn finalize(&self);

    fn compile(&self, conversions: &Conversions) -> Result<CompiledAccessor>;

    fn into_rule(self: Arc<Self>) -> Arc<dyn Rule>;
}

/// The stored configuration for mapping `S` into `D`.
pub struct MappingRule<S: ?Sized + 'static, D: 'static> {
    key: TypePair,
    generation: u64,
    state: RwLock<RuleState<S, D>>,
}

impl<S: ?Sized + SourceView, D: Shape> MappingRule<S, D> {
    pub(crate) fn new(generation: u64) -> Self {
        MappingRule {
            key: TypePair::of::<S, D>(),
            generation,
            state: RwLock::new(RuleState {
                custom: vec![],
                collections: vec![],
                ignored: vec![],
                after: vec![],
                auto_copy: vec![],
                finalized: false,
            }),
        }
    }

    fn invalid(&self, expression: &str, reason: &str) -> MapperError {
        MapperError::invalid_expression(self.key, expression, reason)
    }

    /// Run a configuration change, unless the rule is frozen.
    fn configure<F>(&self, expression: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut RuleState<S, D>),
    {
        let mut state = self.state.write();
        if state.finalized {
            return Err(self.invalid(expression, "the mapping is already finalized"));
        }
        change(&mut state);
        Ok(())
    }

    fn check_top_level(&self, expression: &str) -> Result<()> {
        if expression.contains('.') {
            return Err(self.invalid(
                expression,
                "only top-level members can be referenced; use a custom function or an after-map hook",
            ));
        }
        Ok(())
    }

    fn writable_destination(&self, expression: &str) -> Result<&'static str> {
        self.check_top_level(expression)?;
        match D::member(expression) {
            Some(m) if m.is_writable() => Ok(m.name),
            Some(_) => Err(self.invalid(expression, "destination member is read-only")),
            None => Err(self.invalid(expression, "no such destination member")),
        }
    }

    fn set_custom(&self, expression: &str, destination: &'static str, derivation: Derivation<S>) -> Result<()> {
        self.configure(expression, move |state| {
            state.custom.retain(|c| c.destination != destination);
            state.custom.push(CustomMember {
                destination,
                derivation,
            });
        })
    }
}

impl<S: ?Sized + SourceView, D: Shape> Rule for MappingRule<S, D> {
    fn key(&self) -> TypePair {
        self.key
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn is_finalized(&self) -> bool {
        self.state.read().finalized
    }

    fn auto_copy_members(&self) -> Vec<&'static str> {
        self.state.read().auto_copy.clone()
    }

    fn custom_members(&self) -> Vec<&'static str> {
        self.state.read().custom.iter().map(|c| c.destination).collect()
    }

    fn collection_members(&self) -> Vec<&'static str> {
        self.state.read().collections.clone()
    }

    fn ignored_members(&self) -> Vec<&'static str> {
        self.state.read().ignored.clone()
    }

    fn unmapped_members(&self) -> Vec<&'static str> {
        let state = self.state.read();
        D::members()
            .into_iter()
            .filter(|m| m.is_writable())
            .map(|m| m.name)
            .filter(|name| {
                !state.auto_copy.contains(name) && !state.is_custom(name) && !state.is_excluded(name)
            })
            .collect()
    }
}

impl<S: ?Sized + SourceView, D: Shape> ErasedRule for MappingRule<S, D> {
    fn finalize(&self) {
        let sources = S::members();
        let mut state = self.state.write();

        let auto_copy = D::members()
            .into_iter()
            .filter(|d| d.is_writable())
            .filter(|d| sources.iter().any(|s| s.name == d.name && s.is_readable()))
            .map(|d| d.name)
            .filter(|name| !state.is_custom(name) && !state.is_excluded(name))
            .collect();

        state.auto_copy = auto_copy;
        state.finalized = true;
    }

    fn compile(&self, conversions: &Conversions) -> Result<CompiledAccessor> {
        let state = self.state.read();
        compile::build::<S, D>(self.key, self.generation, &state, conversions)
    }

    fn into_rule(self: Arc<Self>) -> Arc<dyn Rule> {
        self
    }
}

/// Configures a freshly registered mapping.
///
/// Every method fails with [MapperError::InvalidMemberExpression] once the registry has been finalized.
pub struct RuleBuilder<S: ?Sized + 'static, D: 'static> {
    rule: Arc<MappingRule<S, D>>,
}

impl<S: ?Sized + SourceView, D: Shape> RuleBuilder<S, D> {
    pub(crate) fn new(rule: Arc<MappingRule<S, D>>) -> Self {
        RuleBuilder { rule }
    }

    pub fn key(&self) -> TypePair {
        self.rule.key
    }

    /// Compute `destination` with a function of the source.  Takes precedence over copying by name.
    pub fn map_member<V, F>(self, destination: &str, derive: F) -> Result<Self>
    where
        V: Any + Send,
        F: Fn(&S) -> V + Send + Sync + 'static,
    {
        let member = self.rule.writable_destination(destination)?;
        let produce: Derive<S> = Arc::new(
            move |source: &S| -> std::result::Result<Value, BoxError> {
                Ok(Box::new(derive(source)) as Value)
            },
        );
        self.rule.set_custom(
            destination,
            member,
            Derivation::Function {
                produce,
                produces: ShapeId::of::<V>(),
            },
        )?;
        Ok(self)
    }

    /// Like [RuleBuilder::map_member], for derivations which can fail.
    ///
    /// A failure aborts the mapping with [MapperError::MemberDerivation]; members assigned before it keep their new
    /// values.
    pub fn try_map_member<V, E, F>(self, destination: &str, derive: F) -> Result<Self>
    where
        V: Any + Send,
        E: Into<BoxError>,
        F: Fn(&S) -> std::result::Result<V, E> + Send + Sync + 'static,
    {
        let member = self.rule.writable_destination(destination)?;
        let produce: Derive<S> = Arc::new(
            move |source: &S| -> std::result::Result<Value, BoxError> {
                derive(source)
                    .map(|v| Box::new(v) as Value)
                    .map_err(Into::into)
            },
        );
        self.rule.set_custom(
            destination,
            member,
            Derivation::Function {
                produce,
                produces: ShapeId::of::<V>(),
            },
        )?;
        Ok(self)
    }

    /// Fill `destination` from the top-level source member named `source_member`.
    pub fn map_from(self, destination: &str, source_member: &str) -> Result<Self> {
        let member = self.rule.writable_destination(destination)?;
        self.rule.check_top_level(source_member)?;
        let source = match S::member(source_member) {
            Some(m) => m,
            None => return Err(self.rule.invalid(source_member, "no such source member")),
        };
        let read = match source.read {
            Some(r) => r,
            None => return Err(self.rule.invalid(source_member, "source member can't be read")),
        };
        self.rule.set_custom(
            destination,
            member,
            Derivation::Member {
                read,
                produces: source.value_type,
            },
        )?;
        Ok(self)
    }

    /// Declare `member` an element collection, so it isn't copied by name.
    pub fn mark_collection(self, member: &str) -> Result<Self> {
        self.rule.check_top_level(member)?;
        let found = D::member(member)
            .map(|m| m.name)
            .or_else(|| S::member(member).map(|m| m.name));
        let name = match found {
            Some(name) => name,
            None => return Err(self.rule.invalid(member, "no such member")),
        };
        self.rule.configure(member, |state| {
            if !state.collections.contains(&name) {
                state.collections.push(name);
            }
        })?;
        Ok(self)
    }

    /// Never write `member` by name.
    pub fn ignore(self, member: &str) -> Result<Self> {
        let name = self.rule.writable_destination(member)?;
        self.rule.configure(member, |state| {
            if !state.ignored.contains(&name) {
                state.ignored.push(name);
            }
        })?;
        Ok(self)
    }

    /// Run `hook` after every member has been assigned.
    pub fn after_map<F>(self, hook: F) -> Result<Self>
    where
        F: Fn(&S, &mut D) + Send + Sync + 'static,
    {
        self.rule.configure("after_map", |state| state.after.push(Arc::new(hook)))?;
        Ok(self)
    }
}
