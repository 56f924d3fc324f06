//! Maps values between shapes by member name.
//!
//! Types describe their members with `#[derive(Shape)]`.  A [RuleRegistry] holds one rule per source and destination
//! pair; each rule copies identically named members and can override individual members with custom derivations.  A
//! [Mapper] compiles each rule into a closure on first use and caches it.
//!
//! Values whose static type isn't known can be mapped too: the [PolymorphicResolver] tries the value's own type and
//! then the capabilities (traits) it declared with `#[mapper(capabilities(...))]` and `decl_capability!`.
mod compile;
mod config;
mod convert;
mod error;
mod key;
mod mapper;
mod registry;
mod resolver;
mod rule;

#[cfg(test)]
mod example;

pub use member_mapper_internals::{
    view_capability, Capability, Caster, Mappable, Member, Reader, Shape, ShapeId, SourceView, Value, Writer,
};
pub use member_mapper_macros::{decl_capability, Shape};

pub use compile::{AccessorCache, CompiledAccessor};
pub use config::{MapperConfig, NamespaceProxies, ProxyStrategy};
pub use convert::{Conversions, Converter};
pub use error::{BoxError, MapperError, Result};
pub use key::{AccessorKey, AccessorKind, TypePair};
pub use mapper::{MappedDynIter, MappedDynSeq, MappedIter, MappedSeq, Mapper};
pub use registry::{Profile, RuleRegistry};
pub use resolver::{PolymorphicResolver, Resolved};
pub use rule::{MappingRule, Rule, RuleBuilder};
