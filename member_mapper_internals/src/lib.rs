#![cfg_attr(not(test), no_std)]
//! Traits implemented by the `member_mapper` macros.
//!
//! Nothing here is meant to be implemented by hand.  `#[derive(Shape)]` implements [Shape], [Mappable] and
//! [SourceView] for structs, and `decl_capability!` implements [Shape] and [SourceView] for `dyn Trait`.
extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::{Any, TypeId};
use core::hash::{Hash, Hasher};

/// A member value moving between a source and a destination.
pub type Value = Box<dyn Any + Send>;

/// Reads (clones) a member out of `T`.
pub type Reader<T> = fn(&T) -> Value;

/// Writes a member into `T`.  Hands the value back if it is not of the member's type.
pub type Writer<T> = fn(&mut T, Value) -> Result<(), Value>;

/// Casts the concrete value behind a `dyn Any` to one of its capabilities.
pub type Caster<T> = for<'a> fn(&'a dyn Any) -> Option<&'a T>;

/// The runtime identity of a type, with its name kept around for messages.
///
/// Equality and hashing only look at the [TypeId].
#[derive(Copy, Clone, Debug, derive_more::Display)]
#[display(fmt = "{}", name)]
pub struct ShapeId {
    id: TypeId,
    name: &'static str,
}

impl ShapeId {
    pub fn of<T: ?Sized + 'static>() -> Self {
        ShapeId {
            id: TypeId::of::<T>(),
            name: core::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ShapeId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ShapeId {}

impl Hash for ShapeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One named member of a shape.
///
/// `read` is `None` for members which can't be read, `write` is `None` for read-only members.
pub struct Member<T: ?Sized> {
    pub name: &'static str,
    pub value_type: ShapeId,
    pub read: Option<Reader<T>>,
    pub write: Option<Writer<T>>,
}

impl<T: ?Sized> Member<T> {
    pub fn is_readable(&self) -> bool {
        self.read.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.write.is_some()
    }
}

// Derive would demand `T: Clone`, which `dyn Trait` can never satisfy.
impl<T: ?Sized> Clone for Member<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Member<T> {}

impl<T: ?Sized> core::fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// A type (or capability) whose members can be listed.
pub trait Shape: 'static {
    /// Members in declaration order.
    fn members() -> Vec<Member<Self>>;

    fn member(name: &str) -> Option<Member<Self>> {
        Self::members().into_iter().find(|m| m.name == name)
    }
}

/// A capability of a concrete type, as declared with `#[mapper(capabilities(...))]`.
pub struct Capability {
    id: ShapeId,
    // Always a `Caster<T>` where `id == ShapeId::of::<T>()`.
    caster: Box<dyn Any + Send + Sync>,
}

impl Capability {
    pub fn new<T: ?Sized + 'static>(caster: Caster<T>) -> Self {
        Capability {
            id: ShapeId::of::<T>(),
            caster: Box::new(caster),
        }
    }

    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Cast `value` to `T`.  Fails if this isn't the capability for `T`, or if `value` isn't the type which declared
    /// it.
    pub fn cast<'a, T: ?Sized + 'static>(&self, value: &'a dyn Any) -> Option<&'a T> {
        let caster = self.caster.downcast_ref::<Caster<T>>()?;
        caster(value)
    }
}

impl core::fmt::Debug for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Capability").field(&self.id).finish()
    }
}

/// A value which can be mapped without its static type being known.
pub trait Mappable: Any + Send + Sync + 'static {
    fn shape_id(&self) -> ShapeId;

    fn as_any(&self) -> &dyn Any;

    /// Capabilities in declaration order.  Built once per type.
    fn capabilities(&self) -> &'static [Capability];

    /// The wrapped base value, for proxy types.
    fn proxy_target(&self) -> Option<&dyn Mappable> {
        None
    }
}

/// Views a type-erased value as `Self`.
///
/// For concrete types this is a downcast.  For `dyn Trait` it goes through the value's capability casters.
pub trait SourceView: Shape {
    fn view(source: &dyn Mappable) -> Option<&Self>;
}

/// [SourceView::view] for a capability `T`.
pub fn view_capability<T: ?Sized + 'static>(source: &dyn Mappable) -> Option<&T> {
    let wanted = ShapeId::of::<T>();
    source
        .capabilities()
        .iter()
        .find(|c| c.id() == wanted)
        .and_then(|c| c.cast::<T>(source.as_any()))
}
