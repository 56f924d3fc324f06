use crate::ShapeId;

/// Identifies a mapping: where it reads from and what it writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
#[display(fmt = "{} -> {}", source, destination)]
pub struct TypePair {
    pub source: ShapeId,
    pub destination: ShapeId,
}

impl TypePair {
    pub fn new(source: ShapeId, destination: ShapeId) -> Self {
        TypePair {
            source,
            destination,
        }
    }

    pub fn of<S: ?Sized + 'static, D: ?Sized + 'static>() -> Self {
        Self::new(ShapeId::of::<S>(), ShapeId::of::<D>())
    }
}

/// What kind of cached entry a key refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessorKind {
    Compiled,
}

/// Key of the accessor cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AccessorKey {
    pub pair: TypePair,
    pub kind: AccessorKind,
}

impl AccessorKey {
    pub fn compiled(pair: TypePair) -> Self {
        AccessorKey {
            pair,
            kind: AccessorKind::Compiled,
        }
    }
}
