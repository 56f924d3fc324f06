use thiserror::Error;

use crate::{ShapeId, TypePair};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can go wrong while registering or running a mapping.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("a mapping from {pair} is already registered")]
    DuplicateMapping { pair: TypePair },

    #[error("invalid member expression `{expression}` on {pair}: {reason}")]
    InvalidMemberExpression {
        pair: TypePair,
        expression: String,
        reason: String,
    },

    #[error("member `{member}` of {pair}: no safe conversion from {from} to {to}")]
    IncompatibleMemberType {
        pair: TypePair,
        member: String,
        from: ShapeId,
        to: ShapeId,
    },

    #[error("no mapping registered from {source_type} to {destination}")]
    MappingNotFound {
        source_type: ShapeId,
        destination: ShapeId,
    },

    #[error("deriving member `{member}` of {pair} failed: {source}")]
    MemberDerivation {
        pair: TypePair,
        member: String,
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, MapperError>;

impl MapperError {
    pub fn invalid_expression<E: Into<String>, R: Into<String>>(
        pair: TypePair,
        expression: E,
        reason: R,
    ) -> Self {
        Self::InvalidMemberExpression {
            pair,
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn incompatible<M: Into<String>>(pair: TypePair, member: M, from: ShapeId, to: ShapeId) -> Self {
        Self::IncompatibleMemberType {
            pair,
            member: member.into(),
            from,
            to,
        }
    }

    pub fn not_found(source_type: ShapeId, destination: ShapeId) -> Self {
        Self::MappingNotFound {
            source_type,
            destination,
        }
    }

    pub fn derivation<M: Into<String>>(pair: TypePair, member: M, source: BoxError) -> Self {
        Self::MemberDerivation {
            pair,
            member: member.into(),
            source,
        }
    }
}
