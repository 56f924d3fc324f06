//! Safe value conversions applied when a derived value's type differs from the member it is written to.
use std::any::Any;
use std::collections::HashMap;

use crate::{ShapeId, Value};

/// Converts a boxed value.  Hands the value back if it isn't of the expected source type.
pub type Converter = fn(Value) -> Result<Value, Value>;

fn convert_from<A, B>(value: Value) -> Result<Value, Value>
where
    A: Any + Send,
    B: Any + Send + From<A>,
{
    value.downcast::<A>().map(|a| Box::new(B::from(*a)) as Value)
}

/// Table of conversions, keyed by (from, to).
#[derive(Clone, Default)]
pub struct Conversions {
    table: HashMap<(ShapeId, ShapeId), Converter>,
}

macro_rules! widen {
    ($conv: ident, $from: ty => $($to: ty),+) => {
        $($conv.register::<$from, $to>();)+
    };
}

impl Conversions {
    /// No conversions at all: types must match exactly.
    pub fn empty() -> Self {
        Default::default()
    }

    /// Lossless numeric widening, plus `char` to `String`.
    pub fn standard() -> Self {
        let mut c = Self::empty();
        widen!(c, u8 => u16, u32, u64, u128, usize, i16, i32, i64, i128, f32, f64);
        widen!(c, u16 => u32, u64, u128, usize, i32, i64, i128, f32, f64);
        widen!(c, u32 => u64, u128, i64, i128, f64);
        widen!(c, u64 => u128, i128);
        widen!(c, i8 => i16, i32, i64, i128, isize, f32, f64);
        widen!(c, i16 => i32, i64, i128, isize, f32, f64);
        widen!(c, i32 => i64, i128, f64);
        widen!(c, i64 => i128);
        widen!(c, f32 => f64);
        widen!(c, char => String);
        c
    }

    /// Allow values of `A` to be written into members of type `B`.
    pub fn register<A, B>(&mut self) -> &mut Self
    where
        A: Any + Send,
        B: Any + Send + From<A>,
    {
        self.table.insert(
            (ShapeId::of::<A>(), ShapeId::of::<B>()),
            convert_from::<A, B> as Converter,
        );
        self
    }

    pub fn find(&self, from: ShapeId, to: ShapeId) -> Option<Converter> {
        self.table.get(&(from, to)).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl std::fmt::Debug for Conversions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.table.keys().map(|(a, b)| format!("{} -> {}", a, b)))
            .finish()
    }
}
