#![forbid(unsafe_code)]
//! Aggregate value codecs and the associative reducers folded over them.
//!
//! Every level of the index stores values produced by a single [`Reducer`].
//! The index splits and recombines ranges freely, so `combine` must be
//! associative and `identity` must be its neutral element.

use std::fmt::Debug;
use std::marker::PhantomData;

use crate::error::{AggError, Result};

/// Byte codec for aggregate values held in the store.
pub trait ValCodec: Sized {
    /// Appends the encoding of `value` to `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);
    /// Decodes a value written by [`ValCodec::encode_val`].
    fn decode_val(src: &[u8]) -> Result<Self>;
}

macro_rules! fixed_width_codec {
    ($ty:ty, $what:literal) => {
        impl ValCodec for $ty {
            fn encode_val(value: &Self, out: &mut Vec<u8>) {
                out.extend_from_slice(&value.to_be_bytes());
            }

            fn decode_val(src: &[u8]) -> Result<Self> {
                let bytes = src
                    .try_into()
                    .map_err(|_| AggError::Codec(concat!($what, " value length mismatch")))?;
                Ok(<$ty>::from_be_bytes(bytes))
            }
        }
    };
}

fixed_width_codec!(i64, "i64");
fixed_width_codec!(u64, "u64");
fixed_width_codec!(f64, "f64");

/// An associative combine function over aggregate values.
pub trait Reducer: Send + Sync {
    /// Aggregate value type.
    type Value: ValCodec + Clone + PartialEq + Debug + Send + Sync;

    /// The neutral element: `reduce({})`.
    fn identity(&self) -> Self::Value;

    /// Pairwise associative combine.
    fn combine(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    /// Folds `values` with [`Reducer::combine`], starting from the identity.
    fn reduce<'a, I>(&self, values: I) -> Self::Value
    where
        I: IntoIterator<Item = &'a Self::Value>,
        Self::Value: 'a,
    {
        values
            .into_iter()
            .fold(self.identity(), |acc, v| self.combine(&acc, v))
    }
}

/// Numeric types the built-in reducers operate on.
pub trait Numeric: ValCodec + Copy + PartialOrd + PartialEq + Debug + Send + Sync {
    /// Additive identity.
    const ZERO: Self;
    /// Smallest representable value (identity of [`Max`]).
    const LOWEST: Self;
    /// Largest representable value (identity of [`Min`]).
    const HIGHEST: Self;
    /// Addition; integers wrap so the fold stays associative.
    fn add(self, other: Self) -> Self;
}

impl Numeric for i64 {
    const ZERO: Self = 0;
    const LOWEST: Self = i64::MIN;
    const HIGHEST: Self = i64::MAX;
    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Numeric for u64 {
    const ZERO: Self = 0;
    const LOWEST: Self = 0;
    const HIGHEST: Self = u64::MAX;
    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Numeric for f64 {
    const ZERO: Self = 0.0;
    const LOWEST: Self = f64::NEG_INFINITY;
    const HIGHEST: Self = f64::INFINITY;
    fn add(self, other: Self) -> Self {
        self + other
    }
}

/// Sum of values; the default reducer.
#[derive(Debug, Clone, Copy)]
pub struct Sum<T = i64>(PhantomData<T>);

/// Minimum of values.
#[derive(Debug, Clone, Copy)]
pub struct Min<T = i64>(PhantomData<T>);

/// Maximum of values.
#[derive(Debug, Clone, Copy)]
pub struct Max<T = i64>(PhantomData<T>);

macro_rules! reducer_ctor {
    ($name:ident) => {
        impl<T> $name<T> {
            /// Creates the reducer.
            pub const fn new() -> Self {
                $name(PhantomData)
            }
        }

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

reducer_ctor!(Sum);
reducer_ctor!(Min);
reducer_ctor!(Max);

impl<T: Numeric> Reducer for Sum<T> {
    type Value = T;

    fn identity(&self) -> T {
        T::ZERO
    }

    fn combine(&self, a: &T, b: &T) -> T {
        a.add(*b)
    }
}

impl<T: Numeric> Reducer for Min<T> {
    type Value = T;

    fn identity(&self) -> T {
        T::HIGHEST
    }

    fn combine(&self, a: &T, b: &T) -> T {
        if b < a {
            *b
        } else {
            *a
        }
    }
}

impl<T: Numeric> Reducer for Max<T> {
    type Value = T;

    fn identity(&self) -> T {
        T::LOWEST
    }

    fn combine(&self, a: &T, b: &T) -> T {
        if b > a {
            *b
        } else {
            *a
        }
    }
}

pub(crate) fn encode<R: Reducer>(value: &R::Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    R::Value::encode_val(value, &mut out);
    out
}
