// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::rc::Rc;
use core::fmt;

use crate::types::{RefType, ValType};
use crate::utils::enum_accessors;
use crate::vm::FuncRef;

/// Possible runtime values that a WebAssembly guest can consume or
/// produce.
///
/// Note that the raw bits of floats are stored here; use
/// `f32::from_bits`/`f64::from_bits` to recover the float value.
#[derive(Clone, PartialEq, Debug)]
pub enum Val {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// A 32-bit float, as raw bits.
    F32(u32),
    /// A 64-bit float, as raw bits.
    F64(u64),
    /// A 128-bit vector.
    V128(V128),
    /// A reference.
    Ref(Ref),
}

/// A reference value.
#[derive(Clone, Debug)]
pub enum Ref {
    /// The null reference of the given type.
    Null(RefType),
    /// A reference to a function instance.
    Func(FuncRef),
    /// An opaque reference to a host value.
    Extern(u32),
}

/// A 128-bit vector value, stored as little-endian bytes. Lane views and
/// the lane-wise evaluators live in `simd`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct V128(pub(crate) [u8; 16]);

// === impl Val ===

impl Val {
    /// The default (all zeroes / null) value for the given type.
    pub fn default_for(ty: ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0),
            ValType::F64 => Val::F64(0),
            ValType::V128 => Val::V128(V128::ZERO),
            ValType::FuncRef => Val::Ref(Ref::Null(RefType::Func)),
            ValType::ExternRef => Val::Ref(Ref::Null(RefType::Extern)),
        }
    }

    /// The [`ValType`] of this value.
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
            Val::V128(_) => ValType::V128,
            Val::Ref(r) => r.ty().into(),
        }
    }

    enum_accessors! {
        v
        (I32(i32) is_i32 as_i32 unwrap_i32 *v)
        (I64(i64) is_i64 as_i64 unwrap_i64 *v)
        (F32(f32) is_f32 as_f32 unwrap_f32 f32::from_bits(*v))
        (F64(f64) is_f64 as_f64 unwrap_f64 f64::from_bits(*v))
        (V128(V128) is_v128 as_v128 unwrap_v128 *v)
        (Ref(Ref) is_ref to_ref unwrap_ref v.clone())
    }
}

impl From<i32> for Val {
    #[inline]
    fn from(val: i32) -> Val {
        Val::I32(val)
    }
}

impl From<i64> for Val {
    #[inline]
    fn from(val: i64) -> Val {
        Val::I64(val)
    }
}

impl From<f32> for Val {
    #[inline]
    fn from(val: f32) -> Val {
        Val::F32(val.to_bits())
    }
}

impl From<f64> for Val {
    #[inline]
    fn from(val: f64) -> Val {
        Val::F64(val.to_bits())
    }
}

impl From<V128> for Val {
    #[inline]
    fn from(val: V128) -> Val {
        Val::V128(val)
    }
}

impl From<Ref> for Val {
    #[inline]
    fn from(val: Ref) -> Val {
        Val::Ref(val)
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::I32(v) => write!(f, "{v}"),
            Val::I64(v) => write!(f, "{v}"),
            Val::F32(v) => write!(f, "{}", f32::from_bits(*v)),
            Val::F64(v) => write!(f, "{}", f64::from_bits(*v)),
            Val::V128(v) => write!(f, "{v:?}"),
            Val::Ref(r) => write!(f, "{r}"),
        }
    }
}

// === impl Ref ===

impl Ref {
    /// The [`RefType`] of this reference.
    pub fn ty(&self) -> RefType {
        match self {
            Ref::Null(ty) => *ty,
            Ref::Func(_) => RefType::Func,
            Ref::Extern(_) => RefType::Extern,
        }
    }

    /// Is this a null reference?
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Ref::Null(_))
    }
}

/// Reference equality is by identity for function references and
/// structural for nulls and extern references.
impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Ref::Null(a), Ref::Null(b)) => a == b,
            (Ref::Func(a), Ref::Func(b)) => Rc::ptr_eq(a, b),
            (Ref::Extern(a), Ref::Extern(b)) => a == b,
            _ => false,
        }
    }
}

impl From<FuncRef> for Ref {
    #[inline]
    fn from(f: FuncRef) -> Ref {
        Ref::Func(f)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ref::Null(RefType::Func) => f.write_str("null funcref"),
            Ref::Null(RefType::Extern) => f.write_str("null externref"),
            Ref::Func(_) => f.write_str("funcref"),
            Ref::Extern(v) => write!(f, "externref {v}"),
        }
    }
}

// === impl V128 ===

impl V128 {
    pub const ZERO: V128 = V128([0; 16]);

    #[inline]
    pub const fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn to_le_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl fmt::Debug for V128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:032x}", u128::from_le_bytes(self.0))
    }
}
