// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::boxed::Box;
use core::fmt;

/// The type of a WebAssembly value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
}

/// The type of a WebAssembly numeric value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NumType {
    I32,
    I64,
    F32,
    F64,
}

/// The type of a WebAssembly reference value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RefType {
    Func,
    Extern,
}

/// Whether a global may be mutated after initialization.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mutability {
    Const,
    Var,
}

/// A function signature.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FuncType {
    pub params: Box<[ValType]>,
    pub results: Box<[ValType]>,
}

/// Size bounds of a table (in elements) or memory (in pages).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

/// The type of a table.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TableType {
    pub element: RefType,
    pub limits: Limits,
}

/// The type of a linear memory. `shared` is required for
/// `memory.atomic.wait` to succeed on it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemoryType {
    pub limits: Limits,
    pub shared: bool,
}

/// The type of a global.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GlobalType {
    pub content: ValType,
    pub mutability: Mutability,
}

/// The type of anything that can be imported or exported.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ExternType {
    Func(FuncType),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

// === impl ValType ===

impl ValType {
    pub fn is_num(&self) -> bool {
        matches!(
            self,
            ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64
        )
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, ValType::FuncRef | ValType::ExternRef)
    }
}

impl From<NumType> for ValType {
    fn from(ty: NumType) -> Self {
        match ty {
            NumType::I32 => ValType::I32,
            NumType::I64 => ValType::I64,
            NumType::F32 => ValType::F32,
            NumType::F64 => ValType::F64,
        }
    }
}

impl From<RefType> for ValType {
    fn from(ty: RefType) -> Self {
        match ty {
            RefType::Func => ValType::FuncRef,
            RefType::Extern => ValType::ExternRef,
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::V128 => "v128",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

// === impl NumType ===

impl NumType {
    /// Natural size of the type in bytes.
    pub fn size(&self) -> u64 {
        match self {
            NumType::I32 | NumType::F32 => 4,
            NumType::I64 | NumType::F64 => 8,
        }
    }
}

// === impl FuncType ===

impl FuncType {
    pub fn new(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str("] -> [")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{r}")?;
        }
        f.write_str("]")
    }
}

// === impl Limits ===

impl Limits {
    pub const fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    /// Limits subtyping: do actual limits `self` satisfy declared limits
    /// `declared`?
    pub fn matches(&self, declared: &Limits) -> bool {
        self.min >= declared.min
            && match declared.max {
                None => true,
                Some(d) => matches!(self.max, Some(a) if a <= d),
            }
    }
}

// === impl ExternType ===

impl ExternType {
    /// Extern subtyping used for import binding: does an actual external
    /// of type `self` satisfy the declared import type `declared`?
    pub fn matches(&self, declared: &ExternType) -> bool {
        match (self, declared) {
            (ExternType::Func(a), ExternType::Func(d)) => a == d,
            (ExternType::Table(a), ExternType::Table(d)) => {
                a.element == d.element && a.limits.matches(&d.limits)
            }
            (ExternType::Memory(a), ExternType::Memory(d)) => {
                a.shared == d.shared && a.limits.matches(&d.limits)
            }
            (ExternType::Global(a), ExternType::Global(d)) => a == d,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExternType::Func(_) => "function",
            ExternType::Table(_) => "table",
            ExternType::Memory(_) => "memory",
            ExternType::Global(_) => "global",
        }
    }
}

impl fmt::Display for ExternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternType::Func(ty) => write!(f, "func {ty}"),
            ExternType::Table(ty) => {
                write!(f, "table {} {:?}", ty.element.display(), ty.limits)
            }
            ExternType::Memory(ty) => {
                if ty.shared {
                    write!(f, "memory {:?} shared", ty.limits)
                } else {
                    write!(f, "memory {:?}", ty.limits)
                }
            }
            ExternType::Global(ty) => match ty.mutability {
                Mutability::Const => write!(f, "global {}", ty.content),
                Mutability::Var => write!(f, "global mut {}", ty.content),
            },
        }
    }
}

// === impl RefType ===

impl RefType {
    fn display(&self) -> &'static str {
        match self {
            RefType::Func => "funcref",
            RefType::Extern => "externref",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_matching() {
        let declared = Limits::new(1, Some(4));
        assert!(Limits::new(1, Some(4)).matches(&declared));
        assert!(Limits::new(2, Some(3)).matches(&declared));
        assert!(!Limits::new(0, Some(4)).matches(&declared));
        assert!(!Limits::new(1, Some(5)).matches(&declared));
        assert!(!Limits::new(1, None).matches(&declared));
        // declared max absent accepts anything above the min
        assert!(Limits::new(1, None).matches(&Limits::new(1, None)));
    }

    #[test]
    fn extern_matching_is_kind_strict() {
        let mem = ExternType::Memory(MemoryType {
            limits: Limits::new(1, None),
            shared: false,
        });
        let table = ExternType::Table(TableType {
            element: RefType::Func,
            limits: Limits::new(1, None),
        });
        assert!(!mem.matches(&table));
        assert!(mem.matches(&mem.clone()));
    }

    #[test]
    fn shared_flag_must_agree() {
        let shared = ExternType::Memory(MemoryType {
            limits: Limits::new(1, Some(1)),
            shared: true,
        });
        let plain = ExternType::Memory(MemoryType {
            limits: Limits::new(1, Some(1)),
            shared: false,
        });
        assert!(!shared.matches(&plain));
        assert!(!plain.matches(&shared));
    }
}
