// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The validated module description handed over by the embedder.
//!
//! This is the input format of `Config::init`; the embedder's decoder and
//! validator produce it. Imported entities occupy the front of each index
//! space, so e.g. `FuncIndex(0)` names the first imported function when
//! imports are present.

use alloc::boxed::Box;
use alloc::vec::Vec;

use cranelift_entity::PrimaryMap;

use crate::error::{Span, Spanned};
use crate::indices::{DefinedFuncIndex, FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TypeIndex};
use crate::instr::{Instr, InstrSeq};
use crate::types::{FuncType, GlobalType, MemoryType, RefType, TableType, ValType};
use crate::values::Val;

/// A fully validated module, ready for instantiation.
#[derive(Default, Debug)]
pub struct Module {
    /// The function types declared in this module.
    pub types: PrimaryMap<TypeIndex, FuncType>,
    /// Imports, in the order the instantiation externals must be supplied.
    pub imports: Vec<Import>,
    /// Locally defined functions.
    pub funcs: PrimaryMap<DefinedFuncIndex, FuncDesc>,
    /// Locally defined tables.
    pub tables: Vec<TableType>,
    /// Locally defined memories.
    pub memories: Vec<MemoryType>,
    /// Locally defined globals.
    pub globals: Vec<GlobalDesc>,
    /// Element segments.
    pub elems: Vec<ElemDesc>,
    /// Data segments.
    pub datas: Vec<DataDesc>,
    /// The start function, run at the end of instantiation.
    pub start: Option<FuncIndex>,
    /// Exports.
    pub exports: Vec<Export>,
    pub span: Span,
}

/// A WebAssembly import.
#[derive(Clone, Debug)]
pub struct Import {
    /// The module or namespace being imported from.
    pub module: Box<str>,
    /// The name of the item being imported.
    pub name: Box<str>,
    /// The declared type of the import.
    pub ty: crate::types::ExternType,
}

/// A WebAssembly export.
#[derive(Clone, Debug)]
pub struct Export {
    pub name: Box<str>,
    pub index: EntityIndex,
}

/// An index into one of the four exportable entity spaces.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntityIndex {
    Func(FuncIndex),
    Table(TableIndex),
    Memory(MemoryIndex),
    Global(GlobalIndex),
}

/// A locally defined function.
#[derive(Clone, Debug)]
pub struct FuncDesc {
    /// The index of the function's signature.
    pub ty: TypeIndex,
    /// Declared locals, following the parameters.
    pub locals: Vec<ValType>,
    pub body: InstrSeq,
    pub span: Span,
}

/// A locally defined global and its initializer.
#[derive(Clone, Debug)]
pub struct GlobalDesc {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

/// A constant initializer expression. Constant expressions are reduced by
/// the same machine as everything else, through `eval_const`.
#[derive(Clone, Debug, Default)]
pub struct ConstExpr(pub Vec<Spanned<Instr>>);

/// An element segment.
#[derive(Clone, Debug)]
pub struct ElemDesc {
    pub ty: RefType,
    /// One constant expression per element, each evaluating to a
    /// reference.
    pub items: Vec<ConstExpr>,
    pub mode: ElemMode,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum ElemMode {
    Passive,
    Active { table: TableIndex, offset: ConstExpr },
    Declarative,
}

/// A data segment.
#[derive(Clone, Debug)]
pub struct DataDesc {
    pub bytes: Box<[u8]>,
    pub mode: DataMode,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum DataMode {
    Passive,
    Active { offset: ConstExpr },
}

// === impl ConstExpr ===

impl ConstExpr {
    pub fn new(instrs: impl IntoIterator<Item = Spanned<Instr>>) -> Self {
        Self(instrs.into_iter().collect())
    }

    /// A constant expression producing the given value.
    pub fn value(v: Val) -> Self {
        Self::new([Spanned::new(Span::default(), Instr::Const(v))])
    }

    /// A constant expression reading the given global.
    pub fn global(index: GlobalIndex) -> Self {
        Self::new([Spanned::new(Span::default(), Instr::GlobalGet(index))])
    }

    /// A constant expression producing a reference to the given function.
    pub fn ref_func(index: FuncIndex) -> Self {
        Self::new([Spanned::new(Span::default(), Instr::RefFunc(index))])
    }

    /// A constant expression producing a null reference.
    pub fn ref_null(ty: RefType) -> Self {
        Self::new([Spanned::new(Span::default(), Instr::RefNull(ty))])
    }
}
