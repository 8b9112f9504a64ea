// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;

use crate::error::Error;
use crate::indices::{
    DataIndex, ElemIndex, FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TypeIndex,
};
use crate::module::FuncDesc;
use crate::types::{ExternType, FuncType, ValType};
use crate::utils::enum_accessors;
use crate::values::Val;
use crate::vm::{DataRef, ElemRef, FuncRef, GlobalRef, MemoryRef, TableRef};

/// A host function callback. It observes arguments and produces results
/// in program order; an error of the crash kind propagates unchanged.
pub type HostFn = Box<dyn Fn(&[Val]) -> Result<Vec<Val>, Error>>;

/// A WebAssembly module instance: the ordered entity sequences produced
/// by instantiation plus the export map.
///
/// Sequences are append-only once instantiation finishes; the only later
/// mutation is draining individual segments. Entities are shared between
/// instances (through imports) by handle, so linking never copies state.
///
/// https://webassembly.github.io/spec/core/exec/runtime.html#module-instances
#[derive(Debug, Default)]
pub struct ModuleInstance {
    pub(crate) types: PrimaryMap<TypeIndex, FuncType>,
    pub(crate) funcs: RefCell<PrimaryMap<FuncIndex, FuncRef>>,
    pub(crate) tables: RefCell<PrimaryMap<TableIndex, TableRef>>,
    pub(crate) memories: RefCell<PrimaryMap<MemoryIndex, MemoryRef>>,
    pub(crate) globals: RefCell<PrimaryMap<GlobalIndex, GlobalRef>>,
    pub(crate) elems: RefCell<PrimaryMap<ElemIndex, ElemRef>>,
    pub(crate) datas: RefCell<PrimaryMap<DataIndex, DataRef>>,
    pub(crate) exports: RefCell<HashMap<Box<str>, ExternVal>>,
}

/// A function instance: either guest code belonging to a module instance,
/// or an opaque host callback.
pub enum FuncInstance {
    Ast {
        ty: FuncType,
        /// Back-reference to the owning instance. Left unset during
        /// allocation and patched once the instance exists, which is what
        /// breaks the function/instance construction cycle.
        inst: RefCell<Weak<ModuleInstance>>,
        func: FuncBody,
    },
    Host {
        ty: FuncType,
        callback: HostFn,
    },
}

/// The code of a guest function.
#[derive(Clone, Debug)]
pub struct FuncBody {
    pub locals: Box<[ValType]>,
    pub body: crate::instr::InstrSeq,
    pub span: crate::error::Span,
}

/// An external value: anything that can be imported or exported.
#[derive(Clone, Debug)]
pub enum ExternVal {
    Func(FuncRef),
    Table(TableRef),
    Memory(MemoryRef),
    Global(GlobalRef),
}

// === impl ModuleInstance ===

impl ModuleInstance {
    /// An instance with no entities at all; the frame of a freshly
    /// spawned thread runs under one of these.
    pub fn empty() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn ty(&self, index: TypeIndex) -> Option<FuncType> {
        self.types.get(index).cloned()
    }

    pub(crate) fn func(&self, index: FuncIndex) -> Option<FuncRef> {
        self.funcs.borrow().get(index).cloned()
    }

    pub(crate) fn table(&self, index: TableIndex) -> Option<TableRef> {
        self.tables.borrow().get(index).cloned()
    }

    pub(crate) fn memory(&self, index: MemoryIndex) -> Option<MemoryRef> {
        self.memories.borrow().get(index).cloned()
    }

    pub(crate) fn global(&self, index: GlobalIndex) -> Option<GlobalRef> {
        self.globals.borrow().get(index).cloned()
    }

    pub(crate) fn elem(&self, index: ElemIndex) -> Option<ElemRef> {
        self.elems.borrow().get(index).cloned()
    }

    pub(crate) fn data(&self, index: DataIndex) -> Option<DataRef> {
        self.datas.borrow().get(index).cloned()
    }

    /// Attempts to get an export from this instance.
    pub fn get_export(&self, name: &str) -> Option<ExternVal> {
        self.exports.borrow().get(name).cloned()
    }

    /// Attempts to get an exported function from this instance.
    pub fn get_func(&self, name: &str) -> Option<FuncRef> {
        self.get_export(name)?.as_func()
    }

    /// Attempts to get an exported table from this instance.
    pub fn get_table(&self, name: &str) -> Option<TableRef> {
        self.get_export(name)?.as_table()
    }

    /// Attempts to get an exported memory from this instance.
    pub fn get_memory(&self, name: &str) -> Option<MemoryRef> {
        self.get_export(name)?.as_memory()
    }

    /// Attempts to get an exported global from this instance.
    pub fn get_global(&self, name: &str) -> Option<GlobalRef> {
        self.get_export(name)?.as_global()
    }
}

// === impl FuncInstance ===

impl FuncInstance {
    /// Creates a host function instance from a callback.
    pub fn host(
        ty: FuncType,
        callback: impl Fn(&[Val]) -> Result<Vec<Val>, Error> + 'static,
    ) -> FuncRef {
        Rc::new(FuncInstance::Host {
            ty,
            callback: Box::new(callback),
        })
    }

    /// Allocates a guest function instance with the back-reference unset.
    pub(crate) fn ast(ty: FuncType, desc: &FuncDesc) -> FuncRef {
        Rc::new(FuncInstance::Ast {
            ty,
            inst: RefCell::new(Weak::new()),
            func: FuncBody {
                locals: desc.locals.clone().into_boxed_slice(),
                body: desc.body.clone(),
                span: desc.span,
            },
        })
    }

    pub fn ty(&self) -> &FuncType {
        match self {
            FuncInstance::Ast { ty, .. } | FuncInstance::Host { ty, .. } => ty,
        }
    }

    /// The owning module instance of a guest function, if the
    /// back-reference has been patched and the instance is alive.
    pub(crate) fn instance(&self) -> Option<Rc<ModuleInstance>> {
        match self {
            FuncInstance::Ast { inst, .. } => inst.borrow().upgrade(),
            FuncInstance::Host { .. } => None,
        }
    }
}

impl fmt::Debug for FuncInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncInstance::Ast { ty, func, .. } => f
                .debug_struct("FuncInstance::Ast")
                .field("ty", ty)
                .field("func", func)
                .finish_non_exhaustive(),
            FuncInstance::Host { ty, .. } => f
                .debug_struct("FuncInstance::Host")
                .field("ty", ty)
                .finish_non_exhaustive(),
        }
    }
}

// === impl ExternVal ===

impl ExternVal {
    /// The extern type of this value, with current sizes as table/memory
    /// minima. Import binding checks the declared import type against
    /// this.
    pub fn ty(&self) -> ExternType {
        match self {
            ExternVal::Func(f) => ExternType::Func(f.ty().clone()),
            ExternVal::Table(t) => ExternType::Table(t.borrow().ty()),
            ExternVal::Memory(m) => ExternType::Memory(m.borrow().ty()),
            ExternVal::Global(g) => ExternType::Global(g.borrow().ty()),
        }
    }

    enum_accessors! {
        v
        (Func(FuncRef) is_func as_func unwrap_func v.clone())
        (Table(TableRef) is_table as_table unwrap_table v.clone())
        (Memory(MemoryRef) is_memory as_memory unwrap_memory v.clone())
        (Global(GlobalRef) is_global as_global unwrap_global v.clone())
    }
}

impl From<FuncRef> for ExternVal {
    fn from(f: FuncRef) -> Self {
        ExternVal::Func(f)
    }
}

impl From<TableRef> for ExternVal {
    fn from(t: TableRef) -> Self {
        ExternVal::Table(t)
    }
}

impl From<MemoryRef> for ExternVal {
    fn from(m: MemoryRef) -> Self {
        ExternVal::Memory(m)
    }
}

impl From<GlobalRef> for ExternVal {
    fn from(g: GlobalRef) -> Self {
        ExternVal::Global(g)
    }
}
