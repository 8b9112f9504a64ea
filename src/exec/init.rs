// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Instantiation and constant-expression evaluation.
//!
//! `instantiate` runs in four substeps: positional import binding with
//! extern-type matching, function allocation with the back-reference left
//! unset, store allocation (globals and element items evaluated with
//! [`eval_const`] over the partial instance), and finally the
//! back-reference patch plus the bootstrap splice. The two-stage function
//! allocation is what lets initializer constants reference previously
//! allocated globals while functions and the instance refer to each other
//! without a construction cycle.

use alloc::rc::Rc;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::cell::RefCell;

use cranelift_entity::EntityRef;

use crate::error::{Error, Spanned, WithSpan};
use crate::exec::{AdminInstr, Code, Config, Flags, Frame};
use crate::indices::FuncIndex;
use crate::instr::Instr;
use crate::module::{ConstExpr, DataMode, ElemMode, EntityIndex, Module};
use crate::values::Val;
use crate::vm::{
    DataSegment, ElemSegment, ExternVal, FuncInstance, Global, Memory, ModuleInstance, Table,
};

/// Reduces a constant initializer expression to a single value, using a
/// throwaway single-thread configuration over the given instance.
pub fn eval_const(inst: &Rc<ModuleInstance>, expr: &ConstExpr) -> crate::Result<Val> {
    let mut config = Config::new(Flags::default());
    let id = config.spawn();
    let thread = &mut config.threads[id];
    thread.frame = Frame::bare(inst.clone());
    thread.code.instrs.extend(
        expr.0
            .iter()
            .map(|e| AdminInstr::Plain(e.it.clone()).at(e.span)),
    );
    let mut results = config.eval(id)?;
    let span = expr.0.first().map(|e| e.span).unwrap_or_default();
    if results.len() != 1 {
        return Err(Error::crash(span, "constant expression must produce one value").into());
    }
    Ok(results.pop().unwrap())
}

pub(crate) fn instantiate(
    config: &mut Config,
    id: crate::exec::ThreadId,
    module: &Module,
    externals: &[ExternVal],
) -> crate::Result<Rc<ModuleInstance>> {
    let span = module.span;

    if externals.len() != module.imports.len() {
        return Err(Error::link(
            span,
            alloc::format!(
                "wrong number of imports provided for instantiation: expected {}, got {}",
                module.imports.len(),
                externals.len()
            ),
        )
        .into());
    }

    let inst = Rc::new(ModuleInstance {
        types: module.types.clone(),
        ..ModuleInstance::default()
    });

    // 1. import binding, in import order
    for (import, ext) in module.imports.iter().zip(externals) {
        let actual = ext.ty();
        if !actual.matches(&import.ty) {
            return Err(Error::link(
                span,
                alloc::format!(
                    "incompatible import type for {}::{}: expected {}, got {}",
                    import.module,
                    import.name,
                    import.ty,
                    actual
                ),
            )
            .into());
        }
        match ext {
            ExternVal::Func(f) => {
                inst.funcs.borrow_mut().push(f.clone());
            }
            ExternVal::Table(t) => {
                inst.tables.borrow_mut().push(t.clone());
            }
            ExternVal::Memory(m) => {
                inst.memories.borrow_mut().push(m.clone());
            }
            ExternVal::Global(g) => {
                inst.globals.borrow_mut().push(g.clone());
            }
        }
    }
    let num_imported_funcs = inst.funcs.borrow().len();

    // 2. function allocation; the owning instance is patched in below
    for (_, desc) in module.funcs.iter() {
        let ty = inst
            .ty(desc.ty)
            .ok_or_else(|| Error::crash(span, "undefined function type"))?;
        inst.funcs.borrow_mut().push(FuncInstance::ast(ty, desc));
    }

    // 3. store allocation; globals and element items can read earlier
    //    entities of this very instance
    for table_ty in &module.tables {
        inst.tables
            .borrow_mut()
            .push(Rc::new(RefCell::new(Table::new(*table_ty))));
    }
    for memory_ty in &module.memories {
        inst.memories
            .borrow_mut()
            .push(Rc::new(RefCell::new(Memory::new(*memory_ty))));
    }
    for global in &module.globals {
        let value = eval_const(&inst, &global.init)?;
        let global =
            Global::new(global.ty, value).map_err(|e| Error::crash(span, e.to_string()))?;
        inst.globals.borrow_mut().push(Rc::new(RefCell::new(global)));
    }
    for elem in &module.elems {
        let mut items = Vec::with_capacity(elem.items.len());
        for expr in &elem.items {
            let v = eval_const(&inst, expr)?;
            let r = v
                .to_ref()
                .ok_or_else(|| Error::crash(elem.span, "element item is not a reference"))?;
            items.push(r);
        }
        inst.elems
            .borrow_mut()
            .push(Rc::new(RefCell::new(ElemSegment::new(items))));
    }
    for data in &module.datas {
        inst.datas
            .borrow_mut()
            .push(Rc::new(RefCell::new(DataSegment::new(data.bytes.clone()))));
    }
    for export in &module.exports {
        let value = match export.index {
            EntityIndex::Func(i) => inst.func(i).map(ExternVal::Func),
            EntityIndex::Table(i) => inst.table(i).map(ExternVal::Table),
            EntityIndex::Memory(i) => inst.memory(i).map(ExternVal::Memory),
            EntityIndex::Global(i) => inst.global(i).map(ExternVal::Global),
        }
        .ok_or_else(|| Error::crash(span, alloc::format!("undefined export {}", export.name)))?;
        inst.exports
            .borrow_mut()
            .insert(export.name.clone(), value);
    }

    // 4a. patch the back-reference of every locally defined function
    {
        let funcs = inst.funcs.borrow();
        for i in num_imported_funcs..funcs.len() {
            if let FuncInstance::Ast { inst: cell, .. } = &*funcs[FuncIndex::new(i)] {
                *cell.borrow_mut() = Rc::downgrade(&inst);
            }
        }
    }

    // 4b. bootstrap: element initializers, then data initializers, then
    //     the start call, run inside a frame of the new instance
    let mut bootstrap: Vec<Spanned<AdminInstr>> = Vec::new();
    for (i, elem) in module.elems.iter().enumerate() {
        let index = crate::indices::ElemIndex::new(i);
        match &elem.mode {
            ElemMode::Active { table, offset } => {
                bootstrap.extend(
                    offset
                        .0
                        .iter()
                        .map(|e| AdminInstr::Plain(e.it.clone()).at(e.span)),
                );
                bootstrap.extend(
                    [
                        Instr::Const(Val::I32(0)),
                        Instr::Const(Val::I32(elem.items.len() as i32)),
                        Instr::TableInit(*table, index),
                        Instr::ElemDrop(index),
                    ]
                    .map(|it| AdminInstr::Plain(it).at(elem.span)),
                );
            }
            ElemMode::Declarative => {
                bootstrap.push(AdminInstr::Plain(Instr::ElemDrop(index)).at(elem.span));
            }
            ElemMode::Passive => {}
        }
    }
    for (i, data) in module.datas.iter().enumerate() {
        let index = crate::indices::DataIndex::new(i);
        match &data.mode {
            DataMode::Active { offset } => {
                bootstrap.extend(
                    offset
                        .0
                        .iter()
                        .map(|e| AdminInstr::Plain(e.it.clone()).at(e.span)),
                );
                bootstrap.extend(
                    [
                        Instr::Const(Val::I32(0)),
                        Instr::Const(Val::I32(data.bytes.len() as i32)),
                        Instr::MemoryInit(index),
                        Instr::DataDrop(index),
                    ]
                    .map(|it| AdminInstr::Plain(it).at(data.span)),
                );
            }
            DataMode::Passive => {}
        }
    }
    if let Some(start) = module.start {
        bootstrap.push(AdminInstr::Plain(Instr::Call(start)).at(span));
    }

    config.threads[id].code.instrs.push_front(
        AdminInstr::Frame {
            arity: 0,
            frame: Frame::bare(inst.clone()),
            code: Code::new(Vec::new(), bootstrap),
        }
        .at(span),
    );

    tracing::debug!(
        funcs = inst.funcs.borrow().len(),
        tables = inst.tables.borrow().len(),
        memories = inst.memories.borrow().len(),
        globals = inst.globals.borrow().len(),
        "instantiated module"
    );

    Ok(inst)
}
