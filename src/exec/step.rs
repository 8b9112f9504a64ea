// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! One small-step reduction at a time.
//!
//! [`step_thread`] decomposes a thread's code into the head instruction
//! plus the value stack and rewrites the head into its reduct. Guest
//! traps become `Trapping` administrative instructions that bubble
//! outward; only exhaustion and crashes surface as `Err`.
//!
//! Bulk memory and table operations reduce to a single element access
//! plus a re-emission of themselves with stepped indices. The pre-check
//! traps before any side effect, and a trap in a later iteration leaves
//! the already-written prefix observable, as required. Copies run
//! ascending when `dst <= src` and descending otherwise, preserving
//! overlap semantics.

use alloc::rc::Rc;
use alloc::string::ToString;
use alloc::vec::Vec;

use cranelift_entity::EntityRef;
use smallvec::{SmallVec, smallvec};

use crate::TIMEOUT_EPSILON;
use crate::error::{Error, Span, WithSpan};
use crate::exec::{AdminInstr, Code, Frame, Label, Thread};
use crate::indices::{DataIndex, ElemIndex, FuncIndex, GlobalIndex, MemoryIndex, TableIndex};
use crate::instr::{BlockType, Instr, InstrSeq, MemArg};
use crate::numeric::{self, NumericError};
use crate::simd;
use crate::trap::TrapKind;
use crate::types::{NumType, ValType};
use crate::values::{Ref, V128, Val};
use crate::vm::{DataRef, ElemRef, FuncRef, Memory, MemoryRef, TableRef};

/// What the scheduler must do after a reduction.
#[derive(Debug)]
pub(crate) enum Action {
    None,
    /// Resolve a `memory.atomic.notify`: wake up to `count` threads
    /// suspended on (`mem`, `addr`) and plug the woken count back in.
    Notify {
        mem: MemoryRef,
        addr: u64,
        count: u32,
    },
}

type Emit = SmallVec<[crate::error::Spanned<AdminInstr>; 4]>;

const STACK_CRASH: &str = "missing or ill-typed operand on stack";

/// Performs one reduction on the given thread.
pub(crate) fn step_thread(thread: &mut Thread) -> Result<Action, Error> {
    step_code(&thread.frame, &mut thread.code, thread.budget)
}

/// Is the active redex of this code a `Suspend`? Descends through label
/// and frame wrappers the same way the reducer does.
pub(crate) fn is_suspended(code: &Code) -> bool {
    match code.instrs.front().map(|e| &e.it) {
        Some(AdminInstr::Label(label)) => is_suspended(&label.code),
        Some(AdminInstr::Frame { code, .. }) => is_suspended(code),
        Some(AdminInstr::Suspend { .. }) => true,
        _ => false,
    }
}

/// Attempts to wake a thread suspended on (`mem`, `addr`): descends
/// through wrappers to the active redex and, when it is a matching
/// `Suspend` (pointer-equal memory, equal address), replaces it with the
/// "notified" result `0`.
pub(crate) fn try_unsuspend(code: &mut Code, mem: &MemoryRef, addr: u64) -> bool {
    let Some(head) = code.instrs.front_mut() else {
        return false;
    };
    match &mut head.it {
        AdminInstr::Label(label) => try_unsuspend(&mut label.code, mem, addr),
        AdminInstr::Frame { code, .. } => try_unsuspend(code, mem, addr),
        AdminInstr::Suspend { mem: m, addr: a, .. } if Rc::ptr_eq(m, mem) && *a == addr => {
            head.it = AdminInstr::Plain(Instr::Const(Val::I32(0)));
            true
        }
        _ => false,
    }
}

/// Pushes a value at the current hole position: the innermost active
/// code, reached by descending through wrappers. Used to deliver the
/// woken count to the thread that issued the notify.
pub(crate) fn plug_result(code: &mut Code, v: Val) {
    match code.instrs.front_mut().map(|e| &mut e.it) {
        Some(AdminInstr::Label(label)) => plug_result(&mut label.code, v),
        Some(AdminInstr::Frame { code, .. }) => plug_result(code, v),
        _ => code.stack.push(v),
    }
}

fn step_code(frame: &Frame, code: &mut Code, budget: u32) -> Result<Action, Error> {
    let Some(head) = code.instrs.pop_front() else {
        return Err(Error::crash(Span::default(), "cannot step finished code"));
    };
    let span = head.span;
    match head.it {
        AdminInstr::Plain(instr) => {
            let (emit, action) = step_plain(frame, &mut code.stack, &instr, span)?;
            for e in emit.into_iter().rev() {
                code.instrs.push_front(e);
            }
            Ok(action)
        }
        AdminInstr::Refer(r) => {
            code.stack.push(Val::Ref(r));
            Ok(Action::None)
        }
        AdminInstr::Invoke(func) => invoke_func(code, func, span, budget),
        AdminInstr::Label(mut label) => {
            if label.code.instrs.is_empty() {
                // block exit: splice the inner results into the parent
                code.stack.append(&mut label.code.stack);
                return Ok(Action::None);
            }
            match label.code.instrs.front().map(|e| &e.it) {
                // traps and returns bubble through labels unchanged
                Some(AdminInstr::Trapping(_) | AdminInstr::Returning(_)) => {
                    let inner = label.code.instrs.pop_front().unwrap();
                    code.instrs.push_front(inner);
                    Ok(Action::None)
                }
                Some(AdminInstr::Breaking(0, _)) => {
                    let Some(crate::error::Spanned {
                        it: AdminInstr::Breaking(_, mut vs0),
                        ..
                    }) = label.code.instrs.pop_front()
                    else {
                        unreachable!()
                    };
                    let n = label.arity as usize;
                    if vs0.len() < n {
                        return Err(Error::crash(span, STACK_CRASH));
                    }
                    code.stack.extend(vs0.split_off(vs0.len() - n));
                    for e in label.cont.iter().rev() {
                        code.instrs
                            .push_front(AdminInstr::Plain(e.it.clone()).at(e.span));
                    }
                    Ok(Action::None)
                }
                Some(AdminInstr::Breaking(..)) => {
                    let Some(crate::error::Spanned {
                        span: at,
                        it: AdminInstr::Breaking(k, vs0),
                    }) = label.code.instrs.pop_front()
                    else {
                        unreachable!()
                    };
                    code.instrs.push_front(AdminInstr::Breaking(k - 1, vs0).at(at));
                    Ok(Action::None)
                }
                Some(AdminInstr::Suspend { .. }) => {
                    code.instrs.push_front(AdminInstr::Label(label).at(span));
                    Err(Error::crash(span, "cannot step a suspended thread"))
                }
                _ => {
                    let action = step_code(frame, &mut label.code, budget)?;
                    code.instrs.push_front(AdminInstr::Label(label).at(span));
                    Ok(action)
                }
            }
        }
        AdminInstr::Frame {
            arity,
            frame: inner_frame,
            code: mut inner_code,
        } => {
            if inner_code.instrs.is_empty() {
                code.stack.append(&mut inner_code.stack);
                return Ok(Action::None);
            }
            match inner_code.instrs.front().map(|e| &e.it) {
                Some(AdminInstr::Trapping(_)) => {
                    let inner = inner_code.instrs.pop_front().unwrap();
                    code.instrs.push_front(inner);
                    Ok(Action::None)
                }
                // the nearest frame consumes a pending return, delivering
                // exactly `arity` values
                Some(AdminInstr::Returning(_)) => {
                    let Some(crate::error::Spanned {
                        it: AdminInstr::Returning(mut vs0),
                        ..
                    }) = inner_code.instrs.pop_front()
                    else {
                        unreachable!()
                    };
                    let n = arity as usize;
                    if vs0.len() < n {
                        return Err(Error::crash(span, STACK_CRASH));
                    }
                    code.stack.extend(vs0.split_off(vs0.len() - n));
                    Ok(Action::None)
                }
                Some(AdminInstr::Breaking(..)) => Err(Error::crash(span, "undefined label")),
                Some(AdminInstr::Suspend { .. }) => {
                    code.instrs.push_front(
                        AdminInstr::Frame {
                            arity,
                            frame: inner_frame,
                            code: inner_code,
                        }
                        .at(span),
                    );
                    Err(Error::crash(span, "cannot step a suspended thread"))
                }
                _ => {
                    let action =
                        step_code(&inner_frame, &mut inner_code, budget.saturating_sub(1))?;
                    code.instrs.push_front(
                        AdminInstr::Frame {
                            arity,
                            frame: inner_frame,
                            code: inner_code,
                        }
                        .at(span),
                    );
                    Ok(action)
                }
            }
        }
        AdminInstr::Trapping(kind) => {
            code.instrs.push_front(AdminInstr::Trapping(kind).at(span));
            Err(Error::crash(span, "cannot step trapped code"))
        }
        AdminInstr::Returning(_) => Err(Error::crash(span, "undefined frame")),
        AdminInstr::Breaking(..) => Err(Error::crash(span, "undefined label")),
        AdminInstr::Suspend { mem, addr, timeout } => {
            code.instrs
                .push_front(AdminInstr::Suspend { mem, addr, timeout }.at(span));
            Err(Error::crash(span, "cannot step a suspended thread"))
        }
    }
}

fn invoke_func(code: &mut Code, func: FuncRef, span: Span, budget: u32) -> Result<Action, Error> {
    if budget == 0 {
        return Err(Error::exhaustion(span));
    }
    let n = func.ty().params.len();
    if code.stack.len() < n {
        return Err(Error::crash(span, STACK_CRASH));
    }
    let args = code.stack.split_off(code.stack.len() - n);
    match &*func {
        crate::vm::FuncInstance::Ast { ty, func: body, .. } => {
            let inst = func.instance().ok_or_else(|| {
                Error::crash(span, "function instance is not linked to a module instance")
            })?;
            let mut locals: Vec<core::cell::RefCell<Val>> =
                args.into_iter().map(core::cell::RefCell::new).collect();
            locals.extend(
                body.locals
                    .iter()
                    .map(|t| core::cell::RefCell::new(Val::default_for(*t))),
            );
            let arity = ty.results.len() as u32;
            let label = Label {
                arity,
                cont: Vec::new(),
                code: Code::new(Vec::new(), plains(&body.body)),
            };
            let inner = Code::new(Vec::new(), [AdminInstr::Label(label).at(body.span)]);
            code.instrs.push_front(
                AdminInstr::Frame {
                    arity,
                    frame: Frame { inst, locals },
                    code: inner,
                }
                .at(span),
            );
            Ok(Action::None)
        }
        crate::vm::FuncInstance::Host { ty, callback } => {
            tracing::trace!("calling host function");
            // host failures, crash kind included, propagate unchanged
            let results = callback(&args)?;
            if results.len() != ty.results.len()
                || results
                    .iter()
                    .zip(ty.results.iter())
                    .any(|(r, t)| r.ty() != *t)
            {
                return Err(Error::crash(span, "ill-typed results from host function"));
            }
            code.stack.extend(results);
            Ok(Action::None)
        }
    }
}

fn plains(seq: &InstrSeq) -> impl Iterator<Item = crate::error::Spanned<AdminInstr>> + '_ {
    seq.iter().map(|e| AdminInstr::Plain(e.it.clone()).at(e.span))
}

fn trapping(kind: TrapKind, span: Span) -> (Emit, Action) {
    (smallvec![AdminInstr::Trapping(kind).at(span)], Action::None)
}

fn done() -> (Emit, Action) {
    (Emit::new(), Action::None)
}

fn emit(span: Span, instrs: impl IntoIterator<Item = AdminInstr>) -> (Emit, Action) {
    (instrs.into_iter().map(|i| i.at(span)).collect(), Action::None)
}

fn pop(stack: &mut Vec<Val>, span: Span) -> Result<Val, Error> {
    stack.pop().ok_or_else(|| Error::crash(span, STACK_CRASH))
}

fn pop_i32(stack: &mut Vec<Val>, span: Span) -> Result<i32, Error> {
    match pop(stack, span)? {
        Val::I32(x) => Ok(x),
        _ => Err(Error::crash(span, STACK_CRASH)),
    }
}

fn pop_i64(stack: &mut Vec<Val>, span: Span) -> Result<i64, Error> {
    match pop(stack, span)? {
        Val::I64(x) => Ok(x),
        _ => Err(Error::crash(span, STACK_CRASH)),
    }
}

fn pop_ref(stack: &mut Vec<Val>, span: Span) -> Result<Ref, Error> {
    match pop(stack, span)? {
        Val::Ref(r) => Ok(r),
        _ => Err(Error::crash(span, STACK_CRASH)),
    }
}

fn pop_v128(stack: &mut Vec<Val>, span: Span) -> Result<V128, Error> {
    match pop(stack, span)? {
        Val::V128(v) => Ok(v),
        _ => Err(Error::crash(span, STACK_CRASH)),
    }
}

fn take(stack: &mut Vec<Val>, n: usize, span: Span) -> Result<Vec<Val>, Error> {
    if stack.len() < n {
        return Err(Error::crash(span, STACK_CRASH));
    }
    Ok(stack.split_off(stack.len() - n))
}

fn memory0(frame: &Frame, span: Span) -> Result<MemoryRef, Error> {
    frame
        .inst
        .memory(MemoryIndex::from_u32(0))
        .ok_or_else(|| Error::crash(span, "undefined memory 0"))
}

fn table_at(frame: &Frame, x: TableIndex, span: Span) -> Result<TableRef, Error> {
    frame
        .inst
        .table(x)
        .ok_or_else(|| Error::crash(span, alloc::format!("undefined table {}", x.as_u32())))
}

fn func_at(frame: &Frame, x: FuncIndex, span: Span) -> Result<FuncRef, Error> {
    frame
        .inst
        .func(x)
        .ok_or_else(|| Error::crash(span, alloc::format!("undefined function {}", x.as_u32())))
}

fn global_at(frame: &Frame, x: GlobalIndex, span: Span) -> Result<crate::vm::GlobalRef, Error> {
    frame
        .inst
        .global(x)
        .ok_or_else(|| Error::crash(span, alloc::format!("undefined global {}", x.as_u32())))
}

fn elem_at(frame: &Frame, x: ElemIndex, span: Span) -> Result<ElemRef, Error> {
    frame
        .inst
        .elem(x)
        .ok_or_else(|| Error::crash(span, alloc::format!("undefined element segment {}", x.as_u32())))
}

fn data_at(frame: &Frame, x: DataIndex, span: Span) -> Result<DataRef, Error> {
    frame
        .inst
        .data(x)
        .ok_or_else(|| Error::crash(span, alloc::format!("undefined data segment {}", x.as_u32())))
}

/// (parameter count, result arity) of a block type.
fn block_arity(frame: &Frame, bt: BlockType, span: Span) -> Result<(usize, u32), Error> {
    Ok(match bt {
        BlockType::Empty => (0, 0),
        BlockType::Val(_) => (0, 1),
        BlockType::Func(x) => {
            let ty = frame.inst.ty(x).ok_or_else(|| {
                Error::crash(span, alloc::format!("undefined type {}", x.as_u32()))
            })?;
            (ty.params.len(), ty.results.len() as u32)
        }
    })
}

fn effective_addr(i: i32, memarg: &MemArg) -> u64 {
    i as u32 as u64 + memarg.offset as u64
}

fn val_from_bits(ty: NumType, bits: u64, span: Span) -> Result<Val, Error> {
    match ty {
        NumType::I32 => Ok(Val::I32(bits as u32 as i32)),
        NumType::I64 => Ok(Val::I64(bits as i64)),
        NumType::F32 | NumType::F64 => Err(Error::crash(span, STACK_CRASH)),
    }
}

fn val_to_bits(ty: NumType, v: &Val, span: Span) -> Result<u64, Error> {
    match (ty, v) {
        (NumType::I32, Val::I32(x)) => Ok(*x as u32 as u64),
        (NumType::I64, Val::I64(x)) => Ok(*x as u64),
        _ => Err(Error::crash(span, STACK_CRASH)),
    }
}

fn step_plain(
    frame: &Frame,
    stack: &mut Vec<Val>,
    instr: &Instr,
    span: Span,
) -> Result<(Emit, Action), Error> {
    // `Result<_, TrapKind>` results become `Trapping` reducts
    macro_rules! otrap {
        ($e:expr) => {
            match $e {
                Ok(v) => v,
                Err(kind) => return Ok(trapping(kind, span)),
            }
        };
    }
    // evaluator results: numeric traps become `Trapping`, type mismatches
    // are crashes
    macro_rules! onum {
        ($e:expr) => {
            match $e {
                Ok(v) => v,
                Err(NumericError::Trap(kind)) => return Ok(trapping(kind, span)),
                Err(NumericError::Type) => return Err(Error::crash(span, STACK_CRASH)),
            }
        };
    }

    let out = match instr {
        // ---- control ----
        Instr::Unreachable => trapping(TrapKind::Unreachable, span),
        Instr::Nop => done(),
        Instr::Block(bt, body) => {
            let (nparams, arity) = block_arity(frame, *bt, span)?;
            let params = take(stack, nparams, span)?;
            let label = Label {
                arity,
                cont: Vec::new(),
                code: Code::new(params, plains(body)),
            };
            emit(span, [AdminInstr::Label(label)])
        }
        Instr::Loop(bt, body) => {
            let (nparams, _) = block_arity(frame, *bt, span)?;
            let params = take(stack, nparams, span)?;
            // a branch to a loop label re-enters the loop with the
            // parameters as operands
            let label = Label {
                arity: nparams as u32,
                cont: alloc::vec![instr.clone().at(span)],
                code: Code::new(params, plains(body)),
            };
            emit(span, [AdminInstr::Label(label)])
        }
        Instr::If(bt, then, els) => {
            let cond = pop_i32(stack, span)?;
            let body = if cond != 0 { then } else { els };
            emit(span, [AdminInstr::Plain(Instr::Block(*bt, body.clone()))])
        }
        Instr::Br(k) => {
            let vs = core::mem::take(stack);
            emit(span, [AdminInstr::Breaking(*k, vs)])
        }
        Instr::BrIf(k) => {
            let cond = pop_i32(stack, span)?;
            if cond != 0 {
                emit(span, [AdminInstr::Plain(Instr::Br(*k))])
            } else {
                done()
            }
        }
        Instr::BrTable(targets, default) => {
            let i = pop_i32(stack, span)? as u32 as usize;
            let depth = targets.get(i).copied().unwrap_or(*default);
            emit(span, [AdminInstr::Plain(Instr::Br(depth))])
        }
        Instr::Return => {
            let vs = core::mem::take(stack);
            emit(span, [AdminInstr::Returning(vs)])
        }
        Instr::Call(x) => {
            let f = func_at(frame, *x, span)?;
            emit(span, [AdminInstr::Invoke(f)])
        }
        Instr::CallIndirect(x, y) => {
            let i = pop_i32(stack, span)? as u32;
            let table = table_at(frame, *x, span)?;
            let entry = match table.borrow().get(i) {
                Ok(r) => r,
                Err(_) => return Ok(trapping(TrapKind::UndefinedElement(i), span)),
            };
            match entry {
                Ref::Null(_) => trapping(TrapKind::UninitializedElement(i), span),
                Ref::Func(f) => {
                    let expected = frame.inst.ty(*y).ok_or_else(|| {
                        Error::crash(span, alloc::format!("undefined type {}", y.as_u32()))
                    })?;
                    if *f.ty() != expected {
                        trapping(TrapKind::IndirectCallTypeMismatch, span)
                    } else {
                        emit(span, [AdminInstr::Invoke(f)])
                    }
                }
                Ref::Extern(_) => return Err(Error::crash(span, "ill-typed reference in table")),
            }
        }

        // ---- parametric ----
        Instr::Drop => {
            pop(stack, span)?;
            done()
        }
        Instr::Select => {
            let cond = pop_i32(stack, span)?;
            let v2 = pop(stack, span)?;
            let v1 = pop(stack, span)?;
            stack.push(if cond != 0 { v1 } else { v2 });
            done()
        }

        // ---- variables ----
        Instr::LocalGet(x) => {
            let local = frame.locals.get(x.index()).ok_or_else(|| {
                Error::crash(span, alloc::format!("undefined local {}", x.as_u32()))
            })?;
            stack.push(local.borrow().clone());
            done()
        }
        Instr::LocalSet(x) => {
            let v = pop(stack, span)?;
            let local = frame.locals.get(x.index()).ok_or_else(|| {
                Error::crash(span, alloc::format!("undefined local {}", x.as_u32()))
            })?;
            *local.borrow_mut() = v;
            done()
        }
        Instr::LocalTee(x) => {
            let v = stack
                .last()
                .cloned()
                .ok_or_else(|| Error::crash(span, STACK_CRASH))?;
            let local = frame.locals.get(x.index()).ok_or_else(|| {
                Error::crash(span, alloc::format!("undefined local {}", x.as_u32()))
            })?;
            *local.borrow_mut() = v;
            done()
        }
        Instr::GlobalGet(x) => {
            let global = global_at(frame, *x, span)?;
            let v = global.borrow().get();
            stack.push(v);
            done()
        }
        Instr::GlobalSet(x) => {
            let v = pop(stack, span)?;
            let global = global_at(frame, *x, span)?;
            global
                .borrow_mut()
                .set(v)
                .map_err(|e| Error::crash(span, e.to_string()))?;
            done()
        }

        // ---- references ----
        Instr::RefNull(ty) => {
            stack.push(Val::Ref(Ref::Null(*ty)));
            done()
        }
        Instr::RefIsNull => {
            let r = pop_ref(stack, span)?;
            stack.push(Val::I32(r.is_null() as i32));
            done()
        }
        Instr::RefFunc(x) => {
            let f = func_at(frame, *x, span)?;
            stack.push(Val::Ref(Ref::Func(f)));
            done()
        }

        // ---- tables ----
        Instr::TableGet(x) => {
            let i = pop_i32(stack, span)? as u32;
            let table = table_at(frame, *x, span)?;
            let r = otrap!(table.borrow().get(i));
            stack.push(Val::Ref(r));
            done()
        }
        Instr::TableSet(x) => {
            let r = pop_ref(stack, span)?;
            let i = pop_i32(stack, span)? as u32;
            let table = table_at(frame, *x, span)?;
            otrap!(table.borrow_mut().set(i, r));
            done()
        }
        Instr::TableSize(x) => {
            let table = table_at(frame, *x, span)?;
            let size = table.borrow().size();
            stack.push(Val::I32(size as i32));
            done()
        }
        Instr::TableGrow(x) => {
            let delta = pop_i32(stack, span)? as u32;
            let init = pop_ref(stack, span)?;
            let table = table_at(frame, *x, span)?;
            let prev = table.borrow_mut().grow(delta, init);
            stack.push(Val::I32(prev));
            done()
        }
        Instr::TableFill(x) => {
            let n = pop_i32(stack, span)? as u32;
            let r = pop_ref(stack, span)?;
            let i = pop_i32(stack, span)? as u32;
            let table = table_at(frame, *x, span)?;
            if i as u64 + n as u64 > table.borrow().size() as u64 {
                trapping(TrapKind::TableOutOfBounds, span)
            } else if n == 0 {
                done()
            } else {
                emit(
                    span,
                    [
                        AdminInstr::Plain(Instr::Const(Val::I32(i as i32))),
                        AdminInstr::Refer(r.clone()),
                        AdminInstr::Plain(Instr::TableSet(*x)),
                        AdminInstr::Plain(Instr::Const(Val::I32((i + 1) as i32))),
                        AdminInstr::Refer(r),
                        AdminInstr::Plain(Instr::Const(Val::I32((n - 1) as i32))),
                        AdminInstr::Plain(Instr::TableFill(*x)),
                    ],
                )
            }
        }
        Instr::TableCopy(x, y) => {
            let n = pop_i32(stack, span)? as u32;
            let s = pop_i32(stack, span)? as u32;
            let d = pop_i32(stack, span)? as u32;
            let dst = table_at(frame, *x, span)?;
            let src = table_at(frame, *y, span)?;
            if d as u64 + n as u64 > dst.borrow().size() as u64
                || s as u64 + n as u64 > src.borrow().size() as u64
            {
                trapping(TrapKind::TableOutOfBounds, span)
            } else if n == 0 {
                done()
            } else if d <= s {
                emit(
                    span,
                    [
                        AdminInstr::Plain(Instr::Const(Val::I32(d as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32(s as i32))),
                        AdminInstr::Plain(Instr::TableGet(*y)),
                        AdminInstr::Plain(Instr::TableSet(*x)),
                        AdminInstr::Plain(Instr::Const(Val::I32((d + 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((s + 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((n - 1) as i32))),
                        AdminInstr::Plain(Instr::TableCopy(*x, *y)),
                    ],
                )
            } else {
                emit(
                    span,
                    [
                        AdminInstr::Plain(Instr::Const(Val::I32((d + n - 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((s + n - 1) as i32))),
                        AdminInstr::Plain(Instr::TableGet(*y)),
                        AdminInstr::Plain(Instr::TableSet(*x)),
                        AdminInstr::Plain(Instr::Const(Val::I32(d as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32(s as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((n - 1) as i32))),
                        AdminInstr::Plain(Instr::TableCopy(*x, *y)),
                    ],
                )
            }
        }
        Instr::TableInit(x, seg) => {
            let n = pop_i32(stack, span)? as u32;
            let s = pop_i32(stack, span)? as u32;
            let d = pop_i32(stack, span)? as u32;
            let table = table_at(frame, *x, span)?;
            let elem = elem_at(frame, *seg, span)?;
            if d as u64 + n as u64 > table.borrow().size() as u64
                || s as u64 + n as u64 > elem.borrow().len() as u64
            {
                trapping(TrapKind::TableOutOfBounds, span)
            } else if n == 0 {
                done()
            } else {
                let r = otrap!(elem.borrow().get(s));
                emit(
                    span,
                    [
                        AdminInstr::Plain(Instr::Const(Val::I32(d as i32))),
                        AdminInstr::Refer(r),
                        AdminInstr::Plain(Instr::TableSet(*x)),
                        AdminInstr::Plain(Instr::Const(Val::I32((d + 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((s + 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((n - 1) as i32))),
                        AdminInstr::Plain(Instr::TableInit(*x, *seg)),
                    ],
                )
            }
        }
        Instr::ElemDrop(seg) => {
            let elem = elem_at(frame, *seg, span)?;
            elem.borrow_mut().drain();
            done()
        }

        // ---- memory, scalar ----
        Instr::Load { ty, pack, memarg } => {
            let i = pop_i32(stack, span)?;
            let mem = memory0(frame, span)?;
            let v = otrap!(mem.borrow().load_num(effective_addr(i, memarg), *ty, *pack));
            stack.push(v);
            done()
        }
        Instr::Store { ty, pack, memarg } => {
            let v = pop(stack, span)?;
            if v.ty() != ValType::from(*ty) {
                return Err(Error::crash(span, STACK_CRASH));
            }
            let i = pop_i32(stack, span)?;
            let mem = memory0(frame, span)?;
            otrap!(mem.borrow_mut().store_num(effective_addr(i, memarg), v, *pack));
            done()
        }
        Instr::VecLoad { pack, memarg } => {
            let i = pop_i32(stack, span)?;
            let mem = memory0(frame, span)?;
            let ea = effective_addr(i, memarg);
            let v = match pack {
                None => otrap!(mem.borrow().load_vec(ea)),
                Some(pack) => otrap!(mem.borrow().load_vec_packed(ea, *pack)),
            };
            stack.push(Val::V128(v));
            done()
        }
        Instr::VecStore { memarg } => {
            let v = pop_v128(stack, span)?;
            let i = pop_i32(stack, span)?;
            let mem = memory0(frame, span)?;
            otrap!(mem.borrow_mut().store_vec(effective_addr(i, memarg), v));
            done()
        }
        Instr::VecLoadLane { shape, lane, memarg } => {
            let v = pop_v128(stack, span)?;
            let i = pop_i32(stack, span)?;
            let width = (shape.lane_bits() / 8) as usize;
            let lane = *lane as usize;
            if (lane + 1) * width > 16 {
                return Err(Error::crash(span, "lane index out of range"));
            }
            let mem = memory0(frame, span)?;
            let mut bytes = v.to_le_bytes();
            {
                let m = mem.borrow();
                let loaded = otrap!(m.read_bytes(effective_addr(i, memarg), width as u64));
                bytes[lane * width..(lane + 1) * width].copy_from_slice(loaded);
            }
            stack.push(Val::V128(V128::from_le_bytes(bytes)));
            done()
        }
        Instr::VecStoreLane { shape, lane, memarg } => {
            let v = pop_v128(stack, span)?;
            let i = pop_i32(stack, span)?;
            let width = (shape.lane_bits() / 8) as usize;
            let lane = *lane as usize;
            if (lane + 1) * width > 16 {
                return Err(Error::crash(span, "lane index out of range"));
            }
            let mem = memory0(frame, span)?;
            let bytes = v.to_le_bytes();
            otrap!(
                mem.borrow_mut()
                    .write_bytes(effective_addr(i, memarg), &bytes[lane * width..(lane + 1) * width])
            );
            done()
        }
        Instr::MemorySize => {
            let mem = memory0(frame, span)?;
            let size = mem.borrow().size();
            stack.push(Val::I32(size as i32));
            done()
        }
        Instr::MemoryGrow => {
            let delta = pop_i32(stack, span)? as u32;
            let mem = memory0(frame, span)?;
            let prev = mem.borrow_mut().grow(delta);
            stack.push(Val::I32(prev));
            done()
        }

        // ---- memory, bulk ----
        Instr::MemoryFill => {
            let n = pop_i32(stack, span)? as u32;
            let v = pop_i32(stack, span)?;
            let d = pop_i32(stack, span)? as u32;
            let mem = memory0(frame, span)?;
            if d as u64 + n as u64 > mem.borrow().len() {
                trapping(TrapKind::MemoryOutOfBounds, span)
            } else if n == 0 {
                done()
            } else {
                emit(
                    span,
                    [
                        AdminInstr::Plain(Instr::Const(Val::I32(d as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32(v))),
                        AdminInstr::Plain(store8()),
                        AdminInstr::Plain(Instr::Const(Val::I32((d + 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32(v))),
                        AdminInstr::Plain(Instr::Const(Val::I32((n - 1) as i32))),
                        AdminInstr::Plain(Instr::MemoryFill),
                    ],
                )
            }
        }
        Instr::MemoryCopy => {
            let n = pop_i32(stack, span)? as u32;
            let s = pop_i32(stack, span)? as u32;
            let d = pop_i32(stack, span)? as u32;
            let mem = memory0(frame, span)?;
            let len = mem.borrow().len();
            if d as u64 + n as u64 > len || s as u64 + n as u64 > len {
                trapping(TrapKind::MemoryOutOfBounds, span)
            } else if n == 0 {
                done()
            } else if d <= s {
                emit(
                    span,
                    [
                        AdminInstr::Plain(Instr::Const(Val::I32(d as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32(s as i32))),
                        AdminInstr::Plain(load8u()),
                        AdminInstr::Plain(store8()),
                        AdminInstr::Plain(Instr::Const(Val::I32((d + 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((s + 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((n - 1) as i32))),
                        AdminInstr::Plain(Instr::MemoryCopy),
                    ],
                )
            } else {
                emit(
                    span,
                    [
                        AdminInstr::Plain(Instr::Const(Val::I32((d + n - 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((s + n - 1) as i32))),
                        AdminInstr::Plain(load8u()),
                        AdminInstr::Plain(store8()),
                        AdminInstr::Plain(Instr::Const(Val::I32(d as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32(s as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((n - 1) as i32))),
                        AdminInstr::Plain(Instr::MemoryCopy),
                    ],
                )
            }
        }
        Instr::MemoryInit(seg) => {
            let n = pop_i32(stack, span)? as u32;
            let s = pop_i32(stack, span)? as u32;
            let d = pop_i32(stack, span)? as u32;
            let mem = memory0(frame, span)?;
            let data = data_at(frame, *seg, span)?;
            if d as u64 + n as u64 > mem.borrow().len()
                || s as u64 + n as u64 > data.borrow().len() as u64
            {
                trapping(TrapKind::MemoryOutOfBounds, span)
            } else if n == 0 {
                done()
            } else {
                let b = otrap!(data.borrow().get(s));
                emit(
                    span,
                    [
                        AdminInstr::Plain(Instr::Const(Val::I32(d as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32(b as i32))),
                        AdminInstr::Plain(store8()),
                        AdminInstr::Plain(Instr::Const(Val::I32((d + 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((s + 1) as i32))),
                        AdminInstr::Plain(Instr::Const(Val::I32((n - 1) as i32))),
                        AdminInstr::Plain(Instr::MemoryInit(*seg)),
                    ],
                )
            }
        }
        Instr::DataDrop(seg) => {
            let data = data_at(frame, *seg, span)?;
            data.borrow_mut().drain();
            done()
        }

        // ---- atomics ----
        Instr::AtomicLoad { ty, pack, memarg } => {
            let i = pop_i32(stack, span)?;
            let mem = memory0(frame, span)?;
            let v = otrap!(mem.borrow().atomic_load(effective_addr(i, memarg), *ty, *pack));
            stack.push(v);
            done()
        }
        Instr::AtomicStore { ty, pack, memarg } => {
            let v = pop(stack, span)?;
            if v.ty() != ValType::from(*ty) {
                return Err(Error::crash(span, STACK_CRASH));
            }
            let i = pop_i32(stack, span)?;
            let mem = memory0(frame, span)?;
            otrap!(
                mem.borrow_mut()
                    .atomic_store(effective_addr(i, memarg), v, *ty, *pack)
            );
            done()
        }
        Instr::AtomicRmw { op, ty, pack, memarg } => {
            let operand = pop(stack, span)?;
            let i = pop_i32(stack, span)?;
            let raw = val_to_bits(*ty, &operand, span)?;
            let width = pack.map_or(ty.size(), |p| p.bytes());
            let mem = memory0(frame, span)?;
            let old = otrap!(
                mem.borrow_mut()
                    .atomic_rmw(effective_addr(i, memarg), width, *op, raw)
            );
            stack.push(val_from_bits(*ty, old, span)?);
            done()
        }
        Instr::AtomicCmpXchg { ty, pack, memarg } => {
            let replacement = pop(stack, span)?;
            let expected = pop(stack, span)?;
            let i = pop_i32(stack, span)?;
            let replacement = val_to_bits(*ty, &replacement, span)?;
            let expected = val_to_bits(*ty, &expected, span)?;
            let width = pack.map_or(ty.size(), |p| p.bytes());
            let mem = memory0(frame, span)?;
            let old = otrap!(mem.borrow_mut().atomic_cmpxchg(
                effective_addr(i, memarg),
                width,
                expected,
                replacement
            ));
            stack.push(val_from_bits(*ty, old, span)?);
            done()
        }
        Instr::MemoryAtomicWait { ty, memarg } => {
            let timeout = pop_i64(stack, span)?;
            let expected = pop(stack, span)?;
            if expected.ty() != ValType::from(*ty) {
                return Err(Error::crash(span, STACK_CRASH));
            }
            let i = pop_i32(stack, span)?;
            let mem = memory0(frame, span)?;
            let ea = effective_addr(i, memarg);
            let loaded = {
                let m = mem.borrow();
                if !m.shared() {
                    return Ok(trapping(TrapKind::ExpectedSharedMemory, span));
                }
                otrap!(Memory::check_align(ea, ty.size()));
                otrap!(m.load_num(ea, *ty, None))
            };
            if loaded != expected {
                stack.push(Val::I32(1));
                done()
            } else if (0..TIMEOUT_EPSILON).contains(&timeout) {
                stack.push(Val::I32(2));
                done()
            } else {
                tracing::trace!(addr = ea, "suspending at wait");
                emit(
                    span,
                    [AdminInstr::Suspend {
                        mem,
                        addr: ea,
                        timeout,
                    }],
                )
            }
        }
        Instr::MemoryAtomicNotify { memarg } => {
            let count = pop_i32(stack, span)?;
            let i = pop_i32(stack, span)?;
            let mem = memory0(frame, span)?;
            let ea = effective_addr(i, memarg);
            otrap!(Memory::check_align(ea, 4));
            // the read is kept for its bounds check; its value is unused
            let _ = otrap!(mem.borrow().load_num(ea, NumType::I32, None));
            if count == 0 {
                stack.push(Val::I32(0));
                done()
            } else {
                (
                    Emit::new(),
                    Action::Notify {
                        mem,
                        addr: ea,
                        count: count as u32,
                    },
                )
            }
        }
        Instr::AtomicFence => done(),

        // ---- numeric ----
        Instr::Const(v) => {
            stack.push(v.clone());
            done()
        }
        Instr::Test(op) => {
            let v = pop(stack, span)?;
            stack.push(onum!(numeric::testop(*op, v)));
            done()
        }
        Instr::Compare(op) => {
            let b = pop(stack, span)?;
            let a = pop(stack, span)?;
            stack.push(onum!(numeric::relop(*op, a, b)));
            done()
        }
        Instr::Unary(op) => {
            let v = pop(stack, span)?;
            stack.push(onum!(numeric::unop(*op, v)));
            done()
        }
        Instr::Binary(op) => {
            let b = pop(stack, span)?;
            let a = pop(stack, span)?;
            stack.push(onum!(numeric::binop(*op, a, b)));
            done()
        }
        Instr::Convert(op) => {
            let v = pop(stack, span)?;
            stack.push(onum!(numeric::cvtop(*op, v)));
            done()
        }

        // ---- vector ----
        Instr::VecSplat(shape) => {
            let v = pop(stack, span)?;
            stack.push(Val::V128(onum!(simd::splat(*shape, v))));
            done()
        }
        Instr::VecExtractLane(shape, lane, sign) => {
            let v = pop_v128(stack, span)?;
            stack.push(onum!(simd::extract_lane(*shape, *lane, *sign, v)));
            done()
        }
        Instr::VecReplaceLane(shape, lane) => {
            let x = pop(stack, span)?;
            let v = pop_v128(stack, span)?;
            stack.push(Val::V128(onum!(simd::replace_lane(*shape, *lane, v, x))));
            done()
        }
        Instr::VecUnary(shape, op) => {
            let v = pop_v128(stack, span)?;
            stack.push(Val::V128(onum!(simd::unop(*shape, *op, v))));
            done()
        }
        Instr::VecBinary(shape, op) => {
            let b = pop_v128(stack, span)?;
            let a = pop_v128(stack, span)?;
            stack.push(Val::V128(onum!(simd::binop(*shape, *op, a, b))));
            done()
        }
        Instr::VecCompare(shape, op) => {
            let b = pop_v128(stack, span)?;
            let a = pop_v128(stack, span)?;
            stack.push(Val::V128(onum!(simd::relop(*shape, *op, a, b))));
            done()
        }
        Instr::VecShift(shape, op) => {
            let count = pop_i32(stack, span)?;
            let v = pop_v128(stack, span)?;
            stack.push(Val::V128(onum!(simd::shift(*shape, *op, v, count))));
            done()
        }
        Instr::VecBitmask(shape) => {
            let v = pop_v128(stack, span)?;
            stack.push(Val::I32(onum!(simd::bitmask(*shape, v))));
            done()
        }
        Instr::VecAnyTrue => {
            let v = pop_v128(stack, span)?;
            stack.push(Val::I32(simd::any_true(v) as i32));
            done()
        }
        Instr::VecAllTrue(shape) => {
            let v = pop_v128(stack, span)?;
            stack.push(Val::I32(onum!(simd::all_true(*shape, v)) as i32));
            done()
        }
        Instr::VecNot => {
            let v = pop_v128(stack, span)?;
            stack.push(Val::V128(simd::not(v)));
            done()
        }
        Instr::VecBits(op) => {
            let b = pop_v128(stack, span)?;
            let a = pop_v128(stack, span)?;
            stack.push(Val::V128(simd::bits(*op, a, b)));
            done()
        }
        Instr::VecBitselect => {
            let mask = pop_v128(stack, span)?;
            let v2 = pop_v128(stack, span)?;
            let v1 = pop_v128(stack, span)?;
            stack.push(Val::V128(simd::bitselect(v1, v2, mask)));
            done()
        }
        Instr::VecShuffle(lanes) => {
            let b = pop_v128(stack, span)?;
            let a = pop_v128(stack, span)?;
            stack.push(Val::V128(simd::shuffle(lanes, a, b)));
            done()
        }
        Instr::VecConvert(op) => {
            let v = pop_v128(stack, span)?;
            stack.push(Val::V128(simd::convert(*op, v)));
            done()
        }
    };
    Ok(out)
}

fn store8() -> Instr {
    Instr::Store {
        ty: NumType::I32,
        pack: Some(crate::instr::PackSize::Pack8),
        memarg: MemArg::default(),
    }
}

fn load8u() -> Instr {
    Instr::Load {
        ty: NumType::I32,
        pack: Some((crate::instr::PackSize::Pack8, crate::instr::Sign::Unsigned)),
        memarg: MemArg::default(),
    }
}
