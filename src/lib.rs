// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A spec-level WebAssembly interpreter with support for the threads
//! proposal: shared memories, atomic memory operations and the
//! `memory.atomic.wait`/`memory.atomic.notify` coordination primitive.
//!
//! The crate executes *already validated* module descriptions supplied by
//! the embedder ([`Module`]); no parsing or validation happens here.
//! Execution is a small-step reduction over an administrative instruction
//! form, driven through a [`Config`] holding a list of cooperatively
//! scheduled guest threads. One call to [`Config::step`] advances one
//! thread by one reduction; [`Config::eval`] runs a thread to completion.
//!
//! Guest-visible failures surface as [`TrapKind`]s wrapped in [`Error`],
//! which also carries the three embedder-visible kinds (link errors,
//! call-budget exhaustion, and crashes, i.e. invariant violations that a
//! validated module cannot reach).

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod error;
mod exec;
mod indices;
mod instr;
mod module;
mod numeric;
mod simd;
mod trap;
mod types;
mod utils;
mod values;
mod vm;

pub type Result<T> = anyhow::Result<T>;

pub use cranelift_entity::PrimaryMap;
pub use error::{Error, Span, Spanned};
pub use exec::{Config, Flags, Status, ThreadId, eval_const};
pub use indices::{
    DataIndex, DefinedFuncIndex, ElemIndex, FuncIndex, GlobalIndex, LocalIndex, MemoryIndex,
    TableIndex, TypeIndex,
};
pub use instr::{
    BinOp, BlockType, CvtOp, FBinOp, FCvtOp, FRelOp, FUnOp, Half, IBinOp, ICvtOp, IRelOp, ITestOp,
    IUnOp, Instr, InstrSeq, MemArg, PackSize, RelOp, RmwOp, Shape, Sign, TestOp, UnOp, VecBinOp,
    VecBitsOp, VecCvtOp, VecLoadPack, VecRelOp, VecShiftOp, VecUnOp, seq,
};
pub use module::{
    ConstExpr, DataDesc, DataMode, ElemDesc, ElemMode, EntityIndex, Export, FuncDesc, GlobalDesc,
    Import, Module,
};
pub use trap::TrapKind;
pub use types::{
    ExternType, FuncType, GlobalType, Limits, MemoryType, Mutability, NumType, RefType, TableType,
    ValType,
};
pub use values::{Ref, V128, Val};
pub use vm::{
    DataRef, DataSegment, ElemRef, ElemSegment, ExternVal, FuncBody, FuncInstance, FuncRef,
    Global, GlobalError, GlobalRef, HostFn, Memory, MemoryRef, ModuleInstance, Table, TableRef,
};

/// Size in bytes of a WebAssembly linear-memory page.
pub const PAGE_SIZE: usize = 0x1_0000;
/// The number of pages a 32-bit memory can have before we run out of byte
/// index space.
pub const MAX_PAGES: u32 = 1 << 16;
/// `memory.atomic.wait` timeouts in `0..TIMEOUT_EPSILON` report the
/// timed-out sentinel immediately instead of suspending; anything else is
/// the embedder's wall-clock policy.
pub const TIMEOUT_EPSILON: i64 = 1_000_000;
/// Default per-thread call budget handed out by [`Flags::default`].
pub const DEFAULT_BUDGET: u32 = 300;
