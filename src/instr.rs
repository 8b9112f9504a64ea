// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The source instruction set.
//!
//! Instructions arrive from the embedder already validated; the machine in
//! `exec` assumes well-typed operand stacks and reports any violation as a
//! crash, never as a guest trap.

use alloc::boxed::Box;
use alloc::rc::Rc;

use crate::error::{Span, Spanned};
use crate::indices::{
    DataIndex, ElemIndex, FuncIndex, GlobalIndex, LocalIndex, TableIndex, TypeIndex,
};
use crate::types::{NumType, RefType, ValType};
use crate::values::Val;

/// A shared, immutable instruction sequence. Blocks and loops hold their
/// bodies behind `Rc` so that unrolling a loop iteration is O(1).
pub type InstrSeq = Rc<[Spanned<Instr>]>;

/// Builds an [`InstrSeq`] with default spans. Mostly useful for embedders
/// that synthesize modules programmatically.
pub fn seq(instrs: impl IntoIterator<Item = Instr>) -> InstrSeq {
    instrs
        .into_iter()
        .map(|it| Spanned::new(Span::default(), it))
        .collect()
}

/// Static operand of every memory access instruction. `align` is the
/// encoded alignment exponent; it is a hint only, except that validation
/// requires atomics to be naturally aligned.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemArg {
    pub offset: u32,
    pub align: u32,
}

/// Signedness of a packed extension or a lane operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sign {
    Signed,
    Unsigned,
}

/// Width of a packed (narrower-than-type) memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackSize {
    Pack8,
    Pack16,
    Pack32,
}

/// Which half of the input lanes a widening vector operation reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Half {
    Low,
    High,
}

/// The typing of a block, loop or if.
#[derive(Clone, Copy, Debug)]
pub enum BlockType {
    Empty,
    /// A single result, no parameters.
    Val(ValType),
    /// An arbitrary signature, by type index.
    Func(TypeIndex),
}

/// Integer unary operators.
#[derive(Clone, Copy, Debug)]
pub enum IUnOp {
    Clz,
    Ctz,
    Popcnt,
    /// `extendN_s`: sign-extend the low `PackSize` bits.
    ExtendS(PackSize),
}

/// Integer binary operators.
#[derive(Clone, Copy, Debug)]
pub enum IBinOp {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
}

/// Integer test operators.
#[derive(Clone, Copy, Debug)]
pub enum ITestOp {
    Eqz,
}

/// Integer comparison operators.
#[derive(Clone, Copy, Debug)]
pub enum IRelOp {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
}

/// Float unary operators.
#[derive(Clone, Copy, Debug)]
pub enum FUnOp {
    Abs,
    Neg,
    Ceil,
    Floor,
    Trunc,
    Nearest,
    Sqrt,
}

/// Float binary operators.
#[derive(Clone, Copy, Debug)]
pub enum FBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    CopySign,
}

/// Float comparison operators.
#[derive(Clone, Copy, Debug)]
pub enum FRelOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Conversions producing an integer.
#[derive(Clone, Copy, Debug)]
pub enum ICvtOp {
    /// i32 only: wrap an i64.
    WrapI64,
    /// i64 only: extend an i32.
    ExtendI32(Sign),
    TruncF32(Sign),
    TruncF64(Sign),
    TruncSatF32(Sign),
    TruncSatF64(Sign),
    /// Reinterpret the same-width float's bits.
    ReinterpretFloat,
}

/// Conversions producing a float.
#[derive(Clone, Copy, Debug)]
pub enum FCvtOp {
    ConvertI32(Sign),
    ConvertI64(Sign),
    /// f64 only: promote an f32.
    PromoteF32,
    /// f32 only: demote an f64.
    DemoteF64,
    /// Reinterpret the same-width integer's bits.
    ReinterpretInt,
}

/// A unary operator together with the value type it operates on.
#[derive(Clone, Copy, Debug)]
pub enum UnOp {
    I32(IUnOp),
    I64(IUnOp),
    F32(FUnOp),
    F64(FUnOp),
}

/// A binary operator together with the value type it operates on.
#[derive(Clone, Copy, Debug)]
pub enum BinOp {
    I32(IBinOp),
    I64(IBinOp),
    F32(FBinOp),
    F64(FBinOp),
}

/// A test operator together with the value type it operates on.
#[derive(Clone, Copy, Debug)]
pub enum TestOp {
    I32(ITestOp),
    I64(ITestOp),
}

/// A comparison operator together with the value type it operates on.
#[derive(Clone, Copy, Debug)]
pub enum RelOp {
    I32(IRelOp),
    I64(IRelOp),
    F32(FRelOp),
    F64(FRelOp),
}

/// A conversion operator, tagged by its *result* type.
#[derive(Clone, Copy, Debug)]
pub enum CvtOp {
    I32(ICvtOp),
    I64(ICvtOp),
    F32(FCvtOp),
    F64(FCvtOp),
}

/// The lane interpretation of a 128-bit vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    I8x16,
    I16x8,
    I32x4,
    I64x2,
    F32x4,
    F64x2,
}

/// Lane-wise vector unary operators. Which operators apply to which
/// shapes follows validation; a mismatch is a crash.
#[derive(Clone, Copy, Debug)]
pub enum VecUnOp {
    Abs,
    Neg,
    /// i8x16 only.
    Popcnt,
    Sqrt,
    Ceil,
    Floor,
    Trunc,
    Nearest,
}

/// Lane-wise vector binary operators.
#[derive(Clone, Copy, Debug)]
pub enum VecBinOp {
    Add,
    Sub,
    Mul,
    Div,
    MinS,
    MinU,
    MaxS,
    MaxU,
    /// Float min/max with full NaN propagation.
    Min,
    Max,
    /// Float pseudo-min/max (`b < a ? b : a` and the converse).
    PMin,
    PMax,
    AddSatS,
    AddSatU,
    SubSatS,
    SubSatU,
    AvgrU,
    Q15MulRSatS,
    /// i32x4 result from i16x8 inputs.
    DotI16x8S,
    /// Result shape is the operator's shape; inputs are the next narrower
    /// shape.
    ExtMul(Half, Sign),
    /// Result shape is the operator's shape; inputs are the next wider
    /// shape, saturated.
    Narrow(Sign),
    /// i8x16 only: lane selection of `a` by the bytes of `b`.
    Swizzle,
}

/// Lane-wise vector comparisons. Signed/unsigned variants are integer
/// only; the signless ones are float only except `Eq`/`Ne`.
#[derive(Clone, Copy, Debug)]
pub enum VecRelOp {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Lane-wise vector shifts; the shift count is taken modulo the lane
/// width.
#[derive(Clone, Copy, Debug)]
pub enum VecShiftOp {
    Shl,
    ShrS,
    ShrU,
}

/// Whole-vector bitwise binary operators.
#[derive(Clone, Copy, Debug)]
pub enum VecBitsOp {
    And,
    AndNot,
    Or,
    Xor,
}

/// Shape-changing vector conversions.
#[derive(Clone, Copy, Debug)]
pub enum VecCvtOp {
    I16x8ExtendI8x16(Half, Sign),
    I32x4ExtendI16x8(Half, Sign),
    I64x2ExtendI32x4(Half, Sign),
    I16x8ExtAddPairwiseI8x16(Sign),
    I32x4ExtAddPairwiseI16x8(Sign),
    I32x4TruncSatF32x4(Sign),
    I32x4TruncSatF64x2Zero(Sign),
    F32x4ConvertI32x4(Sign),
    F64x2ConvertLowI32x4(Sign),
    F32x4DemoteF64x2Zero,
    F64x2PromoteLowF32x4,
}

/// How a vector load widens or splats its memory operand. A plain 16-byte
/// load carries no pack.
#[derive(Clone, Copy, Debug)]
pub enum VecLoadPack {
    /// 8 bytes extended to 8 16-bit lanes.
    Pack8x8(Sign),
    /// 8 bytes extended to 4 32-bit lanes.
    Pack16x4(Sign),
    /// 8 bytes extended to 2 64-bit lanes.
    Pack32x2(Sign),
    Splat8,
    Splat16,
    Splat32,
    Splat64,
    /// 4 bytes into the low lane, the rest zeroed.
    Zero32,
    /// 8 bytes into the low lane, the rest zeroed.
    Zero64,
}

/// Atomic read-modify-write operators.
#[derive(Clone, Copy, Debug)]
pub enum RmwOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Xchg,
}

/// A source instruction.
#[derive(Clone, Debug)]
pub enum Instr {
    // control
    Unreachable,
    Nop,
    Block(BlockType, InstrSeq),
    Loop(BlockType, InstrSeq),
    If(BlockType, InstrSeq, InstrSeq),
    Br(u32),
    BrIf(u32),
    BrTable(Box<[u32]>, u32),
    Return,
    Call(FuncIndex),
    CallIndirect(TableIndex, TypeIndex),

    // parametric
    Drop,
    Select,

    // variables
    LocalGet(LocalIndex),
    LocalSet(LocalIndex),
    LocalTee(LocalIndex),
    GlobalGet(GlobalIndex),
    GlobalSet(GlobalIndex),

    // references
    RefNull(RefType),
    RefIsNull,
    RefFunc(FuncIndex),

    // tables
    TableGet(TableIndex),
    TableSet(TableIndex),
    TableSize(TableIndex),
    TableGrow(TableIndex),
    TableFill(TableIndex),
    /// `table.copy dst src`.
    TableCopy(TableIndex, TableIndex),
    TableInit(TableIndex, ElemIndex),
    ElemDrop(ElemIndex),

    // memory (the threads proposal predates multi-memory; all memory
    // instructions address memory 0)
    Load {
        ty: NumType,
        pack: Option<(PackSize, Sign)>,
        memarg: MemArg,
    },
    Store {
        ty: NumType,
        pack: Option<PackSize>,
        memarg: MemArg,
    },
    VecLoad {
        pack: Option<VecLoadPack>,
        memarg: MemArg,
    },
    VecStore {
        memarg: MemArg,
    },
    VecLoadLane {
        shape: Shape,
        lane: u8,
        memarg: MemArg,
    },
    VecStoreLane {
        shape: Shape,
        lane: u8,
        memarg: MemArg,
    },
    MemorySize,
    MemoryGrow,
    MemoryFill,
    MemoryCopy,
    MemoryInit(DataIndex),
    DataDrop(DataIndex),

    // atomics
    AtomicLoad {
        ty: NumType,
        pack: Option<PackSize>,
        memarg: MemArg,
    },
    AtomicStore {
        ty: NumType,
        pack: Option<PackSize>,
        memarg: MemArg,
    },
    AtomicRmw {
        op: RmwOp,
        ty: NumType,
        pack: Option<PackSize>,
        memarg: MemArg,
    },
    AtomicCmpXchg {
        ty: NumType,
        pack: Option<PackSize>,
        memarg: MemArg,
    },
    MemoryAtomicWait {
        ty: NumType,
        memarg: MemArg,
    },
    MemoryAtomicNotify {
        memarg: MemArg,
    },
    AtomicFence,

    // numeric
    Const(Val),
    Test(TestOp),
    Compare(RelOp),
    Unary(UnOp),
    Binary(BinOp),
    Convert(CvtOp),

    // vector
    VecSplat(Shape),
    VecExtractLane(Shape, u8, Option<Sign>),
    VecReplaceLane(Shape, u8),
    VecUnary(Shape, VecUnOp),
    VecBinary(Shape, VecBinOp),
    VecCompare(Shape, VecRelOp),
    VecShift(Shape, VecShiftOp),
    VecBitmask(Shape),
    VecAnyTrue,
    VecAllTrue(Shape),
    VecNot,
    VecBits(VecBitsOp),
    VecBitselect,
    VecShuffle([u8; 16]),
    VecConvert(VecCvtOp),
}

// === impl PackSize ===

impl PackSize {
    /// Access width in bytes.
    pub fn bytes(&self) -> u64 {
        match self {
            PackSize::Pack8 => 1,
            PackSize::Pack16 => 2,
            PackSize::Pack32 => 4,
        }
    }
}

// === impl Shape ===

impl Shape {
    /// Number of lanes in the shape.
    pub fn lanes(&self) -> usize {
        match self {
            Shape::I8x16 => 16,
            Shape::I16x8 => 8,
            Shape::I32x4 | Shape::F32x4 => 4,
            Shape::I64x2 | Shape::F64x2 => 2,
        }
    }

    /// Width of one lane in bits.
    pub fn lane_bits(&self) -> u32 {
        128 / self.lanes() as u32
    }
}
