// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end scenarios driven through the public embedder API.

use kinterp::{
    BinOp, BlockType, Config, ConstExpr, DataDesc, DataMode, ElemDesc, ElemMode, EntityIndex,
    Error, Export, Flags, FuncDesc, FuncIndex, FuncInstance, FuncType, GlobalDesc, GlobalType,
    IBinOp, ITestOp, Instr, Limits, LocalIndex, MemArg, MemoryIndex, MemoryType, Module,
    Mutability, NumType, PackSize, RefType, Sign, Span, TableIndex, TableType, TestOp, TrapKind,
    Val, ValType, seq,
};

fn local(i: u32) -> LocalIndex {
    LocalIndex::from_u32(i)
}

fn export_func(name: &str, index: u32) -> Export {
    Export {
        name: name.into(),
        index: EntityIndex::Func(FuncIndex::from_u32(index)),
    }
}

fn export_memory(name: &str) -> Export {
    Export {
        name: name.into(),
        index: EntityIndex::Memory(MemoryIndex::from_u32(0)),
    }
}

fn func(module: &mut Module, params: &[ValType], results: &[ValType], locals: &[ValType], body: kinterp::InstrSeq) {
    let ty = module.types.push(FuncType::new(
        params.iter().copied(),
        results.iter().copied(),
    ));
    module.funcs.push(FuncDesc {
        ty,
        locals: locals.to_vec(),
        body,
        span: Span::default(),
    });
}

/// Instantiates on a fresh thread and returns (config, instance).
fn instantiate(module: &Module) -> (Config, std::rc::Rc<kinterp::ModuleInstance>) {
    let mut config = Config::new(Flags::default());
    let id = config.spawn();
    let inst = config.init(id, module, &[]).unwrap();
    config.eval(id).unwrap();
    (config, inst)
}

/// Invokes an export on a fresh thread and runs it to completion.
fn call(
    config: &mut Config,
    inst: &kinterp::ModuleInstance,
    name: &str,
    args: &[Val],
) -> kinterp::Result<Vec<Val>> {
    let f = inst.get_func(name).expect("export should be a function");
    let id = config.spawn();
    config.invoke(id, &f, args)?;
    config.eval(id)
}

fn trap_kind(err: &anyhow::Error) -> Option<TrapKind> {
    err.downcast_ref::<Error>()?.trap_kind().copied()
}

#[test]
fn unreachable_trap() {
    let mut module = Module::default();
    func(&mut module, &[], &[], &[], seq([Instr::Unreachable]));
    module.exports.push(export_func("f", 0));

    let (mut config, inst) = instantiate(&module);
    let err = call(&mut config, &inst, "f", &[]).unwrap_err();
    assert_eq!(trap_kind(&err), Some(TrapKind::Unreachable));
    assert!(err.to_string().contains("unreachable executed"));
}

#[test]
fn factorial_loop() {
    let mut module = Module::default();
    func(
        &mut module,
        &[ValType::I32],
        &[ValType::I32],
        &[ValType::I32],
        seq([
            Instr::Const(Val::I32(1)),
            Instr::LocalSet(local(1)),
            Instr::Block(
                BlockType::Empty,
                seq([Instr::Loop(
                    BlockType::Empty,
                    seq([
                        Instr::LocalGet(local(0)),
                        Instr::Test(TestOp::I32(ITestOp::Eqz)),
                        Instr::BrIf(1),
                        Instr::LocalGet(local(1)),
                        Instr::LocalGet(local(0)),
                        Instr::Binary(BinOp::I32(IBinOp::Mul)),
                        Instr::LocalSet(local(1)),
                        Instr::LocalGet(local(0)),
                        Instr::Const(Val::I32(1)),
                        Instr::Binary(BinOp::I32(IBinOp::Sub)),
                        Instr::LocalSet(local(0)),
                        Instr::Br(0),
                    ]),
                )]),
            ),
            Instr::LocalGet(local(1)),
        ]),
    );
    module.exports.push(export_func("fact", 0));

    let (mut config, inst) = instantiate(&module);
    let results = call(&mut config, &inst, "fact", &[Val::I32(10)]).unwrap();
    assert_eq!(results, vec![Val::I32(3628800)]);
    let results = call(&mut config, &inst, "fact", &[Val::I32(0)]).unwrap();
    assert_eq!(results, vec![Val::I32(1)]);
}

#[test]
fn indirect_call_type_mismatch() {
    let mut module = Module::default();
    // type 0: [] -> [i32], implemented; type 1: [] -> [i64], expected at
    // the call site
    func(&mut module, &[], &[ValType::I32], &[], seq([Instr::Const(Val::I32(7))]));
    let expected_ty = module.types.push(FuncType::new([], [ValType::I64]));
    let caller_ty = module.types.push(FuncType::new([], [ValType::I64]));
    module.funcs.push(FuncDesc {
        ty: caller_ty,
        locals: Vec::new(),
        body: seq([
            Instr::Const(Val::I32(0)),
            Instr::CallIndirect(TableIndex::from_u32(0), expected_ty),
        ]),
        span: Span::default(),
    });
    module.tables.push(TableType {
        element: RefType::Func,
        limits: Limits::new(1, Some(1)),
    });
    module.elems.push(ElemDesc {
        ty: RefType::Func,
        items: vec![ConstExpr::ref_func(FuncIndex::from_u32(0))],
        mode: ElemMode::Active {
            table: TableIndex::from_u32(0),
            offset: ConstExpr::value(Val::I32(0)),
        },
        span: Span::default(),
    });
    module.exports.push(export_func("g", 1));

    let (mut config, inst) = instantiate(&module);
    let err = call(&mut config, &inst, "g", &[]).unwrap_err();
    assert_eq!(trap_kind(&err), Some(TrapKind::IndirectCallTypeMismatch));
    assert!(err.to_string().contains("indirect call type mismatch"));
}

#[test]
fn memory_grow_and_fill() {
    let mut module = Module::default();
    module.memories.push(MemoryType {
        limits: Limits::new(1, Some(2)),
        shared: true,
    });
    func(
        &mut module,
        &[],
        &[ValType::I32],
        &[],
        seq([Instr::Const(Val::I32(1)), Instr::MemoryGrow]),
    );
    func(
        &mut module,
        &[],
        &[ValType::I32],
        &[],
        seq([
            Instr::Const(Val::I32(65536)),
            Instr::Const(Val::I32(0xAB)),
            Instr::Const(Val::I32(4)),
            Instr::MemoryFill,
            Instr::Const(Val::I32(65536)),
            Instr::Load {
                ty: NumType::I32,
                pack: Some((PackSize::Pack8, Sign::Unsigned)),
                memarg: MemArg::default(),
            },
        ]),
    );
    module.exports.push(export_func("grow", 0));
    module.exports.push(export_func("fill_load", 1));

    let (mut config, inst) = instantiate(&module);
    assert_eq!(call(&mut config, &inst, "grow", &[]).unwrap(), vec![Val::I32(1)]);
    assert_eq!(
        call(&mut config, &inst, "fill_load", &[]).unwrap(),
        vec![Val::I32(0xAB)]
    );
    // a second grow exceeds the declared maximum
    assert_eq!(call(&mut config, &inst, "grow", &[]).unwrap(), vec![Val::I32(-1)]);
}

fn shared_memory_module() -> Module {
    let mut module = Module::default();
    module.memories.push(MemoryType {
        limits: Limits::new(1, Some(1)),
        shared: true,
    });
    // waiter: atomic.wait at address 0, expecting 0, no timeout
    func(
        &mut module,
        &[],
        &[ValType::I32],
        &[],
        seq([
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I64(-1)),
            Instr::MemoryAtomicWait {
                ty: NumType::I32,
                memarg: MemArg::default(),
            },
        ]),
    );
    // notifier: wake at most one waiter at address 0
    func(
        &mut module,
        &[],
        &[ValType::I32],
        &[],
        seq([
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I32(1)),
            Instr::MemoryAtomicNotify {
                memarg: MemArg::default(),
            },
        ]),
    );
    module.exports.push(export_func("waiter", 0));
    module.exports.push(export_func("notifier", 1));
    module
}

#[test]
fn wait_notify_rendezvous() {
    let module = shared_memory_module();
    let (mut config, inst) = instantiate(&module);

    let waiter = inst.get_func("waiter").unwrap();
    let notifier = inst.get_func("notifier").unwrap();

    let t1 = config.spawn();
    config.invoke(t1, &waiter, &[]).unwrap();
    while config.runnable(t1) {
        config.step(t1).unwrap();
    }
    // t1 is blocked at the wait site, not finished
    assert!(matches!(config.status(t1), kinterp::Status::Running));

    let t2 = config.spawn();
    config.invoke(t2, &notifier, &[]).unwrap();
    // one woken thread is reported to the notifier
    assert_eq!(config.eval(t2).unwrap(), vec![Val::I32(1)]);

    // the waiter resumes with the "notified" result
    assert_eq!(config.eval(t1).unwrap(), vec![Val::I32(0)]);
}

#[test]
fn notify_without_waiters_wakes_zero() {
    let module = shared_memory_module();
    let (mut config, inst) = instantiate(&module);
    let results = call(&mut config, &inst, "notifier", &[]).unwrap();
    assert_eq!(results, vec![Val::I32(0)]);
}

#[test]
fn wait_value_mismatch_does_not_suspend() {
    let mut module = shared_memory_module();
    // store 42 at address 0, then wait expecting 0 with infinite timeout
    func(
        &mut module,
        &[],
        &[ValType::I32],
        &[],
        seq([
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I32(42)),
            Instr::Store {
                ty: NumType::I32,
                pack: None,
                memarg: MemArg::default(),
            },
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I64(-1)),
            Instr::MemoryAtomicWait {
                ty: NumType::I32,
                memarg: MemArg::default(),
            },
        ]),
    );
    module.exports.push(export_func("mismatch", 2));

    let (mut config, inst) = instantiate(&module);
    assert_eq!(
        call(&mut config, &inst, "mismatch", &[]).unwrap(),
        vec![Val::I32(1)]
    );
}

#[test]
fn wait_short_timeout_reports_timeout() {
    let mut module = shared_memory_module();
    // expected value matches, timeout below the epsilon
    func(
        &mut module,
        &[],
        &[ValType::I32],
        &[],
        seq([
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I64(1000)),
            Instr::MemoryAtomicWait {
                ty: NumType::I32,
                memarg: MemArg::default(),
            },
        ]),
    );
    module.exports.push(export_func("timed", 2));

    let (mut config, inst) = instantiate(&module);
    assert_eq!(call(&mut config, &inst, "timed", &[]).unwrap(), vec![Val::I32(2)]);
}

#[test]
fn wait_requires_shared_memory() {
    let mut module = Module::default();
    module.memories.push(MemoryType {
        limits: Limits::new(1, None),
        shared: false,
    });
    func(
        &mut module,
        &[],
        &[ValType::I32],
        &[],
        seq([
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I64(-1)),
            Instr::MemoryAtomicWait {
                ty: NumType::I32,
                memarg: MemArg::default(),
            },
        ]),
    );
    module.exports.push(export_func("w", 0));

    let (mut config, inst) = instantiate(&module);
    let err = call(&mut config, &inst, "w", &[]).unwrap_err();
    assert_eq!(trap_kind(&err), Some(TrapKind::ExpectedSharedMemory));
}

#[test]
fn bulk_copy_with_overlap() {
    let mut module = Module::default();
    module.memories.push(MemoryType {
        limits: Limits::new(1, None),
        shared: false,
    });
    module.datas.push(DataDesc {
        bytes: vec![1, 2, 3, 4, 5].into_boxed_slice(),
        mode: DataMode::Active {
            offset: ConstExpr::value(Val::I32(0)),
        },
        span: Span::default(),
    });
    func(
        &mut module,
        &[],
        &[],
        &[],
        seq([
            Instr::Const(Val::I32(2)),
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I32(5)),
            Instr::MemoryCopy,
        ]),
    );
    module.exports.push(export_func("copy", 0));
    module.exports.push(export_memory("mem"));

    let (mut config, inst) = instantiate(&module);
    call(&mut config, &inst, "copy", &[]).unwrap();
    let mem = inst.get_memory("mem").unwrap();
    let bytes = mem.borrow().read_bytes(0, 10).unwrap().to_vec();
    assert_eq!(bytes, [1, 2, 1, 2, 3, 4, 5, 0, 0, 0]);
}

#[test]
fn zero_length_table_copy_never_traps() {
    let mut module = Module::default();
    module.tables.push(TableType {
        element: RefType::Func,
        limits: Limits::new(1, None),
    });
    func(
        &mut module,
        &[ValType::I32],
        &[],
        &[],
        seq([
            Instr::Const(Val::I32(10)),
            Instr::Const(Val::I32(10)),
            Instr::LocalGet(local(0)),
            Instr::TableCopy(TableIndex::from_u32(0), TableIndex::from_u32(0)),
        ]),
    );
    module.exports.push(export_func("copy_n", 0));

    let (mut config, inst) = instantiate(&module);
    // out-of-bounds endpoints are fine at n = 0
    call(&mut config, &inst, "copy_n", &[Val::I32(0)]).unwrap();
    // and trap at n = 1
    let err = call(&mut config, &inst, "copy_n", &[Val::I32(1)]).unwrap_err();
    assert_eq!(trap_kind(&err), Some(TrapKind::TableOutOfBounds));
}

#[test]
fn dropped_segment_init_traps_only_when_nonempty() {
    let mut module = Module::default();
    module.tables.push(TableType {
        element: RefType::Func,
        limits: Limits::new(1, None),
    });
    module.elems.push(ElemDesc {
        ty: RefType::Func,
        items: vec![ConstExpr::ref_null(RefType::Func)],
        mode: ElemMode::Passive,
        span: Span::default(),
    });
    let elem = kinterp::ElemIndex::from_u32(0);
    let table = TableIndex::from_u32(0);
    func(
        &mut module,
        &[ValType::I32],
        &[],
        &[],
        seq([
            // drop twice: drains are idempotent
            Instr::ElemDrop(elem),
            Instr::ElemDrop(elem),
            Instr::Const(Val::I32(0)),
            Instr::Const(Val::I32(0)),
            Instr::LocalGet(local(0)),
            Instr::TableInit(table, elem),
        ]),
    );
    module.exports.push(export_func("drop_init", 0));

    let (mut config, inst) = instantiate(&module);
    call(&mut config, &inst, "drop_init", &[Val::I32(0)]).unwrap();
    let err = call(&mut config, &inst, "drop_init", &[Val::I32(1)]).unwrap_err();
    assert_eq!(trap_kind(&err), Some(TrapKind::TableOutOfBounds));
}

#[test]
fn runaway_recursion_exhausts_the_budget() {
    let mut module = Module::default();
    func(
        &mut module,
        &[],
        &[],
        &[],
        seq([Instr::Call(FuncIndex::from_u32(0))]),
    );
    module.exports.push(export_func("rec", 0));

    let (mut config, inst) = instantiate(&module);
    let err = call(&mut config, &inst, "rec", &[]).unwrap_err();
    let err = err.downcast_ref::<Error>().unwrap();
    assert!(matches!(err, Error::Exhaustion { .. }));
    assert!(err.to_string().contains("call stack exhausted"));
}

#[test]
fn host_functions_and_import_binding() {
    let mut module = Module::default();
    let add_ty = FuncType::new([ValType::I32, ValType::I32], [ValType::I32]);
    module.types.push(add_ty.clone());
    module.imports.push(kinterp::Import {
        module: "env".into(),
        name: "add".into(),
        ty: kinterp::ExternType::Func(add_ty.clone()),
    });
    // caller: add(40, 2)
    func(
        &mut module,
        &[],
        &[ValType::I32],
        &[],
        seq([
            Instr::Const(Val::I32(40)),
            Instr::Const(Val::I32(2)),
            Instr::Call(FuncIndex::from_u32(0)),
        ]),
    );
    module.exports.push(export_func("call_add", 1));

    let add = FuncInstance::host(add_ty, |args| {
        let (Val::I32(a), Val::I32(b)) = (&args[0], &args[1]) else {
            unreachable!()
        };
        Ok(vec![Val::I32(a + b)])
    });

    let mut config = Config::new(Flags::default());
    let id = config.spawn();
    let inst = config
        .init(id, &module, &[kinterp::ExternVal::Func(add)])
        .unwrap();
    config.eval(id).unwrap();
    assert_eq!(
        call(&mut config, &inst, "call_add", &[]).unwrap(),
        vec![Val::I32(42)]
    );

    // a mismatched import type is a link error naming both types
    let bad = FuncInstance::host(FuncType::new([], []), |_| Ok(Vec::new()));
    let mut config = Config::new(Flags::default());
    let id = config.spawn();
    let err = config
        .init(id, &module, &[kinterp::ExternVal::Func(bad)])
        .unwrap_err();
    let err = err.downcast_ref::<Error>().unwrap();
    assert!(matches!(err, Error::Link { .. }));
    assert!(err.to_string().contains("env::add"));

    // and so is a missing import
    let mut config = Config::new(Flags::default());
    let id = config.spawn();
    let err = config.init(id, &module, &[]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>().unwrap(),
        Error::Link { .. }
    ));
}

#[test]
fn globals_round_trip_through_start() {
    let mut module = Module::default();
    module.globals.push(GlobalDesc {
        ty: GlobalType {
            content: ValType::I64,
            mutability: Mutability::Var,
        },
        init: ConstExpr::value(Val::I64(5)),
    });
    // start function doubles the global
    func(
        &mut module,
        &[],
        &[],
        &[],
        seq([
            Instr::GlobalGet(kinterp::GlobalIndex::from_u32(0)),
            Instr::GlobalGet(kinterp::GlobalIndex::from_u32(0)),
            Instr::Binary(BinOp::I64(IBinOp::Add)),
            Instr::GlobalSet(kinterp::GlobalIndex::from_u32(0)),
        ]),
    );
    module.start = Some(FuncIndex::from_u32(0));
    module.exports.push(Export {
        name: "g".into(),
        index: EntityIndex::Global(kinterp::GlobalIndex::from_u32(0)),
    });

    let (_config, inst) = instantiate(&module);
    let g = inst.get_global("g").unwrap();
    assert_eq!(g.borrow().get(), Val::I64(10));
}

#[test]
fn br_table_picks_depths() {
    let mut module = Module::default();
    func(
        &mut module,
        &[ValType::I32],
        &[ValType::I32],
        &[],
        seq([
            Instr::Block(
                BlockType::Empty,
                seq([
                    Instr::Block(
                        BlockType::Empty,
                        seq([
                            Instr::Block(
                                BlockType::Empty,
                                seq([
                                    Instr::LocalGet(local(0)),
                                    Instr::BrTable(vec![0, 1].into_boxed_slice(), 2),
                                ]),
                            ),
                            Instr::Const(Val::I32(10)),
                            Instr::Return,
                        ]),
                    ),
                    Instr::Const(Val::I32(20)),
                    Instr::Return,
                ]),
            ),
            Instr::Const(Val::I32(30)),
        ]),
    );
    module.exports.push(export_func("pick", 0));

    let (mut config, inst) = instantiate(&module);
    assert_eq!(call(&mut config, &inst, "pick", &[Val::I32(0)]).unwrap(), vec![Val::I32(10)]);
    assert_eq!(call(&mut config, &inst, "pick", &[Val::I32(1)]).unwrap(), vec![Val::I32(20)]);
    assert_eq!(call(&mut config, &inst, "pick", &[Val::I32(7)]).unwrap(), vec![Val::I32(30)]);
}

#[test]
fn simd_splat_add_extract() {
    use kinterp::{Shape, VecBinOp};

    let mut module = Module::default();
    func(
        &mut module,
        &[],
        &[ValType::I32],
        &[],
        seq([
            Instr::Const(Val::I32(3)),
            Instr::VecSplat(Shape::I32x4),
            Instr::Const(Val::I32(4)),
            Instr::VecSplat(Shape::I32x4),
            Instr::VecBinary(Shape::I32x4, VecBinOp::Add),
            Instr::VecExtractLane(Shape::I32x4, 2, None),
        ]),
    );
    module.exports.push(export_func("f", 0));

    let (mut config, inst) = instantiate(&module);
    assert_eq!(call(&mut config, &inst, "f", &[]).unwrap(), vec![Val::I32(7)]);
}

#[test]
fn atomic_rmw_add_then_load() {
    use kinterp::RmwOp;

    let mut module = Module::default();
    module.memories.push(MemoryType {
        limits: Limits::new(1, Some(1)),
        shared: true,
    });
    func(
        &mut module,
        &[],
        &[ValType::I32, ValType::I32],
        &[],
        seq([
            Instr::Const(Val::I32(8)),
            Instr::Const(Val::I32(5)),
            Instr::AtomicRmw {
                op: RmwOp::Add,
                ty: NumType::I32,
                pack: None,
                memarg: MemArg::default(),
            },
            Instr::Const(Val::I32(8)),
            Instr::AtomicLoad {
                ty: NumType::I32,
                pack: None,
                memarg: MemArg::default(),
            },
        ]),
    );
    module.exports.push(export_func("f", 0));

    let (mut config, inst) = instantiate(&module);
    // old value first, then the stored sum
    assert_eq!(
        call(&mut config, &inst, "f", &[]).unwrap(),
        vec![Val::I32(0), Val::I32(5)]
    );
}

#[test]
fn invoke_type_checks_arguments() {
    let mut module = Module::default();
    func(
        &mut module,
        &[ValType::I32],
        &[],
        &[],
        seq([Instr::LocalGet(local(0)), Instr::Drop]),
    );
    module.exports.push(export_func("f", 0));

    let (mut config, inst) = instantiate(&module);
    let f = inst.get_func("f").unwrap();
    let id = config.spawn();
    let err = config.invoke(id, &f, &[]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>().unwrap(),
        Error::Crash { .. }
    ));
    let err = config.invoke(id, &f, &[Val::I64(0)]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>().unwrap(),
        Error::Crash { .. }
    ));
}

#[test]
fn clear_empties_a_thread() {
    let module = shared_memory_module();
    let (mut config, inst) = instantiate(&module);
    let waiter = inst.get_func("waiter").unwrap();
    let id = config.spawn();
    config.invoke(id, &waiter, &[]).unwrap();
    config.clear(id);
    assert!(matches!(config.status(id), kinterp::Status::Result(vs) if vs.is_empty()));
}
