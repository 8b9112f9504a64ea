// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Bulk memory operations against a reference model.
//!
//! The machine elaborates `memory.copy`/`memory.fill` element-wise,
//! ascending when `dst <= src` and descending otherwise. For every length
//! and overlap configuration the final bytes must match `copy_within`,
//! which has exactly the overlap-safe semantics.

use kinterp::{
    Config, EntityIndex, Export, Flags, FuncDesc, FuncIndex, FuncType, Instr, Limits, MemoryIndex,
    MemoryType, Module, Span, Val, ValType, seq,
};
use proptest::prelude::*;

fn memory_module(body: kinterp::InstrSeq) -> Module {
    let mut module = Module::default();
    module.memories.push(MemoryType {
        limits: Limits::new(1, None),
        shared: false,
    });
    let ty = module
        .types
        .push(FuncType::new([ValType::I32, ValType::I32, ValType::I32], []));
    module.funcs.push(FuncDesc {
        ty,
        locals: Vec::new(),
        body,
        span: Span::default(),
    });
    module.exports.push(Export {
        name: "run".into(),
        index: EntityIndex::Func(FuncIndex::from_u32(0)),
    });
    module.exports.push(Export {
        name: "mem".into(),
        index: EntityIndex::Memory(MemoryIndex::from_u32(0)),
    });
    module
}

fn run(module: &Module, init: &[u8], args: [i32; 3]) -> Vec<u8> {
    let mut config = Config::new(Flags::default());
    let id = config.spawn();
    let inst = config.init(id, module, &[]).unwrap();
    config.eval(id).unwrap();

    let mem = inst.get_memory("mem").unwrap();
    mem.borrow_mut().write_bytes(0, init).unwrap();

    let f = inst.get_func("run").unwrap();
    let id = config.spawn();
    config
        .invoke(id, &f, &[Val::I32(args[0]), Val::I32(args[1]), Val::I32(args[2])])
        .unwrap();
    config.eval(id).unwrap();

    let out = mem.borrow().read_bytes(0, init.len() as u64).unwrap().to_vec();
    out
}

proptest! {
    #[test]
    fn copy_matches_reference_model(
        init in proptest::collection::vec(any::<u8>(), 256),
        d in 0u32..200,
        s in 0u32..200,
        n in 0u32..56,
    ) {
        let module = memory_module(seq([
            Instr::LocalGet(kinterp::LocalIndex::from_u32(0)),
            Instr::LocalGet(kinterp::LocalIndex::from_u32(1)),
            Instr::LocalGet(kinterp::LocalIndex::from_u32(2)),
            Instr::MemoryCopy,
        ]));
        let out = run(&module, &init, [d as i32, s as i32, n as i32]);

        let mut expected = init.clone();
        expected.copy_within(s as usize..(s + n) as usize, d as usize);
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn fill_matches_reference_model(
        init in proptest::collection::vec(any::<u8>(), 256),
        d in 0u32..200,
        value in any::<u8>(),
        n in 0u32..56,
    ) {
        let module = memory_module(seq([
            Instr::LocalGet(kinterp::LocalIndex::from_u32(0)),
            Instr::LocalGet(kinterp::LocalIndex::from_u32(1)),
            Instr::LocalGet(kinterp::LocalIndex::from_u32(2)),
            Instr::MemoryFill,
        ]));
        let out = run(&module, &init, [d as i32, value as i32, n as i32]);

        let mut expected = init.clone();
        expected[d as usize..(d + n) as usize].fill(value);
        prop_assert_eq!(out, expected);
    }
}
