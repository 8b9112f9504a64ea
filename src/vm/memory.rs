// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::vec;
use alloc::vec::Vec;

use crate::instr::{PackSize, Sign, VecLoadPack};
use crate::trap::TrapKind;
use crate::types::{Limits, MemoryType, NumType};
use crate::values::{V128, Val};
use crate::{MAX_PAGES, PAGE_SIZE};

/// A WebAssembly linear memory instance.
///
/// Addresses are 64-bit internally: the 32-bit i32 address is
/// zero-extended and the static offset added in u64, so overflow against
/// `pages * 65536` is always detected.
///
/// https://webassembly.github.io/spec/core/exec/runtime.html#memory-instances
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
    maximum: Option<u32>,
    shared: bool,
}

// === impl Memory ===

impl Memory {
    pub fn new(ty: MemoryType) -> Self {
        Self {
            data: vec![0; ty.limits.min as usize * PAGE_SIZE],
            maximum: ty.limits.max,
            shared: ty.shared,
        }
    }

    /// The memory's type, with the current size as minimum.
    pub fn ty(&self) -> MemoryType {
        MemoryType {
            limits: Limits::new(self.size(), self.maximum),
            shared: self.shared,
        }
    }

    pub fn shared(&self) -> bool {
        self.shared
    }

    /// Current size in pages.
    pub fn size(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    /// Current size in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grows the memory by `delta` pages. Returns the previous size in
    /// pages, or -1 when the new size would exceed the declared maximum
    /// or the 32-bit index space, or when the allocator refuses.
    pub fn grow(&mut self, delta: u32) -> i32 {
        let old = self.size();
        let Some(new) = old.checked_add(delta) else {
            return -1;
        };
        if new > self.maximum.unwrap_or(MAX_PAGES).min(MAX_PAGES) {
            return -1;
        }
        if self
            .data
            .try_reserve_exact(delta as usize * PAGE_SIZE)
            .is_err()
        {
            return -1;
        }
        self.data.resize(new as usize * PAGE_SIZE, 0);
        tracing::trace!(old, new, "memory grown");
        old as i32
    }

    fn check(&self, ea: u64, len: u64) -> Result<usize, TrapKind> {
        let end = ea.checked_add(len).ok_or(TrapKind::MemoryOutOfBounds)?;
        if end > self.len() {
            Err(TrapKind::MemoryOutOfBounds)
        } else {
            Ok(ea as usize)
        }
    }

    /// Fails with [`TrapKind::UnalignedAtomic`] unless `ea` is a multiple
    /// of the access size.
    pub fn check_align(ea: u64, size: u64) -> Result<(), TrapKind> {
        if ea % size != 0 {
            Err(TrapKind::UnalignedAtomic)
        } else {
            Ok(())
        }
    }

    pub fn read_bytes(&self, ea: u64, len: u64) -> Result<&[u8], TrapKind> {
        let start = self.check(ea, len)?;
        Ok(&self.data[start..start + len as usize])
    }

    pub fn write_bytes(&mut self, ea: u64, bytes: &[u8]) -> Result<(), TrapKind> {
        let start = self.check(ea, bytes.len() as u64)?;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Loads a little-endian `len`-byte word, zero-extended to u64.
    fn load_wide(&self, ea: u64, len: u64) -> Result<u64, TrapKind> {
        let bytes = self.read_bytes(ea, len)?;
        let mut out = [0u8; 8];
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(out))
    }

    /// Stores the low `len` bytes of a word, little-endian.
    fn store_wide(&mut self, ea: u64, len: u64, value: u64) -> Result<(), TrapKind> {
        self.write_bytes(ea, &value.to_le_bytes()[..len as usize])
    }

    /// Typed scalar load, possibly packed with the given extension.
    pub fn load_num(
        &self,
        ea: u64,
        ty: NumType,
        pack: Option<(PackSize, Sign)>,
    ) -> Result<Val, TrapKind> {
        let len = pack.map_or(ty.size(), |(sz, _)| sz.bytes());
        let raw = self.load_wide(ea, len)?;
        let raw = match pack {
            Some((sz, Sign::Signed)) => sign_extend(raw, sz),
            _ => raw,
        };
        Ok(match ty {
            NumType::I32 => Val::I32(raw as u32 as i32),
            NumType::I64 => Val::I64(raw as i64),
            NumType::F32 => Val::F32(raw as u32),
            NumType::F64 => Val::F64(raw),
        })
    }

    /// Typed scalar store, possibly truncated to the packed width.
    pub fn store_num(&mut self, ea: u64, v: Val, pack: Option<PackSize>) -> Result<(), TrapKind> {
        let (raw, size) = match v {
            Val::I32(x) => (x as u32 as u64, 4),
            Val::I64(x) => (x as u64, 8),
            Val::F32(x) => (x as u64, 4),
            Val::F64(x) => (x, 8),
            // ill-typed operands are caught before the memory is consulted
            _ => return Err(TrapKind::MemoryOutOfBounds),
        };
        let len = pack.map_or(size, |sz| sz.bytes());
        self.store_wide(ea, len, raw)
    }

    pub fn load_vec(&self, ea: u64) -> Result<V128, TrapKind> {
        let bytes = self.read_bytes(ea, 16)?;
        let mut out = [0u8; 16];
        out.copy_from_slice(bytes);
        Ok(V128::from_le_bytes(out))
    }

    pub fn store_vec(&mut self, ea: u64, v: V128) -> Result<(), TrapKind> {
        self.write_bytes(ea, &v.to_le_bytes())
    }

    /// Packed, splatting and zero-extending vector loads.
    pub fn load_vec_packed(&self, ea: u64, pack: VecLoadPack) -> Result<V128, TrapKind> {
        Ok(match pack {
            VecLoadPack::Pack8x8(sign) => {
                let bytes = self.read_bytes(ea, 8)?;
                let mut out = [0i16; 8];
                for (o, &b) in out.iter_mut().zip(bytes) {
                    *o = match sign {
                        Sign::Signed => b as i8 as i16,
                        Sign::Unsigned => b as i16,
                    };
                }
                V128::from_i16x8(out)
            }
            VecLoadPack::Pack16x4(sign) => {
                let raw = self.load_wide(ea, 8)?;
                let mut out = [0i32; 4];
                for (i, o) in out.iter_mut().enumerate() {
                    let lane = (raw >> (16 * i)) as u16;
                    *o = match sign {
                        Sign::Signed => lane as i16 as i32,
                        Sign::Unsigned => lane as i32,
                    };
                }
                V128::from_i32x4(out)
            }
            VecLoadPack::Pack32x2(sign) => {
                let raw = self.load_wide(ea, 8)?;
                let mut out = [0i64; 2];
                for (i, o) in out.iter_mut().enumerate() {
                    let lane = (raw >> (32 * i)) as u32;
                    *o = match sign {
                        Sign::Signed => lane as i32 as i64,
                        Sign::Unsigned => lane as i64,
                    };
                }
                V128::from_i64x2(out)
            }
            VecLoadPack::Splat8 => V128::from_u8x16([self.load_wide(ea, 1)? as u8; 16]),
            VecLoadPack::Splat16 => V128::from_u16x8([self.load_wide(ea, 2)? as u16; 8]),
            VecLoadPack::Splat32 => V128::from_u32x4([self.load_wide(ea, 4)? as u32; 4]),
            VecLoadPack::Splat64 => V128::from_u64x2([self.load_wide(ea, 8)?; 2]),
            VecLoadPack::Zero32 => V128::from_u32x4([self.load_wide(ea, 4)? as u32, 0, 0, 0]),
            VecLoadPack::Zero64 => V128::from_u64x2([self.load_wide(ea, 8)?, 0]),
        })
    }

    /// Alignment-checked atomic load; packed loads zero-extend.
    pub fn atomic_load(
        &self,
        ea: u64,
        ty: NumType,
        pack: Option<PackSize>,
    ) -> Result<Val, TrapKind> {
        let len = pack.map_or(ty.size(), |sz| sz.bytes());
        Self::check_align(ea, len)?;
        self.load_num(ea, ty, pack.map(|sz| (sz, Sign::Unsigned)))
    }

    /// Alignment-checked atomic store.
    pub fn atomic_store(
        &mut self,
        ea: u64,
        v: Val,
        ty: NumType,
        pack: Option<PackSize>,
    ) -> Result<(), TrapKind> {
        let len = pack.map_or(ty.size(), |sz| sz.bytes());
        Self::check_align(ea, len)?;
        self.store_num(ea, v, pack)
    }

    /// Atomic read-modify-write on a `width`-byte word. Operand and
    /// result are raw, zero-extended bits.
    pub fn atomic_rmw(
        &mut self,
        ea: u64,
        width: u64,
        op: crate::instr::RmwOp,
        operand: u64,
    ) -> Result<u64, TrapKind> {
        use crate::instr::RmwOp;
        Self::check_align(ea, width)?;
        let old = self.load_wide(ea, width)?;
        let new = match op {
            RmwOp::Add => old.wrapping_add(operand),
            RmwOp::Sub => old.wrapping_sub(operand),
            RmwOp::And => old & operand,
            RmwOp::Or => old | operand,
            RmwOp::Xor => old ^ operand,
            RmwOp::Xchg => operand,
        };
        self.store_wide(ea, width, new)?;
        Ok(old)
    }

    /// Atomic compare-exchange on a `width`-byte word. `expected` is
    /// wrapped to the access width before comparing; returns the prior
    /// value.
    pub fn atomic_cmpxchg(
        &mut self,
        ea: u64,
        width: u64,
        expected: u64,
        replacement: u64,
    ) -> Result<u64, TrapKind> {
        Self::check_align(ea, width)?;
        let old = self.load_wide(ea, width)?;
        if old == wrap_width(expected, width) {
            self.store_wide(ea, width, replacement)?;
        }
        Ok(old)
    }
}

fn wrap_width(value: u64, width: u64) -> u64 {
    if width >= 8 {
        value
    } else {
        value & ((1u64 << (width * 8)) - 1)
    }
}

fn sign_extend(raw: u64, size: PackSize) -> u64 {
    match size {
        PackSize::Pack8 => raw as u8 as i8 as i64 as u64,
        PackSize::Pack16 => raw as u16 as i16 as i64 as u64,
        PackSize::Pack32 => raw as u32 as i32 as i64 as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::RmwOp;

    fn mem(pages: u32, max: Option<u32>) -> Memory {
        Memory::new(MemoryType {
            limits: Limits::new(pages, max),
            shared: false,
        })
    }

    #[test]
    fn grow_reports_previous_size() {
        let mut m = mem(1, Some(3));
        assert_eq!(m.grow(1), 1);
        assert_eq!(m.grow(1), 2);
        assert_eq!(m.size(), 3);
        // at the declared maximum the size must stay unchanged
        assert_eq!(m.grow(1), -1);
        assert_eq!(m.size(), 3);
    }

    #[test]
    fn grow_respects_index_space() {
        let mut m = mem(1, None);
        assert_eq!(m.grow(u32::MAX), -1);
        assert_eq!(m.grow(MAX_PAGES), -1);
    }

    #[test]
    fn bounds_use_wide_addresses() {
        let m = mem(1, None);
        // base + offset would wrap in 32 bits; the 64-bit check catches it
        assert_eq!(
            m.load_num(u32::MAX as u64 + 8, NumType::I32, None),
            Err(TrapKind::MemoryOutOfBounds)
        );
        assert_eq!(
            m.read_bytes(u64::MAX, 2).unwrap_err(),
            TrapKind::MemoryOutOfBounds
        );
    }

    #[test]
    fn packed_round_trip() {
        let mut m = mem(1, None);
        m.store_num(16, Val::I32(-2), Some(PackSize::Pack8)).unwrap();
        assert_eq!(
            m.load_num(16, NumType::I32, Some((PackSize::Pack8, Sign::Unsigned))),
            Ok(Val::I32(0xfe))
        );
        assert_eq!(
            m.load_num(16, NumType::I32, Some((PackSize::Pack8, Sign::Signed))),
            Ok(Val::I32(-2))
        );

        m.store_num(32, Val::I64(i64::MIN + 1), None).unwrap();
        assert_eq!(m.load_num(32, NumType::I64, None), Ok(Val::I64(i64::MIN + 1)));
    }

    #[test]
    fn atomics_check_alignment() {
        let mut m = mem(1, None);
        assert_eq!(
            m.atomic_load(2, NumType::I32, None),
            Err(TrapKind::UnalignedAtomic)
        );
        assert_eq!(
            m.atomic_rmw(1, 4, RmwOp::Add, 1).unwrap_err(),
            TrapKind::UnalignedAtomic
        );
        assert!(m.atomic_load(4, NumType::I32, None).is_ok());
    }

    #[test]
    fn rmw_returns_prior_value() {
        let mut m = mem(1, None);
        m.store_num(0, Val::I32(40), None).unwrap();
        assert_eq!(m.atomic_rmw(0, 4, RmwOp::Add, 2).unwrap(), 40);
        assert_eq!(m.load_num(0, NumType::I32, None), Ok(Val::I32(42)));
        assert_eq!(m.atomic_rmw(0, 4, RmwOp::Xchg, 7).unwrap(), 42);
        assert_eq!(m.load_num(0, NumType::I32, None), Ok(Val::I32(7)));
    }

    #[test]
    fn cmpxchg_wraps_expected() {
        let mut m = mem(1, None);
        m.store_num(0, Val::I32(0xab), Some(PackSize::Pack8)).unwrap();
        // expected 0x1ab wraps to 0xab at 8-bit width, so the exchange hits
        let old = m.atomic_cmpxchg(0, 1, 0x1ab, 0x11).unwrap();
        assert_eq!(old, 0xab);
        assert_eq!(
            m.load_num(0, NumType::I32, Some((PackSize::Pack8, Sign::Unsigned))),
            Ok(Val::I32(0x11))
        );
        // mismatch leaves memory untouched
        let old = m.atomic_cmpxchg(0, 1, 0x99, 0x22).unwrap();
        assert_eq!(old, 0x11);
        assert_eq!(
            m.load_num(0, NumType::I32, Some((PackSize::Pack8, Sign::Unsigned))),
            Ok(Val::I32(0x11))
        );
    }
}
