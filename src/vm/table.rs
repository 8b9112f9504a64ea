// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::vec;
use alloc::vec::Vec;

use crate::trap::TrapKind;
use crate::types::{Limits, RefType, TableType};
use crate::values::Ref;

/// A WebAssembly table instance.
///
/// Bulk fill/copy/init are not implemented here; the machine elaborates
/// them into per-element `get`/`set` steps so that a mid-way trap leaves
/// the committed prefix observable.
///
/// https://webassembly.github.io/spec/core/exec/runtime.html#table-instances
#[derive(Debug)]
pub struct Table {
    elements: Vec<Ref>,
    maximum: Option<u32>,
    element_ty: RefType,
}

// === impl Table ===

impl Table {
    pub fn new(ty: TableType) -> Self {
        Self {
            elements: vec![Ref::Null(ty.element); ty.limits.min as usize],
            maximum: ty.limits.max,
            element_ty: ty.element,
        }
    }

    /// The table's type, with the current size as minimum.
    pub fn ty(&self) -> TableType {
        TableType {
            element: self.element_ty,
            limits: Limits::new(self.size(), self.maximum),
        }
    }

    /// Current size in elements.
    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    /// Grows the table by `delta` elements filled with `init`. Returns
    /// the previous size, or -1 when the new size would exceed the
    /// declared maximum or the 32-bit index space, or when the allocator
    /// refuses.
    pub fn grow(&mut self, delta: u32, init: Ref) -> i32 {
        let old = self.size();
        let Some(new) = old.checked_add(delta) else {
            return -1;
        };
        if let Some(max) = self.maximum
            && new > max
        {
            return -1;
        }
        if self.elements.try_reserve_exact(delta as usize).is_err() {
            return -1;
        }
        self.elements.resize(new as usize, init);
        tracing::trace!(old, new, "table grown");
        old as i32
    }

    pub fn get(&self, index: u32) -> Result<Ref, TrapKind> {
        self.elements
            .get(index as usize)
            .cloned()
            .ok_or(TrapKind::TableOutOfBounds)
    }

    pub fn set(&mut self, index: u32, elem: Ref) -> Result<(), TrapKind> {
        let slot = self
            .elements
            .get_mut(index as usize)
            .ok_or(TrapKind::TableOutOfBounds)?;
        *slot = elem;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(min: u32, max: Option<u32>) -> Table {
        Table::new(TableType {
            element: RefType::Func,
            limits: Limits::new(min, max),
        })
    }

    #[test]
    fn starts_null() {
        let t = table(2, None);
        assert!(t.get(0).unwrap().is_null());
        assert_eq!(t.get(2).unwrap_err(), TrapKind::TableOutOfBounds);
    }

    #[test]
    fn grow_reports_previous_size() {
        let mut t = table(1, Some(2));
        assert_eq!(t.grow(1, Ref::Extern(7)), 1);
        assert_eq!(t.get(1).unwrap(), Ref::Extern(7));
        assert_eq!(t.grow(1, Ref::Null(RefType::Func)), -1);
        assert_eq!(t.size(), 2);
        // zero-delta growth always succeeds
        assert_eq!(t.grow(0, Ref::Null(RefType::Func)), 2);
    }

    #[test]
    fn set_out_of_bounds() {
        let mut t = table(1, None);
        assert_eq!(
            t.set(1, Ref::Extern(0)).unwrap_err(),
            TrapKind::TableOutOfBounds
        );
    }
}
