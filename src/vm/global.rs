// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::types::{GlobalType, Mutability};
use crate::values::Val;

/// A WebAssembly global instance.
#[derive(Debug)]
pub struct Global {
    ty: GlobalType,
    value: Val,
}

/// Failure to create or mutate a global. Both conditions are invariant
/// violations in a validated module; the machine reports them as crashes,
/// not guest traps.
#[derive(onlyerror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalError {
    #[error("cannot set immutable global")]
    Immutable,
    #[error("ill-typed global value")]
    TypeMismatch,
}

// === impl Global ===

impl Global {
    pub fn new(ty: GlobalType, value: Val) -> Result<Self, GlobalError> {
        if value.ty() != ty.content {
            return Err(GlobalError::TypeMismatch);
        }
        Ok(Self { ty, value })
    }

    pub fn ty(&self) -> GlobalType {
        self.ty
    }

    pub fn get(&self) -> Val {
        self.value.clone()
    }

    pub fn set(&mut self, value: Val) -> Result<(), GlobalError> {
        if self.ty.mutability != Mutability::Var {
            return Err(GlobalError::Immutable);
        }
        if value.ty() != self.ty.content {
            return Err(GlobalError::TypeMismatch);
        }
        self.value = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValType;

    #[test]
    fn set_then_get_round_trips() {
        let ty = GlobalType {
            content: ValType::I64,
            mutability: Mutability::Var,
        };
        let mut g = Global::new(ty, Val::I64(1)).unwrap();
        g.set(Val::I64(-7)).unwrap();
        assert_eq!(g.get(), Val::I64(-7));
    }

    #[test]
    fn immutable_set_is_an_invariant_violation() {
        let ty = GlobalType {
            content: ValType::I32,
            mutability: Mutability::Const,
        };
        let mut g = Global::new(ty, Val::I32(3)).unwrap();
        assert_eq!(g.set(Val::I32(4)), Err(GlobalError::Immutable));
        assert_eq!(g.get(), Val::I32(3));
    }

    #[test]
    fn ill_typed_values_are_rejected() {
        let ty = GlobalType {
            content: ValType::F32,
            mutability: Mutability::Var,
        };
        assert_eq!(
            Global::new(ty, Val::I32(0)).unwrap_err(),
            GlobalError::TypeMismatch
        );
        let mut g = Global::new(ty, Val::F32(0)).unwrap();
        assert_eq!(g.set(Val::F64(0)), Err(GlobalError::TypeMismatch));
    }
}
