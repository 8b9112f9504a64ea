// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Float operator evaluators, generated once per width.
//!
//! `min`/`max` propagate NaN and order the signed zeroes, and `nearest`
//! rounds ties to even, all of which differ from the `core`/`libm`
//! operations of the same name.

macro_rules! float_impl {
    ($name:ident, $t:ty, $fabs:path, $sqrt:path, $ceil:path, $floor:path, $trunc:path, $copysign:path) => {
        pub(crate) mod $name {
            use crate::instr::{FBinOp, FRelOp, FUnOp};

            pub fn unop(op: FUnOp, x: $t) -> $t {
                match op {
                    FUnOp::Abs => $fabs(x),
                    FUnOp::Neg => -x,
                    FUnOp::Ceil => $ceil(x),
                    FUnOp::Floor => $floor(x),
                    FUnOp::Trunc => $trunc(x),
                    FUnOp::Nearest => nearest(x),
                    FUnOp::Sqrt => $sqrt(x),
                }
            }

            pub fn binop(op: FBinOp, x: $t, y: $t) -> $t {
                match op {
                    FBinOp::Add => x + y,
                    FBinOp::Sub => x - y,
                    FBinOp::Mul => x * y,
                    FBinOp::Div => x / y,
                    FBinOp::Min => min(x, y),
                    FBinOp::Max => max(x, y),
                    FBinOp::CopySign => $copysign(x, y),
                }
            }

            pub fn relop(op: FRelOp, x: $t, y: $t) -> bool {
                match op {
                    FRelOp::Eq => x == y,
                    FRelOp::Ne => x != y,
                    FRelOp::Lt => x < y,
                    FRelOp::Gt => x > y,
                    FRelOp::Le => x <= y,
                    FRelOp::Ge => x >= y,
                }
            }

            pub fn min(x: $t, y: $t) -> $t {
                if x.is_nan() || y.is_nan() {
                    <$t>::NAN
                } else if x == y {
                    // pick -0 over +0
                    if x.is_sign_negative() { x } else { y }
                } else if x < y {
                    x
                } else {
                    y
                }
            }

            pub fn max(x: $t, y: $t) -> $t {
                if x.is_nan() || y.is_nan() {
                    <$t>::NAN
                } else if x == y {
                    if x.is_sign_positive() { x } else { y }
                } else if x > y {
                    x
                } else {
                    y
                }
            }

            /// Round to the nearest integer, ties to even.
            pub fn nearest(x: $t) -> $t {
                if x.is_nan() || x.is_infinite() {
                    return x;
                }
                let t = $trunc(x);
                let rem = x - t;
                if $fabs(rem) < 0.5 {
                    t
                } else if $fabs(rem) > 0.5 {
                    t + $copysign(1.0, x)
                } else if $trunc(t / 2.0) * 2.0 == t {
                    t
                } else {
                    t + $copysign(1.0, x)
                }
            }
        }
    };
}

float_impl!(
    float32,
    f32,
    libm::fabsf,
    libm::sqrtf,
    libm::ceilf,
    libm::floorf,
    libm::truncf,
    libm::copysignf
);
float_impl!(
    float64,
    f64,
    libm::fabs,
    libm::sqrt,
    libm::ceil,
    libm::floor,
    libm::trunc,
    libm::copysign
);
