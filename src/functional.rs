//! Function objects accepted by the operator.
//!
//! [`UnaryFunction`] and [`BinaryFunction`] are the two capabilities the
//! fused operator needs. Both are always callable on the host; a function
//! object additionally reports a [`DeviceCode`] when it can run inside a
//! generated GPU kernel.
//!
//! Plain closures work everywhere on the host:
//!
//! ```
//! use fused_reduce::functional::{BinaryFunction, UnaryFunction};
//!
//! let twice = |x: i32| -> i64 { i64::from(x) * 2 };
//! assert_eq!(UnaryFunction::<i32, i64>::call(&twice, 21), 42);
//! assert!(UnaryFunction::<i32, i64>::device(&twice).is_none());
//! ```
//!
//! The stock functors below ([`Square`], [`Plus`], ...) also carry WGSL
//! bodies, so a device backend can compile them. Their integer forms wrap
//! on overflow on every backend (see [`Arithmetic`]).

use crate::device::{Arithmetic, DeviceCode, Element, KernelArgs, Signed};

/// A pure unary function `In -> Out`.
///
/// Implementations must not depend on invocation order or count beyond
/// "once per element": the operator may call them from many lanes at once.
pub trait UnaryFunction<In, Out>: Sync {
    /// Applies the function on the host.
    fn call(&self, x: In) -> Out;

    /// The device form, if this function can run in a generated kernel.
    fn device(&self) -> Option<DeviceCode> {
        None
    }
}

/// An associative binary function closed over `T`.
///
/// Non-associativity is never detected. Such a function still gives a
/// deterministic result for a fixed control and backend, following the lane
/// grouping described in [`crate::ops::transform_reduce`].
pub trait BinaryFunction<T>: Sync {
    /// Applies the function on the host.
    fn call(&self, a: T, b: T) -> T;

    /// The device form, if this function can run in a generated kernel.
    fn device(&self) -> Option<DeviceCode> {
        None
    }
}

impl<F, In, Out> UnaryFunction<In, Out> for F
where
    F: Fn(In) -> Out + Sync,
{
    fn call(&self, x: In) -> Out {
        self(x)
    }
}

impl<F, T> BinaryFunction<T> for F
where
    F: Fn(T, T) -> T + Sync,
{
    fn call(&self, a: T, b: T) -> T {
        self(a, b)
    }
}

/// Device code, only when `T` has a WGSL spelling.
fn stateless<T: Element>(name: &'static str, body: &'static str) -> Option<DeviceCode> {
    T::WGSL.map(|_| DeviceCode::stateless(name, body))
}

/// `x`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity;

impl<T: Element> UnaryFunction<T, T> for Identity {
    fn call(&self, x: T) -> T {
        x
    }

    fn device(&self) -> Option<DeviceCode> {
        stateless::<T>("identity", "return x;")
    }
}

/// `x * x`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Square;

impl<T> UnaryFunction<T, T> for Square
where
    T: Arithmetic,
{
    fn call(&self, x: T) -> T {
        x.times(x)
    }

    fn device(&self) -> Option<DeviceCode> {
        stateless::<T>("square", "return x * x;")
    }
}

/// `-x`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Negate;

impl<T> UnaryFunction<T, T> for Negate
where
    T: Signed,
{
    fn call(&self, x: T) -> T {
        x.negate()
    }

    fn device(&self) -> Option<DeviceCode> {
        stateless::<T>("negate", "return -x;")
    }
}

/// `x * k`, with `k` shipped to the device as kernel state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scale<T>(pub T);

impl<T> UnaryFunction<T, T> for Scale<T>
where
    T: Arithmetic,
{
    fn call(&self, x: T) -> T {
        x.times(self.0)
    }

    fn device(&self) -> Option<DeviceCode> {
        let ty = T::WGSL?;
        let mut args = KernelArgs::new();
        args.append(&self.0);
        Some(DeviceCode::with_state(
            "scale",
            format!("return x * bitcast<{ty}>(state(0u));"),
            args,
        ))
    }
}

/// `a + b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plus;

impl<T> BinaryFunction<T> for Plus
where
    T: Arithmetic,
{
    fn call(&self, a: T, b: T) -> T {
        a.plus(b)
    }

    fn device(&self) -> Option<DeviceCode> {
        stateless::<T>("plus", "return a + b;")
    }
}

/// `a - b`. Not associative; useful only to observe grouping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Minus;

impl<T> BinaryFunction<T> for Minus
where
    T: Arithmetic,
{
    fn call(&self, a: T, b: T) -> T {
        a.minus(b)
    }

    fn device(&self) -> Option<DeviceCode> {
        stateless::<T>("minus", "return a - b;")
    }
}

/// `a * b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Multiplies;

impl<T> BinaryFunction<T> for Multiplies
where
    T: Arithmetic,
{
    fn call(&self, a: T, b: T) -> T {
        a.times(b)
    }

    fn device(&self) -> Option<DeviceCode> {
        stateless::<T>("multiplies", "return a * b;")
    }
}

/// The larger of `a` and `b`; `a` on ties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Maximum;

impl<T> BinaryFunction<T> for Maximum
where
    T: Element + PartialOrd,
{
    fn call(&self, a: T, b: T) -> T {
        if a < b { b } else { a }
    }

    fn device(&self) -> Option<DeviceCode> {
        stateless::<T>("maximum", "return max(a, b);")
    }
}

/// The smaller of `a` and `b`; `a` on ties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Minimum;

impl<T> BinaryFunction<T> for Minimum
where
    T: Element + PartialOrd,
{
    fn call(&self, a: T, b: T) -> T {
        if b < a { b } else { a }
    }

    fn device(&self) -> Option<DeviceCode> {
        stateless::<T>("minimum", "return min(a, b);")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_calls() {
        assert_eq!(UnaryFunction::<i32, i32>::call(&Square, -5), 25);
        assert_eq!(UnaryFunction::<i32, i32>::call(&Negate, 4), -4);
        assert_eq!(UnaryFunction::<f32, f32>::call(&Scale(0.5f32), 3.0), 1.5);
        assert_eq!(BinaryFunction::<i32>::call(&Plus, 2, 3), 5);
        assert_eq!(BinaryFunction::<i32>::call(&Minus, 2, 3), -1);
        assert_eq!(BinaryFunction::<u32>::call(&Maximum, 2, 9), 9);
        assert_eq!(BinaryFunction::<u32>::call(&Minimum, 2, 9), 2);
    }

    #[test]
    fn integer_functors_wrap() {
        assert_eq!(UnaryFunction::<i32, i32>::call(&Square, 70_000), 70_000i32.wrapping_mul(70_000));
        assert_eq!(UnaryFunction::<i32, i32>::call(&Negate, i32::MIN), i32::MIN);
        assert_eq!(BinaryFunction::<u32>::call(&Plus, u32::MAX, 2), 1);
        assert_eq!(BinaryFunction::<i32>::call(&Minus, i32::MIN, 1), i32::MAX);
        assert_eq!(BinaryFunction::<i64>::call(&Multiplies, i64::MAX, 2), -2);
    }

    #[test]
    fn device_forms_follow_element_type() {
        assert!(UnaryFunction::<f32, f32>::device(&Square).is_some());
        assert!(UnaryFunction::<f64, f64>::device(&Square).is_none());
        assert!(BinaryFunction::<i64>::device(&Plus).is_none());

        let code = UnaryFunction::<i32, i32>::device(&Scale(3i32)).expect("i32 is a WGSL scalar");
        assert_eq!(code.args.words(), &[3]);
        assert!(code.body.contains("bitcast<i32>(state(0u))"));
    }

    #[test]
    fn closures_are_host_only() {
        let add = |a: u8, b: u8| a.wrapping_add(b);
        assert_eq!(BinaryFunction::<u8>::call(&add, 250, 10), 4);
        assert!(BinaryFunction::<u8>::device(&add).is_none());
    }
}
