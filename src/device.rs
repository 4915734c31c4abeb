//! Device-transportable data.
//!
//! Anything that crosses into a resource manager is plain old data. The
//! [`Element`] trait marks values that may be staged in device buffers and
//! names their WGSL scalar type when a GPU can consume them. Functor state
//! is packed through [`KernelArgs`], which only accepts `Pod` values, so a
//! function object owning host-only resources (a `Vec`, a file, an `Rc`)
//! cannot be serialized at all: the program does not compile.

use std::borrow::Cow;

use bytemuck::Pod;

/// A value that may live in device memory.
pub trait Element: Pod + Send + Sync {
    /// WGSL scalar type name, if a GPU kernel can use this type directly.
    const WGSL: Option<&'static str> = None;
}

impl Element for f32 {
    const WGSL: Option<&'static str> = Some("f32");
}

impl Element for i32 {
    const WGSL: Option<&'static str> = Some("i32");
}

impl Element for u32 {
    const WGSL: Option<&'static str> = Some("u32");
}

impl Element for f64 {}
impl Element for i64 {}
impl Element for u64 {}
impl Element for i16 {}
impl Element for u16 {}
impl Element for i8 {}
impl Element for u8 {}

/// Arithmetic used by the stock functors.
///
/// Integers wrap on overflow, as two's-complement GPU arithmetic does, so
/// a stock functor gives the same value on every backend and never panics.
/// Floats use ordinary IEEE operations.
pub trait Arithmetic: Element {
    /// `self + rhs`
    fn plus(self, rhs: Self) -> Self;
    /// `self - rhs`
    fn minus(self, rhs: Self) -> Self;
    /// `self * rhs`
    fn times(self, rhs: Self) -> Self;
}

/// Element types with a negation.
pub trait Signed: Arithmetic {
    /// `-self`
    fn negate(self) -> Self;
}

macro_rules! wrapping_arithmetic {
    ($($t:ty),*) => {$(
        impl Arithmetic for $t {
            fn plus(self, rhs: Self) -> Self { self.wrapping_add(rhs) }
            fn minus(self, rhs: Self) -> Self { self.wrapping_sub(rhs) }
            fn times(self, rhs: Self) -> Self { self.wrapping_mul(rhs) }
        }
    )*};
}

macro_rules! float_arithmetic {
    ($($t:ty),*) => {$(
        impl Arithmetic for $t {
            fn plus(self, rhs: Self) -> Self { self + rhs }
            fn minus(self, rhs: Self) -> Self { self - rhs }
            fn times(self, rhs: Self) -> Self { self * rhs }
        }

        impl Signed for $t {
            fn negate(self) -> Self { -self }
        }
    )*};
}

macro_rules! wrapping_negate {
    ($($t:ty),*) => {$(
        impl Signed for $t {
            fn negate(self) -> Self { self.wrapping_neg() }
        }
    )*};
}

wrapping_arithmetic!(i8, i16, i32, i64, u8, u16, u32, u64);
wrapping_negate!(i8, i16, i32, i64);
float_arithmetic!(f32, f64);

/// Packed kernel arguments, in 32-bit words.
///
/// Values are appended in their native byte layout; a value whose size is
/// not a multiple of four is zero-padded to the next word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelArgs {
    words: Vec<u32>,
}

impl KernelArgs {
    /// An empty argument list.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Appends `data` and returns the word offset it starts at.
    pub fn append<P: Pod>(&mut self, data: &P) -> usize {
        let offset = self.words.len();
        for chunk in bytemuck::bytes_of(data).chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.words.push(u32::from_ne_bytes(word));
        }
        offset
    }

    /// Appends every word of `other` and returns the offset it starts at.
    pub fn extend(&mut self, other: &Self) -> usize {
        let offset = self.words.len();
        self.words.extend_from_slice(&other.words);
        offset
    }

    /// The packed words.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Number of packed words.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether nothing was appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// The device form of a function object.
///
/// `body` is the WGSL body of the function. Unary bodies read their
/// argument as `x`, binary bodies as `a` and `b`. Packed state is read with
/// `state(i)`, which returns the `i`-th `u32` word of `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCode {
    /// Short name used in kernel labels and cache keys.
    pub name: &'static str,
    /// WGSL function body.
    pub body: Cow<'static, str>,
    /// Packed state, addressed through `state(i)`.
    pub args: KernelArgs,
}

impl DeviceCode {
    /// A stateless device function.
    #[must_use]
    pub const fn stateless(name: &'static str, body: &'static str) -> Self {
        Self {
            name,
            body: Cow::Borrowed(body),
            args: KernelArgs::new(),
        }
    }

    /// A device function carrying packed state.
    #[must_use]
    pub fn with_state(name: &'static str, body: String, args: KernelArgs) -> Self {
        Self {
            name,
            body: Cow::Owned(body),
            args,
        }
    }

    /// The body with `state(` calls renamed to `accessor(`.
    #[must_use]
    pub fn body_with_accessor(&self, accessor: &str) -> String {
        self.body.replace("state(", &format!("{accessor}("))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(70_000i32.times(70_000), 70_000i32.wrapping_mul(70_000));
        assert_eq!(i32::MAX.plus(1), i32::MIN);
        assert_eq!(0u32.minus(1), u32::MAX);
        assert_eq!(i32::MIN.negate(), i32::MIN);
        assert_eq!(1.5f32.times(2.0), 3.0);
    }

    #[test]
    fn append_returns_offsets() {
        let mut args = KernelArgs::new();
        assert!(args.is_empty());
        assert_eq!(args.append(&1.5f32), 0);
        assert_eq!(args.append(&7u64), 1);
        assert_eq!(args.append(&3u8), 3);
        assert_eq!(args.len(), 4);
        assert_eq!(f32::from_bits(args.words()[0]), 1.5);
        assert_eq!(args.words()[3], u32::from_ne_bytes([3, 0, 0, 0]));
    }

    #[test]
    fn extend_concatenates() {
        let mut a = KernelArgs::new();
        a.append(&1u32);
        let mut b = KernelArgs::new();
        b.append(&2u32);
        b.append(&3u32);
        assert_eq!(a.extend(&b), 1);
        assert_eq!(a.words(), &[1, 2, 3]);
    }

    #[test]
    fn state_accessor_is_renamed() {
        let code = DeviceCode::with_state(
            "scale",
            "return x * bitcast<f32>(state(0u));".into(),
            KernelArgs::new(),
        );
        assert_eq!(
            code.body_with_accessor("transform_state"),
            "return x * bitcast<f32>(transform_state(0u));"
        );
    }

    #[test]
    fn wgsl_names() {
        assert_eq!(<f32 as Element>::WGSL, Some("f32"));
        assert_eq!(<i32 as Element>::WGSL, Some("i32"));
        assert_eq!(<f64 as Element>::WGSL, None);
    }
}
