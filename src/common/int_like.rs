//! Helpers used to define types that are backed by integers (typically `usize`),
//! without compromising safety.
//!
//! # Example
//!
//! ```
//! # #[macro_use] extern crate l4_mapdb;
//! /// Define an opaque type `Pfn` backed by a `usize`.
//! int_like!(Pfn, usize);
//!
//! const ZERO: Pfn = Pfn::new(0);
//! assert_eq!(ZERO.add(3).get(), 3);
//! ```

#[macro_export]
macro_rules! int_like {
    ($new_type_name:ident, $backing_type: ident) => {
        #[derive(Default, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
        pub struct $new_type_name($backing_type);

        impl $new_type_name {
            #[allow(dead_code)]
            #[inline]
            pub const fn get(self) -> $backing_type {
                self.0
            }
            #[allow(dead_code)]
            #[inline]
            pub const fn new(x: $backing_type) -> Self {
                $new_type_name(x)
            }
            /// Offset by `n` units, wrapping is a caller bug.
            #[allow(dead_code)]
            #[inline]
            pub const fn add(self, n: $backing_type) -> Self {
                $new_type_name(self.0 + n)
            }
            /// Round down to a multiple of `1 << order` units.
            #[allow(dead_code)]
            #[inline]
            pub const fn align_down(self, order: u32) -> Self {
                $new_type_name(self.0 & !((1 << order) - 1))
            }
            #[allow(dead_code)]
            #[inline]
            pub const fn is_aligned(self, order: u32) -> bool {
                self.0 & ((1 << order) - 1) == 0
            }
        }

        impl ::core::fmt::Debug for $new_type_name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}({:#x})", stringify!($new_type_name), self.0)
            }
        }

        impl ::core::convert::From<$backing_type> for $new_type_name {
            #[inline]
            fn from(inner: $backing_type) -> Self {
                Self::new(inner)
            }
        }
        impl ::core::convert::From<$new_type_name> for $backing_type {
            #[inline]
            fn from(wrapped: $new_type_name) -> Self {
                wrapped.get()
            }
        }
    };
}

#[test]
fn test() {
    use core::mem::size_of;

    int_like!(UsizeLike, usize);
    assert_eq!(size_of::<UsizeLike>(), size_of::<usize>());

    let x = UsizeLike::new(0x1234);
    assert_eq!(x.align_down(8).get(), 0x1200);
    assert!(!x.is_aligned(4));
    assert!(x.align_down(4).is_aligned(4));
    assert_eq!(usize::from(x.add(1)), 0x1235);
}
