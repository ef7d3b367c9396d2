//! Little-endian encoding of primitive values in guest memory.
//!
//! The guest target is little-endian, so every typed access through
//! [`AddressSpace`](crate::memory::AddressSpace) round-trips through the
//! [`GuestValue`] trait rather than reinterpreting host memory. This keeps
//! all guest accesses bounds-checked and free of `unsafe`.

/// A primitive value that can be stored in guest memory.
///
/// Implementations define the value's fixed byte width and its little-endian
/// encoding. The trait is sealed in practice by being implemented only for
/// the fixed-width integer primitives the guest ABI uses.
pub trait GuestValue: Copy {
    /// Byte width of the value in guest memory.
    const SIZE: usize;

    /// Decodes a value from its little-endian byte representation.
    ///
    /// `bytes` is guaranteed by the caller to be exactly [`Self::SIZE`] long.
    fn from_le_bytes(bytes: &[u8]) -> Self;

    /// Encodes the value into `out` in little-endian byte order.
    ///
    /// `out` is guaranteed by the caller to be exactly [`Self::SIZE`] long.
    fn to_le_bytes(self, out: &mut [u8]);
}

macro_rules! guest_value_impl {
    ($($ty:ty),*) => {
        $(
            impl GuestValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_bytes(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn to_le_bytes(self, out: &mut [u8]) {
                    out.copy_from_slice(&<$ty>::to_le_bytes(self));
                }
            }
        )*
    };
}

guest_value_impl!(u8, u16, u32, u64, i8, i16, i32, i64);
