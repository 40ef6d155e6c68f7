use super::header::{Field, FormatHeaderError, Header, MemoryOrder, TypeCode};
use std::{io, mem, slice};

/// Number of elements (or records) staged per write when the source is not a
/// contiguous slice.
pub(crate) const CHUNK_LEN: usize = 0x10000;

mod private {
    pub trait Sealed {}
}

/// A scalar element type that can be stored in an `.npy` payload.
///
/// Implemented for fixed-size integers up to 64 bits, `f32`, `f64`, [`bool`]
/// and, with the `num-complex` feature, `Complex<f32>` and `Complex<f64>`.
/// Values are always stored little-endian.
pub trait Element: Copy + private::Sealed + 'static {
    /// Type code written in the type descriptor.
    const TYPE_CODE: TypeCode;
    /// Size of the element in bytes.
    const WORD_SIZE: usize = mem::size_of::<Self>();

    /// Writes the little-endian bytes of `self` into `out`, which is exactly
    /// `WORD_SIZE` bytes long.
    fn write_le(self, out: &mut [u8]);

    /// Reads a value from exactly `WORD_SIZE` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Returns `true` if every `WORD_SIZE` chunk of `bytes` is a valid
    /// bit-pattern for `Self`.
    fn is_valid(bytes: &[u8]) -> bool {
        let _ = bytes;
        true
    }

    /// The unlabeled field describing this type.
    fn field() -> Field {
        Field::new(Self::TYPE_CODE, Self::WORD_SIZE)
    }
}

macro_rules! impl_primitive {
    ($($ty:ty => $code:expr),* $(,)?) => {$(
        impl private::Sealed for $ty {}

        impl Element for $ty {
            const TYPE_CODE: TypeCode = $code;

            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0; mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }
        }
    )*};
}

impl_primitive! {
    i8 => TypeCode::SignedInt,
    i16 => TypeCode::SignedInt,
    i32 => TypeCode::SignedInt,
    i64 => TypeCode::SignedInt,
    u8 => TypeCode::UnsignedInt,
    u16 => TypeCode::UnsignedInt,
    u32 => TypeCode::UnsignedInt,
    u64 => TypeCode::UnsignedInt,
    f32 => TypeCode::Float,
    f64 => TypeCode::Float,
}

impl private::Sealed for bool {}

impl Element for bool {
    const TYPE_CODE: TypeCode = TypeCode::Bool;

    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn is_valid(bytes: &[u8]) -> bool {
        bytes.iter().all(|&b| b <= 1)
    }
}

#[cfg(feature = "num-complex")]
macro_rules! impl_complex {
    ($($float:ty),*) => {$(
        impl private::Sealed for num_complex::Complex<$float> {}

        impl Element for num_complex::Complex<$float> {
            const TYPE_CODE: TypeCode = TypeCode::Complex;

            fn write_le(self, out: &mut [u8]) {
                let (re, im) = out.split_at_mut(<$float>::WORD_SIZE);
                self.re.write_le(re);
                self.im.write_le(im);
            }

            fn read_le(bytes: &[u8]) -> Self {
                let (re, im) = bytes.split_at(<$float>::WORD_SIZE);
                Self::new(<$float>::read_le(re), <$float>::read_le(im))
            }
        }
    )*};
}

#[cfg(feature = "num-complex")]
impl_complex!(f32, f64);

/// A tuple of [`Element`]s stored as one record of a structured array.
///
/// Implemented for tuples of up to eight elements. Fields are packed without
/// padding, in tuple order.
pub trait Record: Sized {
    /// Number of fields.
    const ARITY: usize;

    /// Type code and word size of every field, in order.
    fn fields() -> Vec<(TypeCode, usize)>;

    /// Size of a packed record in bytes.
    fn record_size() -> usize {
        Self::fields().iter().map(|&(_, size)| size).sum()
    }

    /// Packs `self` into `out`, which is exactly `record_size()` bytes long.
    fn pack(&self, out: &mut [u8]);

    /// Unpacks a record from exactly `record_size()` bytes.
    fn unpack(bytes: &[u8]) -> Self;
}

macro_rules! impl_record {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Element),+> Record for ($($name,)+) {
            const ARITY: usize = [$($idx),+].len();

            fn fields() -> Vec<(TypeCode, usize)> {
                vec![$(($name::TYPE_CODE, $name::WORD_SIZE)),+]
            }

            fn record_size() -> usize {
                0 $(+ $name::WORD_SIZE)+
            }

            #[allow(unused_assignments)]
            fn pack(&self, out: &mut [u8]) {
                let mut offset = 0;
                $(
                    self.$idx.write_le(&mut out[offset..offset + $name::WORD_SIZE]);
                    offset += $name::WORD_SIZE;
                )+
            }

            #[allow(unused_assignments)]
            fn unpack(bytes: &[u8]) -> Self {
                let mut offset = 0;
                ($({
                    let value = $name::read_le(&bytes[offset..offset + $name::WORD_SIZE]);
                    offset += $name::WORD_SIZE;
                    value
                },)+)
            }
        }
    };
}

impl_record!(A: 0);
impl_record!(A: 0, B: 1);
impl_record!(A: 0, B: 1, C: 2);
impl_record!(A: 0, B: 1, C: 2, D: 3);
impl_record!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_record!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_record!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_record!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

/// Builds the header of a structured array of `R` records.
pub(crate) fn record_header<R: Record>(
    labels: &[&str],
    shape: Vec<usize>,
    memory_order: MemoryOrder,
) -> Result<Header, FormatHeaderError> {
    if labels.len() != R::ARITY {
        return Err(FormatHeaderError::LabelCount { labels: labels.len(), fields: R::ARITY });
    }
    let fields = labels
        .iter()
        .zip(R::fields())
        .map(|(&label, (type_code, word_size))| Field::labeled(label, type_code, word_size))
        .collect();
    Header::structured(shape, fields, memory_order)
}

/// Writes a contiguous slice. On little-endian hosts the memory is dumped
/// as-is.
pub(crate) fn write_slice<T: Element, W: io::Write>(data: &[T], mut writer: W) -> io::Result<()> {
    if cfg!(target_endian = "little") {
        // SAFETY: `Element` is sealed and only implemented for primitive
        // types (and `repr(C)` pairs of them) without padding bytes.
        let bytes =
            unsafe { slice::from_raw_parts(data.as_ptr().cast::<u8>(), mem::size_of_val(data)) };
        writer.write_all(bytes)
    } else {
        write_chunked(data.iter().copied(), data.len(), T::WORD_SIZE, |v, out| v.write_le(out), writer)
            .map(|_| ())
    }
}

/// Packs up to `len` items of `iter` through a staging buffer of
/// [`CHUNK_LEN`] items, returning the number of items written.
pub(crate) fn write_chunked<V, I, W>(
    iter: I,
    len: usize,
    item_size: usize,
    pack: impl Fn(V, &mut [u8]),
    mut writer: W,
) -> io::Result<usize>
where
    I: IntoIterator<Item = V>,
    W: io::Write,
{
    let capacity = CHUNK_LEN.min(len);
    let mut buf = vec![0; capacity * item_size];
    let mut iter = iter.into_iter().take(len);
    let mut written = 0;
    while written < len {
        let mut count = 0;
        for (out, value) in buf.chunks_exact_mut(item_size).zip(iter.by_ref()) {
            pack(value, out);
            count += 1;
        }
        if count == 0 {
            break;
        }
        writer.write_all(&buf[..count * item_size])?;
        written += count;
        log::trace!("flushed chunk of {count} items ({written}/{len})");
        if count < capacity {
            break;
        }
    }
    Ok(written)
}
