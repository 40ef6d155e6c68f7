//! Saving when the element type is only known at runtime, as a [`DataType`]
//! tag or a [`DynSlice`].
use crate::{
    header::{Field, TypeCode},
    npz::{save_npz, Compression, WriteNpzError},
    save_npy, NpyArray, SaveOptions, WriteNpyError,
};
use std::path::Path;

/// Element type tag.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DataType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    #[cfg(feature = "num-complex")]
    Complex64,
    #[cfg(feature = "num-complex")]
    Complex128,
}

impl DataType {
    /// Type code and word size in bytes.
    pub const fn layout(self) -> (TypeCode, usize) {
        match self {
            Self::I8 => (TypeCode::SignedInt, 1),
            Self::I16 => (TypeCode::SignedInt, 2),
            Self::I32 => (TypeCode::SignedInt, 4),
            Self::I64 => (TypeCode::SignedInt, 8),
            Self::U8 => (TypeCode::UnsignedInt, 1),
            Self::U16 => (TypeCode::UnsignedInt, 2),
            Self::U32 => (TypeCode::UnsignedInt, 4),
            Self::U64 => (TypeCode::UnsignedInt, 8),
            Self::F32 => (TypeCode::Float, 4),
            Self::F64 => (TypeCode::Float, 8),
            Self::Bool => (TypeCode::Bool, 1),
            #[cfg(feature = "num-complex")]
            Self::Complex64 => (TypeCode::Complex, 8),
            #[cfg(feature = "num-complex")]
            Self::Complex128 => (TypeCode::Complex, 16),
        }
    }

    /// The tag matching a field, if there is one.
    pub fn from_field(field: &Field) -> Option<Self> {
        let tag = match (field.type_code, field.word_size) {
            (TypeCode::SignedInt, 1) => Self::I8,
            (TypeCode::SignedInt, 2) => Self::I16,
            (TypeCode::SignedInt, 4) => Self::I32,
            (TypeCode::SignedInt, 8) => Self::I64,
            (TypeCode::UnsignedInt, 1) => Self::U8,
            (TypeCode::UnsignedInt, 2) => Self::U16,
            (TypeCode::UnsignedInt, 4) => Self::U32,
            (TypeCode::UnsignedInt, 8) => Self::U64,
            (TypeCode::Float, 4) => Self::F32,
            (TypeCode::Float, 8) => Self::F64,
            (TypeCode::Bool, 1) => Self::Bool,
            #[cfg(feature = "num-complex")]
            (TypeCode::Complex, 8) => Self::Complex64,
            #[cfg(feature = "num-complex")]
            (TypeCode::Complex, 16) => Self::Complex128,
            _ => return None,
        };
        Some(tag)
    }
}

/// A borrowed slice of any supported element type.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum DynSlice<'a> {
    I8(&'a [i8]),
    I16(&'a [i16]),
    I32(&'a [i32]),
    I64(&'a [i64]),
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
    U64(&'a [u64]),
    F32(&'a [f32]),
    F64(&'a [f64]),
    Bool(&'a [bool]),
    #[cfg(feature = "num-complex")]
    Complex64(&'a [num_complex::Complex<f32>]),
    #[cfg(feature = "num-complex")]
    Complex128(&'a [num_complex::Complex<f64>]),
}

/// Runs `$body` with `$data` bound to the typed slice inside `$slice`.
macro_rules! with_slice {
    ($slice:expr, $data:ident => $body:expr) => {
        match $slice {
            DynSlice::I8($data) => $body,
            DynSlice::I16($data) => $body,
            DynSlice::I32($data) => $body,
            DynSlice::I64($data) => $body,
            DynSlice::U8($data) => $body,
            DynSlice::U16($data) => $body,
            DynSlice::U32($data) => $body,
            DynSlice::U64($data) => $body,
            DynSlice::F32($data) => $body,
            DynSlice::F64($data) => $body,
            DynSlice::Bool($data) => $body,
            #[cfg(feature = "num-complex")]
            DynSlice::Complex64($data) => $body,
            #[cfg(feature = "num-complex")]
            DynSlice::Complex128($data) => $body,
        }
    };
}

macro_rules! impl_from_slice {
    ($($variant:ident($ty:ty)),* $(,)?) => {$(
        impl<'a> From<&'a [$ty]> for DynSlice<'a> {
            fn from(data: &'a [$ty]) -> Self {
                Self::$variant(data)
            }
        }
    )*};
}

impl_from_slice! {
    I8(i8), I16(i16), I32(i32), I64(i64),
    U8(u8), U16(u16), U32(u32), U64(u64),
    F32(f32), F64(f64), Bool(bool),
}

#[cfg(feature = "num-complex")]
impl_from_slice! {
    Complex64(num_complex::Complex<f32>),
    Complex128(num_complex::Complex<f64>),
}

impl DynSlice<'_> {
    /// Tag of the element type.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::I8(_) => DataType::I8,
            Self::I16(_) => DataType::I16,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
            Self::U8(_) => DataType::U8,
            Self::U16(_) => DataType::U16,
            Self::U32(_) => DataType::U32,
            Self::U64(_) => DataType::U64,
            Self::F32(_) => DataType::F32,
            Self::F64(_) => DataType::F64,
            Self::Bool(_) => DataType::Bool,
            #[cfg(feature = "num-complex")]
            Self::Complex64(_) => DataType::Complex64,
            #[cfg(feature = "num-complex")]
            Self::Complex128(_) => DataType::Complex128,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_slice!(self, data => data.len())
    }

    /// Returns `true` if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`save_npy`] for a runtime-typed slice.
pub fn save_npy_dyn<P: AsRef<Path>>(
    path: P,
    data: DynSlice<'_>,
    shape: &[usize],
    options: SaveOptions,
) -> Result<(), WriteNpyError> {
    log::trace!("saving {:?} slice of {} values", data.data_type(), data.len());
    with_slice!(data, data => save_npy(path, data, shape, options))
}

/// [`save_npz`] for a runtime-typed slice.
pub fn save_npz_dyn<P: AsRef<Path>>(
    path: P,
    name: &str,
    data: DynSlice<'_>,
    shape: &[usize],
    options: SaveOptions,
    compression: Compression,
) -> Result<(), WriteNpzError> {
    with_slice!(data, data => save_npz(path, name, data, shape, options, compression))
}

impl NpyArray {
    /// Tag of the element type of a single-field array.
    pub fn data_type(&self) -> Option<DataType> {
        match self.fields() {
            [field] => DataType::from_field(field),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Element;

    #[test]
    fn tags_match_element_types() {
        assert_eq!(DataType::from_field(&u16::field()), Some(DataType::U16));
        assert_eq!(DataType::from_field(&bool::field()), Some(DataType::Bool));
        assert_eq!(DataType::from_field(&Field::new(TypeCode::Float, 2)), None);
        assert_eq!(DataType::F64.layout(), (f64::TYPE_CODE, f64::WORD_SIZE));
    }

    #[test]
    fn slices_convert_and_dispatch() {
        let data = [1i64, 2, 3];
        let slice = DynSlice::from(&data[..]);
        assert_eq!(slice, DynSlice::I64(&data));
        assert_eq!(slice.data_type(), DataType::I64);
        assert_eq!(slice.len(), 3);
        let array = NpyArray::from_slice(&data, vec![3], Default::default()).unwrap();
        assert_eq!(array.data_type(), Some(DataType::I64));
    }
}
