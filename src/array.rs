//! In-memory arrays decoded from (or destined for) `.npy` payloads.
mod view;

pub use self::view::{Column, ColumnIter, ColumnMut, FieldMut, RecordMut, Records, RecordsIter, RecordsMut};

use crate::{
    npy::{
        elements::record_header,
        header::{Field, FormatHeaderError, Header, MemoryOrder},
    },
    Element, ReadNpyError, Record,
};
use std::{fmt, io, mem, slice};
use thiserror::Error;

/// An error constructing or viewing an [`NpyArray`].
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ArrayError {
    /// The header cannot describe an array.
    #[error("invalid header: {0}")]
    Header(#[from] FormatHeaderError),
    /// The number of values does not match the shape.
    #[error("shape {shape:?} needs {expected} values, got {actual}")]
    LengthMismatch {
        /// Requested shape.
        shape: Vec<usize>,
        /// Number of values the shape describes.
        expected: usize,
        /// Number of values given.
        actual: usize,
    },
    /// No field carries the requested label.
    #[error("label {0:?} not found")]
    LabelNotFound(String),
    /// The requested type has a different size than the field.
    #[error("field {index} has word size {field}, requested type has {requested}")]
    SizeMismatch {
        /// Position of the field.
        index: usize,
        /// Word size of the field.
        field: usize,
        /// Size of the requested type.
        requested: usize,
    },
    /// The requested record has a different number of fields than the array.
    #[error("array has {fields} fields, requested record has {requested}")]
    ArityMismatch {
        /// Number of fields in the array.
        fields: usize,
        /// Number of fields in the requested record.
        requested: usize,
    },
    /// A contiguous view needs a single-field array.
    #[error("array has {0} fields, a contiguous view needs exactly one")]
    NotSimple(usize),
    /// The payload contains bytes that are not valid for the element type.
    #[error("payload is not valid for the element type")]
    InvalidData,
    /// Contiguous views reinterpret little-endian bytes in place.
    #[error("contiguous views need a little-endian host")]
    NonNativeEndian,
}

const READ_STEP: usize = 1 << 16;

/// Owned payload bytes, kept 8-byte aligned so that contiguous views of any
/// [`Element`] type are aligned.
#[derive(Clone)]
struct Buffer {
    words: Vec<u64>,
    len: usize,
}

impl Buffer {
    fn zeroed(len: usize) -> Self {
        Self { words: vec![0; len.div_ceil(mem::size_of::<u64>())], len }
    }

    /// Reads exactly `len` bytes, growing only as far as the reader delivers.
    fn read_exact_from<R: io::Read>(mut reader: R, len: usize) -> io::Result<Self> {
        let mut buffer = Self { words: Vec::new(), len: 0 };
        while buffer.len < len {
            let start = buffer.len;
            let end = start + (len - start).min(READ_STEP);
            buffer.words.resize(end.div_ceil(mem::size_of::<u64>()), 0);
            buffer.len = end;
            reader.read_exact(&mut buffer.as_bytes_mut()[start..end])?;
        }
        Ok(buffer)
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` holds at least `len` initialized bytes and `u8` has
        // no alignment requirement.
        unsafe { slice::from_raw_parts(self.words.as_ptr().cast(), self.len) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `as_bytes`; the borrow of `self` is exclusive.
        unsafe { slice::from_raw_parts_mut(self.words.as_mut_ptr().cast(), self.len) }
    }
}

/// An array of fixed-size records with an owned, exclusively held payload.
///
/// The metadata (shape, fields, memory order) is fixed at construction; the
/// payload can be written through the mutable views. Two arrays are equal if
/// their metadata is equal and their payloads are byte-identical.
#[derive(Clone)]
pub struct NpyArray {
    header: Header,
    data: Buffer,
}

impl fmt::Debug for NpyArray {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NpyArray")
            .field("header", &self.header.to_string())
            .field("num_bytes", &self.num_bytes())
            .finish()
    }
}

impl PartialEq for NpyArray {
    fn eq(&self, other: &Self) -> bool {
        self.compare_metadata(other) && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for NpyArray {}

impl NpyArray {
    /// Allocates a zero-filled array described by `header`.
    pub fn zeros(header: Header) -> Result<Self, FormatHeaderError> {
        header.validate()?;
        let len = header.num_bytes_checked().ok_or(FormatHeaderError::LengthOverflow)?;
        Ok(Self { header, data: Buffer::zeroed(len) })
    }

    /// Reads the payload described by `header` from `reader`.
    ///
    /// Memory is committed as bytes arrive, so a header declaring more data
    /// than the stream holds fails with [`ReadNpyError::MissingData`].
    pub(crate) fn read_payload<R: io::Read>(header: Header, reader: R) -> Result<Self, ReadNpyError> {
        header.validate()?;
        let len = header.num_bytes_checked().ok_or(FormatHeaderError::LengthOverflow)?;
        let data = Buffer::read_exact_from(reader, len).map_err(ReadNpyError::from_payload)?;
        Ok(Self { header, data })
    }

    /// Copies a slice of elements into a simple array.
    pub fn from_slice<T: Element>(
        data: &[T],
        shape: Vec<usize>,
        memory_order: MemoryOrder,
    ) -> Result<Self, ArrayError> {
        let header = Header { fields: vec![T::field()], memory_order, shape };
        let mut array = Self::zeros(header)?;
        array.check_len(data.len())?;
        for (out, &value) in array.as_bytes_mut().chunks_exact_mut(T::WORD_SIZE).zip(data) {
            value.write_le(out);
        }
        Ok(array)
    }

    /// Packs records into a structured array with the given field labels.
    pub fn from_records<R: Record>(
        labels: &[&str],
        records: &[R],
        shape: Vec<usize>,
        memory_order: MemoryOrder,
    ) -> Result<Self, ArrayError> {
        let mut array = Self::zeros(record_header::<R>(labels, shape, memory_order)?)?;
        array.check_len(records.len())?;
        for (out, record) in array.as_bytes_mut().chunks_exact_mut(R::record_size()).zip(records) {
            record.pack(out);
        }
        Ok(array)
    }

    fn check_len(&self, actual: usize) -> Result<(), ArrayError> {
        let expected = self.num_vals();
        if actual == expected {
            Ok(())
        } else {
            Err(ArrayError::LengthMismatch { shape: self.header.shape.clone(), expected, actual })
        }
    }

    /// The decoded header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Shape of the array.
    pub fn shape(&self) -> &[usize] {
        &self.header.shape
    }

    /// Fields of one element.
    pub fn fields(&self) -> &[Field] {
        &self.header.fields
    }

    /// Word size of every field, in order.
    pub fn word_sizes(&self) -> Vec<usize> {
        self.header.fields.iter().map(|field| field.word_size).collect()
    }

    /// Field labels, empty for simple arrays.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.header.labels()
    }

    /// Memory order of the payload.
    pub fn memory_order(&self) -> MemoryOrder {
        self.header.memory_order
    }

    /// Number of elements (records).
    pub fn num_vals(&self) -> usize {
        self.header.num_vals()
    }

    /// Size of one element (record) in bytes.
    pub fn record_size(&self) -> usize {
        self.header.record_size()
    }

    /// Size of the payload in bytes.
    pub fn num_bytes(&self) -> usize {
        self.data.len
    }

    /// Raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Mutable raw payload bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_bytes_mut()
    }

    /// Returns `true` if both arrays have the same shape, fields and memory
    /// order.
    pub fn compare_metadata(&self, other: &Self) -> bool {
        self.header == other.header
    }

    fn check_simple<T: Element>(&self) -> Result<(), ArrayError> {
        match self.header.fields.as_slice() {
            [field] if field.word_size == T::WORD_SIZE => Ok(()),
            [field] => Err(ArrayError::SizeMismatch {
                index: 0,
                field: field.word_size,
                requested: T::WORD_SIZE,
            }),
            fields => Err(ArrayError::NotSimple(fields.len())),
        }
    }

    /// Views the payload of a single-field array as a slice of `T`.
    ///
    /// Only the word size is checked against `T`; the type code is not.
    pub fn as_slice<T: Element>(&self) -> Result<&[T], ArrayError> {
        self.check_simple::<T>()?;
        let bytes = self.as_bytes();
        check_castable::<T>(bytes)?;
        // SAFETY: the buffer is 8-byte aligned, its length is a multiple of
        // `T::WORD_SIZE`, the bytes are valid for `T` and the host is
        // little-endian.
        Ok(unsafe { slice::from_raw_parts(bytes.as_ptr().cast(), bytes.len() / T::WORD_SIZE) })
    }

    /// Mutable version of [`NpyArray::as_slice`].
    pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T], ArrayError> {
        self.check_simple::<T>()?;
        let bytes = self.as_bytes_mut();
        check_castable::<T>(bytes)?;
        // SAFETY: see `as_slice`; the borrow of `self` is exclusive.
        Ok(unsafe {
            slice::from_raw_parts_mut(bytes.as_mut_ptr().cast(), bytes.len() / T::WORD_SIZE)
        })
    }

    /// Copies the values of a single-field array.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, ArrayError> {
        self.check_simple::<T>()?;
        Ok(self.as_bytes().chunks_exact(T::WORD_SIZE).map(T::read_le).collect())
    }

    fn column_offset<T: Element>(&self, label: &str) -> Result<usize, ArrayError> {
        let fields = &self.header.fields;
        let index = fields
            .iter()
            .position(|field| field.label.as_deref() == Some(label))
            .ok_or_else(|| ArrayError::LabelNotFound(label.to_string()))?;
        let word_size = fields[index].word_size;
        if word_size != T::WORD_SIZE {
            return Err(ArrayError::SizeMismatch { index, field: word_size, requested: T::WORD_SIZE });
        }
        Ok(fields[..index].iter().map(|field| field.word_size).sum())
    }

    /// Strided view of the field labeled `label`.
    pub fn column<T: Element>(&self, label: &str) -> Result<Column<'_, T>, ArrayError> {
        let offset = self.column_offset::<T>(label)?;
        Ok(Column::new(self.as_bytes(), offset, self.record_size()))
    }

    /// Mutable strided view of the field labeled `label`.
    pub fn column_mut<T: Element>(&mut self, label: &str) -> Result<ColumnMut<'_, T>, ArrayError> {
        let offset = self.column_offset::<T>(label)?;
        let stride = self.record_size();
        Ok(ColumnMut::new(self.as_bytes_mut(), offset, stride))
    }

    fn check_record<R: Record>(&self) -> Result<(), ArrayError> {
        let fields = &self.header.fields;
        if fields.len() != R::ARITY {
            return Err(ArrayError::ArityMismatch { fields: fields.len(), requested: R::ARITY });
        }
        for (index, (field, (_, size))) in fields.iter().zip(R::fields()).enumerate() {
            if field.word_size != size {
                return Err(ArrayError::SizeMismatch { index, field: field.word_size, requested: size });
            }
        }
        Ok(())
    }

    /// View of every element as a record tuple.
    pub fn records<R: Record>(&self) -> Result<Records<'_, R>, ArrayError> {
        self.check_record::<R>()?;
        Ok(Records::new(self.as_bytes(), R::record_size()))
    }

    /// Mutable view of every element as a record tuple.
    pub fn records_mut<R: Record>(&mut self) -> Result<RecordsMut<'_, R>, ArrayError> {
        self.check_record::<R>()?;
        Ok(RecordsMut::new(self.as_bytes_mut(), R::record_size()))
    }
}

fn check_castable<T: Element>(bytes: &[u8]) -> Result<(), ArrayError> {
    if cfg!(target_endian = "big") {
        return Err(ArrayError::NonNativeEndian);
    }
    if !T::is_valid(bytes) {
        return Err(ArrayError::InvalidData);
    }
    debug_assert_eq!(bytes.as_ptr().align_offset(mem::align_of::<T>()), 0);
    Ok(())
}
