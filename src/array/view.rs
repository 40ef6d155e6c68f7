//! Strided and record views into the payload of an [`NpyArray`].
//!
//! Fields of a structured array are interleaved and generally unaligned, so
//! the views never hand out references into the payload. Values are decoded
//! from (and encoded into) their byte ranges on access.
//!
//! [`NpyArray`]: super::NpyArray
use crate::{Element, Record};
use std::{iter::FusedIterator, marker::PhantomData, slice};

fn field_bytes(record: &[u8], offset: usize, size: usize) -> &[u8] {
    &record[offset..offset + size]
}

/// Read-only strided view of one field of every element.
#[derive(Debug)]
pub struct Column<'a, T> {
    bytes: &'a [u8],
    offset: usize,
    stride: usize,
    _marker: PhantomData<T>,
}

impl<T> Clone for Column<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Column<'_, T> {}

impl<'a, T: Element> Column<'a, T> {
    pub(super) fn new(bytes: &'a [u8], offset: usize, stride: usize) -> Self {
        Self { bytes, offset, stride, _marker: PhantomData }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.stride
    }

    /// Returns `true` if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The field of the `index`-th element.
    pub fn get(&self, index: usize) -> Option<T> {
        let record = self.bytes.chunks_exact(self.stride).nth(index)?;
        Some(T::read_le(field_bytes(record, self.offset, T::WORD_SIZE)))
    }

    /// Iterates over the field of every element, in payload order.
    pub fn iter(&self) -> ColumnIter<'a, T> {
        ColumnIter { records: self.bytes.chunks_exact(self.stride), offset: self.offset, _marker: PhantomData }
    }
}

impl<'a, T: Element> IntoIterator for Column<'a, T> {
    type Item = T;
    type IntoIter = ColumnIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`Column`].
#[derive(Debug)]
pub struct ColumnIter<'a, T> {
    records: slice::ChunksExact<'a, u8>,
    offset: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> Iterator for ColumnIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let record = self.records.next()?;
        Some(T::read_le(field_bytes(record, self.offset, T::WORD_SIZE)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl<T: Element> DoubleEndedIterator for ColumnIter<'_, T> {
    fn next_back(&mut self) -> Option<T> {
        let record = self.records.next_back()?;
        Some(T::read_le(field_bytes(record, self.offset, T::WORD_SIZE)))
    }
}

impl<T: Element> ExactSizeIterator for ColumnIter<'_, T> {}
impl<T: Element> FusedIterator for ColumnIter<'_, T> {}

/// Mutable strided view of one field of every element.
#[derive(Debug)]
pub struct ColumnMut<'a, T> {
    bytes: &'a mut [u8],
    offset: usize,
    stride: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: Element> ColumnMut<'a, T> {
    pub(super) fn new(bytes: &'a mut [u8], offset: usize, stride: usize) -> Self {
        Self { bytes, offset, stride, _marker: PhantomData }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.stride
    }

    /// Returns `true` if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The field of the `index`-th element.
    pub fn get(&self, index: usize) -> Option<T> {
        self.as_column().get(index)
    }

    /// Overwrites the field of the `index`-th element. Returns `false` if
    /// `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: T) -> bool {
        match self.iter_mut().nth(index) {
            Some(mut field) => {
                field.set(value);
                true
            }
            None => false,
        }
    }

    /// Read-only view of the same field.
    pub fn as_column(&self) -> Column<'_, T> {
        Column::new(self.bytes, self.offset, self.stride)
    }

    /// Iterates over handles to the field of every element.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = FieldMut<'_, T>> + '_ {
        let (offset, size) = (self.offset, T::WORD_SIZE);
        self.bytes
            .chunks_exact_mut(self.stride)
            .map(move |record| FieldMut::new(&mut record[offset..offset + size]))
    }
}

/// Handle to one field of one element.
#[derive(Debug)]
pub struct FieldMut<'a, T> {
    bytes: &'a mut [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: Element> FieldMut<'a, T> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, _marker: PhantomData }
    }

    /// Decodes the current value.
    pub fn get(&self) -> T {
        T::read_le(self.bytes)
    }

    /// Encodes `value` into the payload.
    pub fn set(&mut self, value: T) {
        value.write_le(self.bytes);
    }
}

/// Read-only view of every element as a record tuple.
#[derive(Debug)]
pub struct Records<'a, R> {
    bytes: &'a [u8],
    record_size: usize,
    _marker: PhantomData<R>,
}

impl<R> Clone for Records<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Records<'_, R> {}

impl<'a, R: Record> Records<'a, R> {
    pub(super) fn new(bytes: &'a [u8], record_size: usize) -> Self {
        Self { bytes, record_size, _marker: PhantomData }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.record_size
    }

    /// Returns `true` if the array has no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`-th record.
    pub fn get(&self, index: usize) -> Option<R> {
        self.bytes.chunks_exact(self.record_size).nth(index).map(R::unpack)
    }

    /// Iterates over the records in payload order.
    pub fn iter(&self) -> RecordsIter<'a, R> {
        RecordsIter { records: self.bytes.chunks_exact(self.record_size), _marker: PhantomData }
    }
}

impl<'a, R: Record> IntoIterator for Records<'a, R> {
    type Item = R;
    type IntoIter = RecordsIter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over [`Records`].
#[derive(Debug)]
pub struct RecordsIter<'a, R> {
    records: slice::ChunksExact<'a, u8>,
    _marker: PhantomData<R>,
}

impl<R: Record> Iterator for RecordsIter<'_, R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        self.records.next().map(R::unpack)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl<R: Record> DoubleEndedIterator for RecordsIter<'_, R> {
    fn next_back(&mut self) -> Option<R> {
        self.records.next_back().map(R::unpack)
    }
}

impl<R: Record> ExactSizeIterator for RecordsIter<'_, R> {}
impl<R: Record> FusedIterator for RecordsIter<'_, R> {}

/// Mutable view of every element as a record tuple.
#[derive(Debug)]
pub struct RecordsMut<'a, R> {
    bytes: &'a mut [u8],
    record_size: usize,
    _marker: PhantomData<R>,
}

impl<'a, R: Record> RecordsMut<'a, R> {
    pub(super) fn new(bytes: &'a mut [u8], record_size: usize) -> Self {
        Self { bytes, record_size, _marker: PhantomData }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.record_size
    }

    /// Returns `true` if the array has no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`-th record.
    pub fn get(&self, index: usize) -> Option<R> {
        self.as_records().get(index)
    }

    /// Overwrites the `index`-th record. Returns `false` if `index` is out
    /// of bounds.
    pub fn set(&mut self, index: usize, record: R) -> bool {
        match self.bytes.chunks_exact_mut(self.record_size).nth(index) {
            Some(out) => {
                record.pack(out);
                true
            }
            None => false,
        }
    }

    /// Read-only view of the same records.
    pub fn as_records(&self) -> Records<'_, R> {
        Records::new(self.bytes, self.record_size)
    }

    /// Iterates over handles to every record.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = RecordMut<'_, R>> + '_ {
        self.bytes
            .chunks_exact_mut(self.record_size)
            .map(|bytes| RecordMut { bytes, _marker: PhantomData })
    }
}

/// Handle to one record.
#[derive(Debug)]
pub struct RecordMut<'a, R> {
    bytes: &'a mut [u8],
    _marker: PhantomData<R>,
}

impl<R: Record> RecordMut<'_, R> {
    /// Decodes the current record.
    pub fn get(&self) -> R {
        R::unpack(self.bytes)
    }

    /// Encodes `record` into the payload.
    pub fn set(&mut self, record: R) {
        record.pack(self.bytes);
    }
}
