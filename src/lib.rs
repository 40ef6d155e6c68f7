//! Reading, writing and appending NumPy `.npy` files and `.npz` archives.
//!
//! ## Operate .npy Files
//!
//! - Writing
//!   - [`save_npy`], [`save_npy_iter`] and [`save_npy_records`] for slices,
//!     iterators and structured records
//!   - [`SaveMode::Append`] extends an existing file along its first axis
//!   - [`WriteNpyExt`] extension trait and [`write_npy`] convenience function
//! - Reading
//!   - [`load_npy`] into an [`NpyArray`], with typed views such as
//!     [`NpyArray::as_slice`], [`NpyArray::column`] and [`NpyArray::records`]
//!   - [`ReadNpyExt`] extension trait and [`read_npy`] convenience function
//!
//! ## Operate .npz Files
//!
//! - Writing: [`save_npz`] and friends, stored or deflated
//!   (`compressed-npz` feature)
//! - Reading: [`load_npz`], [`load_npz_all`] and [`NpzReader`]
//!
//! ## Runtime element types
//!
//! [`save_npy_dyn`] and [`save_npz_dyn`] take a [`DynSlice`] when the element
//! type is only known at runtime.
//!
//! ```
//! use cnpz::{NpyArray, ReadNpyExt, WriteNpyExt, MemoryOrder};
//!
//! let array = NpyArray::from_slice(&[1u32, 2, 3, 4], vec![2, 2], MemoryOrder::C)?;
//! let mut buf = Vec::new();
//! array.write_npy(&mut buf)?;
//! assert_eq!(NpyArray::read_npy(&buf[..])?.to_vec::<u32>()?, [1, 2, 3, 4]);
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Limitations
//!
//! - Only format version 1.0 is read and written.
//! - Payloads are little-endian; headers declaring big-endian (`>`) fields
//!   are rejected.
//! - The [`Element`] trait is implemented only for fixed-size integers up to
//!   64 bits, floating point numbers, complex floating point numbers (if
//!   enabled with the crate feature), and [`bool`].
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs)]

mod array;
mod dynamic;
mod npy;
mod npz;

#[cfg(feature = "ndarray")]
mod impl_ndarray;

pub use crate::{
    array::{
        ArrayError, Column, ColumnIter, ColumnMut, FieldMut, NpyArray, RecordMut, Records,
        RecordsIter, RecordsMut,
    },
    dynamic::{save_npy_dyn, save_npz_dyn, DataType, DynSlice},
    npy::{
        elements::{Element, Record},
        header::{self, Field, FormatHeaderError, Header, MemoryOrder, ParseHeaderError, TypeCode},
        load_npy, read_npy, save_npy, save_npy_array, save_npy_iter, save_npy_records, write_npy,
        ParseOptionError, ReadNpyError, ReadNpyExt, SaveMode, SaveOptions, TypeMismatch,
        WriteNpyError, WriteNpyExt,
    },
    npz::{
        load_npz, load_npz_all, save_npz, save_npz_array, save_npz_iter, save_npz_records,
        Compression, NpzReader, ReadNpzError, WriteNpzError,
    },
};
