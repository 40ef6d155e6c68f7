pub(crate) mod elements;
pub mod header;

pub use self::header::ParseHeaderError;
use self::{
    elements::{record_header, write_chunked, write_slice, Element, Record},
    header::{FormatHeaderError, Header, MemoryOrder, ReadHeaderError, TypeCode, WriteHeaderError},
};
use crate::NpyArray;
use std::{
    fs,
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
    str::FromStr,
};
use thiserror::Error;

/// Size of the staging buffer used when moving an existing payload.
const MOVE_BUF_LEN: usize = 1 << 16;

/// What a save call does when the target already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SaveMode {
    /// Create the target, truncating it if it exists (`"w"`).
    #[default]
    Write,
    /// Extend the target if it exists, otherwise create it (`"a"`).
    ///
    /// For `.npy` files the new data is appended along the first axis; for
    /// `.npz` archives a new entry is added.
    Append,
}

impl FromStr for SaveMode {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "w" => Ok(Self::Write),
            "a" => Ok(Self::Append),
            _ => Err(ParseOptionError::SaveMode(s.to_string())),
        }
    }
}

/// An error parsing a [`SaveMode`] or [`MemoryOrder`] from its string form.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseOptionError {
    /// Not `"w"` or `"a"`.
    #[error("unknown save mode {0:?}, expected \"w\" or \"a\"")]
    SaveMode(String),
    /// Not `"C"` or `"F"`.
    #[error("unknown memory order {0:?}, expected \"C\" or \"F\"")]
    MemoryOrder(String),
}

/// Options shared by the save functions.
///
/// The default writes a new, row-major file.
///
/// ```
/// use cnpz::{MemoryOrder, SaveMode, SaveOptions};
///
/// let options = SaveOptions::new().mode(SaveMode::Append).memory_order(MemoryOrder::Fortran);
/// assert_eq!(options, SaveOptions::append().memory_order("F".parse().unwrap()));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SaveOptions {
    /// Behavior when the target exists.
    pub mode: SaveMode,
    /// Memory order recorded in the header of the new data.
    pub memory_order: MemoryOrder,
}

impl SaveOptions {
    /// Same as [`SaveOptions::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Options in [`SaveMode::Append`] mode.
    pub fn append() -> Self {
        Self::new().mode(SaveMode::Append)
    }

    /// Sets the save mode.
    pub fn mode(self, mode: SaveMode) -> Self {
        Self { mode, ..self }
    }

    /// Sets the memory order.
    pub fn memory_order(self, memory_order: MemoryOrder) -> Self {
        Self { memory_order, ..self }
    }
}

/// Data to be saved: its header and a way to stream its payload.
pub(crate) struct Source<'a> {
    pub(crate) header: Header,
    write: Box<dyn FnOnce(&mut dyn Write) -> Result<(), WriteNpyError> + 'a>,
}

impl<'a> Source<'a> {
    fn new(
        header: Header,
        len: usize,
        write: impl FnOnce(&mut dyn Write) -> Result<(), WriteNpyError> + 'a,
    ) -> Result<Self, WriteNpyError> {
        header.validate()?;
        let expected = header.num_vals();
        if len != expected {
            return Err(WriteNpyError::LengthMismatch { shape: header.shape, expected, actual: len });
        }
        Ok(Self { header, write: Box::new(write) })
    }

    pub(crate) fn from_slice<T: Element>(
        data: &'a [T],
        shape: &[usize],
        memory_order: MemoryOrder,
    ) -> Result<Self, WriteNpyError> {
        let header = Header { fields: vec![T::field()], memory_order, shape: shape.to_vec() };
        Self::new(header, data.len(), move |writer| Ok(write_slice(data, writer)?))
    }

    pub(crate) fn from_iter<T, I>(
        iter: I,
        shape: &[usize],
        memory_order: MemoryOrder,
    ) -> Result<Self, WriteNpyError>
    where
        T: Element,
        I: ExactSizeIterator<Item = T> + 'a,
    {
        let header = Header { fields: vec![T::field()], memory_order, shape: shape.to_vec() };
        let len = iter.len();
        Self::new(header, len, move |writer| {
            write_exact(iter, len, T::WORD_SIZE, |v: T, out| v.write_le(out), writer)
        })
    }

    pub(crate) fn from_records<R, I>(
        labels: &[&str],
        iter: I,
        shape: &[usize],
        memory_order: MemoryOrder,
    ) -> Result<Self, WriteNpyError>
    where
        R: Record,
        I: ExactSizeIterator<Item = R> + 'a,
    {
        let header = record_header::<R>(labels, shape.to_vec(), memory_order)?;
        let len = iter.len();
        Self::new(header, len, move |writer| {
            write_exact(iter, len, R::record_size(), |r: R, out| r.pack(out), writer)
        })
    }

    pub(crate) fn from_array(array: &'a NpyArray) -> Self {
        Self {
            header: array.header().clone(),
            write: Box::new(move |writer: &mut dyn Write| -> Result<(), WriteNpyError> {
                Ok(writer.write_all(array.as_bytes())?)
            }),
        }
    }

    pub(crate) fn write_payload(self, writer: &mut dyn Write) -> Result<(), WriteNpyError> {
        (self.write)(writer)
    }

    /// Writes the header followed by the payload.
    pub(crate) fn write_npy(self, writer: impl Write) -> Result<(), WriteNpyError> {
        let header = self.header.to_bytes()?;
        self.write_with_header(&header, writer)
    }

    /// Writes an already encoded header followed by the payload.
    fn write_with_header(self, header: &[u8], mut writer: impl Write) -> Result<(), WriteNpyError> {
        writer.write_all(header)?;
        self.write_payload(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

fn write_exact<V>(
    iter: impl Iterator<Item = V>,
    len: usize,
    item_size: usize,
    pack: impl Fn(V, &mut [u8]),
    writer: &mut dyn Write,
) -> Result<(), WriteNpyError> {
    let written = write_chunked(iter, len, item_size, pack, writer)?;
    if written == len {
        Ok(())
    } else {
        Err(WriteNpyError::MissingData { expected: len, actual: written })
    }
}

/// Read an `.npy` file located at the specified path.
///
/// This is a convience function for using `File::open` followed by
/// [`ReadNpyExt::read_npy`].
pub fn read_npy<P, T>(path: P) -> Result<T, ReadNpyError>
where
    P: AsRef<Path>,
    T: ReadNpyExt,
{
    T::read_npy(io::BufReader::new(fs::File::open(path)?))
}

/// Writes an array to an `.npy` file at the specified path.
///
/// This function will create the file if it does not exist, or overwrite it if
/// it does.
///
/// This is a convenience function for `BufWriter::new(File::create(path)?)`
/// followed by [`WriteNpyExt::write_npy`].
pub fn write_npy<P, T>(path: P, array: &T) -> Result<(), WriteNpyError>
where
    P: AsRef<Path>,
    T: WriteNpyExt + ?Sized,
{
    array.write_npy(io::BufWriter::new(fs::File::create(path)?))
}

/// Loads the `.npy` file at `path` into an [`NpyArray`].
pub fn load_npy<P: AsRef<Path>>(path: P) -> Result<NpyArray, ReadNpyError> {
    let path = path.as_ref();
    log::debug!("loading {}", path.display());
    read_npy(path)
}

/// Saves `data`, laid out in `options.memory_order`, as an array of the
/// given `shape`.
///
/// In [`SaveMode::Append`] mode an existing file is extended along its first
/// axis. The element type, memory order, rank and all but the first dimension
/// must match the existing array; otherwise an error is returned and the file
/// is left untouched.
///
/// ```no_run
/// use cnpz::{save_npy, SaveOptions};
///
/// let data: Vec<u32> = (1..=16).collect();
/// save_npy("out.npy", &data, &[2, 4, 2], SaveOptions::new())?;
/// save_npy("out.npy", &data, &[2, 4, 2], SaveOptions::append())?;
/// # Ok::<_, cnpz::WriteNpyError>(())
/// ```
pub fn save_npy<P, T>(path: P, data: &[T], shape: &[usize], options: SaveOptions) -> Result<(), WriteNpyError>
where
    P: AsRef<Path>,
    T: Element,
{
    let source = Source::from_slice(data, shape, options.memory_order)?;
    save_source(path.as_ref(), source, options.mode)
}

/// Like [`save_npy`], but takes the values from an iterator.
///
/// The values are packed through a fixed-size staging buffer, so the source
/// never needs to be collected.
pub fn save_npy_iter<P, T, I>(path: P, data: I, shape: &[usize], options: SaveOptions) -> Result<(), WriteNpyError>
where
    P: AsRef<Path>,
    T: Element,
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
{
    let source = Source::from_iter(data.into_iter(), shape, options.memory_order)?;
    save_source(path.as_ref(), source, options.mode)
}

/// Saves a structured array whose records are tuples of elements, one label
/// per tuple field.
///
/// ```no_run
/// use cnpz::{save_npy_records, SaveOptions};
///
/// let records = [(1i32, -1i8, 100i16), (2, -2, 200), (3, -3, 300)];
/// save_npy_records("records.npy", &["a", "b", "c"], records, &[3], SaveOptions::new())?;
/// # Ok::<_, cnpz::WriteNpyError>(())
/// ```
pub fn save_npy_records<P, R, I>(
    path: P,
    labels: &[&str],
    records: I,
    shape: &[usize],
    options: SaveOptions,
) -> Result<(), WriteNpyError>
where
    P: AsRef<Path>,
    R: Record,
    I: IntoIterator<Item = R>,
    I::IntoIter: ExactSizeIterator,
{
    let source = Source::from_records(labels, records.into_iter(), shape, options.memory_order)?;
    save_source(path.as_ref(), source, options.mode)
}

/// Saves a whole [`NpyArray`]. Append mode behaves as in [`save_npy`].
pub fn save_npy_array<P: AsRef<Path>>(path: P, array: &NpyArray, mode: SaveMode) -> Result<(), WriteNpyError> {
    save_source(path.as_ref(), Source::from_array(array), mode)
}

pub(crate) fn save_source(path: &Path, source: Source<'_>, mode: SaveMode) -> Result<(), WriteNpyError> {
    if mode == SaveMode::Append && path.exists() {
        log::debug!("appending {:?} to {}", source.header.shape, path.display());
        let file = fs::OpenOptions::new().read(true).write(true).open(path)?;
        append(file, source)
    } else {
        log::debug!("writing {} to {}", source.header, path.display());
        let header = source.header.to_bytes()?;
        source.write_with_header(&header, io::BufWriter::new(fs::File::create(path)?))
    }
}

/// Appends `source` along the first axis of the `.npy` stream in `file`.
///
/// Nothing is written unless the existing header is compatible with the new
/// data. If the merged header needs more room than the old one, the existing
/// payload is moved forward first.
pub(crate) fn append<F: Read + Write + Seek>(mut file: F, source: Source<'_>) -> Result<(), WriteNpyError> {
    file.rewind()?;
    let (existing, old_header_len) = Header::read_with_len(&mut file)?;
    let shape = check_append(&existing, &source.header)?;
    let old_rows = existing.shape[0];
    let new_rows = source.header.shape[0];
    let blocks: usize = existing.shape[1..].iter().product();
    let fortran = existing.memory_order.is_fortran();
    let old_payload_len = existing.num_bytes_checked().ok_or(FormatHeaderError::LengthOverflow)?;
    let merged = Header { shape, ..existing };
    let header_bytes = merged.to_bytes_with_min_len(old_header_len)?;

    let file_len = file.seek(SeekFrom::End(0))?;
    if file_len < old_header_len as u64 + old_payload_len as u64 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "existing payload is truncated").into());
    }
    let old_start = old_header_len as u64;
    let new_start = header_bytes.len() as u64;
    log::debug!("merged header: {merged} ({old_start} -> {new_start} bytes)");

    if fortran && blocks > 1 {
        // The first axis varies fastest, so every trailing index owns a
        // contiguous run of rows that grows in place.
        let record_size = merged.record_size();
        let (old_block, new_block) = (old_rows * record_size, new_rows * record_size);
        let mut staged = Vec::with_capacity(blocks * new_block);
        source.write_payload(&mut staged)?;
        for k in (0..blocks).rev() {
            let from = old_start + (k * old_block) as u64;
            let to = new_start + (k * (old_block + new_block)) as u64;
            move_forward(&mut file, from, to, old_block as u64)?;
            file.seek(SeekFrom::Start(to + old_block as u64))?;
            file.write_all(&staged[k * new_block..(k + 1) * new_block])?;
        }
        file.rewind()?;
        file.write_all(&header_bytes)?;
    } else {
        move_forward(&mut file, old_start, new_start, old_payload_len as u64)?;
        file.rewind()?;
        file.write_all(&header_bytes)?;
        file.seek(SeekFrom::Start(new_start + old_payload_len as u64))?;
        let mut writer = io::BufWriter::new(&mut file);
        source.write_payload(&mut writer)?;
        writer.flush()?;
    }
    file.flush()?;
    Ok(())
}

/// Checks that `appended` can extend `existing` and returns the merged shape.
fn check_append(existing: &Header, appended: &Header) -> Result<Vec<usize>, WriteNpyError> {
    let (old, new) = (&existing.fields, &appended.fields);
    if old.len() != new.len() {
        return Err(TypeMismatch::FieldCount { existing: old.len(), appended: new.len() }.into());
    }
    for (index, (old, new)) in old.iter().zip(new).enumerate() {
        if old.word_size != new.word_size {
            return Err(TypeMismatch::WordSize { index, existing: old.word_size, appended: new.word_size }.into());
        }
        if old.type_code != new.type_code {
            return Err(TypeMismatch::TypeCode { index, existing: old.type_code, appended: new.type_code }.into());
        }
    }
    if !existing.labels().eq(appended.labels()) {
        return Err(TypeMismatch::Labels {
            existing: existing.labels().map(str::to_string).collect(),
            appended: appended.labels().map(str::to_string).collect(),
        }
        .into());
    }
    if existing.memory_order != appended.memory_order {
        return Err(TypeMismatch::MemoryOrder { existing: existing.memory_order, appended: appended.memory_order }.into());
    }
    match (existing.shape.split_first(), appended.shape.split_first()) {
        (Some((&old_rows, old_rest)), Some((&new_rows, new_rest))) if old_rest == new_rest => {
            let rows = old_rows.checked_add(new_rows).ok_or(FormatHeaderError::LengthOverflow)?;
            let mut shape = existing.shape.clone();
            shape[0] = rows;
            Ok(shape)
        }
        _ => Err(WriteNpyError::ShapeMismatch {
            existing: existing.shape.clone(),
            appended: appended.shape.clone(),
        }),
    }
}

/// Copies `len` bytes at `from` to `to >= from`, back to front so that
/// overlapping ranges are handled.
fn move_forward<F: Read + Write + Seek>(file: &mut F, from: u64, to: u64, len: u64) -> io::Result<()> {
    if from == to || len == 0 {
        return Ok(());
    }
    debug_assert!(to > from);
    let mut buf = vec![0; MOVE_BUF_LEN.min(usize::try_from(len).unwrap_or(MOVE_BUF_LEN))];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(buf.len() as u64);
        let chunk = &mut buf[..n as usize];
        remaining -= n;
        file.seek(SeekFrom::Start(from + remaining))?;
        file.read_exact(chunk)?;
        file.seek(SeekFrom::Start(to + remaining))?;
        file.write_all(chunk)?;
    }
    log::trace!("moved {len} bytes from {from} to {to}");
    Ok(())
}

/// Extension trait for writing an array to `.npy` files.
///
/// If writes are expensive (e.g. for a file or network socket), it is
/// strongly recommended to wrap the writer in a [`std::io::BufWriter`]. For
/// the sake of convenience, this method calls [`io::Write::flush()`] on the
/// writer before returning.
pub trait WriteNpyExt {
    /// Writes the array to `writer` in [`.npy`
    /// format](https://numpy.org/doc/stable/reference/generated/numpy.lib.format.html).
    fn write_npy<W: io::Write>(&self, writer: W) -> Result<(), WriteNpyError>;
}

impl WriteNpyExt for NpyArray {
    fn write_npy<W: io::Write>(&self, writer: W) -> Result<(), WriteNpyError> {
        Source::from_array(self).write_npy(writer)
    }
}

/// Extension trait for reading arrays from `.npy` files.
pub trait ReadNpyExt: Sized {
    /// Reads the array from `reader` in [`.npy`
    /// format](https://numpy.org/doc/stable/reference/generated/numpy.lib.format.html).
    ///
    /// The reader must end right after the payload.
    fn read_npy<R: io::Read>(reader: R) -> Result<Self, ReadNpyError>;
}

impl ReadNpyExt for NpyArray {
    fn read_npy<R: io::Read>(mut reader: R) -> Result<Self, ReadNpyError> {
        let array = read_array(&mut reader)?;
        check_at_end(reader)?;
        Ok(array)
    }
}

/// Reads a header and exactly the payload it declares.
pub(crate) fn read_array<R: io::Read>(mut reader: R) -> Result<NpyArray, ReadNpyError> {
    let header = Header::from_reader(&mut reader)?;
    NpyArray::read_payload(header, reader)
}

pub(crate) fn check_at_end<R: io::Read>(mut reader: R) -> Result<(), ReadNpyError> {
    match io::copy(&mut reader, &mut io::sink())? {
        0 => Ok(()),
        extra => Err(ReadNpyError::ExtraBytes(extra)),
    }
}

/// A reason why new data cannot be appended to an existing array.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TypeMismatch {
    /// Different number of fields.
    #[error("existing array has {existing} fields, appended data has {appended}")]
    FieldCount {
        /// Fields of the existing array.
        existing: usize,
        /// Fields of the new data.
        appended: usize,
    },
    /// A field has a different word size.
    #[error("field {index} has word size {existing}, appended data has {appended}")]
    WordSize {
        /// Position of the field.
        index: usize,
        /// Word size in the existing array.
        existing: usize,
        /// Word size in the new data.
        appended: usize,
    },
    /// A field has a different type code.
    #[error("field {index} has type code {existing}, appended data has {appended}")]
    TypeCode {
        /// Position of the field.
        index: usize,
        /// Type code in the existing array.
        existing: TypeCode,
        /// Type code in the new data.
        appended: TypeCode,
    },
    /// The field labels differ.
    #[error("existing labels {existing:?} differ from appended labels {appended:?}")]
    Labels {
        /// Labels of the existing array.
        existing: Vec<String>,
        /// Labels of the new data.
        appended: Vec<String>,
    },
    /// The memory orders differ.
    #[error("existing memory order {existing:?} differs from {appended:?}")]
    MemoryOrder {
        /// Order of the existing array.
        existing: MemoryOrder,
        /// Order of the new data.
        appended: MemoryOrder,
    },
}

/// An error writing a `.npy` file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteNpyError {
    /// An error caused by I/O.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An error formatting the header.
    #[error("error formatting header: {0}")]
    FormatHeader(#[from] FormatHeaderError),
    /// The header of the file being appended to cannot be parsed.
    #[error("error parsing existing header: {0}")]
    ParseHeader(#[from] ParseHeaderError),
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
    /// The source ran out of values while writing the payload.
    #[error("source ended after {actual} of {expected} values")]
    MissingData {
        /// Number of values announced by the source.
        expected: usize,
        /// Number of values written.
        actual: usize,
    },
    /// The rank or a trailing dimension differs from the existing array.
    #[error("cannot append shape {appended:?} to shape {existing:?}")]
    ShapeMismatch {
        /// Shape of the existing array.
        existing: Vec<usize>,
        /// Shape of the new data.
        appended: Vec<usize>,
    },
    /// The element layout differs from the existing array.
    #[error("cannot append: {0}")]
    TypeMismatch(#[from] TypeMismatch),
}

impl From<WriteHeaderError> for WriteNpyError {
    fn from(err: WriteHeaderError) -> Self {
        match err {
            WriteHeaderError::Io(err) => Self::Io(err),
            WriteHeaderError::Format(err) => Self::FormatHeader(err),
        }
    }
}

impl From<ReadHeaderError> for WriteNpyError {
    fn from(err: ReadHeaderError) -> Self {
        match err {
            ReadHeaderError::Io(err) => Self::Io(err),
            ReadHeaderError::Parse(err) => Self::ParseHeader(err),
        }
    }
}

/// An error reading a `.npy` file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReadNpyError {
    /// An error caused by I/O.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An error parsing the file header.
    #[error("error parsing header: {0}")]
    ParseHeader(#[from] ParseHeaderError),
    /// The header parsed but does not describe a valid array.
    #[error("invalid header: {0}")]
    InvalidHeader(FormatHeaderError),
    /// Overflow while computing the length of the array (in units of bytes or
    /// the number of elements) from the shape described in the file header.
    #[error("overflow computing length from shape")]
    LengthOverflow,
    /// The file does not contain all the data described in the header.
    #[error("reached EOF before reading all data")]
    MissingData,
    /// Extra bytes are present between the end of the data and the end of the
    /// file.
    #[error("file had {0} extra bytes before EOF")]
    ExtraBytes(u64),
    /// The type descriptor does not match the element type.
    #[error("incorrect descriptor ({0}) for this type")]
    WrongDescriptor(String),
    /// An error caused by incorrect `Dimension` type.
    #[error("ndim {1} of array did not match Dimension type with NDIM = {0:?}")]
    WrongNdim(Option<usize>, usize),
}

impl ReadNpyError {
    /// Maps an error reading the payload, where EOF means missing data.
    pub(crate) fn from_payload(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::MissingData,
            _ => Self::Io(err),
        }
    }
}

impl From<ReadHeaderError> for ReadNpyError {
    fn from(err: ReadHeaderError) -> Self {
        match err {
            ReadHeaderError::Io(err) => Self::Io(err),
            ReadHeaderError::Parse(err) => Self::ParseHeader(err),
        }
    }
}

impl From<FormatHeaderError> for ReadNpyError {
    fn from(err: FormatHeaderError) -> Self {
        match err {
            FormatHeaderError::LengthOverflow => Self::LengthOverflow,
            err => Self::InvalidHeader(err),
        }
    }
}
