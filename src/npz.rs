mod zip;

use self::zip::{
    central_directory_entry, central_directory_names, CentralDirectoryEnd, Crc32Reader, LocalFileHeader,
    ZipError, METHOD_DEFLATED, METHOD_STORED,
};
use crate::{
    npy::{check_at_end, elements::Element, read_array, Source},
    NpyArray, ReadNpyError, Record, SaveMode, SaveOptions, WriteNpyError,
};
use indexmap::IndexMap;
use std::{
    fs,
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::Path,
};
use thiserror::Error;

/// Suffix of the stored name of every entry.
const NPY_SUFFIX: &str = ".npy";

/// How the `.npy` bytes of an entry are stored in the archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// ZIP method 0.
    #[default]
    Stored,
    /// Raw DEFLATE, ZIP method 8. Needs the `compressed-npz` feature.
    Deflated,
}

impl Compression {
    /// The ZIP compression method id.
    pub const fn method_id(self) -> u16 {
        match self {
            Self::Stored => METHOD_STORED,
            Self::Deflated => METHOD_DEFLATED,
        }
    }

    fn compress(self, bytes: Vec<u8>) -> Result<Vec<u8>, WriteNpzError> {
        match self {
            Self::Stored => Ok(bytes),
            #[cfg(feature = "compressed-npz")]
            Self::Deflated => {
                let mut encoder =
                    flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&bytes)?;
                Ok(encoder.finish()?)
            }
            #[cfg(not(feature = "compressed-npz"))]
            Self::Deflated => Err(WriteNpzError::UnsupportedCompression(self)),
        }
    }
}

/// An error writing an `.npz` archive.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteNpzError {
    /// An error caused by I/O.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An error encoding the entry.
    #[error("error writing npy: {0}")]
    Npy(#[from] WriteNpyError),
    /// The existing archive is not a single-disk archive without comments,
    /// or its records are inconsistent.
    #[error("unexpected ZIP structure: {0}")]
    ArchiveStructure(&'static str),
    /// The archive already has an entry of this name.
    #[error("entry {0:?} already exists")]
    DuplicateEntry(String),
    /// The archive would hold more than 65535 entries.
    #[error("too many entries for a ZIP archive without ZIP64")]
    TooManyEntries,
    /// An offset or size would not fit in 32 bits.
    #[error("archive too large for ZIP without ZIP64")]
    ArchiveTooLarge,
    /// The compression method is not enabled.
    #[error("compression {0:?} is not enabled")]
    UnsupportedCompression(Compression),
}

impl From<ZipError> for WriteNpzError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(err) => Self::Io(err),
            ZipError::Structure(msg) => Self::ArchiveStructure(msg),
        }
    }
}

/// An error reading an `.npz` archive.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReadNpzError {
    /// An error caused by I/O.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An error decoding an entry.
    #[error("error reading npy: {0}")]
    Npy(#[from] ReadNpyError),
    /// No entry has the requested name.
    #[error("entry {0:?} not found")]
    EntryNotFound(String),
    /// The archive is not a single-disk archive without comments, or its
    /// records are inconsistent.
    #[error("unexpected ZIP structure: {0}")]
    ArchiveStructure(&'static str),
    /// The checksum of an entry does not match its contents.
    #[error("checksum mismatch in entry {name:?}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Stored name of the entry.
        name: String,
        /// Checksum recorded in the local header.
        expected: u32,
        /// Checksum of the decoded bytes.
        actual: u32,
    },
    /// The entry uses a compression method this build cannot decode.
    #[error("unsupported compression method {0}")]
    UnsupportedCompression(u16),
}

impl From<ZipError> for ReadNpzError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(err) => Self::Io(err),
            ZipError::Structure(msg) => Self::ArchiveStructure(msg),
        }
    }
}

fn file_name_from_array_name(name: &str) -> String {
    format!("{name}{NPY_SUFFIX}")
}

fn array_name_from_file_name(name: &str) -> &str {
    name.strip_suffix(NPY_SUFFIX).unwrap_or(name)
}

/// Saves `data` as the entry `name` of the archive at `path`.
///
/// [`SaveMode::Write`] creates a new archive holding only this entry.
/// [`SaveMode::Append`] adds the entry to an existing archive, rewriting its
/// central directory; entry names must be unique.
///
/// ```no_run
/// use cnpz::{load_npz, save_npz, Compression, SaveOptions};
///
/// let data = [1.0f64, 2.0, 3.0, 4.0];
/// save_npz("arrays.npz", "a", &data, &[2, 2], SaveOptions::new(), Compression::Stored)?;
/// save_npz("arrays.npz", "b", &data, &[4], SaveOptions::append(), Compression::Deflated)?;
/// let b = load_npz("arrays.npz", "b")?;
/// assert_eq!(b.as_slice::<f64>()?, data);
/// # Ok::<_, Box<dyn std::error::Error>>(())
/// ```
pub fn save_npz<P, T>(
    path: P,
    name: &str,
    data: &[T],
    shape: &[usize],
    options: SaveOptions,
    compression: Compression,
) -> Result<(), WriteNpzError>
where
    P: AsRef<Path>,
    T: Element,
{
    let source = Source::from_slice(data, shape, options.memory_order)?;
    save_entry(path.as_ref(), name, source, options.mode, compression)
}

/// Like [`save_npz`], but takes the values from an iterator.
pub fn save_npz_iter<P, T, I>(
    path: P,
    name: &str,
    data: I,
    shape: &[usize],
    options: SaveOptions,
    compression: Compression,
) -> Result<(), WriteNpzError>
where
    P: AsRef<Path>,
    T: Element,
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
{
    let source = Source::from_iter(data.into_iter(), shape, options.memory_order)?;
    save_entry(path.as_ref(), name, source, options.mode, compression)
}

/// Saves a structured array of tuple records as the entry `name`.
pub fn save_npz_records<P, R, I>(
    path: P,
    name: &str,
    labels: &[&str],
    records: I,
    shape: &[usize],
    options: SaveOptions,
    compression: Compression,
) -> Result<(), WriteNpzError>
where
    P: AsRef<Path>,
    R: Record,
    I: IntoIterator<Item = R>,
    I::IntoIter: ExactSizeIterator,
{
    let source = Source::from_records(labels, records.into_iter(), shape, options.memory_order)?;
    save_entry(path.as_ref(), name, source, options.mode, compression)
}

/// Saves a whole [`NpyArray`] as the entry `name`.
pub fn save_npz_array<P: AsRef<Path>>(
    path: P,
    name: &str,
    array: &NpyArray,
    mode: SaveMode,
    compression: Compression,
) -> Result<(), WriteNpzError> {
    save_entry(path.as_ref(), name, Source::from_array(array), mode, compression)
}

pub(crate) fn save_entry(
    path: &Path,
    name: &str,
    source: Source<'_>,
    mode: SaveMode,
    compression: Compression,
) -> Result<(), WriteNpzError> {
    let entry = Entry::encode(name, source, compression)?;
    if mode == SaveMode::Append && path.exists() {
        log::debug!("adding entry {name:?} to {}", path.display());
        let mut file = fs::OpenOptions::new().read(true).write(true).open(path)?;
        write_entry(&mut file, true, &entry)
    } else {
        log::debug!("writing entry {name:?} to new archive {}", path.display());
        let mut file = fs::File::create(path)?;
        write_entry(&mut file, false, &entry)
    }
}

/// A fully encoded entry: its local file header and stored bytes.
struct Entry<'a> {
    name: &'a str,
    local: Vec<u8>,
    data: Vec<u8>,
    uncompressed_size: usize,
}

impl<'a> Entry<'a> {
    fn encode(name: &'a str, source: Source<'_>, compression: Compression) -> Result<Self, WriteNpzError> {
        let mut npy = Vec::new();
        source.write_npy(&mut npy)?;
        let crc32 = crc32fast::hash(&npy);
        let uncompressed_size = npy.len();
        let data = compression.compress(npy)?;
        let local = LocalFileHeader {
            name: file_name_from_array_name(name),
            compression_method: compression.method_id(),
            crc32,
            compressed_size: data.len() as u64,
            uncompressed_size: uncompressed_size as u64,
        }
        .to_bytes()
        .map_err(|err| match err {
            ZipError::Structure(_) => WriteNpzError::ArchiveTooLarge,
            err => err.into(),
        })?;
        Ok(Self { name, local, data, uncompressed_size })
    }
}

/// Writes one entry followed by the central directory and its end record.
///
/// With `append`, `file` holds an archive whose central directory is read,
/// then overwritten by the new entry and rewritten after it.
fn write_entry<F: Read + Write + Seek>(file: &mut F, append: bool, entry: &Entry<'_>) -> Result<(), WriteNpzError> {
    let Entry { name, local, data, uncompressed_size } = entry;
    let (mut directory, offset, entry_count) = if append {
        let end = CentralDirectoryEnd::parse(file)?;
        let mut directory = vec![0; end.central_directory_size as usize];
        file.seek(SeekFrom::Start(end.central_directory_offset.into()))?;
        file.read_exact(&mut directory)?;
        let names = central_directory_names(&directory)?;
        if names.len() != usize::from(end.entry_count) {
            return Err(WriteNpzError::ArchiveStructure("entry count does not match central directory"));
        }
        if names.contains(&file_name_from_array_name(name)) {
            return Err(WriteNpzError::DuplicateEntry(name.to_string()));
        }
        (directory, end.central_directory_offset, end.entry_count)
    } else {
        (Vec::new(), 0, 0)
    };
    let entry_count = entry_count.checked_add(1).ok_or(WriteNpzError::TooManyEntries)?;
    log::trace!("entry {name:?} at offset {offset}: {uncompressed_size} -> {} bytes", data.len());

    directory.extend_from_slice(&central_directory_entry(local, offset));
    let end = CentralDirectoryEnd {
        entry_count,
        central_directory_size: u32::try_from(directory.len()).map_err(|_| WriteNpzError::ArchiveTooLarge)?,
        central_directory_offset: (local.len() + data.len())
            .try_into()
            .ok()
            .and_then(|len: u32| len.checked_add(offset))
            .ok_or(WriteNpzError::ArchiveTooLarge)?,
    };

    file.seek(SeekFrom::Start(offset.into()))?;
    let mut writer = io::BufWriter::new(file);
    writer.write_all(local)?;
    writer.write_all(data)?;
    writer.write_all(&directory)?;
    writer.write_all(&end.to_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Reader for `.npz` archives.
///
/// Entries are located by scanning the local file headers from the start of
/// the archive, in physical order.
///
/// ```no_run
/// use cnpz::NpzReader;
///
/// let mut npz = NpzReader::open("arrays.npz")?;
/// for name in npz.names()? {
///     let array = npz.by_name(&name)?;
///     println!("{name}: {:?}", array.shape());
/// }
/// # Ok::<_, cnpz::ReadNpzError>(())
/// ```
pub struct NpzReader<R: Read + Seek> {
    reader: R,
}

impl NpzReader<BufReader<fs::File>> {
    /// Opens the archive at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReadNpzError> {
        Self::new(BufReader::new(fs::File::open(path)?))
    }
}

impl<R: Read + Seek> NpzReader<R> {
    /// Wraps `reader`, checking the end of central directory record.
    pub fn new(mut reader: R) -> Result<Self, ReadNpzError> {
        CentralDirectoryEnd::parse(&mut reader)?;
        Ok(Self { reader })
    }

    /// Parses the local header at `*position` and moves `*position` past its
    /// data, leaving the reader at the start of the data.
    fn next_entry(&mut self, position: &mut u64) -> Result<Option<LocalFileHeader>, ReadNpzError> {
        self.reader.seek(SeekFrom::Start(*position))?;
        let Some(header) = LocalFileHeader::parse(&mut self.reader)? else {
            return Ok(None);
        };
        *position = self
            .reader
            .stream_position()?
            .checked_add(header.compressed_size)
            .ok_or(ReadNpzError::ArchiveStructure("entry size overflows"))?;
        Ok(Some(header))
    }

    /// Decodes the entry whose data starts at the current position.
    fn read_entry(&mut self, header: &LocalFileHeader) -> Result<NpyArray, ReadNpzError> {
        let data = self.reader.by_ref().take(header.compressed_size);
        match header.compression_method {
            METHOD_STORED => decode_entry(header, data),
            #[cfg(feature = "compressed-npz")]
            METHOD_DEFLATED => decode_entry(header, flate2::read::DeflateDecoder::new(data)),
            method => Err(ReadNpzError::UnsupportedCompression(method)),
        }
    }

    /// Names of the arrays in the archive, in physical order.
    pub fn names(&mut self) -> Result<Vec<String>, ReadNpzError> {
        let mut names = Vec::new();
        let mut position = 0;
        while let Some(header) = self.next_entry(&mut position)? {
            names.push(array_name_from_file_name(&header.name).to_string());
        }
        Ok(names)
    }

    /// Reads the first array named `name`.
    pub fn by_name(&mut self, name: &str) -> Result<NpyArray, ReadNpzError> {
        let mut position = 0;
        while let Some(header) = self.next_entry(&mut position)? {
            if array_name_from_file_name(&header.name) == name {
                return self.read_entry(&header);
            }
        }
        Err(ReadNpzError::EntryNotFound(name.to_string()))
    }

    /// Reads every array, keyed by name in physical order. If a name occurs
    /// more than once, the first entry wins.
    pub fn read_all(&mut self) -> Result<IndexMap<String, NpyArray>, ReadNpzError> {
        let mut arrays = IndexMap::new();
        let mut position = 0;
        while let Some(header) = self.next_entry(&mut position)? {
            let array = self.read_entry(&header)?;
            arrays.entry(array_name_from_file_name(&header.name).to_string()).or_insert(array);
        }
        Ok(arrays)
    }
}

/// Decodes one entry and checks its checksum and size against the local
/// header.
fn decode_entry<R: Read>(header: &LocalFileHeader, reader: R) -> Result<NpyArray, ReadNpzError> {
    let mut reader = Crc32Reader::new(reader);
    let array = read_array(&mut reader)?;
    check_at_end(&mut reader)?;
    if reader.bytes_read() != header.uncompressed_size {
        return Err(ReadNpzError::ArchiveStructure("uncompressed size does not match local header"));
    }
    let actual = reader.checksum();
    if actual != header.crc32 {
        return Err(ReadNpzError::ChecksumMismatch { name: header.name.clone(), expected: header.crc32, actual });
    }
    Ok(array)
}

/// Loads the array `name` from the archive at `path`.
pub fn load_npz<P: AsRef<Path>>(path: P, name: &str) -> Result<NpyArray, ReadNpzError> {
    let path = path.as_ref();
    log::debug!("loading entry {name:?} from {}", path.display());
    NpzReader::open(path)?.by_name(name)
}

/// Loads every array of the archive at `path`, in physical order.
pub fn load_npz_all<P: AsRef<Path>>(path: P) -> Result<IndexMap<String, NpyArray>, ReadNpzError> {
    let path = path.as_ref();
    log::debug!("loading all entries from {}", path.display());
    NpzReader::open(path)?.read_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, MemoryOrder, TypeCode};
    use std::io::Cursor;

    fn add(archive: &mut Cursor<Vec<u8>>, name: &str, data: &[i32], compression: Compression) {
        let append = !archive.get_ref().is_empty();
        let source = Source::from_slice(data, &[data.len()], MemoryOrder::C).unwrap();
        let entry = Entry::encode(name, source, compression).unwrap();
        write_entry(archive, append, &entry).unwrap();
    }

    #[test]
    fn names_follow_physical_order() {
        let mut archive = Cursor::new(Vec::new());
        add(&mut archive, "b", &[1, 2], Compression::Stored);
        add(&mut archive, "a", &[3], Compression::Stored);
        add(&mut archive, "c.d", &[], Compression::Stored);
        let mut npz = NpzReader::new(archive).unwrap();
        assert_eq!(npz.names().unwrap(), ["b", "a", "c.d"]);
        assert_eq!(npz.by_name("a").unwrap().to_vec::<i32>().unwrap(), [3]);
        assert_eq!(npz.by_name("c.d").unwrap().num_vals(), 0);
        assert!(matches!(npz.by_name("z"), Err(ReadNpzError::EntryNotFound(name)) if name == "z"));
    }

    #[test]
    fn end_record_counts_every_entry() {
        let mut archive = Cursor::new(Vec::new());
        for (i, name) in ["x", "y", "z"].into_iter().enumerate() {
            add(&mut archive, name, &[i as i32], Compression::Stored);
        }
        let end = CentralDirectoryEnd::parse(&mut archive).unwrap();
        assert_eq!(end.entry_count, 3);
        let start = end.central_directory_offset as usize;
        let directory = &archive.get_ref()[start..start + end.central_directory_size as usize];
        assert_eq!(central_directory_names(directory).unwrap(), ["x.npy", "y.npy", "z.npy"]);
    }

    #[test]
    fn duplicate_entry_is_rejected() {
        let mut archive = Cursor::new(Vec::new());
        add(&mut archive, "x", &[1], Compression::Stored);
        let before = archive.get_ref().clone();
        let source = Source::from_slice(&[2i32], &[1], MemoryOrder::C).unwrap();
        let entry = Entry::encode("x", source, Compression::Stored).unwrap();
        let err = write_entry(&mut archive, true, &entry).unwrap_err();
        assert!(matches!(err, WriteNpzError::DuplicateEntry(name) if name == "x"));
        assert_eq!(archive.get_ref(), &before);
    }

    #[test]
    fn corrupted_entry_fails_checksum() {
        let mut archive = Cursor::new(Vec::new());
        add(&mut archive, "x", &[1, 2, 3], Compression::Stored);
        // Last payload byte, right before the central directory
        let end = CentralDirectoryEnd::parse(&mut archive).unwrap();
        archive.get_mut()[end.central_directory_offset as usize - 1] ^= 0xff;
        let err = NpzReader::new(archive).unwrap().by_name("x").unwrap_err();
        assert!(matches!(err, ReadNpzError::ChecksumMismatch { .. }));
    }

    #[cfg(feature = "compressed-npz")]
    #[test]
    fn deflated_entries_are_smaller() {
        let data = vec![7i32; 4096];
        let mut archive = Cursor::new(Vec::new());
        add(&mut archive, "zeros", &data, Compression::Deflated);
        assert!(archive.get_ref().len() < 4096);
        let array = NpzReader::new(archive).unwrap().by_name("zeros").unwrap();
        assert_eq!(array.to_vec::<i32>().unwrap(), data);
    }

    #[test]
    fn huge_declared_shape_is_missing_data() {
        let header = Header::simple(vec![1 << 60], TypeCode::UnsignedInt, 1, MemoryOrder::C);
        let mut npy = header.to_bytes().unwrap();
        npy.extend_from_slice(&[1, 2, 3]);
        let local = LocalFileHeader {
            name: "big.npy".into(),
            compression_method: METHOD_STORED,
            crc32: crc32fast::hash(&npy),
            compressed_size: npy.len() as u64,
            uncompressed_size: npy.len() as u64,
        }
        .to_bytes()
        .unwrap();
        let mut bytes = [&local[..], &npy[..]].concat();
        let directory = central_directory_entry(&local, 0);
        let end = CentralDirectoryEnd {
            entry_count: 1,
            central_directory_size: directory.len() as u32,
            central_directory_offset: bytes.len() as u32,
        };
        bytes.extend_from_slice(&directory);
        bytes.extend_from_slice(&end.to_bytes());

        let err = NpzReader::new(Cursor::new(bytes)).unwrap().by_name("big").unwrap_err();
        assert!(matches!(err, ReadNpzError::Npy(ReadNpyError::MissingData)));
    }

    #[test]
    fn unknown_method_is_reported() {
        let mut archive = Cursor::new(Vec::new());
        add(&mut archive, "x", &[1], Compression::Stored);
        archive.get_mut()[8] = 12;
        let err = NpzReader::new(archive).unwrap().by_name("x").unwrap_err();
        assert!(matches!(err, ReadNpzError::UnsupportedCompression(12)));
    }

    #[test]
    fn names_without_suffix_are_kept() {
        assert_eq!(array_name_from_file_name("arr_0.npy"), "arr_0");
        assert_eq!(array_name_from_file_name("notes.txt"), "notes.txt");
        assert_eq!(file_name_from_array_name("arr_0"), "arr_0.npy");
    }
}
