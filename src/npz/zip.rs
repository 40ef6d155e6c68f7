//! The subset of the ZIP format used by `.npz` archives: local file headers,
//! central directory entries and the end of central directory record of a
//! single-disk archive without comments.
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{self, Read, Seek, SeekFrom};
use thiserror::Error;

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const CENTRAL_DIRECTORY_HEADER_SIGNATURE: u32 = 0x02014b50;
const CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06054b50;

/// Fixed part of a local file header.
pub const LOCAL_HEADER_LEN: usize = 30;
/// Fixed part of a central directory entry.
const CENTRAL_HEADER_LEN: usize = 46;
/// End of central directory record without comment.
pub const CENTRAL_DIRECTORY_END_LEN: usize = 22;

/// "Version needed to extract" and "version made by": 2.0, MS-DOS.
const VERSION: u16 = 20;
const FLAG_ENCRYPTED: u16 = 1 << 0;
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const ZIP64_EXTRA_ID: u16 = 0x0001;
const ZIP64_SENTINEL: u32 = u32::MAX;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected ZIP structure: {0}")]
    Structure(&'static str),
}

/// A local file header. Sizes are widened to 64 bits so that headers written
/// with ZIP64 extra fields can be read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub name: String,
    pub compression_method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl LocalFileHeader {
    /// Encodes the header, followed by the name. Modification time and date
    /// are zero and there is no extra field.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ZipError> {
        let name_len =
            u16::try_from(self.name.len()).map_err(|_| ZipError::Structure("entry name too long"))?;
        let size = |size: u64| {
            u32::try_from(size)
                .ok()
                .filter(|&size| size != ZIP64_SENTINEL)
                .ok_or(ZipError::Structure("entry too large without ZIP64"))
        };
        let compressed_size = size(self.compressed_size)?;
        let uncompressed_size = size(self.uncompressed_size)?;

        let mut out = Vec::with_capacity(LOCAL_HEADER_LEN + self.name.len());
        out.write_u32::<LittleEndian>(LOCAL_FILE_HEADER_SIGNATURE)?;
        out.write_u16::<LittleEndian>(VERSION)?;
        out.write_u16::<LittleEndian>(0)?; // flags
        out.write_u16::<LittleEndian>(self.compression_method)?;
        out.write_u16::<LittleEndian>(0)?; // time
        out.write_u16::<LittleEndian>(0)?; // date
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(compressed_size)?;
        out.write_u32::<LittleEndian>(uncompressed_size)?;
        out.write_u16::<LittleEndian>(name_len)?;
        out.write_u16::<LittleEndian>(0)?; // extra field length
        out.extend_from_slice(self.name.as_bytes());
        Ok(out)
    }

    /// Parses the header at the current position, leaving `reader` at the
    /// start of the entry data.
    ///
    /// Returns `None` if the next record is not a local file header, which
    /// marks the end of the entries.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Option<Self>, ZipError> {
        let mut signature = [0; 4];
        reader.read_exact(&mut signature)?;
        // Only a `PK` record ends the entries; anything else is corruption.
        if &signature[..2] != b"PK" {
            return Err(ZipError::Structure("invalid record signature"));
        }
        if LittleEndian::read_u32(&signature) != LOCAL_FILE_HEADER_SIGNATURE {
            return Ok(None);
        }
        let _version_needed = reader.read_u16::<LittleEndian>()?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let compression_method = reader.read_u16::<LittleEndian>()?;
        let _time = reader.read_u16::<LittleEndian>()?;
        let _date = reader.read_u16::<LittleEndian>()?;
        let crc32 = reader.read_u32::<LittleEndian>()?;
        let compressed_size = reader.read_u32::<LittleEndian>()?;
        let uncompressed_size = reader.read_u32::<LittleEndian>()?;
        let name_len = usize::from(reader.read_u16::<LittleEndian>()?);
        let extra_len = usize::from(reader.read_u16::<LittleEndian>()?);
        if flags & FLAG_ENCRYPTED != 0 {
            return Err(ZipError::Structure("encrypted entry"));
        }
        if flags & FLAG_DATA_DESCRIPTOR != 0 {
            return Err(ZipError::Structure("sizes stored in a data descriptor"));
        }

        let mut name = vec![0; name_len];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name).map_err(|_| ZipError::Structure("entry name is not UTF-8"))?;
        let mut extra = vec![0; extra_len];
        reader.read_exact(&mut extra)?;

        let mut header = Self {
            name,
            compression_method,
            crc32,
            compressed_size: compressed_size.into(),
            uncompressed_size: uncompressed_size.into(),
        };
        if compressed_size == ZIP64_SENTINEL || uncompressed_size == ZIP64_SENTINEL {
            header.read_zip64_sizes(&extra, uncompressed_size == ZIP64_SENTINEL, compressed_size == ZIP64_SENTINEL)?;
        }
        log::trace!(
            "local header {:?}: method {}, {} -> {} bytes",
            header.name,
            header.compression_method,
            header.uncompressed_size,
            header.compressed_size
        );
        Ok(Some(header))
    }

    /// Replaces the sizes marked by the ZIP64 sentinel with the values of the
    /// ZIP64 extra field.
    fn read_zip64_sizes(&mut self, mut extra: &[u8], uncompressed: bool, compressed: bool) -> Result<(), ZipError> {
        const MISSING: ZipError = ZipError::Structure("missing ZIP64 extra field");
        while extra.len() >= 4 {
            let id = extra.read_u16::<LittleEndian>()?;
            let len = usize::from(extra.read_u16::<LittleEndian>()?);
            if len > extra.len() {
                break;
            }
            let (mut data, rest) = extra.split_at(len);
            extra = rest;
            if id != ZIP64_EXTRA_ID {
                continue;
            }
            if uncompressed {
                self.uncompressed_size = data.read_u64::<LittleEndian>().map_err(|_| MISSING)?;
            }
            if compressed {
                self.compressed_size = data.read_u64::<LittleEndian>().map_err(|_| MISSING)?;
            }
            return Ok(());
        }
        Err(MISSING)
    }
}

/// Builds the central directory entry of the local header `local` (as
/// returned by [`LocalFileHeader::to_bytes`]) written at `offset`.
pub fn central_directory_entry(local: &[u8], offset: u32) -> Vec<u8> {
    let name = &local[LOCAL_HEADER_LEN..];
    let mut out = Vec::with_capacity(CENTRAL_HEADER_LEN + name.len());
    let mut fixed = [0; CENTRAL_HEADER_LEN];
    LittleEndian::write_u32(&mut fixed[0..4], CENTRAL_DIRECTORY_HEADER_SIGNATURE);
    LittleEndian::write_u16(&mut fixed[4..6], VERSION);
    // Version needed through extra field length
    fixed[6..32].copy_from_slice(&local[4..LOCAL_HEADER_LEN]);
    // Comment length, disk number, internal and external attributes are zero
    LittleEndian::write_u32(&mut fixed[42..46], offset);
    out.extend_from_slice(&fixed);
    out.extend_from_slice(name);
    out
}

/// Names of the entries of an encoded central directory, in order.
pub fn central_directory_names(mut directory: &[u8]) -> Result<Vec<String>, ZipError> {
    const TRUNCATED: ZipError = ZipError::Structure("truncated central directory");
    let mut names = Vec::new();
    while !directory.is_empty() {
        if directory.len() < CENTRAL_HEADER_LEN {
            return Err(TRUNCATED);
        }
        if LittleEndian::read_u32(directory) != CENTRAL_DIRECTORY_HEADER_SIGNATURE {
            return Err(ZipError::Structure("invalid central directory signature"));
        }
        let name_len = usize::from(LittleEndian::read_u16(&directory[28..30]));
        let extra_len = usize::from(LittleEndian::read_u16(&directory[30..32]));
        let comment_len = usize::from(LittleEndian::read_u16(&directory[32..34]));
        let len = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
        let name = directory
            .get(CENTRAL_HEADER_LEN..CENTRAL_HEADER_LEN + name_len)
            .filter(|_| directory.len() >= len)
            .ok_or(TRUNCATED)?;
        let name = std::str::from_utf8(name).map_err(|_| ZipError::Structure("entry name is not UTF-8"))?;
        names.push(name.to_string());
        directory = &directory[len..];
    }
    Ok(names)
}

/// The end of central directory record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CentralDirectoryEnd {
    pub entry_count: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
}

impl CentralDirectoryEnd {
    pub fn to_bytes(&self) -> [u8; CENTRAL_DIRECTORY_END_LEN] {
        let mut out = [0; CENTRAL_DIRECTORY_END_LEN];
        LittleEndian::write_u32(&mut out[0..4], CENTRAL_DIRECTORY_END_SIGNATURE);
        // Disk numbers are zero
        LittleEndian::write_u16(&mut out[8..10], self.entry_count);
        LittleEndian::write_u16(&mut out[10..12], self.entry_count);
        LittleEndian::write_u32(&mut out[12..16], self.central_directory_size);
        LittleEndian::write_u32(&mut out[16..20], self.central_directory_offset);
        // Comment length is zero
        out
    }

    /// Reads the record from the last 22 bytes of `reader`.
    ///
    /// Multi-disk archives and archive comments are rejected.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self, ZipError> {
        let len = reader.seek(SeekFrom::End(0))?;
        if len < CENTRAL_DIRECTORY_END_LEN as u64 {
            return Err(ZipError::Structure("archive is too short"));
        }
        reader.seek(SeekFrom::Start(len - CENTRAL_DIRECTORY_END_LEN as u64))?;
        let mut buf = [0; CENTRAL_DIRECTORY_END_LEN];
        reader.read_exact(&mut buf)?;
        if LittleEndian::read_u32(&buf[0..4]) != CENTRAL_DIRECTORY_END_SIGNATURE {
            return Err(ZipError::Structure("end of central directory not found"));
        }
        let disk_number = LittleEndian::read_u16(&buf[4..6]);
        let disk_with_central_directory = LittleEndian::read_u16(&buf[6..8]);
        let entries_on_this_disk = LittleEndian::read_u16(&buf[8..10]);
        let entry_count = LittleEndian::read_u16(&buf[10..12]);
        let comment_len = LittleEndian::read_u16(&buf[20..22]);
        if disk_number != 0 || disk_with_central_directory != 0 || entries_on_this_disk != entry_count {
            return Err(ZipError::Structure("multi-disk archive"));
        }
        if comment_len != 0 {
            return Err(ZipError::Structure("archive comment"));
        }
        let end = Self {
            entry_count,
            central_directory_size: LittleEndian::read_u32(&buf[12..16]),
            central_directory_offset: LittleEndian::read_u32(&buf[16..20]),
        };
        let directory_end = u64::from(end.central_directory_offset) + u64::from(end.central_directory_size);
        if directory_end != len - CENTRAL_DIRECTORY_END_LEN as u64 {
            return Err(ZipError::Structure("central directory does not end at its end record"));
        }
        Ok(end)
    }
}

/// Reader that computes the CRC32 and length of everything read through it.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    len: u64,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, hasher: Hasher::new(), len: 0 }
    }

    /// Checksum of the bytes read so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.len
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        self.len += count as u64;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn local() -> LocalFileHeader {
        LocalFileHeader {
            name: "arr_0.npy".to_string(),
            compression_method: METHOD_DEFLATED,
            crc32: 0xdead_beef,
            compressed_size: 100,
            uncompressed_size: 160,
        }
    }

    #[test]
    fn local_header_layout() {
        let bytes = local().to_bytes().unwrap();
        assert_eq!(bytes.len(), LOCAL_HEADER_LEN + 9);
        assert_eq!(&bytes[..4], b"PK\x03\x04");
        assert_eq!(&bytes[4..6], &[20, 0]);
        assert_eq!(&bytes[8..10], &[8, 0]);
        assert_eq!(&bytes[14..18], &0xdead_beefu32.to_le_bytes());
        assert_eq!(&bytes[18..22], &100u32.to_le_bytes());
        assert_eq!(&bytes[22..26], &160u32.to_le_bytes());
        assert_eq!(&bytes[26..30], &[9, 0, 0, 0]);
        assert_eq!(&bytes[30..], b"arr_0.npy");
        let parsed = LocalFileHeader::parse(&mut &bytes[..]).unwrap();
        assert_eq!(parsed, Some(local()));
    }

    #[test]
    fn parse_stops_at_other_records() {
        let end = CentralDirectoryEnd { entry_count: 0, central_directory_size: 0, central_directory_offset: 0 };
        let bytes = end.to_bytes();
        assert_eq!(LocalFileHeader::parse(&mut &bytes[..]).unwrap(), None);
        assert!(matches!(
            LocalFileHeader::parse(&mut &b"\x93NUMPY"[..]),
            Err(ZipError::Structure(_))
        ));
    }

    #[test]
    fn parse_rejects_data_descriptor() {
        let mut bytes = local().to_bytes().unwrap();
        bytes[6] = 0x08;
        assert!(matches!(LocalFileHeader::parse(&mut &bytes[..]), Err(ZipError::Structure(_))));
    }

    #[test]
    fn parse_reads_zip64_sizes() {
        let mut bytes = local().to_bytes().unwrap();
        bytes[18..26].copy_from_slice(&[0xff; 8]);
        bytes[28..30].copy_from_slice(&20u16.to_le_bytes());
        bytes.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(&160u64.to_le_bytes());
        bytes.extend_from_slice(&100u64.to_le_bytes());
        let mut reader = &bytes[..];
        assert_eq!(LocalFileHeader::parse(&mut reader).unwrap(), Some(local()));
        assert!(reader.is_empty());
    }

    #[test]
    fn central_entry_mirrors_local_header() {
        let local = local().to_bytes().unwrap();
        let entry = central_directory_entry(&local, 1234);
        assert_eq!(entry.len(), CENTRAL_HEADER_LEN + 9);
        assert_eq!(&entry[..4], b"PK\x01\x02");
        assert_eq!(&entry[4..6], &[20, 0]);
        assert_eq!(&entry[6..32], &local[4..30]);
        assert_eq!(&entry[32..42], &[0; 10]);
        assert_eq!(&entry[42..46], &1234u32.to_le_bytes());
        let mut directory = entry.clone();
        directory.extend_from_slice(&entry);
        assert_eq!(central_directory_names(&directory).unwrap(), ["arr_0.npy", "arr_0.npy"]);
        assert!(central_directory_names(&entry[..50]).is_err());
    }

    #[test]
    fn end_record_round_trip_and_validation() {
        let end = CentralDirectoryEnd { entry_count: 3, central_directory_size: 10, central_directory_offset: 5 };
        let mut archive = vec![0; 15];
        archive.extend_from_slice(&end.to_bytes());
        assert_eq!(CentralDirectoryEnd::parse(&mut Cursor::new(&archive)).unwrap(), end);

        let mut commented = archive.clone();
        commented[15 + 20] = 1;
        assert!(matches!(
            CentralDirectoryEnd::parse(&mut Cursor::new(&commented)),
            Err(ZipError::Structure("archive comment"))
        ));
        let mut multi_disk = archive.clone();
        multi_disk[15 + 4] = 1;
        assert!(matches!(
            CentralDirectoryEnd::parse(&mut Cursor::new(&multi_disk)),
            Err(ZipError::Structure("multi-disk archive"))
        ));
        assert!(CentralDirectoryEnd::parse(&mut Cursor::new(&archive[1..])).is_err());
        assert!(CentralDirectoryEnd::parse(&mut Cursor::new(&archive[..10])).is_err());
    }

    #[test]
    fn crc_reader_matches_one_shot_hash() {
        let data = b"hello npz";
        let mut reader = Crc32Reader::new(&data[..]);
        io::copy(&mut reader, &mut io::sink()).unwrap();
        assert_eq!(reader.checksum(), crc32fast::hash(data));
        assert_eq!(reader.bytes_read(), 9);
    }
}
