//! The `.npy` header: a fixed preamble followed by a Python dict literal
//! describing the element layout, memory order and shape of the payload.
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use num_traits::ToPrimitive;
use py_literal::{ParseError as PyValueParseError, Value as PyValue};
use std::{error::Error, fmt, io, str::FromStr};

/// Magic string to indicate npy format.
pub const MAGIC_STRING: &[u8] = b"\x93NUMPY";

/// Byte-order marker written in front of every type descriptor. Payloads are
/// always stored little-endian, independent of the host.
pub const BYTE_ORDER: char = '<';

/// The total header length (including magic string, version number, header
/// length value, array format description, padding, and final newline) must be
/// evenly divisible by this value.
const HEADER_DIVISOR: usize = 16;

/// Magic string, two version bytes and the `u16` header length.
const PREAMBLE_LEN: usize = MAGIC_STRING.len() + 2 + 2;

/// The only supported format version (1.0).
const VERSION: [u8; 2] = [0x01, 0x00];

/// The memory layout of a multi-dimensional payload.
///
/// The order is stored verbatim in the header and never inferred from the
/// shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryOrder {
    /// Row-major, the last index varies fastest.
    #[default]
    C,
    /// Column-major, the first index varies fastest.
    Fortran,
}

impl MemoryOrder {
    /// Returns `true` for [`MemoryOrder::Fortran`].
    pub const fn is_fortran(self) -> bool {
        matches!(self, Self::Fortran)
    }
}

impl FromStr for MemoryOrder {
    type Err = crate::ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "C" | "c" => Ok(Self::C),
            "F" | "f" | "Fortran" => Ok(Self::Fortran),
            _ => Err(crate::ParseOptionError::MemoryOrder(s.to_string())),
        }
    }
}

/// The kind of a field, i.e. the letter of a type descriptor such as `'<u4'`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeCode {
    /// `i`
    SignedInt,
    /// `u`
    UnsignedInt,
    /// `f`
    Float,
    /// `c`
    Complex,
    /// `b`
    Bool,
}

impl TypeCode {
    /// The descriptor letter.
    pub const fn as_char(self) -> char {
        match self {
            Self::SignedInt => 'i',
            Self::UnsignedInt => 'u',
            Self::Float => 'f',
            Self::Complex => 'c',
            Self::Bool => 'b',
        }
    }

    /// Parses a descriptor letter.
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(Self::SignedInt),
            'u' => Some(Self::UnsignedInt),
            'f' => Some(Self::Float),
            'c' => Some(Self::Complex),
            'b' => Some(Self::Bool),
            _ => None,
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One field of an element: a type code, a word size in bytes and, for
/// structured arrays, a label.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    /// Label of the field; `None` for simple arrays.
    pub label: Option<String>,
    /// Kind of the field.
    pub type_code: TypeCode,
    /// Size of the field in bytes.
    pub word_size: usize,
}

impl Field {
    /// An unlabeled field.
    pub fn new(type_code: TypeCode, word_size: usize) -> Self {
        Self { label: None, type_code, word_size }
    }

    /// A labeled field of a structured array.
    pub fn labeled(label: impl Into<String>, type_code: TypeCode, word_size: usize) -> Self {
        Self { label: Some(label.into()), type_code, word_size }
    }

    /// Returns `true` if both fields have the same type code and word size.
    pub fn same_type(&self, other: &Self) -> bool {
        self.type_code == other.type_code && self.word_size == other.word_size
    }
}

/// Formats the type descriptor, e.g. `<u4`.
impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{BYTE_ORDER}{}{}", self.type_code, self.word_size)
    }
}

/// An error parsing the header of a `.npy` file.
#[derive(Debug)]
pub enum ParseHeaderError {
    /// The start of the file does not match the magic string.
    MagicString,
    /// The version number is not 1.0.
    Version {
        /// Major version number.
        major: u8,
        /// Minor version number.
        minor: u8,
    },
    /// The array format string contains non-ASCII characters.
    NonAscii,
    /// The header is missing a newline at the end.
    MissingNewline,
    /// The array format string does not start with `{`.
    MalformedDict,
    /// Error parsing the metadata dictionary.
    DictParse(PyValueParseError),
    /// The metadata is not a dictionary.
    MetaNotDict(PyValue),
    /// An unknown key was found in the metadata dictionary.
    UnknownKey(PyValue),
    /// A required key was missing from the metadata dictionary.
    MissingKey(&'static str),
    /// An illegal value was found for a key in the metadata dictionary.
    IllegalValue {
        /// The key for which the value was illegal.
        key: &'static str,
        /// The illegal value.
        value: PyValue,
    },
    /// A type descriptor declares big-endian data.
    BigEndian,
    /// A type descriptor uses a letter outside of `i`, `u`, `f`, `c`, `b`.
    UnsupportedTypeCode(char),
}

impl Error for ParseHeaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DictParse(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ParseHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MagicString => write!(f, "start does not match magic string"),
            Self::Version { major, minor } => {
                write!(f, "unsupported version number: {major}.{minor}")
            }
            Self::NonAscii => write!(f, "non-ascii in array format string"),
            Self::MissingNewline => write!(f, "newline missing at end of header"),
            Self::MalformedDict => write!(f, "array format string is not a dict"),
            Self::DictParse(err) => write!(f, "error parsing metadata dict: {err}"),
            Self::MetaNotDict(value) => write!(f, "metadata is not a dict: {value}"),
            Self::UnknownKey(key) => write!(f, "unknown key: {key}"),
            Self::MissingKey(key) => write!(f, "missing key: {key}"),
            Self::IllegalValue { key, value } => write!(f, "illegal value for key {key}: {value}"),
            Self::BigEndian => write!(f, "data stored in big-endian format is not supported"),
            Self::UnsupportedTypeCode(c) => write!(f, "unsupported type code: {c:?}"),
        }
    }
}

impl From<PyValueParseError> for ParseHeaderError {
    fn from(err: PyValueParseError) -> Self {
        Self::DictParse(err)
    }
}

/// An error reading a header from a stream.
#[derive(Debug)]
pub enum ReadHeaderError {
    /// The stream failed or ended inside the header.
    Io(io::Error),
    /// The header bytes are malformed.
    Parse(ParseHeaderError),
}

impl Error for ReadHeaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
        }
    }
}

impl fmt::Display for ReadHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Parse(err) => write!(f, "error parsing header: {err}"),
        }
    }
}

impl From<io::Error> for ReadHeaderError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ParseHeaderError> for ReadHeaderError {
    fn from(err: ParseHeaderError) -> Self {
        Self::Parse(err)
    }
}

/// An error describing a header that cannot be written.
#[derive(Debug, PartialEq, Eq)]
pub enum FormatHeaderError {
    /// `HEADER_LEN` exceeds the maximum value of a version 1.0 header.
    HeaderTooLong,
    /// The header has no fields.
    NoFields,
    /// A field has a word size of zero.
    ZeroWordSize,
    /// A label is empty or contains characters other than ASCII letters,
    /// digits and `_`.
    InvalidLabel(String),
    /// A label is used by more than one field.
    DuplicateLabel(String),
    /// Some fields are labeled and some are not, or a multi-field header has
    /// unlabeled fields.
    MixedLabels,
    /// The number of labels differs from the number of record fields.
    LabelCount {
        /// Number of labels given.
        labels: usize,
        /// Number of fields in the record type.
        fields: usize,
    },
    /// The number of elements or bytes overflows `usize`.
    LengthOverflow,
}

impl Error for FormatHeaderError {}

impl fmt::Display for FormatHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HeaderTooLong => write!(f, "the header is too long"),
            Self::NoFields => write!(f, "the header has no fields"),
            Self::ZeroWordSize => write!(f, "a field has a word size of zero"),
            Self::InvalidLabel(label) => write!(f, "invalid field label: {label:?}"),
            Self::DuplicateLabel(label) => write!(f, "duplicate field label: {label:?}"),
            Self::MixedLabels => write!(f, "fields must be either all labeled or a single unlabeled one"),
            Self::LabelCount { labels, fields } => {
                write!(f, "{labels} labels given for a record of {fields} fields")
            }
            Self::LengthOverflow => write!(f, "overflow computing length from shape"),
        }
    }
}

/// An error writing a header to a stream.
#[derive(Debug)]
pub enum WriteHeaderError {
    /// The writer failed.
    Io(io::Error),
    /// The header cannot be encoded.
    Format(FormatHeaderError),
}

impl Error for WriteHeaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Format(err) => Some(err),
        }
    }
}

impl fmt::Display for WriteHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Format(err) => write!(f, "error formatting header: {err}"),
        }
    }
}

impl From<io::Error> for WriteHeaderError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<FormatHeaderError> for WriteHeaderError {
    fn from(err: FormatHeaderError) -> Self {
        Self::Format(err)
    }
}

/// The decoded header dictionary: element fields, memory order and shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Header {
    /// The element layout. A simple array has exactly one unlabeled field.
    pub fields: Vec<Field>,
    /// Memory order of the payload.
    pub memory_order: MemoryOrder,
    /// Shape of the array. An empty shape describes a scalar.
    pub shape: Vec<usize>,
}

/// Formats the dict literal, without padding.
///
/// `{'descr': '<u4', 'fortran_order': False, 'shape': (2, 4, 2), }`
impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("{'descr': ")?;
        match self.fields.as_slice() {
            [field] if field.label.is_none() => write!(f, "'{field}'")?,
            fields => {
                f.write_str("[")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    let label = field.label.as_deref().unwrap_or_default();
                    write!(f, "('{label}', '{field}')")?;
                }
                if fields.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str("]")?;
            }
        }
        let fortran_order = if self.memory_order.is_fortran() { "True" } else { "False" };
        write!(f, ", 'fortran_order': {fortran_order}, 'shape': (")?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        if self.shape.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str("), }")
    }
}

impl Header {
    /// Header of a simple (single unlabeled field) array.
    pub fn simple(
        shape: Vec<usize>,
        type_code: TypeCode,
        word_size: usize,
        memory_order: MemoryOrder,
    ) -> Self {
        Self { fields: vec![Field::new(type_code, word_size)], memory_order, shape }
    }

    /// Header of a structured array.
    ///
    /// Every field must carry a unique label made of ASCII letters, digits
    /// and `_`.
    pub fn structured(
        shape: Vec<usize>,
        fields: Vec<Field>,
        memory_order: MemoryOrder,
    ) -> Result<Self, FormatHeaderError> {
        if fields.iter().any(|field| field.label.is_none()) {
            return Err(FormatHeaderError::MixedLabels);
        }
        let header = Self { fields, memory_order, shape };
        header.validate()?;
        Ok(header)
    }

    /// Returns `true` if the fields are labeled.
    pub fn is_structured(&self) -> bool {
        self.fields.iter().any(|field| field.label.is_some())
    }

    /// Number of elements (records), i.e. the product of the shape. An empty
    /// shape counts as one element.
    pub fn num_vals(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of one element (record) in bytes.
    pub fn record_size(&self) -> usize {
        self.fields.iter().map(|field| field.word_size).sum()
    }

    /// Size of the payload in bytes, or `None` on overflow.
    pub fn num_bytes_checked(&self) -> Option<usize> {
        let num_vals = self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))?;
        let record_size = self
            .fields
            .iter()
            .try_fold(0usize, |acc, field| acc.checked_add(field.word_size))?;
        let len = num_vals.checked_mul(record_size)?;
        (len <= isize::MAX as usize).then_some(len)
    }

    /// Iterator over the field labels (empty for simple arrays).
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|field| field.label.as_deref())
    }

    /// Checks the field invariants and the payload length.
    pub fn validate(&self) -> Result<(), FormatHeaderError> {
        match self.fields.as_slice() {
            [] => return Err(FormatHeaderError::NoFields),
            [field] if field.label.is_none() => {}
            fields => {
                for (i, field) in fields.iter().enumerate() {
                    let label = field.label.as_deref().ok_or(FormatHeaderError::MixedLabels)?;
                    let valid = !label.is_empty()
                        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
                    if !valid {
                        return Err(FormatHeaderError::InvalidLabel(label.to_string()));
                    }
                    if fields[..i].iter().any(|f| f.label.as_deref() == Some(label)) {
                        return Err(FormatHeaderError::DuplicateLabel(label.to_string()));
                    }
                }
            }
        }
        if self.fields.iter().any(|field| field.word_size == 0) {
            return Err(FormatHeaderError::ZeroWordSize);
        }
        self.num_bytes_checked().ok_or(FormatHeaderError::LengthOverflow)?;
        Ok(())
    }

    /// Encodes the header, with the dict padded by spaces and a final newline
    /// so that the total length is a multiple of 16.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatHeaderError> {
        self.to_bytes_with_min_len(0)
    }

    /// Like [`Header::to_bytes`], but pads to at least `min_len` bytes
    /// (rounded up to a multiple of 16).
    pub(crate) fn to_bytes_with_min_len(&self, min_len: usize) -> Result<Vec<u8>, FormatHeaderError> {
        self.validate()?;
        let dict = self.to_string();
        let unpadded_len = PREAMBLE_LEN + dict.len();
        let total_len = (unpadded_len + HEADER_DIVISOR - unpadded_len % HEADER_DIVISOR)
            .max(min_len.next_multiple_of(HEADER_DIVISOR));
        let header_len =
            u16::try_from(total_len - PREAMBLE_LEN).map_err(|_| FormatHeaderError::HeaderTooLong)?;

        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(MAGIC_STRING);
        out.extend_from_slice(&VERSION);
        let mut len_buf = [0; 2];
        LittleEndian::write_u16(&mut len_buf, header_len);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(dict.as_bytes());
        out.resize(total_len - 1, b' ');
        out.push(b'\n');

        debug_assert_eq!(out.len(), total_len);
        debug_assert_eq!(out.len() % HEADER_DIVISOR, 0);
        Ok(out)
    }

    pub(crate) fn write<W: io::Write>(&self, mut writer: W) -> Result<(), WriteHeaderError> {
        writer.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// Reads and decodes a header, leaving `reader` at the start of the
    /// payload.
    pub(crate) fn from_reader<R: io::Read>(reader: R) -> Result<Self, ReadHeaderError> {
        Self::read_with_len(reader).map(|(header, _)| header)
    }

    /// Like [`Header::from_reader`], also returning the encoded length.
    pub(crate) fn read_with_len<R: io::Read>(mut reader: R) -> Result<(Self, usize), ReadHeaderError> {
        // Check for magic string
        {
            let mut buf = [0; MAGIC_STRING.len()];
            reader.read_exact(&mut buf)?;
            if buf != MAGIC_STRING {
                Err(ParseHeaderError::MagicString)?;
            }
        }

        // Get version number
        let mut buf = [0; 2];
        reader.read_exact(&mut buf)?;
        if buf != VERSION {
            let [major, minor] = buf;
            Err(ParseHeaderError::Version { major, minor })?;
        }

        // Parse the dictionary describing the array's format
        let header_len = usize::from(reader.read_u16::<LittleEndian>()?);
        let mut buf = vec![0; header_len];
        reader.read_exact(&mut buf)?;
        let without_newline = match buf.split_last() {
            Some((&b'\n', rest)) => rest,
            Some(_) | None => Err(ParseHeaderError::MissingNewline)?,
        };
        let header_str = std::str::from_utf8(without_newline)
            .ok()
            .filter(|s| s.is_ascii())
            .ok_or(ParseHeaderError::NonAscii)?;
        Ok((header_str.parse()?, PREAMBLE_LEN + header_len))
    }

    fn from_py_value(value: PyValue) -> Result<Self, ParseHeaderError> {
        let PyValue::Dict(dict) = value else {
            return Err(ParseHeaderError::MetaNotDict(value));
        };
        let mut fields = None;
        let mut memory_order = None;
        let mut shape = None;
        for (key, value) in dict {
            match &key {
                PyValue::String(k) if k == "descr" => {
                    fields = Some(parse_descr(value)?);
                }
                PyValue::String(k) if k == "fortran_order" => {
                    if let PyValue::Boolean(b) = value {
                        memory_order = Some(if b { MemoryOrder::Fortran } else { MemoryOrder::C });
                    } else {
                        return Err(ParseHeaderError::IllegalValue { key: "fortran_order", value });
                    }
                }
                PyValue::String(k) if k == "shape" => {
                    fn parse_shape(value: &PyValue) -> Option<Vec<usize>> {
                        value
                            .as_tuple()?
                            .iter()
                            .map(|elem| elem.as_integer()?.to_usize())
                            .collect()
                    }
                    if let Some(s) = parse_shape(&value) {
                        shape = Some(s);
                    } else {
                        return Err(ParseHeaderError::IllegalValue { key: "shape", value });
                    }
                }
                _ => return Err(ParseHeaderError::UnknownKey(key)),
            }
        }
        let fields = fields.ok_or(ParseHeaderError::MissingKey("descr"))?;
        let memory_order = memory_order.ok_or(ParseHeaderError::MissingKey("fortran_order"))?;
        let shape = shape.ok_or(ParseHeaderError::MissingKey("shape"))?;
        Ok(Self { fields, memory_order, shape })
    }
}

/// Parses the dict literal (without the preamble and final newline).
impl FromStr for Header {
    type Err = ParseHeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.trim_start().starts_with('{') {
            return Err(ParseHeaderError::MalformedDict);
        }
        Self::from_py_value(s.parse()?)
    }
}

enum DescrError {
    BigEndian,
    TypeCode(char),
    Malformed,
}

/// Parses a single type descriptor such as `<u4` or `|b1`.
fn parse_type_str(s: &str) -> Result<(TypeCode, usize), DescrError> {
    let mut chars = s.chars();
    match chars.next() {
        Some('<' | '|') => {}
        Some('>') => return Err(DescrError::BigEndian),
        _ => return Err(DescrError::Malformed),
    }
    let type_code = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => TypeCode::from_char(c).ok_or(DescrError::TypeCode(c))?,
        _ => return Err(DescrError::Malformed),
    };
    let digits = chars.as_str();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DescrError::Malformed);
    }
    let word_size = digits.parse().map_err(|_| DescrError::Malformed)?;
    Ok((type_code, word_size))
}

fn parse_descr(value: PyValue) -> Result<Vec<Field>, ParseHeaderError> {
    fn field(label: Option<&str>, ty: &str) -> Result<Field, DescrError> {
        let (type_code, word_size) = parse_type_str(ty)?;
        Ok(Field { label: label.map(str::to_string), type_code, word_size })
    }

    let parsed = match &value {
        PyValue::String(ty) => field(None, ty).map(|field| vec![field]),
        PyValue::List(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                PyValue::Tuple(pair) => match pair.as_slice() {
                    [PyValue::String(label), PyValue::String(ty)] => field(Some(label), ty),
                    _ => Err(DescrError::Malformed),
                },
                _ => Err(DescrError::Malformed),
            })
            .collect(),
        _ => Err(DescrError::Malformed),
    };
    let fields = match parsed {
        Ok(fields) => fields,
        Err(DescrError::BigEndian) => return Err(ParseHeaderError::BigEndian),
        Err(DescrError::TypeCode(c)) => return Err(ParseHeaderError::UnsupportedTypeCode(c)),
        Err(DescrError::Malformed) => {
            return Err(ParseHeaderError::IllegalValue { key: "descr", value })
        }
    };
    // Labels must be unique and word sizes positive
    let probe = Header { fields, memory_order: MemoryOrder::C, shape: Vec::new() };
    match probe.validate() {
        Ok(()) => Ok(probe.fields),
        Err(_) => Err(ParseHeaderError::IllegalValue { key: "descr", value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<Header, ReadHeaderError> {
        Header::from_reader(bytes)
    }

    fn encode_dict(dict: &str) -> Vec<u8> {
        let mut out = MAGIC_STRING.to_vec();
        out.extend_from_slice(&VERSION);
        out.extend_from_slice(&(dict.len() as u16 + 1).to_le_bytes());
        out.extend_from_slice(dict.as_bytes());
        out.push(b'\n');
        out
    }

    #[test]
    fn simple_header_text() {
        let header = Header::simple(vec![2, 4, 2], TypeCode::UnsignedInt, 4, MemoryOrder::C);
        assert_eq!(
            header.to_string(),
            "{'descr': '<u4', 'fortran_order': False, 'shape': (2, 4, 2), }"
        );
        let header = Header::simple(vec![7], TypeCode::Float, 8, MemoryOrder::Fortran);
        assert_eq!(
            header.to_string(),
            "{'descr': '<f8', 'fortran_order': True, 'shape': (7,), }"
        );
        let header = Header::simple(vec![], TypeCode::Bool, 1, MemoryOrder::C);
        assert_eq!(
            header.to_string(),
            "{'descr': '<b1', 'fortran_order': False, 'shape': (), }"
        );
    }

    #[test]
    fn structured_header_text() {
        let header = Header::structured(
            vec![3],
            vec![
                Field::labeled("a", TypeCode::SignedInt, 4),
                Field::labeled("b", TypeCode::SignedInt, 1),
                Field::labeled("c", TypeCode::SignedInt, 2),
            ],
            MemoryOrder::C,
        )
        .unwrap();
        assert_eq!(
            header.to_string(),
            "{'descr': [('a', '<i4'), ('b', '<i1'), ('c', '<i2')], 'fortran_order': False, 'shape': (3,), }"
        );
        let header = Header::structured(
            vec![1, 2],
            vec![Field::labeled("x", TypeCode::Float, 4)],
            MemoryOrder::C,
        )
        .unwrap();
        assert_eq!(
            header.to_string(),
            "{'descr': [('x', '<f4'),], 'fortran_order': False, 'shape': (1, 2), }"
        );
    }

    #[test]
    fn padding_is_multiple_of_16_with_newline() {
        for rank in 0..6 {
            for dim in [0, 1, 9, 10, 999] {
                let header = Header::simple(vec![dim; rank], TypeCode::SignedInt, 8, MemoryOrder::C);
                let bytes = header.to_bytes().unwrap();
                assert_eq!(bytes.len() % 16, 0);
                assert_eq!(bytes.last(), Some(&b'\n'));
                let (decoded, len) = Header::read_with_len(&bytes[..]).unwrap();
                assert_eq!(len, bytes.len());
                assert_eq!(decoded, header);
            }
        }
    }

    #[test]
    fn padding_always_adds_at_least_one_byte() {
        // A dict that is already aligned still gets a full block of padding
        let header = Header::simple(vec![123456, 1234567], TypeCode::SignedInt, 8, MemoryOrder::C);
        let dict = header.to_string();
        assert_eq!(10 + dict.len(), 80);
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[80..95], &[b' '; 15]);
        assert_eq!(bytes[95], b'\n');
    }

    #[test]
    fn min_len_pads_further() {
        let header = Header::simple(vec![3], TypeCode::UnsignedInt, 1, MemoryOrder::C);
        let short = header.to_bytes().unwrap();
        let long = header.to_bytes_with_min_len(short.len() + 32).unwrap();
        assert_eq!(long.len(), short.len() + 32);
        assert_eq!(decode(&long).unwrap(), header);
    }

    #[test]
    fn decode_structured() {
        let bytes = encode_dict(
            "{'descr': [('a', '<i4'), ('b', '|i1'), ('c', '<i2')], 'fortran_order': True, 'shape': (5,), }",
        );
        let header = decode(&bytes).unwrap();
        assert_eq!(header.memory_order, MemoryOrder::Fortran);
        assert_eq!(header.shape, [5]);
        assert_eq!(header.labels().collect::<Vec<_>>(), ["a", "b", "c"]);
        assert_eq!(header.record_size(), 7);
    }

    #[test]
    fn decode_numpy_style_header() {
        let bytes = encode_dict("{'descr': '<f8', 'fortran_order': False, 'shape': (3, 4), }          ");
        let header = decode(&bytes).unwrap();
        assert_eq!(header, Header::simple(vec![3, 4], TypeCode::Float, 8, MemoryOrder::C));
    }

    #[test]
    fn decode_rejects_missing_fortran_order() {
        let bytes = encode_dict("{'descr': '<f8', 'shape': (3,), }");
        assert!(matches!(
            decode(&bytes),
            Err(ReadHeaderError::Parse(ParseHeaderError::MissingKey("fortran_order")))
        ));
    }

    #[test]
    fn decode_rejects_missing_shape_and_descr() {
        let bytes = encode_dict("{'descr': '<f8', 'fortran_order': False, }");
        assert!(matches!(
            decode(&bytes),
            Err(ReadHeaderError::Parse(ParseHeaderError::MissingKey("shape")))
        ));
        let bytes = encode_dict("{'fortran_order': False, 'shape': (), }");
        assert!(matches!(
            decode(&bytes),
            Err(ReadHeaderError::Parse(ParseHeaderError::MissingKey("descr")))
        ));
        let bytes = encode_dict("{'descr': 'f8', 'fortran_order': False, 'shape': (), }");
        assert!(matches!(
            decode(&bytes),
            Err(ReadHeaderError::Parse(ParseHeaderError::IllegalValue { key: "descr", .. }))
        ));
    }

    #[test]
    fn decode_rejects_big_endian() {
        let bytes = encode_dict("{'descr': '>i4', 'fortran_order': False, 'shape': (3,), }");
        assert!(matches!(decode(&bytes), Err(ReadHeaderError::Parse(ParseHeaderError::BigEndian))));
        let bytes = encode_dict(
            "{'descr': [('a', '<i4'), ('b', '>f8')], 'fortran_order': False, 'shape': (3,), }",
        );
        assert!(matches!(decode(&bytes), Err(ReadHeaderError::Parse(ParseHeaderError::BigEndian))));
    }

    #[test]
    fn decode_rejects_bad_preamble() {
        let mut bytes = Header::simple(vec![1], TypeCode::Float, 4, MemoryOrder::C)
            .to_bytes()
            .unwrap();
        bytes[6] = 2;
        assert!(matches!(
            decode(&bytes),
            Err(ReadHeaderError::Parse(ParseHeaderError::Version { major: 2, minor: 0 }))
        ));
        bytes[0] = b'x';
        assert!(matches!(decode(&bytes), Err(ReadHeaderError::Parse(ParseHeaderError::MagicString))));
    }

    #[test]
    fn decode_rejects_missing_newline_and_non_dict() {
        let mut bytes = encode_dict("{'descr': '<f8', 'fortran_order': False, 'shape': (3,), }");
        *bytes.last_mut().unwrap() = b' ';
        assert!(matches!(
            decode(&bytes),
            Err(ReadHeaderError::Parse(ParseHeaderError::MissingNewline))
        ));
        let bytes = encode_dict("  ['descr', '<f8']");
        assert!(matches!(decode(&bytes), Err(ReadHeaderError::Parse(ParseHeaderError::MalformedDict))));
    }

    #[test]
    fn structured_rejects_bad_labels() {
        let fields = |a: &str, b: &str| {
            vec![Field::labeled(a, TypeCode::Float, 4), Field::labeled(b, TypeCode::Float, 4)]
        };
        assert_eq!(
            Header::structured(vec![1], fields("x", "x"), MemoryOrder::C),
            Err(FormatHeaderError::DuplicateLabel("x".to_string()))
        );
        assert_eq!(
            Header::structured(vec![1], fields("x", "it's"), MemoryOrder::C),
            Err(FormatHeaderError::InvalidLabel("it's".to_string()))
        );
        assert_eq!(
            Header::structured(vec![1], vec![Field::new(TypeCode::Float, 4)], MemoryOrder::C),
            Err(FormatHeaderError::MixedLabels)
        );
    }
}
