//! Versioned scenario-state persistence.
//!
//! Two byte-exact formats share one record model: a human-readable
//! whitespace-separated text form (magic `TxtSerializer`) and a
//! gzip-compressed binary form (magic `BinSerializer`) with compact integer
//! type IDs. Every primitive record carries its type tag and field name;
//! vectors record their length before their elements; composite objects are
//! introduced by a `<type> <name> <version>` header. Loading an object whose
//! stored version exceeds the reader's known version fails: there is no
//! forward compatibility.

use super::error::{Error, ErrorKind, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic type written at the head of a text state file.
pub const TXT_MAGIC: &str = "TxtSerializer";
/// Magic type written at the head of a binary state file.
pub const BIN_MAGIC: &str = "BinSerializer";

/// Selects one of the two on-disk formats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateFormat {
    /// Whitespace-separated text records.
    Text,
    /// Gzip-compressed binary records.
    Binary,
}

// compact type IDs used by the binary format; vectors set the high bit
const BOOL_ID: u8 = 0;
const INT_ID: u8 = 1;
const UINT_ID: u8 = 2;
const LLONG_ID: u8 = 3;
const DOUBLE_ID: u8 = 5;
const STRING_ID: u8 = 6;
const VEC_FLAG: u8 = 0x80;

fn type_tag(id: u8) -> &'static str {
    match id {
        BOOL_ID => "bool",
        INT_ID => "int",
        UINT_ID => "uint",
        LLONG_ID => "llong",
        DOUBLE_ID => "double",
        STRING_ID => "string",
        _ => "unknown",
    }
}

fn ser_err(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::SerializationError, message)
}

fn de_err(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::DeserializationError, message)
}

enum Sink {
    Text(Box<dyn Write>),
    Binary(GzEncoder<Box<dyn Write>>),
}

/// Record writer over an arbitrary byte sink.
pub struct Serializer {
    sink: Sink,
}

/// Objects that can write themselves as one named, versioned record group.
pub trait CasaSerializable {
    /// Stable type string used for deserialization dispatch.
    fn type_name(&self) -> &'static str;
    /// Current serialization version of this object type.
    fn version(&self) -> u32;
    /// Writes all fields of the object.
    fn save(&self, ser: &mut Serializer) -> Result<()>;
}

impl Serializer {
    /// Creates a serializer over `writer` and emits the format magic header.
    pub fn new(writer: Box<dyn Write>, format: StateFormat, version: u32) -> Result<Self> {
        let mut result = match format {
            StateFormat::Text => Self {
                sink: Sink::Text(writer),
            },
            StateFormat::Binary => Self {
                sink: Sink::Binary(GzEncoder::new(writer, Compression::default())),
            },
        };
        let magic = match format {
            StateFormat::Text => TXT_MAGIC,
            StateFormat::Binary => BIN_MAGIC,
        };
        result.begin_object(magic, "Serializer", version)?;
        Ok(result)
    }

    /// Creates a serializer writing to a freshly created file.
    pub fn to_file(path: &Path, format: StateFormat, version: u32) -> Result<Self> {
        let file = File::create(path).map_err(|err| {
            ser_err(format!("can not open '{}' for writing: {err}", path.display()))
        })?;
        Self::new(Box::new(BufWriter::new(file)), format, version)
    }

    /// Flushes and, for the binary format, finishes the gzip stream.
    pub fn finish(self) -> Result<()> {
        match self.sink {
            Sink::Text(mut w) => w.flush().map_err(Into::into),
            Sink::Binary(w) => {
                let mut inner = w.finish().map_err(|err| ser_err(err.to_string()))?;
                inner.flush().map_err(Into::into)
            }
        }
    }

    const fn is_binary(&self) -> bool {
        matches!(self.sink, Sink::Binary(_))
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.sink {
            Sink::Text(w) => w.write_all(bytes)?,
            Sink::Binary(w) => w.write_all(bytes)?,
        }
        Ok(())
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        self.write_raw(text.as_bytes())
    }

    fn write_bin_str(&mut self, val: &str) -> Result<()> {
        let bytes = val.as_bytes();
        let len = u16::try_from(bytes.len())
            .map_err(|_| ser_err(format!("string of {} bytes is too long", bytes.len())))?;
        self.write_raw(&len.to_le_bytes())?;
        self.write_raw(bytes)
    }

    /// Writes an object header `<type> <name> <version>`.
    pub fn begin_object(&mut self, type_name: &str, name: &str, version: u32) -> Result<()> {
        if self.is_binary() {
            self.write_bin_str(type_name)?;
            self.write_bin_str(name)?;
            self.write_raw(&version.to_le_bytes())
        } else {
            self.write_text(&format!("{type_name} {name} {version}\n"))
        }
    }

    /// Writes an object as its header followed by its fields.
    pub fn save_object(&mut self, obj: &dyn CasaSerializable, name: &str) -> Result<()> {
        self.begin_object(obj.type_name(), name, obj.version())?;
        obj.save(self)
    }

    fn save_scalar(&mut self, id: u8, name: &str, text: &str, bin: &[u8]) -> Result<()> {
        if self.is_binary() {
            self.write_raw(&[id])?;
            self.write_bin_str(name)?;
            self.write_raw(bin)
        } else {
            self.write_text(&format!("{} {name} {text}\n", type_tag(id)))
        }
    }

    /// Writes a boolean field.
    pub fn save_bool(&mut self, val: bool, name: &str) -> Result<()> {
        self.save_scalar(
            BOOL_ID,
            name,
            if val { "true" } else { "false" },
            &[u8::from(val)],
        )
    }

    /// Writes a signed integer field.
    pub fn save_int(&mut self, val: i32, name: &str) -> Result<()> {
        self.save_scalar(INT_ID, name, &val.to_string(), &val.to_le_bytes())
    }

    /// Writes an unsigned integer field.
    pub fn save_uint(&mut self, val: u32, name: &str) -> Result<()> {
        self.save_scalar(UINT_ID, name, &val.to_string(), &val.to_le_bytes())
    }

    /// Writes a 64-bit unsigned field (sizes, counters).
    pub fn save_ullong(&mut self, val: u64, name: &str) -> Result<()> {
        self.save_scalar(LLONG_ID, name, &val.to_string(), &val.to_le_bytes())
    }

    /// Writes a floating-point field with round-trip precision.
    pub fn save_double(&mut self, val: f64, name: &str) -> Result<()> {
        self.save_scalar(DOUBLE_ID, name, &format!("{val:.17e}"), &val.to_le_bytes())
    }

    /// Writes a string field; the text form quotes it.
    pub fn save_string(&mut self, val: &str, name: &str) -> Result<()> {
        if self.is_binary() {
            self.write_raw(&[STRING_ID])?;
            self.write_bin_str(name)?;
            self.write_bin_str(val)
        } else {
            self.write_text(&format!("string {name} \"{val}\"\n"))
        }
    }

    fn begin_vector(&mut self, id: u8, name: &str, len: usize) -> Result<()> {
        if self.is_binary() {
            self.write_raw(&[id | VEC_FLAG])?;
            self.write_bin_str(name)?;
            self.write_raw(&(len as u64).to_le_bytes())
        } else {
            self.write_text(&format!("vector[{}] {name} {len}", type_tag(id)))
        }
    }

    /// Writes a vector of doubles as length then elements.
    pub fn save_double_vec(&mut self, vals: &[f64], name: &str) -> Result<()> {
        self.begin_vector(DOUBLE_ID, name, vals.len())?;
        if self.is_binary() {
            for val in vals {
                self.write_raw(&val.to_le_bytes())?;
            }
            Ok(())
        } else {
            for val in vals {
                self.write_text(&format!(" {val:.17e}"))?;
            }
            self.write_text("\n")
        }
    }

    /// Writes a vector of 64-bit unsigned values.
    pub fn save_ullong_vec(&mut self, vals: &[u64], name: &str) -> Result<()> {
        self.begin_vector(LLONG_ID, name, vals.len())?;
        if self.is_binary() {
            for val in vals {
                self.write_raw(&val.to_le_bytes())?;
            }
            Ok(())
        } else {
            for val in vals {
                self.write_text(&format!(" {val}"))?;
            }
            self.write_text("\n")
        }
    }

    /// Writes a vector of strings.
    pub fn save_string_vec(&mut self, vals: &[String], name: &str) -> Result<()> {
        self.begin_vector(STRING_ID, name, vals.len())?;
        if self.is_binary() {
            for val in vals {
                self.write_bin_str(val)?;
            }
            Ok(())
        } else {
            for val in vals {
                self.write_text(&format!(" \"{val}\""))?;
            }
            self.write_text("\n")
        }
    }
}

enum Source {
    Text {
        reader: Box<dyn BufRead>,
        line: String,
        pos: usize,
    },
    Binary(GzDecoder<Box<dyn Read>>),
}

/// Record reader matching [`Serializer`].
pub struct Deserializer {
    source: Source,
    /// Version stored in the file header.
    version: u32,
}

impl std::fmt::Debug for Deserializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deserializer")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Deserializer {
    /// Opens a state stream, sniffing text vs gzip-binary from the first
    /// bytes, and checks the magic header. `known_version` is the newest
    /// header version this reader understands.
    pub fn new(reader: Box<dyn BufRead>, known_version: u32) -> Result<Self> {
        let mut reader = reader;
        let head = reader.fill_buf()?;
        let binary = head.starts_with(&[0x1f, 0x8b]);

        let mut result = if binary {
            Self {
                source: Source::Binary(GzDecoder::new(Box::new(reader) as Box<dyn Read>)),
                version: 0,
            }
        } else {
            Self {
                source: Source::Text {
                    reader,
                    line: String::new(),
                    pos: 0,
                },
                version: 0,
            }
        };

        let magic = if binary { BIN_MAGIC } else { TXT_MAGIC };
        result.version = result.load_object_header(magic, "Serializer", known_version)?;
        Ok(result)
    }

    /// Opens a state file.
    pub fn from_file(path: &Path, known_version: u32) -> Result<Self> {
        let file = File::open(path).map_err(|err| {
            de_err(format!("can not open '{}' for reading: {err}", path.display()))
        })?;
        Self::new(Box::new(BufReader::new(file)), known_version)
    }

    /// Header version of the file being read.
    #[must_use]
    pub const fn file_version(&self) -> u32 {
        self.version
    }

    fn next_token(&mut self) -> Result<String> {
        match &mut self.source {
            Source::Text { reader, line, pos } => loop {
                if let Some(rest) = line.get(*pos..) {
                    let trimmed = rest.trim_start();
                    *pos += rest.len() - trimmed.len();
                    if !trimmed.is_empty() {
                        let token = if let Some(quoted) = trimmed.strip_prefix('"') {
                            let end = quoted
                                .find('"')
                                .ok_or_else(|| de_err("unterminated string record"))?;
                            let token = quoted[..end].to_owned();
                            *pos += end + 2;
                            token
                        } else {
                            let end =
                                trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
                            let token = trimmed[..end].to_owned();
                            *pos += end;
                            token
                        };
                        return Ok(token);
                    }
                }
                line.clear();
                *pos = 0;
                if reader.read_line(line)? == 0 {
                    return Err(de_err("unexpected end of state file"));
                }
            },
            Source::Binary(_) => unreachable!("token reads are text-only"),
        }
    }

    fn read_bin_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match &mut self.source {
            Source::Binary(reader) => reader
                .read_exact(buf)
                .map_err(|_| de_err("unexpected end of state file")),
            Source::Text { .. } => unreachable!("byte reads are binary-only"),
        }
    }

    fn read_bin_str(&mut self) -> Result<String> {
        let mut len = [0_u8; 2];
        self.read_bin_exact(&mut len)?;
        let mut bytes = vec![0_u8; usize::from(u16::from_le_bytes(len))];
        self.read_bin_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|_| de_err("non-utf8 string in state file"))
    }

    const fn is_binary(&self) -> bool {
        matches!(self.source, Source::Binary(_))
    }

    fn expect_record(&mut self, id: u8, vector: bool, name: &str) -> Result<()> {
        if self.is_binary() {
            let mut tag = [0_u8; 1];
            self.read_bin_exact(&mut tag)?;
            let expected = if vector { id | VEC_FLAG } else { id };
            if tag[0] != expected {
                return Err(de_err(format!(
                    "field '{name}': expected type id {expected}, found {}",
                    tag[0]
                )));
            }
            let stored = self.read_bin_str()?;
            if stored != name {
                return Err(de_err(format!("expected field '{name}', found '{stored}'")));
            }
        } else {
            let tag = self.next_token()?;
            let expected = if vector {
                format!("vector[{}]", type_tag(id))
            } else {
                type_tag(id).to_owned()
            };
            if tag != expected {
                return Err(de_err(format!(
                    "field '{name}': expected type tag '{expected}', found '{tag}'"
                )));
            }
            let stored = self.next_token()?;
            if stored != name {
                return Err(de_err(format!("expected field '{name}', found '{stored}'")));
            }
        }
        Ok(())
    }

    /// Reads an object header, checking type, name and version.
    ///
    /// Returns the stored version, which is guaranteed to be at most
    /// `known_version`.
    pub fn load_object_header(
        &mut self,
        type_name: &str,
        name: &str,
        known_version: u32,
    ) -> Result<u32> {
        let (stored_type, stored_name, version) = self.load_any_object_header()?;
        if stored_type != type_name || stored_name != name {
            return Err(de_err(format!(
                "expected object '{type_name} {name}', found '{stored_type} {stored_name}'"
            )));
        }
        if version > known_version {
            return Err(de_err(format!(
                "object '{name}' has version {version}, newer than supported {known_version}; \
                 no forward compatibility"
            )));
        }
        Ok(version)
    }

    /// Reads an object header without checking the type, for factory-table
    /// dispatch on the stored type string.
    pub fn load_any_object_header(&mut self) -> Result<(String, String, u32)> {
        if self.is_binary() {
            let stored_type = self.read_bin_str()?;
            let stored_name = self.read_bin_str()?;
            let mut ver = [0_u8; 4];
            self.read_bin_exact(&mut ver)?;
            Ok((stored_type, stored_name, u32::from_le_bytes(ver)))
        } else {
            let stored_type = self.next_token()?;
            let stored_name = self.next_token()?;
            let version = self
                .next_token()?
                .parse()
                .map_err(|_| de_err("malformed object version"))?;
            Ok((stored_type, stored_name, version))
        }
    }

    /// Reads a boolean field.
    pub fn load_bool(&mut self, name: &str) -> Result<bool> {
        self.expect_record(BOOL_ID, false, name)?;
        if self.is_binary() {
            let mut buf = [0_u8; 1];
            self.read_bin_exact(&mut buf)?;
            Ok(buf[0] != 0)
        } else {
            match self.next_token()?.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(de_err(format!("malformed bool value '{other}'"))),
            }
        }
    }

    /// Reads a signed integer field.
    pub fn load_int(&mut self, name: &str) -> Result<i32> {
        self.expect_record(INT_ID, false, name)?;
        if self.is_binary() {
            let mut buf = [0_u8; 4];
            self.read_bin_exact(&mut buf)?;
            Ok(i32::from_le_bytes(buf))
        } else {
            self.next_token()?
                .parse()
                .map_err(|_| de_err(format!("malformed int value for '{name}'")))
        }
    }

    /// Reads an unsigned integer field.
    pub fn load_uint(&mut self, name: &str) -> Result<u32> {
        self.expect_record(UINT_ID, false, name)?;
        if self.is_binary() {
            let mut buf = [0_u8; 4];
            self.read_bin_exact(&mut buf)?;
            Ok(u32::from_le_bytes(buf))
        } else {
            self.next_token()?
                .parse()
                .map_err(|_| de_err(format!("malformed uint value for '{name}'")))
        }
    }

    /// Reads a 64-bit unsigned field.
    pub fn load_ullong(&mut self, name: &str) -> Result<u64> {
        self.expect_record(LLONG_ID, false, name)?;
        if self.is_binary() {
            let mut buf = [0_u8; 8];
            self.read_bin_exact(&mut buf)?;
            Ok(u64::from_le_bytes(buf))
        } else {
            self.next_token()?
                .parse()
                .map_err(|_| de_err(format!("malformed llong value for '{name}'")))
        }
    }

    /// Reads a floating-point field.
    pub fn load_double(&mut self, name: &str) -> Result<f64> {
        self.expect_record(DOUBLE_ID, false, name)?;
        if self.is_binary() {
            let mut buf = [0_u8; 8];
            self.read_bin_exact(&mut buf)?;
            Ok(f64::from_le_bytes(buf))
        } else {
            self.next_token()?
                .parse()
                .map_err(|_| de_err(format!("malformed double value for '{name}'")))
        }
    }

    /// Reads a string field.
    pub fn load_string(&mut self, name: &str) -> Result<String> {
        self.expect_record(STRING_ID, false, name)?;
        if self.is_binary() {
            self.read_bin_str()
        } else {
            self.next_token()
        }
    }

    fn load_vec_len(&mut self, id: u8, name: &str) -> Result<usize> {
        self.expect_record(id, true, name)?;
        if self.is_binary() {
            let mut buf = [0_u8; 8];
            self.read_bin_exact(&mut buf)?;
            usize::try_from(u64::from_le_bytes(buf))
                .map_err(|_| de_err("vector length exceeds address space"))
        } else {
            self.next_token()?
                .parse()
                .map_err(|_| de_err(format!("malformed vector length for '{name}'")))
        }
    }

    /// Reads a vector of doubles.
    pub fn load_double_vec(&mut self, name: &str) -> Result<Vec<f64>> {
        let len = self.load_vec_len(DOUBLE_ID, name)?;
        let mut result = Vec::with_capacity(len);
        for _ in 0..len {
            if self.is_binary() {
                let mut buf = [0_u8; 8];
                self.read_bin_exact(&mut buf)?;
                result.push(f64::from_le_bytes(buf));
            } else {
                result.push(
                    self.next_token()?
                        .parse()
                        .map_err(|_| de_err("malformed double vector element"))?,
                );
            }
        }
        Ok(result)
    }

    /// Reads a vector of 64-bit unsigned values.
    pub fn load_ullong_vec(&mut self, name: &str) -> Result<Vec<u64>> {
        let len = self.load_vec_len(LLONG_ID, name)?;
        let mut result = Vec::with_capacity(len);
        for _ in 0..len {
            if self.is_binary() {
                let mut buf = [0_u8; 8];
                self.read_bin_exact(&mut buf)?;
                result.push(u64::from_le_bytes(buf));
            } else {
                result.push(
                    self.next_token()?
                        .parse()
                        .map_err(|_| de_err("malformed llong vector element"))?,
                );
            }
        }
        Ok(result)
    }

    /// Reads a vector of strings.
    pub fn load_string_vec(&mut self, name: &str) -> Result<Vec<String>> {
        let len = self.load_vec_len(STRING_ID, name)?;
        let mut result = Vec::with_capacity(len);
        for _ in 0..len {
            if self.is_binary() {
                result.push(self.read_bin_str()?);
            } else {
                result.push(self.next_token()?);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    struct SharedSink(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn write_sample(format: StateFormat) -> Vec<u8> {
        let shared = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut ser =
            Serializer::new(Box::new(SharedSink(shared.clone())), format, 3).unwrap();
        ser.save_bool(true, "Flag").unwrap();
        ser.save_int(-17, "Offset").unwrap();
        ser.save_uint(4, "Count").unwrap();
        ser.save_ullong(1 << 40, "Big").unwrap();
        ser.save_double(2.5e-3, "Rate").unwrap();
        ser.save_string("Tornado run", "Label").unwrap();
        ser.save_double_vec(&[10.0, 40.0, 25.0], "Range").unwrap();
        ser.save_string_vec(&["a".to_owned(), "b".to_owned()], "Tags")
            .unwrap();
        ser.begin_object("ScalarParameter", "HeatProd", 1).unwrap();
        ser.save_double(2.5, "Base").unwrap();
        ser.finish().unwrap();
        let bytes = shared.borrow().clone();
        bytes
    }

    fn read_sample(bytes: &[u8]) {
        let mut de =
            Deserializer::new(Box::new(std::io::Cursor::new(bytes.to_vec())), 3).unwrap();
        assert_eq!(de.file_version(), 3);
        assert!(de.load_bool("Flag").unwrap());
        assert_eq!(de.load_int("Offset").unwrap(), -17);
        assert_eq!(de.load_uint("Count").unwrap(), 4);
        assert_eq!(de.load_ullong("Big").unwrap(), 1 << 40);
        assert_approx_eq!(f64, de.load_double("Rate").unwrap(), 2.5e-3, ulps = 2);
        assert_eq!(de.load_string("Label").unwrap(), "Tornado run");
        assert_eq!(de.load_double_vec("Range").unwrap(), vec![10.0, 40.0, 25.0]);
        assert_eq!(
            de.load_string_vec("Tags").unwrap(),
            vec!["a".to_owned(), "b".to_owned()]
        );
        let version = de
            .load_object_header("ScalarParameter", "HeatProd", 1)
            .unwrap();
        assert_eq!(version, 1);
        assert_approx_eq!(f64, de.load_double("Base").unwrap(), 2.5, ulps = 2);
    }

    #[test]
    fn text_round_trip() {
        let bytes = write_sample(StateFormat::Text);
        assert!(bytes.starts_with(TXT_MAGIC.as_bytes()));
        read_sample(&bytes);
    }

    #[test]
    fn binary_round_trip() {
        let bytes = write_sample(StateFormat::Binary);
        assert!(bytes.starts_with(&[0x1f, 0x8b]));
        read_sample(&bytes);
    }

    #[test]
    fn text_is_byte_stable() {
        let first = write_sample(StateFormat::Text);
        let second = write_sample(StateFormat::Text);
        assert_eq!(first, second);
    }

    #[test]
    fn newer_version_is_rejected() {
        let shared = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let ser =
            Serializer::new(Box::new(SharedSink(shared.clone())), StateFormat::Text, 9).unwrap();
        ser.finish().unwrap();

        let bytes = shared.borrow().clone();
        let err = Deserializer::new(Box::new(std::io::Cursor::new(bytes)), 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }

    #[test]
    fn wrong_field_name_is_rejected() {
        let shared = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut ser =
            Serializer::new(Box::new(SharedSink(shared.clone())), StateFormat::Text, 1).unwrap();
        ser.save_double(1.0, "Alpha").unwrap();
        ser.finish().unwrap();

        let bytes = shared.borrow().clone();
        let mut de = Deserializer::new(Box::new(std::io::Cursor::new(bytes)), 1).unwrap();
        assert!(de.load_double("Beta").is_err());
    }
}
