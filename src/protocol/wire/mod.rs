//! Tagged binary value encoding used for message headers and call bodies.
//!
//! Every value on the wire is a one-byte kind tag followed by its payload,
//! so a decoder can always tell what it is looking at and fail cleanly on
//! type confusion instead of misreading bytes. Records additionally carry
//! their field count, which pins the arity of user structs across the
//! connection.
//!
//! Integers are big endian. Variable-length payloads carry a u32 length
//! prefix bounded by [`crate::protocol::MAX_FRAME_LENGTH`].
//!
//! Types that travel as call arguments or replies implement [`Encode`] and
//! [`Decode`]; for plain structs the `EncodeRecord!`/`DecodeRecord!` macros
//! generate the field-by-field impls.

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use crate::protocol::MAX_FRAME_LENGTH;

/// Byte order for every multi-byte integer on the wire.
pub type WireEndian = byteorder::BigEndian;

/// Kind tag preceding every encoded value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Kind {
    Bool = 1,
    I32 = 2,
    U32 = 3,
    I64 = 4,
    U64 = 5,
    Str = 6,
    Bytes = 7,
    List = 8,
    Record = 9,
}

/// Serializes the implementing type into a writer, tag first.
pub trait Encode {
    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()>;
}

/// Deserializes from a reader into an existing value.
///
/// Decoding into `&mut self` lets containers reuse their allocations; an
/// existing `Vec` or `String` is resized in place.
pub trait Decode {
    fn decode<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Decodes a fresh `T` from the reader.
pub fn decode_from<T: Decode + Default, R: Read>(src: &mut R) -> std::io::Result<T> {
    let mut value = T::default();
    value.decode(src)?;
    Ok(value)
}

/// Encodes a value into a new byte buffer.
pub fn encode_to_vec<T: Encode>(value: &T) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.encode(&mut buf)?;
    Ok(buf)
}

pub(crate) fn invalid_data(m: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, m)
}

fn write_kind<W: Write>(kind: Kind, dest: &mut W) -> std::io::Result<()> {
    dest.write_u8(kind as u8)
}

/// Reads the next kind tag and checks it against the expected one.
pub fn expect_kind<R: Read>(want: Kind, src: &mut R) -> std::io::Result<()> {
    let raw = src.read_u8()?;
    match Kind::from_u8(raw) {
        Some(got) if got == want => Ok(()),
        Some(got) => Err(invalid_data(format!("expected {want:?} value, found {got:?}"))),
        None => Err(invalid_data(format!("unknown wire kind tag {raw:#04x}"))),
    }
}

fn read_length<R: Read>(src: &mut R) -> std::io::Result<usize> {
    let length = src.read_u32::<WireEndian>()? as usize;
    if length > MAX_FRAME_LENGTH {
        return Err(invalid_data(format!(
            "wire length {length} exceeds max {MAX_FRAME_LENGTH}"
        )));
    }
    Ok(length)
}

fn write_length<W: Write>(length: usize, dest: &mut W) -> std::io::Result<()> {
    if length > MAX_FRAME_LENGTH {
        return Err(invalid_data(format!(
            "wire length {length} exceeds max {MAX_FRAME_LENGTH}"
        )));
    }
    dest.write_u32::<WireEndian>(length as u32)
}

/// Booleans travel as a tag plus one byte; any nonzero byte decodes to true.
impl Encode for bool {
    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_kind(Kind::Bool, dest)?;
        dest.write_u8(*self as u8)
    }
}

impl Decode for bool {
    fn decode<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        expect_kind(Kind::Bool, src)?;
        *self = src.read_u8()? > 0;
        Ok(())
    }
}

impl Encode for i32 {
    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_kind(Kind::I32, dest)?;
        dest.write_i32::<WireEndian>(*self)
    }
}

impl Decode for i32 {
    fn decode<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        expect_kind(Kind::I32, src)?;
        *self = src.read_i32::<WireEndian>()?;
        Ok(())
    }
}

impl Encode for u32 {
    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_kind(Kind::U32, dest)?;
        dest.write_u32::<WireEndian>(*self)
    }
}

impl Decode for u32 {
    fn decode<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        expect_kind(Kind::U32, src)?;
        *self = src.read_u32::<WireEndian>()?;
        Ok(())
    }
}

impl Encode for i64 {
    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_kind(Kind::I64, dest)?;
        dest.write_i64::<WireEndian>(*self)
    }
}

impl Decode for i64 {
    fn decode<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        expect_kind(Kind::I64, src)?;
        *self = src.read_i64::<WireEndian>()?;
        Ok(())
    }
}

impl Encode for u64 {
    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_kind(Kind::U64, dest)?;
        dest.write_u64::<WireEndian>(*self)
    }
}

impl Decode for u64 {
    fn decode<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        expect_kind(Kind::U64, src)?;
        *self = src.read_u64::<WireEndian>()?;
        Ok(())
    }
}

/// Strings are length-prefixed UTF-8; non-UTF-8 payloads are a decode error.
impl Encode for String {
    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_kind(Kind::Str, dest)?;
        write_length(self.len(), dest)?;
        dest.write_all(self.as_bytes())
    }
}

impl Decode for String {
    fn decode<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        expect_kind(Kind::Str, src)?;
        let length = read_length(src)?;
        let mut raw = vec![0u8; length];
        src.read_exact(&mut raw)?;
        *self = String::from_utf8(raw)
            .map_err(|e| invalid_data(format!("string payload is not UTF-8: {e}")))?;
        Ok(())
    }
}

/// Opaque byte blob with a compact wire form.
///
/// Plain `Vec<u8>` has no encoding of its own; wrapping blobs keeps them
/// one length-prefixed payload instead of a list of tagged elements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl Encode for Bytes {
    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_kind(Kind::Bytes, dest)?;
        write_length(self.0.len(), dest)?;
        dest.write_all(&self.0)
    }
}

impl Decode for Bytes {
    fn decode<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        expect_kind(Kind::Bytes, src)?;
        let length = read_length(src)?;
        self.0.resize(length, 0);
        src.read_exact(&mut self.0)
    }
}

/// Lists carry an element count; every element is itself tagged.
impl<T: Encode> Encode for Vec<T> {
    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_kind(Kind::List, dest)?;
        write_length(self.len(), dest)?;
        for element in self {
            element.encode(dest)?;
        }
        Ok(())
    }
}

impl<T: Decode + Default> Decode for Vec<T> {
    fn decode<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        expect_kind(Kind::List, src)?;
        let length = read_length(src)?;
        self.clear();
        for _ in 0..length {
            self.push(decode_from(src)?);
        }
        Ok(())
    }
}

/// Implements [`Encode`] for a struct by emitting a record header followed
/// by each named field in declaration order.
#[macro_export]
macro_rules! EncodeRecord {
    (
        $t:ident,
        $($field:ident),*
    ) => {
        impl $crate::protocol::wire::Encode for $t {
            fn encode<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
                let fields = [$(stringify!($field)),*].len() as u32;
                $crate::protocol::wire::encode_record_header(fields, dest)?;
                $($crate::protocol::wire::Encode::encode(&self.$field, dest)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [`Decode`] for a struct; the record arity on the wire must
/// match the field count or decoding fails.
#[macro_export]
macro_rules! DecodeRecord {
    (
        $t:ident,
        $($field:ident),*
    ) => {
        impl $crate::protocol::wire::Decode for $t {
            fn decode<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                let fields = [$(stringify!($field)),*].len() as u32;
                $crate::protocol::wire::decode_record_header(fields, src)?;
                $($crate::protocol::wire::Decode::decode(&mut self.$field, src)?;)*
                Ok(())
            }
        }
    };
}

/// Record framing used by the `EncodeRecord!` macro.
pub fn encode_record_header<W: Write>(fields: u32, dest: &mut W) -> std::io::Result<()> {
    write_kind(Kind::Record, dest)?;
    dest.write_u32::<WireEndian>(fields)
}

/// Record framing used by the `DecodeRecord!` macro.
pub fn decode_record_header<R: Read>(fields: u32, src: &mut R) -> std::io::Result<()> {
    expect_kind(Kind::Record, src)?;
    let found = src.read_u32::<WireEndian>()?;
    if found != fields {
        return Err(invalid_data(format!(
            "record arity mismatch: expected {fields} fields, found {found}"
        )));
    }
    Ok(())
}

pub use crate::{DecodeRecord, EncodeRecord};
