//! Purpose: Wire-buffer layout constants and bounds-checked slot primitives.
//! Exports: request/response header indices, type tags, `read_u32`, `write_u32`, `read_cstr`.
//! Role: The only place that knows byte positions; request/response build on it.
//! Invariants: Every header field is a little-endian u32; every offset is absolute.
//! Invariants: Reads never index past the slice; out-of-range reads are errors, not panics.
use crate::core::error::{ERR_MALFORMED_REQUEST, Error, ErrorKind};

pub const ADDRESS_SIZE: usize = 4;

pub const PK_REQ_OP_TYPE: u32 = 1;
pub const PK_RESP_OP_TYPE: u32 = 2;

pub const PK_REQ_OP_TYPE_IDX: usize = 0;
pub const PK_REQ_CAPACITY_IDX: usize = 1;
pub const PK_REQ_LENGTH_IDX: usize = 2;
pub const PK_REQ_FLAGS_IDX: usize = 3;
pub const PK_REQ_DB_IDX: usize = 4;
pub const PK_REQ_TABLE_IDX: usize = 5;
pub const PK_REQ_PK_COLS_IDX: usize = 6;
pub const PK_REQ_READ_COLS_IDX: usize = 7;
pub const PK_REQ_OP_ID_IDX: usize = 8;
pub const PK_REQ_HEADER_END: usize = 9 * ADDRESS_SIZE;

pub const PK_RESP_OP_TYPE_IDX: usize = 0;
pub const PK_RESP_OP_STATUS_IDX: usize = 1;
pub const PK_RESP_CAPACITY_IDX: usize = 2;
pub const PK_RESP_LENGTH_IDX: usize = 3;
pub const PK_RESP_DB_IDX: usize = 4;
pub const PK_RESP_TABLE_IDX: usize = 5;
pub const PK_RESP_OP_ID_IDX: usize = 6;
pub const PK_RESP_COLS_IDX: usize = 7;
pub const PK_RESP_HEADER_END: usize = 8 * ADDRESS_SIZE;

/// Slots per column descriptor: name offset, value offset, is-null, type tag.
pub const DESCRIPTOR_SLOTS: usize = 4;

/// The only data return type accepted for read columns.
pub const DEFAULT_DRT: u32 = 1;

/// How a response value is quoted when the caller renders JSON.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataType {
    Unknown = 0,
    Integer = 1,
    String = 2,
    Float = 3,
    Binary = 4,
    Datetime = 5,
    Bit = 6,
    Decimal = 7,
}

impl DataType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(DataType::Unknown),
            1 => Some(DataType::Integer),
            2 => Some(DataType::String),
            3 => Some(DataType::Float),
            4 => Some(DataType::Binary),
            5 => Some(DataType::Datetime),
            6 => Some(DataType::Bit),
            7 => Some(DataType::Decimal),
            _ => None,
        }
    }

    /// Whether the rendered JSON value is a quoted string.
    pub fn is_quoted(self) -> bool {
        matches!(
            self,
            DataType::String | DataType::Binary | DataType::Datetime | DataType::Bit
        )
    }
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32, Error> {
    let end = offset.checked_add(ADDRESS_SIZE).ok_or_else(|| out_of_bounds(offset))?;
    let bytes = buf.get(offset..end).ok_or_else(|| out_of_bounds(offset))?;
    let mut out = [0u8; ADDRESS_SIZE];
    out.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(out))
}

pub fn read_slot(buf: &[u8], index: usize) -> Result<u32, Error> {
    read_u32(buf, index * ADDRESS_SIZE)
}

/// Caller guarantees `offset + 4 <= buf.len()`; response writers check capacity first.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + ADDRESS_SIZE].copy_from_slice(&value.to_le_bytes());
}

pub fn write_slot(buf: &mut [u8], index: usize, value: u32) {
    write_u32(buf, index * ADDRESS_SIZE, value);
}

/// Bytes of a NUL-terminated string starting at `offset`, without the terminator.
pub fn read_cstr(buf: &[u8], offset: usize) -> Result<&[u8], Error> {
    let tail = buf.get(offset..).ok_or_else(|| out_of_bounds(offset))?;
    let len = tail
        .iter()
        .position(|byte| *byte == 0)
        .ok_or_else(|| {
            Error::new(ErrorKind::Client)
                .with_message(format!("{ERR_MALFORMED_REQUEST}: unterminated string"))
                .with_offset(offset as u64)
        })?;
    Ok(&tail[..len])
}

pub fn read_str(buf: &[u8], offset: usize) -> Result<&str, Error> {
    let bytes = read_cstr(buf, offset)?;
    std::str::from_utf8(bytes).map_err(|err| {
        Error::new(ErrorKind::Client)
            .with_message(format!("{ERR_MALFORMED_REQUEST}: string is not valid UTF-8"))
            .with_offset(offset as u64)
            .with_source(err)
    })
}

fn out_of_bounds(offset: usize) -> Error {
    Error::new(ErrorKind::Client)
        .with_message(format!("{ERR_MALFORMED_REQUEST}: offset out of bounds"))
        .with_offset(offset as u64)
}

#[cfg(test)]
mod tests {
    use super::{DataType, read_cstr, read_slot, read_u32, write_slot};
    use crate::core::error::ErrorKind;

    #[test]
    fn slots_are_little_endian() {
        let mut buf = [0u8; 8];
        write_slot(&mut buf, 1, 0x0102_0304);
        assert_eq!(&buf[4..8], &[4, 3, 2, 1]);
        assert_eq!(read_slot(&buf, 1).expect("read"), 0x0102_0304);
    }

    #[test]
    fn reads_past_end_are_client_errors() {
        let buf = [0u8; 6];
        let err = read_u32(&buf, 4).expect_err("short read");
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.offset(), Some(4));
        assert!(read_u32(&buf, usize::MAX - 1).is_err());
    }

    #[test]
    fn cstr_requires_terminator() {
        let buf = *b"abc\0def";
        assert_eq!(read_cstr(&buf, 0).expect("terminated"), b"abc");
        assert!(read_cstr(&buf, 4).is_err());
        assert!(read_cstr(&buf, 40).is_err());
    }

    #[test]
    fn quoted_tags() {
        assert!(DataType::String.is_quoted());
        assert!(DataType::Binary.is_quoted());
        assert!(!DataType::Integer.is_quoted());
        assert!(!DataType::Decimal.is_quoted());
        assert_eq!(DataType::from_u32(6), Some(DataType::Bit));
        assert_eq!(DataType::from_u32(60), None);
    }
}
