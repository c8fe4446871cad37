//! Purpose: Per-type marshaling between request text, native stored bytes and response text.
//! Exports: `bind_key`, `pack_string`, `encode_value`, `check_readable`, `store_value`.
//! Role: The only place that knows how each column type is represented on the native side.
//! Invariants: Dispatch is an exhaustive match on `ColumnType`; adding a type breaks the build here.
//! Invariants: Every error names the offending column.
//! Invariants: `ErrorKind::NotFound` from binding means "no stored row can have this key".
pub mod decimal;
pub mod temporal;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::core::error::{
    ERR_INVALID_DATA, ERR_PK_TYPE, ERR_UNSUPPORTED_TYPE, Error, ErrorKind, expecting,
};
use crate::core::response::ResponseBuffer;
use crate::core::schema::{ArrayType, ColumnDescriptor, ColumnType};
use crate::core::wire::DataType;

use self::decimal::DecimalError;
use self::temporal::TemporalError;

const YEAR_MIN: i64 = 1901;
const YEAR_MAX: i64 = 2155;

/// Converts a request key value into the native bytes the lookup compares against.
pub fn bind_key(column: &ColumnDescriptor, raw: &[u8]) -> Result<Vec<u8>, Error> {
    match column.column_type {
        ColumnType::Tinyint => bind_signed(column, raw, 1),
        ColumnType::Smallint => bind_signed(column, raw, 2),
        ColumnType::Mediumint => bind_signed(column, raw, 3),
        ColumnType::Int => bind_signed(column, raw, 4),
        ColumnType::Bigint => bind_signed(column, raw, 8),
        ColumnType::Tinyunsigned => bind_unsigned(column, raw, 1),
        ColumnType::Smallunsigned => bind_unsigned(column, raw, 2),
        ColumnType::Mediumunsigned => bind_unsigned(column, raw, 3),
        ColumnType::Unsigned => bind_unsigned(column, raw, 4),
        ColumnType::Bigunsigned => bind_unsigned(column, raw, 8),
        ColumnType::Float | ColumnType::Double | ColumnType::Bit => Err(not_a_key(column)),
        ColumnType::Decimal | ColumnType::Decimalunsigned => bind_decimal(column, raw),
        ColumnType::Char | ColumnType::Varchar | ColumnType::Longvarchar => pack_string(column, raw),
        ColumnType::Binary | ColumnType::Varbinary | ColumnType::Longvarbinary => {
            bind_binary(column, raw)
        }
        ColumnType::Date => temporal::pack_date(text(column, raw)?)
            .map_err(|err| temporal_error(column, err)),
        ColumnType::Time2 => temporal::pack_time2(text(column, raw)?, column.precision)
            .map_err(|err| temporal_error(column, err)),
        ColumnType::Datetime2 => temporal::pack_datetime2(text(column, raw)?, column.precision)
            .map_err(|err| temporal_error(column, err)),
        ColumnType::Timestamp2 => temporal::pack_timestamp2(text(column, raw)?, column.precision)
            .map_err(|err| temporal_error(column, err)),
        ColumnType::Year => bind_year(column, raw),
        ColumnType::Undefined
        | ColumnType::Olddecimal
        | ColumnType::Olddecimalunsigned
        | ColumnType::Blob
        | ColumnType::Text
        | ColumnType::Datetime
        | ColumnType::Time
        | ColumnType::Timestamp => Err(unsupported_key(column)),
    }
}

/// Native form of a character key: padded for CHAR, length-prefixed for the var forms.
pub fn pack_string(column: &ColumnDescriptor, raw: &[u8]) -> Result<Vec<u8>, Error> {
    let Some(converted) = crate::core::text::to_charset(column.charset, raw) else {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message(format!("value has characters outside the {:?} charset", column.charset))
            .with_column(&column.name));
    };
    let raw: &[u8] = &converted;
    let declared = column.length as usize;
    match column.column_type {
        ColumnType::Char | ColumnType::Varchar | ColumnType::Longvarchar if raw.len() > declared => {
            Err(too_long(column, raw.len()))
        }
        ColumnType::Char => {
            let mut out = raw.to_vec();
            out.resize(declared, column.charset.pad_byte());
            Ok(out)
        }
        ColumnType::Varchar | ColumnType::Longvarchar => with_length_prefix(column, raw),
        ColumnType::Undefined
        | ColumnType::Tinyint
        | ColumnType::Tinyunsigned
        | ColumnType::Smallint
        | ColumnType::Smallunsigned
        | ColumnType::Mediumint
        | ColumnType::Mediumunsigned
        | ColumnType::Int
        | ColumnType::Unsigned
        | ColumnType::Bigint
        | ColumnType::Bigunsigned
        | ColumnType::Float
        | ColumnType::Double
        | ColumnType::Olddecimal
        | ColumnType::Olddecimalunsigned
        | ColumnType::Decimal
        | ColumnType::Decimalunsigned
        | ColumnType::Binary
        | ColumnType::Varbinary
        | ColumnType::Datetime
        | ColumnType::Date
        | ColumnType::Blob
        | ColumnType::Text
        | ColumnType::Bit
        | ColumnType::Longvarbinary
        | ColumnType::Time
        | ColumnType::Year
        | ColumnType::Timestamp
        | ColumnType::Time2
        | ColumnType::Datetime2
        | ColumnType::Timestamp2 => Err(Error::new(ErrorKind::Server)
            .with_message(format!(
                "{ERR_INVALID_DATA}; {} is not a character column",
                column.column_type.sql_name()
            ))
            .with_column(&column.name)),
    }
}

/// Fails for columns that cannot appear in a projection.
pub fn check_readable(column: &ColumnDescriptor) -> Result<(), Error> {
    match column.column_type {
        ColumnType::Blob | ColumnType::Text => Err(Error::new(ErrorKind::Client)
            .with_message(format!(
                "{ERR_UNSUPPORTED_TYPE}: {} columns cannot be read by primary-key lookups",
                column.column_type.sql_name()
            ))
            .with_column(&column.name)),
        ColumnType::Undefined
        | ColumnType::Olddecimal
        | ColumnType::Olddecimalunsigned
        | ColumnType::Datetime
        | ColumnType::Time
        | ColumnType::Timestamp => Err(unsupported(column)),
        ColumnType::Tinyint
        | ColumnType::Tinyunsigned
        | ColumnType::Smallint
        | ColumnType::Smallunsigned
        | ColumnType::Mediumint
        | ColumnType::Mediumunsigned
        | ColumnType::Int
        | ColumnType::Unsigned
        | ColumnType::Bigint
        | ColumnType::Bigunsigned
        | ColumnType::Float
        | ColumnType::Double
        | ColumnType::Decimal
        | ColumnType::Decimalunsigned
        | ColumnType::Char
        | ColumnType::Varchar
        | ColumnType::Binary
        | ColumnType::Varbinary
        | ColumnType::Date
        | ColumnType::Bit
        | ColumnType::Longvarchar
        | ColumnType::Longvarbinary
        | ColumnType::Year
        | ColumnType::Time2
        | ColumnType::Datetime2
        | ColumnType::Timestamp2 => Ok(()),
    }
}

/// Writes one stored value (or NULL) into the response.
pub fn encode_value(
    column: &ColumnDescriptor,
    stored: Option<&[u8]>,
    response: &mut ResponseBuffer<'_>,
) -> Result<(), Error> {
    let name = column.name.as_str();
    let Some(bytes) = stored else {
        return response.set_column_null(name);
    };
    match column.column_type {
        ColumnType::Tinyint => response.append_i64(name, read_signed(column, bytes, 1)?),
        ColumnType::Smallint => response.append_i64(name, read_signed(column, bytes, 2)?),
        ColumnType::Mediumint => response.append_i64(name, read_signed(column, bytes, 3)?),
        ColumnType::Int => response.append_i64(name, read_signed(column, bytes, 4)?),
        ColumnType::Bigint => response.append_i64(name, read_signed(column, bytes, 8)?),
        ColumnType::Tinyunsigned => response.append_u64(name, read_unsigned(column, bytes, 1)?),
        ColumnType::Smallunsigned => response.append_u64(name, read_unsigned(column, bytes, 2)?),
        ColumnType::Mediumunsigned => response.append_u64(name, read_unsigned(column, bytes, 3)?),
        ColumnType::Unsigned => response.append_u64(name, read_unsigned(column, bytes, 4)?),
        ColumnType::Bigunsigned => response.append_u64(name, read_unsigned(column, bytes, 8)?),
        ColumnType::Float => {
            let raw = fixed::<4>(column, bytes)?;
            response.append_f32(name, f32::from_le_bytes(raw))
        }
        ColumnType::Double => {
            let raw = fixed::<8>(column, bytes)?;
            response.append_f64(name, f64::from_le_bytes(raw))
        }
        ColumnType::Decimal | ColumnType::Decimalunsigned => {
            let text = decimal::unpack(bytes, column.precision, column.scale)
                .map_err(|_| corrupt(column, "decimal"))?;
            response.set_column_data(name, Some(text.as_bytes()), DataType::Decimal)
        }
        ColumnType::Char => {
            let data = byte_array(column, bytes)?;
            response.append_char(name, data, column.charset, Some(column.charset.pad_byte()))
        }
        ColumnType::Varchar | ColumnType::Longvarchar => {
            let data = byte_array(column, bytes)?;
            response.append_char(name, data, column.charset, None)
        }
        ColumnType::Binary | ColumnType::Varbinary | ColumnType::Longvarbinary => {
            let data = byte_array(column, bytes)?;
            let encoded = STANDARD.encode(data);
            response.set_column_data(name, Some(encoded.as_bytes()), DataType::Binary)
        }
        ColumnType::Bit => {
            let mut data = bytes.to_vec();
            data.reverse();
            let encoded = STANDARD.encode(&data);
            response.set_column_data(name, Some(encoded.as_bytes()), DataType::Bit)
        }
        ColumnType::Date => {
            let text = temporal::unpack_date(bytes).map_err(|_| corrupt(column, "date"))?;
            response.set_column_data(name, Some(text.as_bytes()), DataType::Datetime)
        }
        ColumnType::Time2 => {
            let text = temporal::unpack_time2(bytes, column.precision)
                .map_err(|_| corrupt(column, "time"))?;
            response.set_column_data(name, Some(text.as_bytes()), DataType::Datetime)
        }
        ColumnType::Datetime2 => {
            let text = temporal::unpack_datetime2(bytes, column.precision)
                .map_err(|_| corrupt(column, "datetime"))?;
            response.set_column_data(name, Some(text.as_bytes()), DataType::Datetime)
        }
        ColumnType::Timestamp2 => {
            let text = temporal::unpack_timestamp2(bytes, column.precision)
                .map_err(|_| corrupt(column, "timestamp"))?;
            response.set_column_data(name, Some(text.as_bytes()), DataType::Datetime)
        }
        ColumnType::Year => {
            let [stored] = fixed::<1>(column, bytes)?;
            response.append_u64(name, 1900 + u64::from(stored))
        }
        ColumnType::Undefined
        | ColumnType::Olddecimal
        | ColumnType::Olddecimalunsigned
        | ColumnType::Blob
        | ColumnType::Text
        | ColumnType::Datetime
        | ColumnType::Time
        | ColumnType::Timestamp => Err(unsupported(column)),
    }
}

/// Native stored bytes for a textual value, as a loader would write it.
///
/// Accepts every type `bind_key` accepts plus the non-key types FLOAT,
/// DOUBLE (decimal text) and BIT (base64 of the big-endian bit string).
pub fn store_value(column: &ColumnDescriptor, raw: &[u8]) -> Result<Vec<u8>, Error> {
    match column.column_type {
        ColumnType::Float => {
            let value: f32 = text(column, raw)?
                .trim()
                .parse()
                .map_err(|_| expecting(&column.name, "FLOAT"))?;
            Ok(value.to_le_bytes().to_vec())
        }
        ColumnType::Double => {
            let value: f64 = text(column, raw)?
                .trim()
                .parse()
                .map_err(|_| expecting(&column.name, "DOUBLE"))?;
            Ok(value.to_le_bytes().to_vec())
        }
        ColumnType::Bit => {
            let width = (column.length as usize).div_ceil(8);
            let mut data = STANDARD
                .decode(raw)
                .map_err(|err| expecting(&column.name, "BIT (base64)").with_source(err))?;
            if data.len() > width {
                return Err(too_long(column, data.len()));
            }
            let mut padded = vec![0u8; width - data.len()];
            padded.append(&mut data);
            padded.reverse();
            Ok(padded)
        }
        ColumnType::Undefined
        | ColumnType::Tinyint
        | ColumnType::Tinyunsigned
        | ColumnType::Smallint
        | ColumnType::Smallunsigned
        | ColumnType::Mediumint
        | ColumnType::Mediumunsigned
        | ColumnType::Int
        | ColumnType::Unsigned
        | ColumnType::Bigint
        | ColumnType::Bigunsigned
        | ColumnType::Olddecimal
        | ColumnType::Olddecimalunsigned
        | ColumnType::Decimal
        | ColumnType::Decimalunsigned
        | ColumnType::Char
        | ColumnType::Varchar
        | ColumnType::Binary
        | ColumnType::Varbinary
        | ColumnType::Datetime
        | ColumnType::Date
        | ColumnType::Blob
        | ColumnType::Text
        | ColumnType::Longvarchar
        | ColumnType::Longvarbinary
        | ColumnType::Time
        | ColumnType::Year
        | ColumnType::Timestamp
        | ColumnType::Time2
        | ColumnType::Datetime2
        | ColumnType::Timestamp2 => bind_key(column, raw),
    }
}

fn bind_signed(column: &ColumnDescriptor, raw: &[u8], width: usize) -> Result<Vec<u8>, Error> {
    let type_name = column.column_type.sql_name();
    let value: i64 = strict_integer(raw)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| expecting(&column.name, type_name))?;
    let bits = (width * 8) as u32;
    let min = if bits == 64 { i64::MIN } else { -(1i64 << (bits - 1)) };
    let max = if bits == 64 { i64::MAX } else { (1i64 << (bits - 1)) - 1 };
    if value < min || value > max {
        return Err(expecting(&column.name, type_name));
    }
    Ok(value.to_le_bytes()[..width].to_vec())
}

fn bind_unsigned(column: &ColumnDescriptor, raw: &[u8], width: usize) -> Result<Vec<u8>, Error> {
    let type_name = column.column_type.sql_name();
    let value: u64 = strict_integer(raw)
        .filter(|text| !text.starts_with('-'))
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| expecting(&column.name, type_name))?;
    let bits = (width * 8) as u32;
    if bits < 64 && value >= (1u64 << bits) {
        return Err(expecting(&column.name, type_name));
    }
    Ok(value.to_le_bytes()[..width].to_vec())
}

/// Optional sign followed by ASCII digits only.
fn strict_integer(raw: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(raw).ok()?;
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(text)
}

fn read_signed(column: &ColumnDescriptor, bytes: &[u8], width: usize) -> Result<i64, Error> {
    if bytes.len() != width {
        return Err(corrupt(column, "integer"));
    }
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(bytes);
    if bytes[width - 1] & 0x80 != 0 {
        raw[width..].fill(0xff);
    }
    Ok(i64::from_le_bytes(raw))
}

fn read_unsigned(column: &ColumnDescriptor, bytes: &[u8], width: usize) -> Result<u64, Error> {
    if bytes.len() != width {
        return Err(corrupt(column, "integer"));
    }
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

fn fixed<const N: usize>(column: &ColumnDescriptor, bytes: &[u8]) -> Result<[u8; N], Error> {
    bytes
        .try_into()
        .map_err(|_| corrupt(column, column.column_type.sql_name()))
}

fn bind_decimal(column: &ColumnDescriptor, raw: &[u8]) -> Result<Vec<u8>, Error> {
    let unsigned = column.column_type == ColumnType::Decimalunsigned;
    decimal::pack(text(column, raw)?, column.precision, column.scale, unsigned).map_err(|err| {
        let type_name = column.column_type.sql_name();
        match err {
            DecimalError::Syntax | DecimalError::Overflow | DecimalError::Corrupt => {
                expecting(&column.name, type_name)
            }
            DecimalError::Scale => expecting(&column.name, type_name).with_message(format!(
                "{ERR_INVALID_DATA}; expecting {type_name} with at most {} fraction digits",
                column.scale
            )),
        }
    })
}

fn bind_binary(column: &ColumnDescriptor, raw: &[u8]) -> Result<Vec<u8>, Error> {
    let decoded = STANDARD.decode(raw).map_err(|err| {
        expecting(&column.name, &format!("{} (base64)", column.column_type.sql_name())).with_source(err)
    })?;
    let declared = column.length as usize;
    if decoded.len() > declared {
        return Err(too_long(column, decoded.len()));
    }
    match column.array_type() {
        ArrayType::Fixed => {
            let mut out = decoded;
            out.resize(declared, 0);
            Ok(out)
        }
        ArrayType::ShortVar | ArrayType::MediumVar => with_length_prefix(column, &decoded),
    }
}

fn with_length_prefix(column: &ColumnDescriptor, data: &[u8]) -> Result<Vec<u8>, Error> {
    let prefix = column.array_type().prefix_len();
    let limit = match column.array_type() {
        ArrayType::Fixed => usize::MAX,
        ArrayType::ShortVar => u8::MAX as usize,
        ArrayType::MediumVar => u16::MAX as usize,
    };
    if data.len() > limit {
        return Err(too_long(column, data.len()));
    }
    let mut out = Vec::with_capacity(prefix + data.len());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes()[..prefix]);
    out.extend_from_slice(data);
    Ok(out)
}

/// Strips the length prefix (if any) and returns the stored payload.
fn byte_array<'a>(column: &ColumnDescriptor, bytes: &'a [u8]) -> Result<&'a [u8], Error> {
    let (len, start) = match column.array_type() {
        ArrayType::Fixed => (bytes.len(), 0),
        ArrayType::ShortVar => (usize::from(*bytes.first().ok_or_else(|| corrupt(column, "length"))?), 1),
        ArrayType::MediumVar => {
            let prefix = bytes.get(..2).ok_or_else(|| corrupt(column, "length"))?;
            (usize::from(u16::from_le_bytes([prefix[0], prefix[1]])), 2)
        }
    };
    bytes
        .get(start..start + len)
        .ok_or_else(|| corrupt(column, "length"))
}

fn bind_year(column: &ColumnDescriptor, raw: &[u8]) -> Result<Vec<u8>, Error> {
    let year: i64 = strict_integer(raw)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| expecting(&column.name, "YEAR"))?;
    if !(YEAR_MIN..=YEAR_MAX).contains(&year) {
        return Err(expecting(&column.name, "YEAR").with_message(format!(
            "{ERR_INVALID_DATA}; expecting YEAR between {YEAR_MIN} and {YEAR_MAX}"
        )));
    }
    Ok(vec![(year - 1900) as u8])
}

fn text<'a>(column: &ColumnDescriptor, raw: &'a [u8]) -> Result<&'a str, Error> {
    std::str::from_utf8(raw).map_err(|err| {
        Error::new(ErrorKind::Client)
            .with_message(format!("{ERR_INVALID_DATA}; value is not valid UTF-8"))
            .with_column(&column.name)
            .with_source(err)
    })
}

fn temporal_error(column: &ColumnDescriptor, err: TemporalError) -> Error {
    let type_name = column.column_type.sql_name();
    match err {
        TemporalError::NoMatch => Error::new(ErrorKind::NotFound)
            .with_message(format!("{type_name} value cannot match any stored row"))
            .with_column(&column.name),
        TemporalError::Syntax | TemporalError::Corrupt => expecting(&column.name, type_name),
    }
}

fn too_long(column: &ColumnDescriptor, len: usize) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message(format!(
            "value of {len} bytes exceeds the declared length {} of {}",
            column.length,
            column.column_type.sql_name()
        ))
        .with_column(&column.name)
}

fn not_a_key(column: &ColumnDescriptor) -> Error {
    Error::new(ErrorKind::Client)
        .with_message(format!("{ERR_PK_TYPE}: {}", column.column_type.sql_name()))
        .with_column(&column.name)
}

fn unsupported_key(column: &ColumnDescriptor) -> Error {
    Error::new(ErrorKind::Client)
        .with_message(format!(
            "{ERR_UNSUPPORTED_TYPE}: {} cannot be used as a primary key",
            column.column_type.sql_name()
        ))
        .with_column(&column.name)
}

fn unsupported(column: &ColumnDescriptor) -> Error {
    Error::new(ErrorKind::Server)
        .with_message(format!("{ERR_UNSUPPORTED_TYPE}: {}", column.column_type.sql_name()))
        .with_column(&column.name)
}

fn corrupt(column: &ColumnDescriptor, what: &str) -> Error {
    Error::new(ErrorKind::Server)
        .with_message(format!(
            "stored {what} value does not decode as {}",
            column.column_type.sql_name()
        ))
        .with_column(&column.name)
}
