//! Purpose: Append-only encoder for primary-key read response buffers, plus a decoder.
//! Exports: `ResponseBuffer`, `ResponseView`, `ColumnValue`.
//! Role: The executor writes results here; the REST layer (or CLI) renders JSON from a view.
//! Invariants: The write cursor only increases and never passes the declared capacity.
//! Invariants: The first failed write poisons the buffer; later writes fail without touching it.
//! Invariants: Every heap string is NUL-terminated; every offset is absolute.
use std::fmt::Write as _;

use crate::core::error::{ERR_CAPACITY, ERR_MALFORMED_REQUEST, Error, ErrorKind};
use crate::core::text::{self, Charset};
use crate::core::wire::{
    ADDRESS_SIZE, DESCRIPTOR_SLOTS, DataType, PK_RESP_CAPACITY_IDX, PK_RESP_COLS_IDX,
    PK_RESP_DB_IDX, PK_RESP_HEADER_END, PK_RESP_LENGTH_IDX, PK_RESP_OP_ID_IDX, PK_RESP_OP_STATUS_IDX,
    PK_RESP_OP_TYPE, PK_RESP_OP_TYPE_IDX, PK_RESP_TABLE_IDX, read_cstr, read_slot, read_u32,
    write_slot, write_u32,
};

#[derive(Debug)]
pub struct ResponseBuffer<'a> {
    buf: &'a mut [u8],
    write_header: usize,
    cols_reserved: usize,
    cols_written: usize,
    failed: bool,
}

impl<'a> ResponseBuffer<'a> {
    /// Writes the type and capacity header fields and positions the cursor past the header.
    pub fn new(buf: &'a mut [u8]) -> Result<Self, Error> {
        if buf.len() < PK_RESP_HEADER_END || buf.len() > u32::MAX as usize {
            return Err(Error::new(ErrorKind::Server).with_message(format!(
                "{ERR_CAPACITY}: buffer of {} bytes cannot hold the response header",
                buf.len()
            )));
        }
        buf[..PK_RESP_HEADER_END].fill(0);
        let capacity = buf.len() as u32;
        write_slot(buf, PK_RESP_OP_TYPE_IDX, PK_RESP_OP_TYPE);
        write_slot(buf, PK_RESP_CAPACITY_IDX, capacity);
        Ok(Self {
            buf,
            write_header: PK_RESP_HEADER_END,
            cols_reserved: 0,
            cols_written: 0,
            failed: false,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn write_header(&self) -> usize {
        self.write_header
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.write_header
    }

    pub fn columns_written(&self) -> usize {
        self.cols_written
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Status lives in the header, so it stays writable after a failed heap write.
    pub fn set_status(&mut self, code: u32) {
        write_slot(self.buf, PK_RESP_OP_STATUS_IDX, code);
    }

    pub fn set_db(&mut self, db: &str) -> Result<(), Error> {
        let offset = self.append_cstring(db.as_bytes())?;
        write_slot(self.buf, PK_RESP_DB_IDX, offset);
        Ok(())
    }

    pub fn set_table(&mut self, table: &str) -> Result<(), Error> {
        let offset = self.append_cstring(table.as_bytes())?;
        write_slot(self.buf, PK_RESP_TABLE_IDX, offset);
        Ok(())
    }

    pub fn set_operation_id(&mut self, id: &str) -> Result<(), Error> {
        let offset = self.append_cstring(id.as_bytes())?;
        write_slot(self.buf, PK_RESP_OP_ID_IDX, offset);
        Ok(())
    }

    /// Copies `bytes` plus a NUL at the cursor and returns the offset it was written at.
    pub fn append_cstring(&mut self, bytes: &[u8]) -> Result<u32, Error> {
        self.reserve(bytes.len() + 1)?;
        let offset = self.write_header;
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.buf[offset + bytes.len()] = 0;
        self.write_header += bytes.len() + 1;
        Ok(offset as u32)
    }

    /// Reserves the descriptor region; must run before any heap write.
    pub fn set_no_of_columns(&mut self, count: usize) -> Result<(), Error> {
        self.ensure_usable()?;
        if self.write_header != PK_RESP_HEADER_END || self.cols_reserved != 0 {
            return Err(Error::new(ErrorKind::Server)
                .with_message("column descriptors must be reserved directly after the header"));
        }
        self.reserve(count * DESCRIPTOR_SLOTS * ADDRESS_SIZE)?;
        self.write_header += count * DESCRIPTOR_SLOTS * ADDRESS_SIZE;
        self.cols_reserved = count;
        Ok(())
    }

    /// Writes one column: name, then value unless null, then its descriptor quadruple.
    pub fn set_column_data(&mut self, name: &str, value: Option<&[u8]>, data_type: DataType) -> Result<(), Error> {
        self.ensure_usable()?;
        if self.cols_written >= self.cols_reserved {
            return Err(Error::new(ErrorKind::Server)
                .with_message(format!(
                    "column count exceeds the {} reserved descriptors",
                    self.cols_reserved
                ))
                .with_column(name));
        }
        let needed = name.len() + 1 + value.map(|v| v.len() + 1).unwrap_or(0);
        self.reserve(needed).map_err(|err| err.with_column(name))?;

        let name_off = self.append_cstring(name.as_bytes())?;
        let (value_off, is_null, tag) = match value {
            Some(value) => (self.append_cstring(value)?, 0, data_type),
            None => (0, 1, DataType::Unknown),
        };

        let slot = PK_RESP_HEADER_END + self.cols_written * DESCRIPTOR_SLOTS * ADDRESS_SIZE;
        write_u32(self.buf, slot, name_off);
        write_u32(self.buf, slot + ADDRESS_SIZE, value_off);
        write_u32(self.buf, slot + 2 * ADDRESS_SIZE, is_null);
        write_u32(self.buf, slot + 3 * ADDRESS_SIZE, tag as u32);
        self.cols_written += 1;
        write_slot(self.buf, PK_RESP_COLS_IDX, self.cols_written as u32);
        Ok(())
    }

    pub fn set_column_null(&mut self, name: &str) -> Result<(), Error> {
        self.set_column_data(name, None, DataType::Unknown)
    }

    pub fn append_i64(&mut self, name: &str, value: i64) -> Result<(), Error> {
        self.set_column_data(name, Some(value.to_string().as_bytes()), DataType::Integer)
    }

    pub fn append_u64(&mut self, name: &str, value: u64) -> Result<(), Error> {
        self.set_column_data(name, Some(value.to_string().as_bytes()), DataType::Integer)
    }

    /// Shortest round-trip decimal text at single precision.
    pub fn append_f32(&mut self, name: &str, value: f32) -> Result<(), Error> {
        if !value.is_finite() {
            return self.set_column_null(name);
        }
        self.set_column_data(name, Some(value.to_string().as_bytes()), DataType::Float)
    }

    /// Shortest round-trip decimal text at double precision.
    pub fn append_f64(&mut self, name: &str, value: f64) -> Result<(), Error> {
        if !value.is_finite() {
            return self.set_column_null(name);
        }
        self.set_column_data(name, Some(value.to_string().as_bytes()), DataType::Float)
    }

    /// Well-formed copy of stored character data, pad-trimmed when `pad` is set,
    /// transcoded to UTF-8 and JSON-escaped.
    ///
    /// Capacity is checked against the escaped output, so a mostly padded
    /// CHAR value fits whenever its trimmed form does.
    pub fn append_char(
        &mut self,
        name: &str,
        bytes: &[u8],
        charset: Charset,
        pad: Option<u8>,
    ) -> Result<(), Error> {
        self.ensure_usable()?;
        let copy = text::well_formed_copy(charset, bytes, name)?;
        let trimmed = match pad {
            Some(pad) => text::trim_pad(&copy, pad),
            None => &copy[..],
        };
        let escaped = text::escape_json(&text::to_utf8(charset, trimmed));
        self.set_column_data(name, Some(&escaped), DataType::String)
    }

    /// Writes the total length into the header.
    pub fn close(&mut self) {
        write_slot(self.buf, PK_RESP_LENGTH_IDX, self.write_header as u32);
    }

    fn ensure_usable(&self) -> Result<(), Error> {
        if self.failed {
            return Err(Error::new(ErrorKind::Server)
                .with_message(format!("{ERR_CAPACITY}: response already failed")));
        }
        Ok(())
    }

    fn reserve(&mut self, needed: usize) -> Result<(), Error> {
        self.ensure_usable()?;
        if needed > self.remaining() {
            return Err(self.fail(format!(
                "remaining capacity {} bytes, required {needed}",
                self.remaining()
            )));
        }
        Ok(())
    }

    fn fail(&mut self, detail: String) -> Error {
        self.failed = true;
        Error::new(ErrorKind::Server).with_message(format!("{ERR_CAPACITY}; {detail}"))
    }
}

/// One decoded output column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnValue<'a> {
    pub name: &'a str,
    pub value: Option<&'a [u8]>,
    pub data_type: DataType,
}

/// Read-only decoder over a closed response buffer.
#[derive(Clone, Copy, Debug)]
pub struct ResponseView<'a> {
    buf: &'a [u8],
}

impl<'a> ResponseView<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, Error> {
        let view = Self { buf };
        let op_type = read_slot(buf, PK_RESP_OP_TYPE_IDX)?;
        if op_type != PK_RESP_OP_TYPE {
            return Err(corrupt(format!("unexpected response type {op_type}")));
        }
        let length = read_slot(buf, PK_RESP_LENGTH_IDX)? as usize;
        if length > buf.len() {
            return Err(corrupt(format!("declared length {length} exceeds buffer")));
        }
        Ok(view)
    }

    pub fn status(&self) -> Result<u32, Error> {
        read_slot(self.buf, PK_RESP_OP_STATUS_IDX)
    }

    pub fn length(&self) -> Result<u32, Error> {
        read_slot(self.buf, PK_RESP_LENGTH_IDX)
    }

    pub fn capacity(&self) -> Result<u32, Error> {
        read_slot(self.buf, PK_RESP_CAPACITY_IDX)
    }

    pub fn db(&self) -> Result<Option<&'a str>, Error> {
        self.optional_str(PK_RESP_DB_IDX)
    }

    pub fn table(&self) -> Result<Option<&'a str>, Error> {
        self.optional_str(PK_RESP_TABLE_IDX)
    }

    pub fn operation_id(&self) -> Result<Option<&'a str>, Error> {
        self.optional_str(PK_RESP_OP_ID_IDX)
    }

    pub fn column_count(&self) -> Result<usize, Error> {
        Ok(read_slot(self.buf, PK_RESP_COLS_IDX)? as usize)
    }

    pub fn column(&self, index: usize) -> Result<ColumnValue<'a>, Error> {
        if index >= self.column_count()? {
            return Err(corrupt(format!("column index {index} out of range")));
        }
        let slot = PK_RESP_HEADER_END + index * DESCRIPTOR_SLOTS * ADDRESS_SIZE;
        let name_off = read_u32(self.buf, slot)? as usize;
        let value_off = read_u32(self.buf, slot + ADDRESS_SIZE)? as usize;
        let is_null = read_u32(self.buf, slot + 2 * ADDRESS_SIZE)? != 0;
        let tag = read_u32(self.buf, slot + 3 * ADDRESS_SIZE)?;
        let name = std::str::from_utf8(read_cstr(self.buf, name_off)?)
            .map_err(|err| corrupt("column name is not UTF-8").with_source(err))?;
        let data_type = DataType::from_u32(tag)
            .ok_or_else(|| corrupt(format!("unknown type tag {tag}")).with_column(name))?;
        let value = if is_null {
            None
        } else {
            Some(read_cstr(self.buf, value_off)?)
        };
        Ok(ColumnValue {
            name,
            value,
            data_type,
        })
    }

    pub fn columns(&self) -> Result<Vec<ColumnValue<'a>>, Error> {
        (0..self.column_count()?).map(|index| self.column(index)).collect()
    }

    /// Renders the `{"operationId"?, "Data": {...}}` body; values are already JSON-escaped.
    pub fn render_json(&self) -> Result<String, Error> {
        let mut out = String::from("{");
        if let Some(id) = self.operation_id()? {
            let escaped = text::escape_json(id.as_bytes());
            let _ = write!(out, "\"operationId\":\"{}\",", String::from_utf8_lossy(&escaped));
        }
        out.push_str("\"Data\":{");
        for (index, column) in self.columns()?.into_iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            let name = text::escape_json(column.name.as_bytes());
            let _ = write!(out, "\"{}\":", String::from_utf8_lossy(&name));
            match column.value {
                None => out.push_str("null"),
                Some(value) => {
                    let value = std::str::from_utf8(value).map_err(|err| {
                        corrupt("column value is not UTF-8")
                            .with_column(column.name)
                            .with_offset(err.valid_up_to() as u64)
                            .with_source(err)
                    })?;
                    if column.data_type.is_quoted() {
                        let _ = write!(out, "\"{value}\"");
                    } else {
                        out.push_str(&value);
                    }
                }
            }
        }
        out.push_str("}}");
        Ok(out)
    }

    fn optional_str(&self, index: usize) -> Result<Option<&'a str>, Error> {
        match read_slot(self.buf, index)? as usize {
            0 => Ok(None),
            offset => {
                let bytes = read_cstr(self.buf, offset)?;
                std::str::from_utf8(bytes)
                    .map(Some)
                    .map_err(|err| corrupt("header string is not UTF-8").with_source(err))
            }
        }
    }
}

fn corrupt(detail: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::Server).with_message(format!("{ERR_MALFORMED_REQUEST} (response): {detail}"))
}

#[cfg(test)]
mod tests {
    use super::{ResponseBuffer, ResponseView};
    use crate::core::error::ErrorKind;
    use crate::core::text::Charset;
    use crate::core::wire::{DataType, PK_RESP_HEADER_END};

    #[test]
    fn writes_header_columns_and_length() {
        let mut buf = vec![0u8; 512];
        let mut resp = ResponseBuffer::new(&mut buf).expect("resp");
        resp.set_no_of_columns(3).expect("reserve");
        resp.set_db("db").expect("db");
        resp.set_table("t").expect("table");
        resp.set_operation_id("op").expect("op");
        resp.append_i64("a", -5).expect("int");
        resp.append_char("b", b"x\"y  ", Charset::Utf8mb4, Some(b' ')).expect("char");
        resp.set_column_null("c").expect("null");
        resp.set_status(200);
        resp.close();
        let end = resp.write_header();

        let view = ResponseView::new(&buf).expect("view");
        assert_eq!(view.status().expect("status"), 200);
        assert_eq!(view.length().expect("len") as usize, end);
        assert_eq!(view.capacity().expect("cap"), 512);
        assert_eq!(view.db().expect("db"), Some("db"));
        assert_eq!(view.table().expect("table"), Some("t"));
        let columns = view.columns().expect("columns");
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].value, Some(&b"-5"[..]));
        assert_eq!(columns[1].value, Some(&b"x\\\"y"[..]));
        assert_eq!(columns[2].data_type, DataType::Unknown);
        assert_eq!(
            view.render_json().expect("json"),
            r#"{"operationId":"op","Data":{"a":-5,"b":"x\"y","c":null}}"#
        );
    }

    #[test]
    fn descriptors_must_be_reserved_first() {
        let mut buf = vec![0u8; 128];
        let mut resp = ResponseBuffer::new(&mut buf).expect("resp");
        assert!(resp.append_i64("a", 1).is_err());
        resp.set_db("db").expect("db");
        assert!(resp.set_no_of_columns(1).is_err());
    }

    #[test]
    fn capacity_failure_is_sticky_and_leaves_written_columns_intact() {
        let mut buf = vec![0u8; PK_RESP_HEADER_END + 2 * 16 + 12];
        let mut resp = ResponseBuffer::new(&mut buf).expect("resp");
        resp.set_no_of_columns(2).expect("reserve");
        resp.append_u64("a", 7).expect("fits");
        let before = resp.write_header();

        let err = resp.append_char("b", b"too long for this", Charset::Latin1, None).expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(resp.is_failed());
        assert_eq!(resp.write_header(), before);
        assert!(resp.append_u64("c", 1).is_err());
        resp.close();

        let view = ResponseView::new(&buf).expect("view");
        assert_eq!(view.column_count().expect("count"), 1);
        assert_eq!(view.column(0).expect("col").value, Some(&b"7"[..]));
    }

    #[test]
    fn padded_char_fits_when_trimmed_value_does() {
        let mut buf = vec![0u8; 64];
        let mut resp = ResponseBuffer::new(&mut buf).expect("resp");
        resp.set_no_of_columns(1).expect("reserve");
        let stored = [&b"ab"[..], &[b' '; 198]].concat();
        resp.append_char("c", &stored, Charset::Latin1, Some(b' ')).expect("fits after trim");
        resp.close();
        let view = ResponseView::new(&buf).expect("view");
        assert_eq!(view.render_json().expect("json"), r#"{"Data":{"c":"ab"}}"#);
    }

    #[test]
    fn latin1_values_render_as_utf8() {
        let mut buf = vec![0u8; 128];
        let mut resp = ResponseBuffer::new(&mut buf).expect("resp");
        resp.set_no_of_columns(1).expect("reserve");
        resp.append_char("v", &[b'c', b'a', 0xe9], Charset::Latin1, None).expect("char");
        resp.close();
        let view = ResponseView::new(&buf).expect("view");
        assert_eq!(view.column(0).expect("col").value, Some("caé".as_bytes()));
        assert_eq!(view.render_json().expect("json"), r#"{"Data":{"v":"caé"}}"#);
    }

    #[test]
    fn non_utf8_values_fail_rendering() {
        let mut buf = vec![0u8; 128];
        let mut resp = ResponseBuffer::new(&mut buf).expect("resp");
        resp.set_no_of_columns(1).expect("reserve");
        resp.append_char("raw", &[b'x', 0xff], Charset::Binary, None).expect("binary charset");
        resp.close();
        let view = ResponseView::new(&buf).expect("view");
        let err = view.render_json().expect_err("not utf8");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.column(), Some("raw"));
        assert_eq!(err.offset(), Some(1));
    }

    #[test]
    fn tiny_buffers_are_rejected() {
        let mut buf = vec![0u8; 8];
        assert!(ResponseBuffer::new(&mut buf).is_err());
    }

    #[test]
    fn floats_render_shortest_round_trip() {
        let mut buf = vec![0u8; 256];
        let mut resp = ResponseBuffer::new(&mut buf).expect("resp");
        resp.set_no_of_columns(3).expect("reserve");
        resp.append_f32("f", 0.1).expect("f32");
        resp.append_f64("d", 1e21).expect("f64");
        resp.append_f64("n", f64::NAN).expect("nan");
        resp.close();
        let view = ResponseView::new(&buf).expect("view");
        assert_eq!(
            view.render_json().expect("json"),
            r#"{"Data":{"f":0.1,"d":1000000000000000000000,"n":null}}"#
        );
    }

    #[test]
    fn malformed_char_data_names_the_offset() {
        let mut buf = vec![0u8; 256];
        let mut resp = ResponseBuffer::new(&mut buf).expect("resp");
        resp.set_no_of_columns(1).expect("reserve");
        let err = resp
            .append_char("s", &[b'a', 0xff, b'b'], Charset::Utf8mb4, None)
            .expect_err("malformed");
        assert_eq!(err.offset(), Some(1));
        assert_eq!(err.column(), Some("s"));
    }
}
