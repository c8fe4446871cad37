//! Fixed-point DECIMAL packing: nine decimal digits per four big-endian bytes.
//!
//! The integer part leads with a partial group holding the leftover high
//! digits, the fraction part trails with a partial group holding the
//! leftover low digits. Negative values invert every byte; the sign is the
//! inverted top bit of the first byte so packed values sort as bytes.

const DIGITS_PER_GROUP: usize = 9;
const GROUP_BYTES: usize = 4;
const DIG2BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

#[derive(Debug, Eq, PartialEq)]
pub enum DecimalError {
    /// Text is not a decimal literal.
    Syntax,
    /// More integer digits than the column's precision allows.
    Overflow,
    /// Non-zero fraction digits beyond the column's scale.
    Scale,
    /// Stored bytes do not decode under the column's precision and scale.
    Corrupt,
}

/// Packed size in bytes for `precision` total digits with `scale` fraction digits.
pub fn packed_len(precision: u32, scale: u32) -> usize {
    let intg = precision.saturating_sub(scale) as usize;
    let frac = scale as usize;
    (intg / DIGITS_PER_GROUP) * GROUP_BYTES
        + DIG2BYTES[intg % DIGITS_PER_GROUP]
        + (frac / DIGITS_PER_GROUP) * GROUP_BYTES
        + DIG2BYTES[frac % DIGITS_PER_GROUP]
}

pub fn pack(text: &str, precision: u32, scale: u32, unsigned: bool) -> Result<Vec<u8>, DecimalError> {
    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if negative && unsigned {
        return Err(DecimalError::Syntax);
    }
    let (int_digits, frac_digits) = match body.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (body, ""),
    };
    if int_digits.is_empty() && frac_digits.is_empty() {
        return Err(DecimalError::Syntax);
    }
    if !int_digits.bytes().chain(frac_digits.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(DecimalError::Syntax);
    }

    let intg = precision.saturating_sub(scale) as usize;
    let frac = scale as usize;

    let int_digits = int_digits.trim_start_matches('0');
    if int_digits.len() > intg {
        return Err(DecimalError::Overflow);
    }
    let frac_digits = if frac_digits.len() > frac {
        let (kept, excess) = frac_digits.split_at(frac);
        if excess.bytes().any(|b| b != b'0') {
            return Err(DecimalError::Scale);
        }
        kept
    } else {
        frac_digits
    };

    let mut int_padded = "0".repeat(intg - int_digits.len());
    int_padded.push_str(int_digits);
    let mut frac_padded = frac_digits.to_string();
    frac_padded.push_str(&"0".repeat(frac - frac_digits.len()));

    let is_zero = int_padded.bytes().chain(frac_padded.bytes()).all(|b| b == b'0');
    let negative = negative && !is_zero;

    let mut out = Vec::with_capacity(packed_len(precision, scale));
    let lead = intg % DIGITS_PER_GROUP;
    write_group(&mut out, &int_padded[..lead]);
    for chunk in int_padded.as_bytes()[lead..].chunks(DIGITS_PER_GROUP) {
        write_group_bytes(&mut out, chunk);
    }
    for chunk in frac_padded.as_bytes().chunks(DIGITS_PER_GROUP) {
        write_group_bytes(&mut out, chunk);
    }

    if negative {
        for byte in out.iter_mut() {
            *byte ^= 0xff;
        }
    }
    if let Some(first) = out.first_mut() {
        *first ^= 0x80;
    }
    Ok(out)
}

pub fn unpack(bytes: &[u8], precision: u32, scale: u32) -> Result<String, DecimalError> {
    if bytes.len() != packed_len(precision, scale) || bytes.is_empty() {
        return Err(DecimalError::Corrupt);
    }
    let mut data = bytes.to_vec();
    let negative = data[0] & 0x80 == 0;
    data[0] ^= 0x80;
    if negative {
        for byte in data.iter_mut() {
            *byte ^= 0xff;
        }
    }

    let intg = precision.saturating_sub(scale) as usize;
    let frac = scale as usize;
    let mut cursor = 0;
    let mut int_text = String::with_capacity(intg);
    let lead = intg % DIGITS_PER_GROUP;
    read_group(&data, &mut cursor, lead, &mut int_text)?;
    for _ in 0..intg / DIGITS_PER_GROUP {
        read_group(&data, &mut cursor, DIGITS_PER_GROUP, &mut int_text)?;
    }
    let mut frac_text = String::with_capacity(frac);
    for _ in 0..frac / DIGITS_PER_GROUP {
        read_group(&data, &mut cursor, DIGITS_PER_GROUP, &mut frac_text)?;
    }
    read_group(&data, &mut cursor, frac % DIGITS_PER_GROUP, &mut frac_text)?;

    let int_trimmed = int_text.trim_start_matches('0');
    let int_part = if int_trimmed.is_empty() { "0" } else { int_trimmed };
    let is_zero = int_trimmed.is_empty() && frac_text.bytes().all(|b| b == b'0');

    let mut out = String::with_capacity(int_part.len() + frac_text.len() + 2);
    if negative && !is_zero {
        out.push('-');
    }
    out.push_str(int_part);
    if frac > 0 {
        out.push('.');
        out.push_str(&frac_text);
    }
    Ok(out)
}

fn write_group(out: &mut Vec<u8>, digits: &str) {
    write_group_bytes(out, digits.as_bytes());
}

fn write_group_bytes(out: &mut Vec<u8>, digits: &[u8]) {
    let width = DIG2BYTES[digits.len()];
    if width == 0 {
        return;
    }
    let value = digits
        .iter()
        .fold(0u32, |acc, digit| acc * 10 + u32::from(digit - b'0'));
    out.extend_from_slice(&value.to_be_bytes()[GROUP_BYTES - width..]);
}

fn read_group(data: &[u8], cursor: &mut usize, digits: usize, out: &mut String) -> Result<(), DecimalError> {
    let width = DIG2BYTES[digits];
    if width == 0 {
        return Ok(());
    }
    let bytes = data.get(*cursor..*cursor + width).ok_or(DecimalError::Corrupt)?;
    let value = bytes.iter().fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
    if u64::from(value) >= 10u64.pow(digits as u32) {
        return Err(DecimalError::Corrupt);
    }
    *cursor += width;
    out.push_str(&format!("{value:0digits$}"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DecimalError, pack, packed_len, unpack};
    use proptest::prelude::*;

    #[test]
    fn packed_sizes_match_group_table() {
        assert_eq!(packed_len(10, 2), 5);
        assert_eq!(packed_len(18, 9), 8);
        assert_eq!(packed_len(14, 4), 7);
        assert_eq!(packed_len(65, 30), 30);
    }

    #[test]
    fn known_encodings() {
        // DECIMAL(10,2): eight integer digits in one 4-byte group, two fraction digits in one byte
        assert_eq!(
            pack("1234567.89", 10, 2, false).expect("pack"),
            vec![0x80, 0x12, 0xd6, 0x87, 0x59]
        );
        let positive = pack("1.5", 4, 1, false).expect("pack");
        let negative = pack("-1.5", 4, 1, false).expect("pack");
        assert_eq!(positive, vec![0x80, 0x01, 0x05]);
        assert_eq!(negative, vec![0x7f, 0xfe, 0xfa]);
        assert!(negative < positive);
    }

    #[test]
    fn renders_at_column_scale() {
        let packed = pack("42", 5, 3, false).expect("pack");
        assert_eq!(unpack(&packed, 5, 3).expect("unpack"), "42.000");
        let packed = pack("-0.000", 5, 3, false).expect("pack");
        assert_eq!(unpack(&packed, 5, 3).expect("unpack"), "0.000");
        let packed = pack("-12345678901.5", 20, 1, false).expect("pack");
        assert_eq!(unpack(&packed, 20, 1).expect("unpack"), "-12345678901.5");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(pack("12a", 5, 0, false), Err(DecimalError::Syntax));
        assert_eq!(pack("", 5, 0, false), Err(DecimalError::Syntax));
        assert_eq!(pack(" 1.5", 4, 1, false), Err(DecimalError::Syntax));
        assert_eq!(pack("1.5 ", 4, 1, false), Err(DecimalError::Syntax));
        assert_eq!(pack("-1", 5, 0, true), Err(DecimalError::Syntax));
        assert_eq!(pack("123456", 5, 0, false), Err(DecimalError::Overflow));
        assert_eq!(pack("1.25", 5, 1, false), Err(DecimalError::Scale));
        assert_eq!(
            unpack(&pack("1.20", 5, 1, false).expect("trailing zero trimmed"), 5, 1),
            Ok("1.2".to_string())
        );
        assert_eq!(unpack(&[0x80], 5, 1), Err(DecimalError::Corrupt));
    }

    proptest! {
        #[test]
        fn integers_round_trip(value in -999_999_999_999_999i64..=999_999_999_999_999i64) {
            let text = value.to_string();
            let packed = pack(&text, 15, 0, false).expect("pack");
            prop_assert_eq!(unpack(&packed, 15, 0).expect("unpack"), text);
        }

        #[test]
        fn packed_bytes_sort_like_values(a in -99_999i64..=99_999, b in -99_999i64..=99_999) {
            let pa = pack(&a.to_string(), 7, 2, false).expect("pack");
            let pb = pack(&b.to_string(), 7, 2, false).expect("pack");
            prop_assert_eq!(a.cmp(&b), pa.cmp(&pb));
        }
    }
}
