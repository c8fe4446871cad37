//! Packed temporal formats: DATE, TIME2, DATETIME2 and TIMESTAMP2.
//!
//! DATE is three little-endian bytes. The fractional-second types store a
//! big-endian integer part followed by 0-3 big-endian fraction bytes whose
//! count depends on the column's fractional-second precision (fsp).
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

const TIMEF_INT_OFS: i64 = 0x80_0000;
const TIMEF_OFS: i64 = 0x8000_0000_0000;
const DATETIMEF_INT_OFS: i64 = 0x80_0000_0000;
const MAX_TIME_HOURS: i64 = 838;
const MAX_FSP: u32 = 6;

#[derive(Debug, Eq, PartialEq)]
pub enum TemporalError {
    /// Text is not a valid literal for the type.
    Syntax,
    /// Well-formed, but no stored value of this column can equal it.
    NoMatch,
    /// Stored bytes do not decode.
    Corrupt,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct Parts {
    negative: bool,
    year: i64,
    month: i64,
    day: i64,
    hour: i64,
    minute: i64,
    second: i64,
    micros: i64,
}

impl Parts {
    fn has_time(&self) -> bool {
        self.hour != 0 || self.minute != 0 || self.second != 0 || self.micros != 0
    }
}

fn frac_bytes(fsp: u32) -> usize {
    (fsp.min(MAX_FSP) as usize).div_ceil(2)
}

pub fn date_len() -> usize {
    3
}

pub fn time2_len(fsp: u32) -> usize {
    3 + frac_bytes(fsp)
}

pub fn datetime2_len(fsp: u32) -> usize {
    5 + frac_bytes(fsp)
}

pub fn timestamp2_len(fsp: u32) -> usize {
    4 + frac_bytes(fsp)
}

pub fn pack_date(text: &str) -> Result<Vec<u8>, TemporalError> {
    let parts = parse_datetime(text)?;
    if parts.has_time() {
        return Err(TemporalError::NoMatch);
    }
    let packed = (parts.day | (parts.month << 5) | (parts.year << 9)) as u32;
    Ok(packed.to_le_bytes()[..3].to_vec())
}

pub fn unpack_date(bytes: &[u8]) -> Result<String, TemporalError> {
    if bytes.len() != date_len() {
        return Err(TemporalError::Corrupt);
    }
    let packed = u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16;
    let day = packed & 31;
    let month = (packed >> 5) & 15;
    let year = packed >> 9;
    Ok(format!("{year:04}-{month:02}-{day:02}"))
}

pub fn pack_time2(text: &str, fsp: u32) -> Result<Vec<u8>, TemporalError> {
    let parts = parse_time(text)?;
    check_precision(parts.micros, fsp)?;
    let hms = (parts.hour << 12) | (parts.minute << 6) | parts.second;
    let mut packed = (hms << 24) + parts.micros;
    if parts.negative {
        packed = -packed;
    }
    let int_part = packed >> 24;
    let frac = packed % (1 << 24);

    let mut out = Vec::with_capacity(time2_len(fsp));
    match fsp.min(MAX_FSP) {
        0 => push_be(&mut out, (TIMEF_INT_OFS + int_part) as u64, 3),
        1 | 2 => {
            push_be(&mut out, (TIMEF_INT_OFS + int_part) as u64, 3);
            out.push((frac / 10_000) as i8 as u8);
        }
        3 | 4 => {
            push_be(&mut out, (TIMEF_INT_OFS + int_part) as u64, 3);
            push_be(&mut out, u64::from((frac / 100) as i16 as u16), 2);
        }
        _ => push_be(&mut out, (packed + TIMEF_OFS) as u64, 6),
    }
    Ok(out)
}

pub fn unpack_time2(bytes: &[u8], fsp: u32) -> Result<String, TemporalError> {
    if bytes.len() != time2_len(fsp) {
        return Err(TemporalError::Corrupt);
    }
    let int_part = read_be(&bytes[..3]) as i64 - TIMEF_INT_OFS;
    let packed = match fsp.min(MAX_FSP) {
        0 => int_part << 24,
        1 | 2 => {
            let (int_part, frac) = borrow_fraction(int_part, i64::from(bytes[3]), 0x100);
            (int_part << 24) + frac * 10_000
        }
        3 | 4 => {
            let (int_part, frac) = borrow_fraction(int_part, read_be(&bytes[3..5]) as i64, 0x1_0000);
            (int_part << 24) + frac * 100
        }
        _ => read_be(&bytes[..6]) as i64 - TIMEF_OFS,
    };

    let negative = packed < 0;
    let magnitude = packed.abs();
    let hms = magnitude >> 24;
    let micros = magnitude % (1 << 24);
    let hour = (hms >> 12) % (1 << 10);
    let minute = (hms >> 6) % 64;
    let second = hms % 64;
    if minute > 59 || second > 59 || micros > 999_999 {
        return Err(TemporalError::Corrupt);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&format!("{hour:02}:{minute:02}:{second:02}"));
    push_fraction(&mut out, micros, fsp);
    Ok(out)
}

pub fn pack_datetime2(text: &str, fsp: u32) -> Result<Vec<u8>, TemporalError> {
    let parts = parse_datetime(text)?;
    check_precision(parts.micros, fsp)?;
    let ymd = ((parts.year * 13 + parts.month) << 5) | parts.day;
    let hms = (parts.hour << 12) | (parts.minute << 6) | parts.second;
    let int_part = (ymd << 17) | hms;

    let mut out = Vec::with_capacity(datetime2_len(fsp));
    push_be(&mut out, (int_part + DATETIMEF_INT_OFS) as u64, 5);
    push_unsigned_fraction(&mut out, parts.micros, fsp);
    Ok(out)
}

pub fn unpack_datetime2(bytes: &[u8], fsp: u32) -> Result<String, TemporalError> {
    if bytes.len() != datetime2_len(fsp) {
        return Err(TemporalError::Corrupt);
    }
    let int_part = read_be(&bytes[..5]) as i64 - DATETIMEF_INT_OFS;
    if int_part < 0 {
        return Err(TemporalError::Corrupt);
    }
    let micros = read_unsigned_fraction(&bytes[5..], fsp);
    let ymd = int_part >> 17;
    let hms = int_part % (1 << 17);
    let ym = ymd >> 5;
    let day = ymd % 32;
    let month = ym % 13;
    let year = ym / 13;
    let hour = hms >> 12;
    let minute = (hms >> 6) % 64;
    let second = hms % 64;
    if minute > 59 || second > 59 || micros > 999_999 {
        return Err(TemporalError::Corrupt);
    }

    let mut out = format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
    push_fraction(&mut out, micros, fsp);
    Ok(out)
}

/// Binds a civil UTC date-time as epoch seconds; values outside the 32-bit epoch range cannot match.
pub fn pack_timestamp2(text: &str, fsp: u32) -> Result<Vec<u8>, TemporalError> {
    let parts = parse_datetime(text)?;
    check_precision(parts.micros, fsp)?;
    let date = calendar_date(&parts)?;
    let time = Time::from_hms(parts.hour as u8, parts.minute as u8, parts.second as u8)
        .map_err(|_| TemporalError::Syntax)?;
    let seconds = PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp();
    if seconds < 1 || seconds > i64::from(i32::MAX) {
        return Err(TemporalError::NoMatch);
    }

    let mut out = Vec::with_capacity(timestamp2_len(fsp));
    push_be(&mut out, seconds as u64, 4);
    push_unsigned_fraction(&mut out, parts.micros, fsp);
    Ok(out)
}

pub fn unpack_timestamp2(bytes: &[u8], fsp: u32) -> Result<String, TemporalError> {
    if bytes.len() != timestamp2_len(fsp) {
        return Err(TemporalError::Corrupt);
    }
    let seconds = read_be(&bytes[..4]) as i64;
    let micros = read_unsigned_fraction(&bytes[4..], fsp);
    if micros > 999_999 {
        return Err(TemporalError::Corrupt);
    }
    let civil = OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| TemporalError::Corrupt)?;
    let mut out = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        civil.year(),
        u8::from(civil.month()),
        civil.day(),
        civil.hour(),
        civil.minute(),
        civil.second()
    );
    push_fraction(&mut out, micros, fsp);
    Ok(out)
}

/// Accepts `YYYY-MM-DD` optionally followed by ` HH:MM:SS[.ffffff]` (or `T` as separator).
fn parse_datetime(text: &str) -> Result<Parts, TemporalError> {
    let (date, time) = match text.find([' ', 'T']) {
        Some(pos) => (&text[..pos], Some(&text[pos + 1..])),
        None => (text, None),
    };
    let mut fields = date.split('-');
    let (Some(year), Some(month), Some(day), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(TemporalError::Syntax);
    };
    let mut parts = Parts {
        year: number(year, 4)?,
        month: number(month, 2)?,
        day: number(day, 2)?,
        ..Parts::default()
    };
    calendar_date(&parts)?;
    if let Some(time) = time {
        let clock = parse_clock(time)?;
        if clock.hour > 23 {
            return Err(TemporalError::Syntax);
        }
        parts.hour = clock.hour;
        parts.minute = clock.minute;
        parts.second = clock.second;
        parts.micros = clock.micros;
    }
    Ok(parts)
}

/// Accepts `[-]H+:MM:SS[.ffffff]` with hours up to 838.
fn parse_time(text: &str) -> Result<Parts, TemporalError> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut parts = parse_clock(body)?;
    if parts.hour > MAX_TIME_HOURS {
        return Err(TemporalError::Syntax);
    }
    parts.negative = negative && parts.has_time();
    Ok(parts)
}

fn parse_clock(text: &str) -> Result<Parts, TemporalError> {
    let (clock, fraction) = match text.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (text, None),
    };
    let mut fields = clock.split(':');
    let (Some(hour), Some(minute), Some(second), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(TemporalError::Syntax);
    };
    let parts = Parts {
        hour: number(hour, 3)?,
        minute: number(minute, 2)?,
        second: number(second, 2)?,
        micros: match fraction {
            Some(fraction) => micros(fraction)?,
            None => 0,
        },
        ..Parts::default()
    };
    if parts.minute > 59 || parts.second > 59 {
        return Err(TemporalError::Syntax);
    }
    Ok(parts)
}

fn number(text: &str, max_digits: usize) -> Result<i64, TemporalError> {
    if text.is_empty() || text.len() > max_digits || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TemporalError::Syntax);
    }
    text.parse().map_err(|_| TemporalError::Syntax)
}

fn micros(fraction: &str) -> Result<i64, TemporalError> {
    if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TemporalError::Syntax);
    }
    let (kept, excess) = fraction.split_at(fraction.len().min(6));
    if excess.bytes().any(|b| b != b'0') {
        return Err(TemporalError::NoMatch);
    }
    let mut padded = kept.to_string();
    padded.push_str(&"0".repeat(6 - kept.len()));
    padded.parse().map_err(|_| TemporalError::Syntax)
}

fn calendar_date(parts: &Parts) -> Result<Date, TemporalError> {
    let month = Month::try_from(parts.month as u8).map_err(|_| TemporalError::Syntax)?;
    Date::from_calendar_date(parts.year as i32, month, parts.day as u8).map_err(|_| TemporalError::Syntax)
}

/// Fractions finer than the column stores cannot equal any stored value.
fn check_precision(micros: i64, fsp: u32) -> Result<(), TemporalError> {
    let unit = 10i64.pow(MAX_FSP - fsp.min(MAX_FSP));
    if micros % unit != 0 {
        return Err(TemporalError::NoMatch);
    }
    Ok(())
}

fn borrow_fraction(int_part: i64, frac: i64, modulus: i64) -> (i64, i64) {
    if int_part < 0 && frac != 0 {
        (int_part + 1, frac - modulus)
    } else {
        (int_part, frac)
    }
}

fn push_unsigned_fraction(out: &mut Vec<u8>, micros: i64, fsp: u32) {
    match fsp.min(MAX_FSP) {
        0 => {}
        1 | 2 => out.push((micros / 10_000) as u8),
        3 | 4 => push_be(out, (micros / 100) as u64, 2),
        _ => push_be(out, micros as u64, 3),
    }
}

fn read_unsigned_fraction(bytes: &[u8], fsp: u32) -> i64 {
    let raw = read_be(bytes) as i64;
    match fsp.min(MAX_FSP) {
        0 => 0,
        1 | 2 => raw * 10_000,
        3 | 4 => raw * 100,
        _ => raw,
    }
}

fn push_fraction(out: &mut String, micros: i64, fsp: u32) {
    let fsp = fsp.min(MAX_FSP) as usize;
    if fsp > 0 {
        let digits = format!("{micros:06}");
        out.push('.');
        out.push_str(&digits[..fsp]);
    }
}

fn push_be(out: &mut Vec<u8>, value: u64, width: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

#[cfg(test)]
mod tests {
    use super::{
        TemporalError, pack_date, pack_datetime2, pack_time2, pack_timestamp2, unpack_date,
        unpack_datetime2, unpack_time2, unpack_timestamp2,
    };

    #[test]
    fn date_packs_little_endian_fields() {
        let packed = pack_date("2021-03-15").expect("pack");
        assert_eq!(packed.len(), 3);
        let raw = u32::from(packed[0]) | u32::from(packed[1]) << 8 | u32::from(packed[2]) << 16;
        assert_eq!(raw, 15 | 3 << 5 | 2021 << 9);
        assert_eq!(unpack_date(&packed).expect("unpack"), "2021-03-15");
        assert_eq!(
            unpack_date(&pack_date("2021-03-15 00:00:00").expect("zero time")).expect("unpack"),
            "2021-03-15"
        );
    }

    #[test]
    fn date_with_time_component_cannot_match() {
        assert_eq!(pack_date("2021-03-15 10:00:00"), Err(TemporalError::NoMatch));
        assert_eq!(pack_date("2021-02-30"), Err(TemporalError::Syntax));
        assert_eq!(pack_date("yesterday"), Err(TemporalError::Syntax));
        assert_eq!(pack_date(" 2021-03-15"), Err(TemporalError::Syntax));
        assert_eq!(pack_time2("12:34:56 ", 0), Err(TemporalError::Syntax));
    }

    #[test]
    fn time2_round_trips_across_precisions() {
        let cases = [
            ("12:34:56", 0, "12:34:56"),
            ("12:34:56.5", 1, "12:34:56.5"),
            ("-12:34:56.25", 2, "-12:34:56.25"),
            ("-00:00:00.5", 2, "-00:00:00.50"),
            ("838:59:59.1234", 4, "838:59:59.1234"),
            ("-01:02:03.123456", 6, "-01:02:03.123456"),
        ];
        for (text, fsp, rendered) in cases {
            let packed = pack_time2(text, fsp).expect("pack");
            assert_eq!(unpack_time2(&packed, fsp).expect("unpack"), rendered, "{text}");
        }
    }

    #[test]
    fn time2_zero_is_the_offset() {
        assert_eq!(pack_time2("00:00:00", 0).expect("pack"), vec![0x80, 0x00, 0x00]);
        assert!(pack_time2("-00:00:01", 0).expect("pack") < pack_time2("00:00:00", 0).expect("pack"));
    }

    #[test]
    fn datetime2_round_trips() {
        let packed = pack_datetime2("2022-12-31 23:59:58.123", 3).expect("pack");
        assert_eq!(packed.len(), 7);
        assert_eq!(unpack_datetime2(&packed, 3).expect("unpack"), "2022-12-31 23:59:58.123");
        let packed = pack_datetime2("1999-01-02", 0).expect("pack");
        assert_eq!(unpack_datetime2(&packed, 0).expect("unpack"), "1999-01-02 00:00:00");
    }

    #[test]
    fn fraction_finer_than_column_cannot_match() {
        assert_eq!(pack_datetime2("2022-12-31 23:59:58.1234", 3), Err(TemporalError::NoMatch));
        assert!(pack_datetime2("2022-12-31 23:59:58.1230", 3).is_ok());
        assert_eq!(pack_time2("10:00:00.5", 0), Err(TemporalError::NoMatch));
    }

    #[test]
    fn timestamp2_converts_epoch_to_civil_utc() {
        let packed = pack_timestamp2("2009-02-13 23:31:30", 0).expect("pack");
        assert_eq!(packed, 1_234_567_890u32.to_be_bytes().to_vec());
        assert_eq!(unpack_timestamp2(&packed, 0).expect("unpack"), "2009-02-13 23:31:30");
        let packed = pack_timestamp2("2009-02-13 23:31:30.000042", 6).expect("pack");
        assert_eq!(unpack_timestamp2(&packed, 6).expect("unpack"), "2009-02-13 23:31:30.000042");
    }

    #[test]
    fn timestamp2_outside_epoch_range_cannot_match() {
        assert_eq!(pack_timestamp2("1969-12-31 23:59:59", 0), Err(TemporalError::NoMatch));
        assert_eq!(pack_timestamp2("2038-01-19 03:14:08", 0), Err(TemporalError::NoMatch));
        assert!(pack_timestamp2("2038-01-19 03:14:07", 0).is_ok());
    }
}
