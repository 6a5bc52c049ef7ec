//! Text conversion for scalar parameter kinds.

use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde_json::Value;
use uuid::Uuid;

use super::{ArgValue, ParamKind};

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Textual form of a JSON value: string contents, or the literal otherwise.
///
/// `null` has no text.
pub(super) fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        other => Some(Cow::Owned(other.to_string())),
    }
}

/// Convert text into a value of the given kind.
pub(super) fn convert(kind: ParamKind, text: &str) -> Result<ArgValue, String> {
    match kind {
        ParamKind::Bool => parse_bool(text).map(ArgValue::Bool),
        ParamKind::Char => parse_char(text).map(ArgValue::Char),
        ParamKind::I8 => parse_number::<i8>(text).map(|v| ArgValue::Int(v.into())),
        ParamKind::I16 => parse_number::<i16>(text).map(|v| ArgValue::Int(v.into())),
        ParamKind::I32 => parse_number::<i32>(text).map(|v| ArgValue::Int(v.into())),
        ParamKind::I64 => parse_number::<i64>(text).map(ArgValue::Int),
        ParamKind::U8 => parse_number::<u8>(text).map(|v| ArgValue::UInt(v.into())),
        ParamKind::U16 => parse_number::<u16>(text).map(|v| ArgValue::UInt(v.into())),
        ParamKind::U32 => parse_number::<u32>(text).map(|v| ArgValue::UInt(v.into())),
        ParamKind::U64 => parse_number::<u64>(text).map(ArgValue::UInt),
        ParamKind::F32 => parse_number::<f32>(text).map(|v| ArgValue::Float(v.into())),
        ParamKind::F64 => parse_number::<f64>(text).map(ArgValue::Float),
        ParamKind::String => Ok(ArgValue::String(text.to_string())),
        ParamKind::DateTime => parse_datetime(text).map(ArgValue::DateTime),
        ParamKind::Uuid => Uuid::parse_str(text.trim())
            .map(ArgValue::Uuid)
            .map_err(|e| e.to_string()),
        ParamKind::Enum(variants) => parse_enum(variants, text).map(ArgValue::Enum),
        ParamKind::Composite => Err("composite values are not converted from text".to_string()),
    }
}

fn parse_bool(text: &str) -> Result<bool, String> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(format!("'{}' is not a boolean", text))
    }
}

fn parse_char(text: &str) -> Result<char, String> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(format!("'{}' is not a single character", text)),
    }
}

fn parse_number<T>(text: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    text.trim()
        .parse::<T>()
        .map_err(|e| format!("'{}': {}", text, e))
}

fn parse_datetime(text: &str) -> Result<DateTime<FixedOffset>, String> {
    let trimmed = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt);
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
        .ok_or_else(|| format!("'{}' is not a date/time", text))
}

fn parse_enum(variants: &[&str], text: &str) -> Result<usize, String> {
    let trimmed = text.trim();
    variants
        .iter()
        .position(|name| name.eq_ignore_ascii_case(trimmed))
        .ok_or_else(|| format!("'{}' is not one of {:?}", text, variants))
}
