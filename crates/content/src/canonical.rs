//! Deterministic JSON serialization of registry records.
//!
//! Two renderings share one writer:
//! - **compact** (the canonical bytes): sorted keys, `,`/`:` separators, no
//!   whitespace. Only ever used as hash input.
//! - **pretty**: sorted keys, two-space indentation. Used for the files that
//!   get published.
//!
//! Both renderings escape every character outside printable ASCII as `\uXXXX`
//! and print floats in shortest round-trip form, switching to exponent
//! notation outside `1e-4 <= |x| < 1e16`. That is exactly what the previous
//! generation of the catalog tooling emitted, which keeps content identifiers
//! of already published artifacts stable.
//!
//! Two input forms don't survive that promise: integers beyond `u64` are
//! read as floats, and YAML 1.1 booleans such as `yes` or `on` are plain
//! strings under the YAML 1.2 rules used here. Records that rely on either
//! hash differently than they used to.

use crate::error::{ErrorKind, Result};
use serde_yaml::{Mapping, Number, Value};
use tracing::instrument;

/// Nesting deeper than this is rejected rather than recursed into.
pub const MAX_DEPTH: usize = 128;

/// Render `value` as canonical bytes.
///
/// Structurally equal values always produce the same bytes, regardless of
/// the order keys were inserted in.
///
/// Fails with [`MalformedRecord`](ErrorKind::MalformedRecord) on non-finite
/// numbers, non-string mapping keys, YAML tags and nesting deeper than
/// [`MAX_DEPTH`].
#[instrument(level = "trace", skip_all)]
pub fn canonicalize(value: &Value) -> Result<Vec<u8>> {
    let mut writer = Writer::new(None);
    writer.value(value, 0)?;
    Ok(writer.out)
}

/// Render `value` as two-space indented JSON with sorted keys.
pub fn to_pretty(value: &Value) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Some(2));
    writer.value(value, 0)?;
    Ok(writer.out)
}

fn malformed(reason: impl Into<String>) -> ErrorKind {
    ErrorKind::MalformedRecord(reason.into())
}

struct Writer {
    out: Vec<u8>,
    indent: Option<usize>,
}

impl Writer {
    fn new(indent: Option<usize>) -> Self {
        Self { out: Vec::with_capacity(256), indent }
    }

    fn value(&mut self, value: &Value, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            exn::bail!(malformed(format!("nesting exceeds {MAX_DEPTH} levels")));
        }
        match value {
            Value::Null => self.out.extend_from_slice(b"null"),
            Value::Bool(true) => self.out.extend_from_slice(b"true"),
            Value::Bool(false) => self.out.extend_from_slice(b"false"),
            Value::Number(number) => self.number(number)?,
            Value::String(s) => self.string(s),
            Value::Sequence(items) => self.sequence(items, depth)?,
            Value::Mapping(map) => self.mapping(map, depth)?,
            Value::Tagged(tagged) => exn::bail!(malformed(format!("unsupported YAML tag `{}`", tagged.tag))),
        }
        Ok(())
    }

    fn sequence(&mut self, items: &[Value], depth: usize) -> Result<()> {
        if items.is_empty() {
            self.out.extend_from_slice(b"[]");
            return Ok(());
        }
        self.out.push(b'[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push(b',');
            }
            self.newline(depth + 1);
            self.value(item, depth + 1)?;
        }
        self.newline(depth);
        self.out.push(b']');
        Ok(())
    }

    fn mapping(&mut self, map: &Mapping, depth: usize) -> Result<()> {
        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let Value::String(key) = key else {
                exn::bail!(malformed(format!("mapping key {key:?} is not a string")));
            };
            entries.push((key.as_str(), value));
        }
        // Byte order of UTF-8 is code point order.
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

        if entries.is_empty() {
            self.out.extend_from_slice(b"{}");
            return Ok(());
        }
        self.out.push(b'{');
        for (i, (key, value)) in entries.into_iter().enumerate() {
            if i > 0 {
                self.out.push(b',');
            }
            self.newline(depth + 1);
            self.string(key);
            match self.indent {
                Some(_) => self.out.extend_from_slice(b": "),
                None => self.out.push(b':'),
            }
            self.value(value, depth + 1)?;
        }
        self.newline(depth);
        self.out.push(b'}');
        Ok(())
    }

    fn newline(&mut self, depth: usize) {
        if let Some(width) = self.indent {
            self.out.push(b'\n');
            self.out.resize(self.out.len() + width * depth, b' ');
        }
    }

    fn number(&mut self, number: &Number) -> Result<()> {
        if let Some(i) = number.as_i64() {
            self.out.extend_from_slice(i.to_string().as_bytes());
        } else if let Some(u) = number.as_u64() {
            self.out.extend_from_slice(u.to_string().as_bytes());
        } else if let Some(f) = number.as_f64() {
            self.out.extend_from_slice(format_float(f)?.as_bytes());
        } else {
            exn::bail!(malformed(format!("unrepresentable number `{number}`")));
        }
        Ok(())
    }

    fn string(&mut self, s: &str) {
        self.out.push(b'"');
        for c in s.chars() {
            match c {
                '"' => self.out.extend_from_slice(b"\\\""),
                '\\' => self.out.extend_from_slice(b"\\\\"),
                '\n' => self.out.extend_from_slice(b"\\n"),
                '\r' => self.out.extend_from_slice(b"\\r"),
                '\t' => self.out.extend_from_slice(b"\\t"),
                '\u{08}' => self.out.extend_from_slice(b"\\b"),
                '\u{0c}' => self.out.extend_from_slice(b"\\f"),
                ' '..='~' => self.out.push(c as u8),
                _ => {
                    let mut units = [0u16; 2];
                    for unit in c.encode_utf16(&mut units) {
                        self.out.extend_from_slice(format!("\\u{unit:04x}").as_bytes());
                    }
                },
            }
        }
        self.out.push(b'"');
    }
}

/// Shortest round-trip float representation, positional for decimal
/// exponents in `-4..16`, otherwise `d.ddde±XX`.
fn format_float(f: f64) -> Result<String> {
    if !f.is_finite() {
        exn::bail!(malformed(format!("non-finite number `{f}`")));
    }
    // `{:e}` yields the shortest digits that round-trip, e.g. "-1.25e-7".
    let scientific = format!("{f:e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .ok_or_else(|| exn::Exn::from(malformed(format!("unexpected float rendering `{scientific}`"))))?;
    let exponent: i32 = exponent
        .parse()
        .map_err(|_| exn::Exn::from(malformed(format!("unexpected float rendering `{scientific}`"))))?;
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let body = if (-4..16).contains(&exponent) {
        if exponent < 0 {
            let zeros = "0".repeat((-exponent - 1) as usize);
            format!("0.{zeros}{digits}")
        } else {
            let point = exponent as usize + 1;
            if digits.len() <= point {
                let zeros = "0".repeat(point - digits.len());
                format!("{digits}{zeros}.0")
            } else {
                format!("{}.{}", &digits[..point], &digits[point..])
            }
        }
    } else {
        let (first, rest) = digits.split_at(1);
        let fraction = if rest.is_empty() { String::new() } else { format!(".{rest}") };
        let exponent_sign = if exponent < 0 { '-' } else { '+' };
        format!("{first}{fraction}e{exponent_sign}{:02}", exponent.unsigned_abs())
    };
    Ok(format!("{sign}{body}"))
}
