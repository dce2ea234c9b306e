// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal GDB/MI output parser: result records, async records, stream
//! output, and the `(gdb)` prompt. Covers the record shapes this crate
//! actually issues.

use crate::error::MpirError;

/// One `key=value` list. Keys may repeat (gdb does this for lists of
/// frames); lookups return the first match.
pub type MiTuple = Vec<(String, MiValue)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiValue {
    Const(String),
    Tuple(MiTuple),
    List(Vec<MiValue>),
}

impl MiValue {
    pub fn as_const(&self) -> Option<&str> {
        match self {
            MiValue::Const(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&MiTuple> {
        match self {
            MiValue::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MiValue]> {
        match self {
            MiValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Lookup in a tuple by key (first match).
pub fn field<'a>(fields: &'a MiTuple, key: &str) -> Option<&'a MiValue> {
    fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiRecord {
    /// `^done`, `^running`, `^error`, `^exit` plus fields.
    Result { class: String, fields: MiTuple },
    /// `*stopped`, `=thread-group-started`, … plus fields.
    Async { class: String, fields: MiTuple },
    /// `~"…"`, `&"…"`, `@"…"` console/log/target output.
    Stream(String),
    /// The `(gdb)` ready prompt.
    Prompt,
}

pub fn parse_record(line: &str) -> Result<MiRecord, MpirError> {
    let line = line.trim_end();
    // Optional numeric token prefix.
    let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());

    if rest == "(gdb)" || rest == "(gdb) " {
        return Ok(MiRecord::Prompt);
    }

    let Some(sigil) = rest.chars().next() else {
        return Err(MpirError::Protocol("empty MI record".to_string()));
    };
    let body = &rest[sigil.len_utf8()..];

    match sigil {
        '^' => {
            let (class, fields) = parse_class_fields(body)?;
            Ok(MiRecord::Result { class, fields })
        }
        '*' | '=' | '+' => {
            let (class, fields) = parse_class_fields(body)?;
            Ok(MiRecord::Async { class, fields })
        }
        '~' | '&' | '@' => {
            let mut cursor = Cursor::new(body);
            let text = cursor.parse_cstring()?;
            Ok(MiRecord::Stream(text))
        }
        other => Err(MpirError::Protocol(format!("unrecognized MI sigil {other:?} in {line:?}"))),
    }
}

fn parse_class_fields(body: &str) -> Result<(String, MiTuple), MpirError> {
    match body.split_once(',') {
        Some((class, rest)) => {
            let mut cursor = Cursor::new(rest);
            let fields = cursor.parse_fields('\0')?;
            Ok((class.to_string(), fields))
        }
        None => Ok((body.to_string(), Vec::new())),
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn expect(&mut self, expected: char) -> Result<(), MpirError> {
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            other => Err(MpirError::Protocol(format!(
                "expected {expected:?}, found {other:?} at byte {} of {:?}",
                self.pos, self.input
            ))),
        }
    }

    /// Parse `key=value` pairs until `close` (or end of input for NUL).
    fn parse_fields(&mut self, close: char) -> Result<MiTuple, MpirError> {
        let mut fields = Vec::new();
        loop {
            match self.peek() {
                None => return Ok(fields),
                Some(ch) if ch == close => {
                    self.bump();
                    return Ok(fields);
                }
                Some(',') => {
                    self.bump();
                }
                _ => {
                    let key = self.parse_key()?;
                    self.expect('=')?;
                    let value = self.parse_value()?;
                    fields.push((key, value));
                }
            }
        }
    }

    fn parse_key(&mut self) -> Result<String, MpirError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == '=' {
                break;
            }
            self.bump();
        }
        if self.pos == start {
            return Err(MpirError::Protocol(format!("empty key in {:?}", self.input)));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_value(&mut self) -> Result<MiValue, MpirError> {
        match self.peek() {
            Some('"') => Ok(MiValue::Const(self.parse_cstring()?)),
            Some('{') => {
                self.bump();
                Ok(MiValue::Tuple(self.parse_fields('}')?))
            }
            Some('[') => {
                self.bump();
                self.parse_list()
            }
            other => Err(MpirError::Protocol(format!(
                "expected value, found {other:?} in {:?}",
                self.input
            ))),
        }
    }

    fn parse_list(&mut self) -> Result<MiValue, MpirError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(MpirError::Protocol(format!(
                        "unterminated list in {:?}",
                        self.input
                    )))
                }
                Some(']') => {
                    self.bump();
                    return Ok(MiValue::List(items));
                }
                Some(',') => {
                    self.bump();
                }
                Some('"' | '{' | '[') => items.push(self.parse_value()?),
                // Lists of results: wrap each `key=value` as a 1-tuple.
                _ => {
                    let key = self.parse_key()?;
                    self.expect('=')?;
                    let value = self.parse_value()?;
                    items.push(MiValue::Tuple(vec![(key, value)]));
                }
            }
        }
    }

    fn parse_cstring(&mut self) -> Result<String, MpirError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(MpirError::Protocol(format!(
                        "unterminated string in {:?}",
                        self.input
                    )))
                }
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(ch @ ('"' | '\\')) => out.push(ch),
                    Some(ch) => {
                        // Unknown escape: keep both characters.
                        out.push('\\');
                        out.push(ch);
                    }
                    None => {
                        return Err(MpirError::Protocol(format!(
                            "dangling escape in {:?}",
                            self.input
                        )))
                    }
                },
                Some(ch) => out.push(ch),
            }
        }
    }
}

/// Pull the C-string out of a pointer evaluation like
/// `0x601050 "nid00001"`. A bare `0x0` is a null pointer.
pub fn cstring_from_value(value: &str) -> Result<String, MpirError> {
    if let Some(start) = value.find('"') {
        if let Some(end) = value.rfind('"') {
            if end > start {
                return Ok(value[start + 1..end].to_string());
            }
        }
    }
    Err(MpirError::Protocol(format!("no string payload in value {value:?}")))
}

/// Parse an integer evaluation like `4` or `0x1f`.
pub fn int_from_value(value: &str) -> Result<i64, MpirError> {
    let trimmed = value.trim();
    let parsed = if let Some(hex) = trimmed.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        trimmed.parse()
    };
    parsed.map_err(|_| MpirError::Protocol(format!("not an integer value: {value:?}")))
}

#[cfg(test)]
#[path = "mi_tests.rs"]
mod tests;
