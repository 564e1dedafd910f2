//! OSC 1.0 message encoding and decoding.
//!
//! Layout: address string, type-tag string (leading `,`), then argument
//! payloads. Strings are NUL-terminated and padded to a 4-byte boundary;
//! blobs are a big-endian i32 length followed by padded bytes.

use crate::error::{CuebridgeError, Result};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OscType {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Vec<u8>),
}

impl OscType {
    pub fn tag(&self) -> char {
        match self {
            OscType::Int(_) => 'i',
            OscType::Float(_) => 'f',
            OscType::String(_) => 's',
            OscType::Blob(_) => 'b',
        }
    }
}

impl From<i32> for OscType {
    fn from(v: i32) -> Self {
        OscType::Int(v)
    }
}

impl From<f32> for OscType {
    fn from(v: f32) -> Self {
        OscType::Float(v)
    }
}

impl From<&str> for OscType {
    fn from(v: &str) -> Self {
        OscType::String(v.to_string())
    }
}

impl From<String> for OscType {
    fn from(v: String) -> Self {
        OscType::String(v)
    }
}

impl fmt::Display for OscType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 로그 요약용: 긴 문자열은 잘라서 표시
        const MAX_CHARS: usize = 40;
        match self {
            OscType::Int(v) => write!(f, "i:{}", v),
            OscType::Float(v) => write!(f, "f:{}", v),
            OscType::String(s) if s.chars().count() > MAX_CHARS => {
                let head: String = s.chars().take(MAX_CHARS).collect();
                write!(f, "s:{:?}... ({} chars)", head, s.chars().count())
            }
            OscType::String(s) => write!(f, "s:{:?}", s),
            OscType::Blob(b) => write!(f, "b:<{} bytes>", b.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub addr: String,
    pub args: Vec<OscType>,
}

impl OscMessage {
    pub fn new(addr: impl Into<String>, args: Vec<OscType>) -> Self {
        Self {
            addr: addr.into(),
            args,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if !self.addr.starts_with('/') {
            return Err(CuebridgeError::Encode(format!(
                "address '{}' must start with '/'",
                self.addr
            )));
        }

        let mut buf = Vec::with_capacity(64);
        write_padded_str(&mut buf, &self.addr)?;

        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        tags.extend(self.args.iter().map(OscType::tag));
        write_padded_str(&mut buf, &tags)?;

        for arg in &self.args {
            match arg {
                OscType::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
                OscType::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
                OscType::String(s) => write_padded_str(&mut buf, s)?,
                OscType::Blob(bytes) => {
                    let len = i32::try_from(bytes.len()).map_err(|_| {
                        CuebridgeError::Encode(format!("blob of {} bytes is too large", bytes.len()))
                    })?;
                    buf.extend_from_slice(&len.to_be_bytes());
                    buf.extend_from_slice(bytes);
                    pad_to_4(&mut buf);
                }
            }
        }
        Ok(buf)
    }

    pub fn decode(packet: &[u8]) -> Result<Self> {
        let mut reader = Reader { buf: packet, pos: 0 };

        let addr = reader.padded_str()?;
        if !addr.starts_with('/') {
            return Err(CuebridgeError::Decode(format!(
                "'{}' is not a message address",
                addr
            )));
        }

        // 타입 태그가 없는 구형 메시지는 인자 없음으로 취급
        if reader.is_at_end() {
            return Ok(Self::new(addr, Vec::new()));
        }

        let tags = reader.padded_str()?;
        let tags = tags
            .strip_prefix(',')
            .ok_or_else(|| CuebridgeError::Decode("type tag string must start with ','".into()))?;

        let mut args = Vec::with_capacity(tags.len());
        for tag in tags.chars() {
            let arg = match tag {
                'i' => OscType::Int(i32::from_be_bytes(reader.word()?)),
                'f' => OscType::Float(f32::from_be_bytes(reader.word()?)),
                's' => OscType::String(reader.padded_str()?),
                'b' => {
                    let len = i32::from_be_bytes(reader.word()?);
                    let len = usize::try_from(len)
                        .map_err(|_| CuebridgeError::Decode(format!("negative blob length {}", len)))?;
                    let bytes = reader.take(len)?.to_vec();
                    reader.skip_padding(len)?;
                    OscType::Blob(bytes)
                }
                other => {
                    return Err(CuebridgeError::Decode(format!(
                        "unsupported type tag '{}'",
                        other
                    )));
                }
            };
            args.push(arg);
        }

        if !reader.is_at_end() {
            return Err(CuebridgeError::Decode(format!(
                "{} trailing bytes after arguments",
                packet.len() - reader.pos
            )));
        }
        Ok(Self::new(addr, args))
    }

    /// 로그용 한 줄 요약 (예: `/bpm [f:120]`)
    pub fn summary(&self) -> String {
        let args: Vec<String> = self.args.iter().map(ToString::to_string).collect();
        format!("{} [{}]", self.addr, args.join(", "))
    }
}

fn write_padded_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(CuebridgeError::Encode(
            "OSC strings cannot contain NUL bytes".to_string(),
        ));
    }
    buf.extend_from_slice(s.as_bytes());
    // 최소 1바이트의 NUL 종료 후 4바이트 정렬
    buf.push(0);
    pad_to_4(buf);
    Ok(())
}

fn pad_to_4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| CuebridgeError::Decode("packet truncated".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn word(&mut self) -> Result<[u8; 4]> {
        let bytes = self.take(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn skip_padding(&mut self, consumed: usize) -> Result<()> {
        let pad = (4 - consumed % 4) % 4;
        self.take(pad).map(|_| ())
    }

    fn padded_str(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| CuebridgeError::Decode("unterminated string".to_string()))?;
        let text = std::str::from_utf8(&rest[..nul])
            .map_err(|e| CuebridgeError::Decode(format!("invalid UTF-8: {}", e)))?
            .to_string();
        // 문자열 + NUL을 4바이트 경계까지
        let total = (nul + 1).div_ceil(4) * 4;
        self.take(total)?;
        Ok(text)
    }
}
