//! 紧凑线格式的基本单元。
//!
//! | 字段 | 编码 |
//! |---|---|
//! | 魔数 | `E0 00 00 01` |
//! | 标志 | 1 字节：bit0 = SOAP 1.2，bit1 = 有状态 |
//! | 整数 | LEB128 无符号变长 |
//! | 字符串/字节 | 长度前缀 + 原始字节 |
//! | 名字/值引用 | `0` 字面量（不插入），`1` 字面量（插入词表），`k ≥ 2` 引用下标 `k - 2` |

use bytes::{BufMut, BytesMut};
use soapline_core::{SoapError, codes};

pub(crate) const MAGIC: [u8; 4] = [0xE0, 0x00, 0x00, 0x01];
pub(crate) const FLAG_SOAP12: u8 = 0b01;
pub(crate) const FLAG_STATEFUL: u8 = 0b10;

pub(crate) const REF_LITERAL: u64 = 0;
pub(crate) const REF_LITERAL_INSERT: u64 = 1;
pub(crate) const REF_INDEX_BASE: u64 = 2;

pub(crate) fn malformed(detail: impl Into<String>) -> SoapError {
    SoapError::new(
        codes::MESSAGE_CREATION,
        format!("couldn't create SOAP message: {}", detail.into()),
    )
}

pub(crate) fn put_varint(out: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        out.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

pub(crate) fn put_bytes(out: &mut BytesMut, bytes: &[u8]) {
    put_varint(out, bytes.len() as u64);
    out.put_slice(bytes);
}

pub(crate) fn put_str(out: &mut BytesMut, text: &str) {
    put_bytes(out, text.as_bytes());
}

/// 在借用的输入上前进的读取游标。
pub(crate) struct WireReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.pos == self.input.len()
    }

    pub(crate) fn u8(&mut self) -> Result<u8, SoapError> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or_else(|| malformed(format!("truncated compact frame at byte {}", self.pos)))?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn varint(&mut self) -> Result<u64, SoapError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(malformed("varint longer than 64 bits"))
    }

    /// 读取一个用作长度或计数的整数，不得超过剩余字节数。
    pub(crate) fn length(&mut self) -> Result<usize, SoapError> {
        let value = self.varint()?;
        let remaining = self.input.len() - self.pos;
        usize::try_from(value)
            .ok()
            .filter(|len| *len <= remaining)
            .ok_or_else(|| malformed(format!("length {value} exceeds remaining {remaining} bytes")))
    }

    pub(crate) fn bytes(&mut self) -> Result<&'a [u8], SoapError> {
        let len = self.length()?;
        let slice = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn str(&mut self) -> Result<&'a str, SoapError> {
        let bytes = self.bytes()?;
        std::str::from_utf8(bytes).map_err(|err| malformed("string is not UTF-8").with_cause(err))
    }

    pub(crate) fn magic(&mut self) -> Result<(), SoapError> {
        for expected in MAGIC {
            if self.u8()? != expected {
                return Err(malformed("missing compact frame magic"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_uses_leb128() {
        let mut out = BytesMut::new();
        put_varint(&mut out, 0);
        put_varint(&mut out, 127);
        put_varint(&mut out, 300);
        assert_eq!(&out[..], &[0x00, 0x7F, 0xAC, 0x02]);

        let mut reader = WireReader::new(&out);
        assert_eq!(reader.varint().expect("0"), 0);
        assert_eq!(reader.varint().expect("127"), 127);
        assert_eq!(reader.varint().expect("300"), 300);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn truncated_and_oversized_lengths_are_rejected() {
        let mut reader = WireReader::new(&[0x80]);
        assert_eq!(reader.varint().expect_err("截断").code(), codes::MESSAGE_CREATION);

        let mut reader = WireReader::new(&[0x05, b'a', b'b']);
        assert_eq!(reader.str().expect_err("长度越界").code(), codes::MESSAGE_CREATION);

        let mut reader = WireReader::new(&[0xFF; 11]);
        assert_eq!(reader.varint().expect_err("过长").code(), codes::MESSAGE_CREATION);
    }
}
