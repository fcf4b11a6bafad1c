//! Primitive field encoders/decoders shared by request and response bodies.
//!
//! Every multi-byte scalar is big-endian; every variable-length field is a
//! big-endian `u32` length followed by that many bytes. This module is the
//! only place that reasons about host vs. network byte order.

use crate::error::BrokerError;

pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BrokerError> {
        if self.buf.len() < n {
            return Err(BrokerError::protocol("truncated message body"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8, BrokerError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, BrokerError> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32, BrokerError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn i32(&mut self) -> Result<i32, BrokerError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64, BrokerError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn i64(&mut self) -> Result<i64, BrokerError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Optional scalar encoded as a presence byte followed by the value.
    pub fn option_u16(&mut self) -> Result<Option<u16>, BrokerError> {
        if self.bool()? {
            Ok(Some(u16::from_be_bytes(self.take(2)?.try_into().unwrap())))
        } else {
            Ok(None)
        }
    }

    pub fn string(&mut self) -> Result<String, BrokerError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| BrokerError::protocol("field is not valid UTF-8"))
    }

    pub fn option_string(&mut self) -> Result<Option<String>, BrokerError> {
        if self.bool()? {
            Ok(Some(self.string()?))
        } else {
            Ok(None)
        }
    }

    pub fn string_list(&mut self) -> Result<Vec<String>, BrokerError> {
        let count = self.u32()? as usize;
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            out.push(self.string()?);
        }
        Ok(out)
    }

    /// Remaining bytes, for a trailing raw-bytes field.
    pub fn remaining(&self) -> &'a [u8] {
        self.buf
    }
}

#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(v as u8)
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn option_u16(&mut self, v: Option<u16>) -> &mut Self {
        match v {
            Some(v) => {
                self.bool(true);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
            None => {
                self.bool(false);
            }
        }
        self
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn option_string(&mut self, s: Option<&str>) -> &mut Self {
        match s {
            Some(s) => {
                self.bool(true);
                self.string(s);
            }
            None => {
                self.bool(false);
            }
        }
        self
    }

    pub fn string_list<S: AsRef<str>>(&mut self, items: &[S]) -> &mut Self {
        self.u32(items.len() as u32);
        for item in items {
            self.string(item.as_ref());
        }
        self
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut w = Writer::new();
        w.u32(7).bool(true).i32(-3).u64(9_000_000_000);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.u32().unwrap(), 7);
        assert!(r.bool().unwrap());
        assert_eq!(r.i32().unwrap(), -3);
        assert_eq!(r.u64().unwrap(), 9_000_000_000);
    }

    #[test]
    fn string_and_option_round_trip() {
        let mut w = Writer::new();
        w.string("/tmp/m1")
            .option_string(None)
            .option_string(Some("subtype"))
            .option_u16(Some(2049))
            .option_u16(None);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.string().unwrap(), "/tmp/m1");
        assert_eq!(r.option_string().unwrap(), None);
        assert_eq!(r.option_string().unwrap(), Some("subtype".to_string()));
        assert_eq!(r.option_u16().unwrap(), Some(2049));
        assert_eq!(r.option_u16().unwrap(), None);
    }

    #[test]
    fn string_list_round_trip() {
        let mut w = Writer::new();
        w.string_list(&["/a", "/b", "/c"]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.string_list().unwrap(), vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn truncated_body_is_protocol_error() {
        let mut r = Reader::new(&[0, 0, 0]);
        assert!(r.u32().is_err());
    }
}
