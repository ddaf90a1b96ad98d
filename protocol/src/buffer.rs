//! Bounds-checked primitive reads and writes shared by every packet type.
//!
//! Integers are little-endian unless the method name says otherwise. Reads
//! operate on a `&[u8]` cursor that is advanced past whatever was consumed.

use crate::{ProtocolError, Result};
use bytes::{Buf, BufMut};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Encoded size of an address structure.
pub const SOCKADDR_SIZE: usize = 16;

const AF_INET: u16 = 2;

/// Splits `n` bytes off the front of the cursor.
pub(crate) fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(ProtocolError::InvalidPacketSize);
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

/// Encoded size of a null-terminated string.
pub(crate) fn cstring_size(s: &str) -> usize {
    s.len() + 1
}

/// Converts a collection length into its `u8` count prefix.
pub(crate) fn count_u8(len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| ProtocolError::WrongSize)
}

/// Converts a blob length into its `u16` length prefix.
pub(crate) fn count_u16(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| ProtocolError::WrongSize)
}

/// Resizes `items` to `n` and decodes each element in place, so nested
/// allocations survive between decodes.
pub(crate) fn read_vec_into<T, F>(items: &mut Vec<T>, n: usize, mut read: F) -> Result<()>
where
    T: Default,
    F: FnMut(&mut T) -> Result<()>,
{
    items.truncate(n);
    items.resize_with(n, T::default);
    for item in items.iter_mut() {
        read(item)?;
    }
    Ok(())
}

pub(crate) trait ReadExt {
    fn read_u8(&mut self) -> Result<u8>;
    fn read_bool(&mut self) -> Result<bool>;
    fn read_u16(&mut self) -> Result<u16>;
    fn read_u16_be(&mut self) -> Result<u16>;
    fn read_u32(&mut self) -> Result<u32>;
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]>;
    fn skip(&mut self, n: usize) -> Result<()>;
    fn read_bytes_into(&mut self, n: usize, out: &mut Vec<u8>) -> Result<()>;
    fn read_cstring_into(&mut self, out: &mut String) -> Result<()>;
    fn read_cbytes_into(&mut self, out: &mut Vec<u8>) -> Result<()>;
    fn read_sockaddr(&mut self) -> Result<Option<SocketAddrV4>>;
}

impl ReadExt for &[u8] {
    fn read_u8(&mut self) -> Result<u8> {
        Ok(take(self, 1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(take(self, 2)?.get_u16_le())
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        Ok(take(self, 2)?.get_u16())
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(take(self, 4)?.get_u32_le())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(take(self, N)?);
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        take(self, n).map(|_| ())
    }

    fn read_bytes_into(&mut self, n: usize, out: &mut Vec<u8>) -> Result<()> {
        let bytes = take(self, n)?;
        out.clear();
        out.extend_from_slice(bytes);
        Ok(())
    }

    fn read_cstring_into(&mut self, out: &mut String) -> Result<()> {
        let end = self
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::MalformedData)?;
        let bytes = take(self, end + 1)?;
        out.clear();
        out.push_str(&String::from_utf8_lossy(&bytes[..end]));
        Ok(())
    }

    fn read_cbytes_into(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let end = self
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::MalformedData)?;
        let bytes = take(self, end + 1)?;
        out.clear();
        out.extend_from_slice(&bytes[..end]);
        Ok(())
    }

    fn read_sockaddr(&mut self) -> Result<Option<SocketAddrV4>> {
        let mut raw = take(self, SOCKADDR_SIZE)?;
        let family = raw.read_u16()?;
        // Port is the single big-endian field of the protocol.
        let port = raw.read_u16_be()?;
        let ip: [u8; 4] = raw.read_array()?;

        match family {
            0 => Ok(None),
            AF_INET => Ok(Some(SocketAddrV4::new(Ipv4Addr::from(ip), port))),
            _ => Err(ProtocolError::MalformedData),
        }
    }
}

pub(crate) trait WriteExt: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_cstring(&mut self, value: &str) -> Result<()> {
        self.put_cbytes(value.as_bytes())
    }

    /// Fails on an interior NUL, which would truncate the value on decode.
    fn put_cbytes(&mut self, value: &[u8]) -> Result<()> {
        if value.contains(&0) {
            return Err(ProtocolError::MalformedData);
        }
        self.put_slice(value);
        self.put_u8(0);
        Ok(())
    }

    fn put_sockaddr(&mut self, addr: &Option<SocketAddrV4>) {
        match addr {
            Some(addr) => {
                self.put_u16_le(AF_INET);
                self.put_u16(addr.port());
                self.put_slice(&addr.ip().octets());
                self.put_bytes(0, 8);
            }
            None => self.put_bytes(0, SOCKADDR_SIZE),
        }
    }
}

impl<T: BufMut + ?Sized> WriteExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_advance_cursor() {
        let data = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFF];
        let mut buf = &data[..];

        assert_eq!(buf.read_u8().unwrap(), 0x01);
        assert_eq!(buf.read_u16().unwrap(), 0x1234);
        assert_eq!(buf.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_read_past_end_is_size_error() {
        let data = [0x01, 0x02];
        let mut buf = &data[..];

        assert!(matches!(
            buf.read_u32(),
            Err(ProtocolError::InvalidPacketSize)
        ));
        // Failed reads leave the cursor untouched
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_cstring_requires_terminator() {
        let data = b"abc";
        let mut buf = &data[..];
        let mut out = String::new();

        assert!(matches!(
            buf.read_cstring_into(&mut out),
            Err(ProtocolError::MalformedData)
        ));
    }

    #[test]
    fn test_cstring_reuses_target() {
        let data = b"first\0second\0";
        let mut buf = &data[..];
        let mut out = String::with_capacity(64);

        buf.read_cstring_into(&mut out).unwrap();
        assert_eq!(out, "first");
        buf.read_cstring_into(&mut out).unwrap();
        assert_eq!(out, "second");
        assert!(out.capacity() >= 64);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_interior_nul_rejected_on_encode() {
        let mut out = Vec::new();

        assert!(matches!(
            out.put_cstring("ab\0cd"),
            Err(ProtocolError::MalformedData)
        ));
        assert!(matches!(
            out.put_cbytes(&[1, 0, 2]),
            Err(ProtocolError::MalformedData)
        ));
        assert!(out.is_empty());

        out.put_cstring("abc").unwrap();
        assert_eq!(out, b"abc\0");
    }

    #[test]
    fn test_sockaddr_port_is_big_endian() {
        let addr: SocketAddrV4 = "10.0.0.2:6112".parse().unwrap();
        let mut out = Vec::new();
        out.put_sockaddr(&Some(addr));

        assert_eq!(out.len(), SOCKADDR_SIZE);
        assert_eq!(&out[0..2], &[0x02, 0x00]);
        assert_eq!(&out[2..4], &[0x17, 0xE0]);
        assert_eq!(&out[4..8], &[10, 0, 0, 2]);
        assert!(out[8..].iter().all(|&b| b == 0));

        let mut buf = &out[..];
        assert_eq!(buf.read_sockaddr().unwrap(), Some(addr));
    }

    #[test]
    fn test_empty_sockaddr_is_zeroes() {
        let mut out = Vec::new();
        out.put_sockaddr(&None);
        assert_eq!(out, vec![0u8; SOCKADDR_SIZE]);

        let mut buf = &out[..];
        assert_eq!(buf.read_sockaddr().unwrap(), None);
    }

    #[test]
    fn test_unknown_address_family_rejected() {
        let mut raw = vec![0u8; SOCKADDR_SIZE];
        raw[0] = 0x17;
        let mut buf = &raw[..];

        assert!(matches!(
            buf.read_sockaddr(),
            Err(ProtocolError::MalformedData)
        ));
    }

    #[test]
    fn test_vec_decode_keeps_inner_allocations() {
        let mut items: Vec<Vec<u8>> = vec![Vec::with_capacity(32), Vec::with_capacity(32)];
        let data = [1u8, 2];
        let mut buf = &data[..];

        read_vec_into(&mut items, 2, |item| buf.read_bytes_into(1, item)).unwrap();

        assert_eq!(items, vec![vec![1], vec![2]]);
        assert!(items.iter().all(|item| item.capacity() >= 32));
    }
}
