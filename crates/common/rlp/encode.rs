use bytes::{BufMut, Bytes};
use ethereum_types::{Address, Bloom, H64, H256, U256};

use super::constants::{RLP_EMPTY_LIST, RLP_NULL};

pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn length(&self) -> usize {
        // Run `encode`, but only counting the bytes pushed.
        let mut counter = ByteCounter::default();
        self.encode(&mut counter);
        counter.count
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// A `BufMut` that discards its input and keeps only the byte count.
#[derive(Debug, Clone, Copy, Default)]
struct ByteCounter {
    count: usize,
}

unsafe impl BufMut for ByteCounter {
    fn remaining_mut(&self) -> usize {
        usize::MAX - self.count
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.count += cnt;
    }

    fn chunk_mut(&mut self) -> &mut bytes::buf::UninitSlice {
        unreachable!("all callers are overridden to count instead of writing")
    }

    fn put<T: bytes::buf::Buf>(&mut self, src: T)
    where
        Self: Sized,
    {
        self.count += src.remaining();
    }

    fn put_bytes(&mut self, _val: u8, cnt: usize) {
        self.count += cnt;
    }

    fn put_slice(&mut self, src: &[u8]) {
        self.count += src.len()
    }
}

/// Writes the list prefix for a payload of `payload_len` bytes.
#[inline]
pub fn encode_length(payload_len: usize, buf: &mut dyn BufMut) {
    if payload_len < 56 {
        buf.put_u8(RLP_EMPTY_LIST + payload_len as u8);
    } else {
        let be = payload_len.to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count();
        buf.put_u8(0xf7 + (be.len() - skip) as u8);
        buf.put_slice(&be[skip..]);
    }
}

/// Encodes a byte string, the minimal-big-endian core of every scalar impl.
#[inline]
fn encode_bytes(bytes: &[u8], buf: &mut dyn BufMut) {
    match bytes {
        [b] if *b < RLP_NULL => buf.put_u8(*b),
        _ if bytes.len() < 56 => {
            buf.put_u8(RLP_NULL + bytes.len() as u8);
            buf.put_slice(bytes);
        }
        _ => {
            let be = bytes.len().to_be_bytes();
            let skip = be.iter().take_while(|b| **b == 0).count();
            buf.put_u8(0xb7 + (be.len() - skip) as u8);
            buf.put_slice(&be[skip..]);
            buf.put_slice(bytes);
        }
    }
}

impl RLPEncode for bool {
    #[inline(always)]
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }

    #[inline(always)]
    fn length(&self) -> usize {
        1
    }
}

macro_rules! impl_encode_uint {
    ($($t:ty),*) => {
        $(impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                let be = self.to_be_bytes();
                let skip = be.iter().take_while(|b| **b == 0).count();
                encode_bytes(&be[skip..], buf);
            }
        })*
    };
}

impl_encode_uint!(u8, u16, u32, u64, usize);

impl RLPEncode for [u8] {
    #[inline(always)]
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    #[inline]
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl RLPEncode for str {
    #[inline]
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for String {
    #[inline]
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_ref(), buf);
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let skip = (self.leading_zeros() / 8) as usize;
        let be = self.to_big_endian();
        encode_bytes(&be[skip..], buf);
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    #[inline(always)]
    fn encode(&self, buf: &mut dyn BufMut) {
        let payload_len: usize = self.iter().map(|item| item.length()).sum();
        encode_length(payload_len, buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: RLPEncode + ?Sized> RLPEncode for &T {
    fn encode(&self, buf: &mut dyn BufMut) {
        (*self).encode(buf)
    }
}

impl RLPEncode for H64 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for H256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for Address {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for Bloom {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(&self.0, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn encode_scalars() {
        assert_eq!(0u64.encode_to_vec(), vec![RLP_NULL]);
        assert_eq!(1u64.encode_to_vec(), vec![0x01]);
        assert_eq!(0x7fu64.encode_to_vec(), vec![0x7f]);
        assert_eq!(0x80u64.encode_to_vec(), vec![RLP_NULL + 1, 0x80]);
        assert_eq!(0x0400u64.encode_to_vec(), vec![RLP_NULL + 2, 0x04, 0x00]);
        assert_eq!(
            U256::from(1024).encode_to_vec(),
            vec![RLP_NULL + 2, 0x04, 0x00]
        );
    }

    #[test]
    fn encode_strings() {
        assert_eq!("dog".encode_to_vec(), vec![0x83, b'd', b'o', b'g']);
        assert_eq!("".encode_to_vec(), vec![RLP_NULL]);
        let lorem = "Lorem ipsum dolor sit amet, consectetur adipisicing elit";
        let mut expected = vec![0xb8, 0x38];
        expected.extend_from_slice(lorem.as_bytes());
        assert_eq!(lorem.encode_to_vec(), expected);
    }

    #[test]
    fn encode_list_of_strings() {
        let cat_dog = vec!["cat", "dog"];
        assert_eq!(
            cat_dog.encode_to_vec(),
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
        let empty: Vec<&str> = vec![];
        assert_eq!(empty.encode_to_vec(), vec![RLP_EMPTY_LIST]);
    }

    #[test]
    fn encode_address() {
        let address = Address::from(hex!("ef2d6d194084c2de36e0dabfce45d046b37d1106"));
        assert_eq!(
            address.encode_to_vec(),
            hex!("94ef2d6d194084c2de36e0dabfce45d046b37d1106")
        );
    }

    #[test]
    fn length_matches_encoding() {
        for n in [0u64, 1, 0x7f, 0x80, 0x100, u64::MAX] {
            assert_eq!(n.encode_to_vec().len(), n.length());
        }
        let v = vec![1u64, 0x80, 0x10000];
        assert_eq!(v.encode_to_vec().len(), v.length());
    }
}
