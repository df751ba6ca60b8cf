use super::{
    constants::{RLP_EMPTY_LIST, RLP_NULL},
    error::RLPDecodeError,
};
use bytes::Bytes;
use ethereum_types::{Address, Bloom, H64, H160, H256, U256};

/// Max payload size accepted when decoding. Any larger item is either a bug
/// or malicious input; no well-formed consensus object comes close.
const MAX_RLP_BYTES: usize = 1024 * 1024 * 1024;

/// Trait for decoding RLP encoded slices of data.
///
/// Implementors provide [`decode_unfinished`](RLPDecode::decode_unfinished),
/// which returns the decoded value along with the remaining bytes; consumers
/// normally call [`decode`](RLPDecode::decode), which requires the input to
/// be fully consumed.
pub trait RLPDecode: Sized {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, remaining) = Self::decode_unfinished(rlp)?;
        if !remaining.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok(decoded)
    }
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        match rlp.first() {
            Some(&RLP_NULL) => Ok((false, &rlp[1..])),
            Some(0x01) => Ok((true, &rlp[1..])),
            Some(b) => Err(RLPDecodeError::MalformedBoolean(*b)),
            None => Err(RLPDecodeError::InvalidLength),
        }
    }
}

macro_rules! impl_decode_uint {
    ($($t:ty),*) => {
        $(impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                Ok((<$t>::from_be_bytes(static_left_pad(bytes)?), rest))
            }
        })*
    };
}

impl_decode_uint!(u8, u16, u32, u64, usize);

impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let value = bytes
            .try_into()
            .map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((value, rest))
    }
}

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((Bytes::copy_from_slice(bytes), rest))
    }
}

impl RLPDecode for String {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let value = String::from_utf8(bytes.to_vec()).map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((value, rest))
    }
}

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let padded: [u8; 32] = static_left_pad(bytes)?;
        Ok((U256::from_big_endian(&padded), rest))
    }
}

impl RLPDecode for H64 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H64(value), rest))
    }
}

impl RLPDecode for H256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H256(value), rest))
    }
}

impl RLPDecode for Address {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H160(value), rest))
    }
}

impl RLPDecode for Bloom {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((Bloom(value), rest))
    }
}

// A Vec<T> is interpreted as an RLP list of elements of the same type.
// Byte strings decode through the Bytes or [u8; N] implementations instead.
impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.first() == Some(&RLP_EMPTY_LIST) {
            return Ok((Vec::new(), &rlp[1..]));
        }
        let (is_list, mut payload, rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }
        let mut result = Vec::new();
        while !payload.is_empty() {
            let (item, remaining) = T::decode_unfinished(payload)?;
            result.push(item);
            payload = remaining;
        }
        Ok((result, rest))
    }
}

/// Decodes the prefix of an RLP item. Returns whether the item is a list,
/// its payload without the prefix, and the remaining bytes after the item.
pub fn decode_rlp_item(data: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let first_byte = *data.first().ok_or(RLPDecodeError::InvalidLength)?;

    let (is_list, header_len, payload_len) = match first_byte {
        0..=0x7f => return Ok((false, &data[..1], &data[1..])),
        0x80..=0xb7 => (false, 1, (first_byte - 0x80) as usize),
        0xb8..=0xbf => {
            let len_of_len = (first_byte - 0xb7) as usize;
            (false, 1 + len_of_len, long_length(data, len_of_len)?)
        }
        RLP_EMPTY_LIST..=0xf7 => (true, 1, (first_byte - RLP_EMPTY_LIST) as usize),
        0xf8..=0xff => {
            let len_of_len = (first_byte - 0xf7) as usize;
            (true, 1 + len_of_len, long_length(data, len_of_len)?)
        }
    };

    if payload_len > MAX_RLP_BYTES || data.len() < header_len + payload_len {
        return Err(RLPDecodeError::InvalidLength);
    }
    Ok((
        is_list,
        &data[header_len..header_len + payload_len],
        &data[header_len + payload_len..],
    ))
}

/// Splits off the next RLP item, prefix included.
pub fn get_item_with_prefix(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (_, _, rest) = decode_rlp_item(data)?;
    let item_len = data.len() - rest.len();
    Ok((&data[..item_len], rest))
}

fn long_length(data: &[u8], len_of_len: usize) -> Result<usize, RLPDecodeError> {
    let length_bytes = data
        .get(1..1 + len_of_len)
        .ok_or(RLPDecodeError::InvalidLength)?;
    Ok(usize::from_be_bytes(static_left_pad(length_bytes)?))
}

/// Decodes the payload of a byte-string item, rejecting lists.
pub fn decode_bytes(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (is_list, payload, rest) = decode_rlp_item(data)?;
    if is_list {
        return Err(RLPDecodeError::UnexpectedList);
    }
    Ok((payload, rest))
}

/// Left-pads a big-endian byte slice with zeros into a fixed-size array.
/// Leading zeros in the input are malformed (non-minimal scalar encoding).
#[inline]
pub fn static_left_pad<const N: usize>(data: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    let mut result = [0; N];
    if data.is_empty() {
        return Ok(result);
    }
    if data[0] == 0 {
        return Err(RLPDecodeError::MalformedData);
    }
    if data.len() > N {
        return Err(RLPDecodeError::InvalidLength);
    }
    result[N - data.len()..].copy_from_slice(data);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::RLPEncode;

    #[test]
    fn decode_scalars() {
        assert_eq!(u64::decode(&[RLP_NULL]), Ok(0));
        assert_eq!(u64::decode(&[0x7f]), Ok(0x7f));
        assert_eq!(u64::decode(&[0x81, 0x80]), Ok(0x80));
        assert_eq!(
            U256::decode(&[0x82, 0x04, 0x00]),
            Ok(U256::from(1024))
        );
    }

    #[test]
    fn reject_non_minimal_scalar() {
        // 0x0400 must not be encoded with a leading zero byte
        assert_eq!(
            u64::decode(&[0x82, 0x00, 0x04]),
            Err(RLPDecodeError::MalformedData)
        );
    }

    #[test]
    fn reject_trailing_bytes() {
        assert_eq!(u64::decode(&[0x01, 0x02]), Err(RLPDecodeError::InvalidLength));
    }

    #[test]
    fn decode_string_list() {
        let encoded = vec!["cat".to_string(), "dog".to_string()].encode_to_vec();
        let decoded = Vec::<String>::decode(&encoded).expect("valid list");
        assert_eq!(decoded, vec!["cat", "dog"]);
    }

    #[test]
    fn roundtrip_hashes() {
        let hash = H256::from_low_u64_be(0xdeadbeef);
        let encoded = hash.encode_to_vec();
        assert_eq!(H256::decode(&encoded), Ok(hash));

        let nonce = H64::from_low_u64_be(42);
        assert_eq!(H64::decode(&nonce.encode_to_vec()), Ok(nonce));
    }

    #[test]
    fn long_string_roundtrip() {
        let data = Bytes::from(vec![0xabu8; 300]);
        let encoded = data.encode_to_vec();
        assert_eq!(encoded[0], 0xb9);
        assert_eq!(Bytes::decode(&encoded), Ok(data));
    }
}
