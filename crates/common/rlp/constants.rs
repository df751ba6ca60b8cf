/// Prefix of the empty string, also the encoding of the integer zero.
pub const RLP_NULL: u8 = 0x80;
/// Prefix of the empty list.
pub const RLP_EMPTY_LIST: u8 = 0xc0;
