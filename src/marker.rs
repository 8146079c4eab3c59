//! The color marker: a bit-exact binary overlay carried in a single
//! zero-value `OP_RETURN` output, encoding per-output asset quantities.

use alloc::vec;
use alloc::vec::Vec;

use bitcoin::blockdata::opcodes::all::OP_RETURN;
use bitcoin::blockdata::script::Builder;
use bitcoin::{Amount, ScriptBuf, TxOut};

use crate::error::DecodeError;

/// The marker's magic tag. Decoding also accepts [`MARKER_TAG_ALT`], the
/// other value the overlay is historically seen carrying.
pub const MARKER_TAG: u16 = 0x4f41;
/// The alternate (byte-swapped) marker magic, also accepted on decode.
pub const MARKER_TAG_ALT: u16 = 0x414f;

/// "Transfer to exchange": quantities in this marker are flagged in
/// `exchange_flags`, one bit per output.
pub const OPCODE_TRANSFER_TO_EXCHANGE: u8 = 0x01;
/// "Exchange operation": `metadata` carries an out-of-band reason digest.
pub const OPCODE_EXCHANGE_OPERATION: u8 = 0x02;

/// The decoded contents of a color marker output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColorMarker {
    /// Wire version; 1 or 2.
    pub version: u16,
    /// Present only for version 2.
    pub opcode: Option<u8>,
    /// One quantity per colored output, in output order, each `<= 2^63 - 1`.
    pub quantities: Vec<u64>,
    /// Free-form metadata (exchange-operation reason digest, issuance
    /// definition URL, ...).
    pub metadata: Vec<u8>,
    /// One flag per quantity; only meaningful when `opcode ==
    /// Some(OPCODE_TRANSFER_TO_EXCHANGE)`.
    pub exchange_flags: Vec<bool>,
}

impl ColorMarker {
    /// A fresh, empty version-1 marker.
    pub fn new() -> Self {
        ColorMarker {
            version: 1,
            opcode: None,
            quantities: Vec::new(),
            metadata: Vec::new(),
            exchange_flags: Vec::new(),
        }
    }

    /// Raise this marker to version 2 if it is not already.
    pub fn require_v2(&mut self) {
        if self.version < 2 {
            self.version = 2;
        }
    }

    /// Record a new quantity, returning its index.
    pub fn push_quantity(&mut self, quantity: u64) -> usize {
        self.quantities.push(quantity);
        if !self.exchange_flags.is_empty() || self.opcode == Some(OPCODE_TRANSFER_TO_EXCHANGE) {
            self.exchange_flags.push(false);
        }
        self.quantities.len() - 1
    }

    /// Mark the quantity at `index` as exchange-bound.
    pub fn flag_exchange(&mut self, index: usize) {
        while self.exchange_flags.len() < self.quantities.len() {
            self.exchange_flags.push(false);
        }
        self.exchange_flags[index] = true;
    }

    /// Encode this marker into its wire payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MARKER_TAG.to_be_bytes());
        out.extend_from_slice(&self.version.to_be_bytes());
        if self.version >= 2 {
            out.push(self.opcode.unwrap_or(0));
        }
        write_compact_size(&mut out, self.quantities.len() as u64);
        for q in &self.quantities {
            write_leb128(&mut out, *q);
        }

        let metadata = if self.version >= 2 && self.opcode == Some(OPCODE_TRANSFER_TO_EXCHANGE) {
            let mut m = encode_exchange_flags(&self.exchange_flags);
            m.extend_from_slice(&self.metadata);
            m
        } else {
            self.metadata.clone()
        };
        write_compact_size(&mut out, metadata.len() as u64);
        out.extend_from_slice(&metadata);
        out
    }

    /// Decode a marker payload, as produced by [`ColorMarker::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut pos = 0usize;
        let tag = read_u16(bytes, &mut pos)?;
        if tag != MARKER_TAG && tag != MARKER_TAG_ALT {
            return Err(DecodeError::BadTag);
        }
        let version = read_u16(bytes, &mut pos)?;
        if version != 1 && version != 2 {
            return Err(DecodeError::BadVersion(version));
        }
        let opcode = if version >= 2 {
            Some(read_u8(bytes, &mut pos)?)
        } else {
            None
        };
        let n = read_compact_size(bytes, &mut pos)?;
        let mut quantities = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let q = read_leb128(bytes, &mut pos)?;
            if q > i64::MAX as u64 {
                return Err(DecodeError::QuantityTooLarge);
            }
            quantities.push(q);
        }
        let metadata_len = read_compact_size(bytes, &mut pos)? as usize;
        if pos + metadata_len > bytes.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let metadata_bytes = &bytes[pos..pos + metadata_len];
        pos += metadata_len;
        if pos != bytes.len() {
            return Err(DecodeError::TrailingBytes);
        }

        let (metadata, exchange_flags) =
            if opcode == Some(OPCODE_TRANSFER_TO_EXCHANGE) {
                let flag_bytes = n.div_ceil(8) as usize;
                if metadata_bytes.len() < flag_bytes {
                    return Err(DecodeError::UnexpectedEof);
                }
                let flags = decode_exchange_flags(&metadata_bytes[..flag_bytes], n as usize);
                (metadata_bytes[flag_bytes..].to_vec(), flags)
            } else {
                (metadata_bytes.to_vec(), Vec::new())
            };

        Ok(ColorMarker {
            version,
            opcode,
            quantities,
            metadata,
            exchange_flags,
        })
    }

    /// Build the zero-value `OP_RETURN` output carrying this marker.
    pub fn to_txout(&self) -> TxOut {
        let payload = self.encode();
        let push_bytes = bitcoin::script::PushBytesBuf::try_from(payload)
            .unwrap_or_else(|_| bitcoin::script::PushBytesBuf::new());
        let script = Builder::new()
            .push_opcode(OP_RETURN)
            .push_slice(push_bytes)
            .into_script();
        TxOut {
            value: Amount::ZERO,
            script_pubkey: script,
        }
    }

    /// `true` if `script` looks like a marker carrier (`OP_RETURN` followed
    /// by a single data push whose contents decode successfully).
    pub fn matches(script: &ScriptBuf) -> bool {
        Self::from_script(script).is_some()
    }

    /// Try to decode a marker from an output script.
    pub fn from_script(script: &ScriptBuf) -> Option<Self> {
        let mut instructions = script.instructions();
        match instructions.next() {
            Some(Ok(bitcoin::script::Instruction::Op(OP_RETURN))) => {}
            _ => return None,
        }
        let payload = match instructions.next() {
            Some(Ok(bitcoin::script::Instruction::PushBytes(bytes))) => bytes.as_bytes().to_vec(),
            _ => return None,
        };
        if instructions.next().is_some() {
            return None;
        }
        Self::decode(&payload).ok()
    }
}

fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

fn read_compact_size(bytes: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let first = read_u8(bytes, pos)?;
    match first {
        0..=0xfc => Ok(first as u64),
        0xfd => {
            let mut buf = [0u8; 2];
            read_exact(bytes, pos, &mut buf)?;
            Ok(u16::from_le_bytes(buf) as u64)
        }
        0xfe => {
            let mut buf = [0u8; 4];
            read_exact(bytes, pos, &mut buf)?;
            Ok(u32::from_le_bytes(buf) as u64)
        }
        0xff => {
            let mut buf = [0u8; 8];
            read_exact(bytes, pos, &mut buf)?;
            Ok(u64::from_le_bytes(buf))
        }
    }
}

/// Unsigned LEB128: 7 data bits per byte, high bit set on every byte but
/// the last; capped at 10 bytes for a 64-bit value.
fn write_leb128(out: &mut Vec<u8>, mut n: u64) {
    loop {
        let mut byte = (n & 0x7f) as u8;
        n >>= 7;
        if n != 0 {
            byte |= 0x80;
            out.push(byte);
        } else {
            out.push(byte);
            break;
        }
    }
}

fn read_leb128(bytes: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let mut result: u64 = 0;
    for i in 0..10u32 {
        let byte = read_u8(bytes, pos)?;
        let payload = (byte & 0x7f) as u64;
        if i == 9 {
            // 10th byte: only one data bit may be set without overflowing u64.
            if payload > 1 {
                return Err(DecodeError::VarintOverflow);
            }
        }
        result |= payload << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(DecodeError::VarintOverflow)
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8, DecodeError> {
    let b = *bytes.get(*pos).ok_or(DecodeError::UnexpectedEof)?;
    *pos += 1;
    Ok(b)
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Result<u16, DecodeError> {
    let mut buf = [0u8; 2];
    read_exact(bytes, pos, &mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_exact(bytes: &[u8], pos: &mut usize, buf: &mut [u8]) -> Result<(), DecodeError> {
    let end = *pos + buf.len();
    if end > bytes.len() {
        return Err(DecodeError::UnexpectedEof);
    }
    buf.copy_from_slice(&bytes[*pos..end]);
    *pos = end;
    Ok(())
}

/// Pack one bit per flag, LSB-first within each byte, reading `flags` in
/// reverse order.
fn encode_exchange_flags(flags: &[bool]) -> Vec<u8> {
    let n = flags.len();
    let nbytes = n.div_ceil(8);
    let mut bytes = vec![0u8; nbytes];
    for (i, idx) in (0..n).rev().enumerate() {
        if flags[idx] {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn decode_exchange_flags(bytes: &[u8], n: usize) -> Vec<bool> {
    let mut flags = vec![false; n];
    for i in 0..n {
        let bit = (bytes[i / 8] >> (i % 8)) & 1 == 1;
        flags[n - 1 - i] = bit;
    }
    flags
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn leb128_round_trips_boundary_values() {
        for n in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_leb128(&mut buf, n);
            let mut pos = 0;
            let back = read_leb128(&buf, &mut pos).unwrap();
            assert_eq!(back, n);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn marker_round_trips_v1() {
        let marker = ColorMarker {
            version: 1,
            opcode: None,
            quantities: vec![40, 60],
            metadata: vec![1, 2, 3],
            exchange_flags: Vec::new(),
        };
        let encoded = marker.encode();
        let decoded = ColorMarker::decode(&encoded).unwrap();
        assert_eq!(decoded, marker);
    }

    #[test]
    fn marker_round_trips_v2_exchange() {
        let mut marker = ColorMarker::new();
        marker.require_v2();
        marker.opcode = Some(OPCODE_TRANSFER_TO_EXCHANGE);
        marker.push_quantity(50);
        marker.push_quantity(75);
        marker.push_quantity(10);
        marker.flag_exchange(0);
        marker.flag_exchange(2);
        marker.metadata = vec![9, 9];

        let encoded = marker.encode();
        let decoded = ColorMarker::decode(&encoded).unwrap();
        assert_eq!(decoded.quantities, marker.quantities);
        assert_eq!(decoded.exchange_flags, marker.exchange_flags);
        assert_eq!(decoded.metadata, marker.metadata);
    }

    #[test]
    fn marker_round_trips_v2_exchange_operation() {
        let mut marker = ColorMarker::new();
        marker.require_v2();
        marker.opcode = Some(OPCODE_EXCHANGE_OPERATION);
        marker.push_quantity(1);
        marker.metadata = alloc::vec![0u8; 20];
        let encoded = marker.encode();
        let decoded = ColorMarker::decode(&encoded).unwrap();
        assert_eq!(decoded, marker);
    }

    #[test]
    fn decode_rejects_bad_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MARKER_TAG.to_be_bytes());
        buf.extend_from_slice(&99u16.to_be_bytes());
        assert_eq!(ColorMarker::decode(&buf), Err(DecodeError::BadVersion(99)));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let marker = ColorMarker::new();
        let mut encoded = marker.encode();
        encoded.push(0xff);
        assert_eq!(ColorMarker::decode(&encoded), Err(DecodeError::TrailingBytes));
    }

    #[test]
    fn exchange_flag_packing_matches_reverse_lsb_first_spec() {
        // n = 3 flags, indices [true, false, true] -> reversed read order is
        // [idx2, idx1, idx0] = [true, false, true], packed LSB-first: bit0=1,
        // bit1=0, bit2=1 => byte = 0b0000_0101 = 5.
        let flags = alloc::vec![true, false, true];
        let bytes = encode_exchange_flags(&flags);
        assert_eq!(bytes, alloc::vec![0b0000_0101]);
        let back = decode_exchange_flags(&bytes, 3);
        assert_eq!(back, flags);
    }
}
