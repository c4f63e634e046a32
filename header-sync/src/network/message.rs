//! Header exchange messages and their payload codec.
//!
//! Framing, checksums and transport are handled by the caller. This module only
//! turns a `(command, payload)` pair into a [`NetworkMessage`] and back.

use crate::error::{NetworkError, NetworkResult};
use crate::network::constants::{MAX_HEADERS_RESULTS, MAX_LOCATOR_SZ, PROTOCOL_VERSION};
use crate::types::{BlockHash, BlockHeader, HEADER_SIZE};

pub const CMD_HEADERS: &str = "headers";
pub const CMD_GETHEADERS: &str = "getheaders";

/// A request for headers following the first locator hash the receiver knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeadersMessage {
    pub version: u32,
    /// Hashes from the requester's tip back toward genesis
    pub locator_hashes: Vec<BlockHash>,
    /// Last header wanted; all zeros means as many as allowed
    pub stop_hash: BlockHash,
}

impl GetHeadersMessage {
    pub fn new(locator_hashes: Vec<BlockHash>, stop_hash: BlockHash) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            locator_hashes,
            stop_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    Headers(Vec<BlockHeader>),
    GetHeaders(GetHeadersMessage),
}

impl NetworkMessage {
    pub fn command(&self) -> &'static str {
        match self {
            NetworkMessage::Headers(_) => CMD_HEADERS,
            NetworkMessage::GetHeaders(_) => CMD_GETHEADERS,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            NetworkMessage::Headers(headers) => {
                let mut out = Vec::with_capacity(9 + headers.len() * HEADER_SIZE);
                write_compact_size(&mut out, headers.len() as u64);
                for header in headers {
                    out.extend_from_slice(&header.to_bytes());
                }
                out
            }
            NetworkMessage::GetHeaders(msg) => {
                let mut out = Vec::with_capacity(4 + 9 + (msg.locator_hashes.len() + 1) * 32);
                out.extend_from_slice(&msg.version.to_le_bytes());
                write_compact_size(&mut out, msg.locator_hashes.len() as u64);
                for hash in &msg.locator_hashes {
                    out.extend_from_slice(hash.as_bytes());
                }
                out.extend_from_slice(msg.stop_hash.as_bytes());
                out
            }
        }
    }

    /// Decode a payload for `command`. The payload must be consumed exactly.
    pub fn decode(command: &str, payload: &[u8]) -> NetworkResult<Self> {
        let mut reader = Reader::new(payload);
        let message = match command {
            CMD_HEADERS => {
                let count = reader.read_count(MAX_HEADERS_RESULTS)?;
                let mut headers = Vec::with_capacity(count);
                for _ in 0..count {
                    headers.push(BlockHeader::from_bytes(&reader.read_array::<HEADER_SIZE>()?));
                }
                NetworkMessage::Headers(headers)
            }
            CMD_GETHEADERS => {
                let version = u32::from_le_bytes(reader.read_array::<4>()?);
                let count = reader.read_count(MAX_LOCATOR_SZ)?;
                let mut locator_hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    locator_hashes.push(BlockHash::from_byte_array(reader.read_array::<32>()?));
                }
                let stop_hash = BlockHash::from_byte_array(reader.read_array::<32>()?);
                NetworkMessage::GetHeaders(GetHeadersMessage {
                    version,
                    locator_hashes,
                    stop_hash,
                })
            }
            other => return Err(NetworkError::UnknownCommand(other.to_string())),
        };
        reader.finish()?;
        Ok(message)
    }
}

fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
        }
    }

    fn read_array<const N: usize>(&mut self) -> NetworkResult<[u8; N]> {
        let remaining = self.data.len() - self.pos;
        if remaining < N {
            return Err(NetworkError::Truncated {
                needed: N - remaining,
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn read_compact_size(&mut self) -> NetworkResult<u64> {
        let [prefix] = self.read_array::<1>()?;
        let (value, min) = match prefix {
            0xfd => (u64::from(u16::from_le_bytes(self.read_array()?)), 0xfd),
            0xfe => (u64::from(u32::from_le_bytes(self.read_array()?)), 0x1_0000),
            0xff => (u64::from_le_bytes(self.read_array()?), 0x1_0000_0000),
            n => return Ok(u64::from(n)),
        };
        if value < min {
            return Err(NetworkError::NonCanonicalCompactSize);
        }
        Ok(value)
    }

    /// Read an element count, refusing anything above `limit` before allocating.
    fn read_count(&mut self, limit: usize) -> NetworkResult<usize> {
        let count = self.read_compact_size()?;
        if count > limit as u64 {
            return Err(NetworkError::Oversized {
                count,
                limit,
            });
        }
        Ok(count as usize)
    }

    fn finish(self) -> NetworkResult<()> {
        match self.data.len() - self.pos {
            0 => Ok(()),
            extra => Err(NetworkError::TrailingBytes(extra)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_header;
    use assert_matches::assert_matches;

    #[test]
    fn test_headers_payload_layout() {
        let first = test_header(BlockHash::all_zeros(), 1, 1_000);
        let second = test_header(first.block_hash(), 2, 1_001);
        let msg = NetworkMessage::Headers(vec![first, second]);

        let payload = msg.encode_payload();
        assert_eq!(payload.len(), 1 + 2 * HEADER_SIZE);
        assert_eq!(payload[0], 2);
        assert_eq!(&payload[1..1 + HEADER_SIZE], &first.to_bytes()[..]);
        assert_eq!(NetworkMessage::decode(CMD_HEADERS, &payload), Ok(msg));
    }

    #[test]
    fn test_getheaders_payload_layout() {
        let locator = vec![BlockHash::from_byte_array([1u8; 32]), BlockHash::all_zeros()];
        let msg = NetworkMessage::GetHeaders(GetHeadersMessage::new(
            locator,
            BlockHash::from_byte_array([7u8; 32]),
        ));

        let payload = msg.encode_payload();
        assert_eq!(payload.len(), 4 + 1 + 3 * 32);
        assert_eq!(&payload[..4], &PROTOCOL_VERSION.to_le_bytes());
        assert_eq!(payload[4], 2);
        assert_eq!(&payload[payload.len() - 32..], &[7u8; 32]);
        assert_eq!(NetworkMessage::decode(CMD_GETHEADERS, &payload), Ok(msg));
    }

    #[test]
    fn test_decode_rejects_oversized_headers() {
        let mut payload = Vec::new();
        write_compact_size(&mut payload, 2001);
        let err = NetworkMessage::decode(CMD_HEADERS, &payload).unwrap_err();
        assert!(err.is_oversized());
        assert_eq!(
            err,
            NetworkError::Oversized {
                count: 2001,
                limit: 2000
            }
        );
    }

    #[test]
    fn test_decode_rejects_oversized_locator() {
        let mut payload = PROTOCOL_VERSION.to_le_bytes().to_vec();
        write_compact_size(&mut payload, 102);
        assert_matches!(
            NetworkMessage::decode(CMD_GETHEADERS, &payload),
            Err(NetworkError::Oversized { count: 102, limit: 101 })
        );
    }

    #[test]
    fn test_decode_rejects_non_canonical_count() {
        let payload = [0xfd, 0x01, 0x00];
        assert_eq!(
            NetworkMessage::decode(CMD_HEADERS, &payload),
            Err(NetworkError::NonCanonicalCompactSize)
        );
    }

    #[test]
    fn test_decode_rejects_truncated_and_trailing() {
        let header = test_header(BlockHash::all_zeros(), 1, 1_000);
        let payload = NetworkMessage::Headers(vec![header]).encode_payload();

        assert_matches!(
            NetworkMessage::decode(CMD_HEADERS, &payload[..50]),
            Err(NetworkError::Truncated { .. })
        );

        let mut padded = payload.clone();
        padded.push(0);
        assert_eq!(
            NetworkMessage::decode(CMD_HEADERS, &padded),
            Err(NetworkError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_decode_unknown_command() {
        assert_matches!(
            NetworkMessage::decode("inv", &[]),
            Err(NetworkError::UnknownCommand(cmd)) if cmd == "inv"
        );
    }

    #[test]
    fn test_compact_size_boundaries() {
        let mut out = Vec::new();
        write_compact_size(&mut out, 0xfc);
        write_compact_size(&mut out, 0xfd);
        write_compact_size(&mut out, 0x1_0000);
        assert_eq!(out, vec![0xfc, 0xfd, 0xfd, 0x00, 0xfe, 0x00, 0x00, 0x01, 0x00]);

        let mut reader = Reader::new(&out);
        assert_eq!(reader.read_compact_size(), Ok(0xfc));
        assert_eq!(reader.read_compact_size(), Ok(0xfd));
        assert_eq!(reader.read_compact_size(), Ok(0x1_0000));
        assert!(reader.finish().is_ok());
    }
}
