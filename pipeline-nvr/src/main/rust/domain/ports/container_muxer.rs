use bytes::Bytes;

use crate::domain::errors::Result;
use crate::domain::value_objects::{CodecParameters, MediaPacket};

const BOX_HEADER: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentedMp4 {
    /// ftyp + moov
    pub init: Bytes,
    /// moof + mdat pairs
    pub media: Bytes,
}

impl FragmentedMp4 {
    /// Split a muxed stream at its first top-level `moof` box. A stream
    /// without fragments is all init.
    pub fn split(stream: Bytes) -> Self {
        let mut offset = 0;
        while offset + BOX_HEADER <= stream.len() {
            let size = u32::from_be_bytes([
                stream[offset],
                stream[offset + 1],
                stream[offset + 2],
                stream[offset + 3],
            ]) as usize;
            if &stream[offset + 4..offset + 8] == b"moof" {
                return Self {
                    init: stream.slice(..offset),
                    media: stream.slice(offset..),
                };
            }
            let size = match size {
                0 => break,
                1 if offset + 16 <= stream.len() => {
                    let mut large = [0u8; 8];
                    large.copy_from_slice(&stream[offset + 8..offset + 16]);
                    u64::from_be_bytes(large) as usize
                }
                size => size,
            };
            if size < BOX_HEADER {
                break;
            }
            offset += size;
        }
        Self {
            init: stream,
            media: Bytes::new(),
        }
    }
}

/// Port for the container muxer library: (codecs, packets) -> bytes
pub trait ContainerMuxer: Send + Sync {
    fn mpegts(&self, codecs: &CodecParameters, packets: &[MediaPacket]) -> Result<Bytes>;

    fn fragmented_mp4(
        &self,
        codecs: &CodecParameters,
        packets: &[MediaPacket],
    ) -> Result<FragmentedMp4>;
}
