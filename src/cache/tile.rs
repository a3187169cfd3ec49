//! Broker for decoded raster tiles

use super::broker::ObjectBroker;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Sample storage of a raster tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    U16,
    I32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::U16 => 2,
            SampleFormat::I32 => 4,
        }
    }
}

/// Shape of a tile expected back from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileLayout {
    pub format: SampleFormat,
    pub samples: usize,
}

impl TileLayout {
    pub fn new(format: SampleFormat, samples: usize) -> Self {
        Self { format, samples }
    }

    pub fn encoded_len(&self) -> usize {
        self.samples * self.format.bytes_per_sample()
    }
}

/// Sample data of one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    I32(Vec<i32>),
}

impl TileData {
    pub fn layout(&self) -> TileLayout {
        match self {
            TileData::U8(samples) => TileLayout::new(SampleFormat::U8, samples.len()),
            TileData::U16(samples) => TileLayout::new(SampleFormat::U16, samples.len()),
            TileData::I32(samples) => TileLayout::new(SampleFormat::I32, samples.len()),
        }
    }
}

/// Tile broker: samples stored little-endian, no header
///
/// The layout is not part of the encoding, so decoding needs it as the
/// hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct TileBroker;

impl ObjectBroker for TileBroker {
    type Object = TileData;
    type Hint = TileLayout;

    fn encoded_size_of(&self, tile: &TileData) -> Result<usize> {
        Ok(tile.layout().encoded_len())
    }

    fn encode(&self, tile: &TileData, buf: &mut [u8]) -> Result<()> {
        let expected = tile.layout().encoded_len();
        if buf.len() != expected {
            return Err(Error::Codec(format!(
                "Tile needs {} bytes, buffer has {}",
                expected,
                buf.len()
            )));
        }

        match tile {
            TileData::U8(samples) => buf.copy_from_slice(samples),
            TileData::U16(samples) => {
                for (out, sample) in buf.chunks_exact_mut(2).zip(samples) {
                    out.copy_from_slice(&sample.to_le_bytes());
                }
            }
            TileData::I32(samples) => {
                for (out, sample) in buf.chunks_exact_mut(4).zip(samples) {
                    out.copy_from_slice(&sample.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn decode(&self, buf: &[u8], layout: TileLayout) -> Result<TileData> {
        if buf.len() != layout.encoded_len() {
            return Err(Error::Codec(format!(
                "Expected {} bytes for {:?} x {}, got {}",
                layout.encoded_len(),
                layout.format,
                layout.samples,
                buf.len()
            )));
        }

        let tile = match layout.format {
            SampleFormat::U8 => TileData::U8(buf.to_vec()),
            SampleFormat::U16 => TileData::U16(
                buf.chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            ),
            SampleFormat::I32 => TileData::I32(
                buf.chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
        };
        Ok(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(tile: TileData) -> Result<()> {
        let broker = TileBroker;
        let mut buf = vec![0u8; broker.encoded_size_of(&tile)?];
        broker.encode(&tile, &mut buf)?;
        assert_eq!(broker.decode(&buf, tile.layout())?, tile);
        Ok(())
    }

    #[test]
    fn test_tile_roundtrip_all_formats() -> Result<()> {
        roundtrip(TileData::U8(vec![0, 17, 255]))?;
        roundtrip(TileData::U16(vec![0, 1, 65535, 4096]))?;
        roundtrip(TileData::I32(vec![i32::MIN, -1, 0, i32::MAX]))
    }

    #[test]
    fn test_encoded_sizes() -> Result<()> {
        assert_eq!(TileBroker.encoded_size_of(&TileData::U8(vec![0; 64]))?, 64);
        assert_eq!(TileBroker.encoded_size_of(&TileData::U16(vec![0; 64]))?, 128);
        assert_eq!(TileBroker.encoded_size_of(&TileData::I32(vec![0; 64]))?, 256);
        Ok(())
    }

    #[test]
    fn test_u16_little_endian() -> Result<()> {
        let mut buf = [0u8; 2];
        TileBroker.encode(&TileData::U16(vec![0x0102]), &mut buf)?;
        assert_eq!(buf, [0x02, 0x01]);
        Ok(())
    }

    #[test]
    fn test_decode_layout_mismatch() {
        let err = TileBroker
            .decode(&[0u8; 6], TileLayout::new(SampleFormat::I32, 2))
            .unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}
