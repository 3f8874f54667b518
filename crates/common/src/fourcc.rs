//! FourCC codes and the picture formats they describe.
//!
//! A [`FourCC`] names a memory layout; a [`PicFormat`] spells the same layout
//! out field by field (chroma subsampling, bit depth, storage, plane layout,
//! sample alignment). The two are related through a static table so the
//! pipeline can derive an output FourCC from a desired picture format and
//! vice versa.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{round_up, Dimension};

// ---------------------------------------------------------------------------
// Format building blocks
// ---------------------------------------------------------------------------

/// Chroma subsampling of a picture.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChromaMode {
    /// Luma only (4:0:0).
    Mono,
    Yuv420,
    Yuv422,
    Yuv444,
}

impl ChromaMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Mono),
            1 => Some(Self::Yuv420),
            2 => Some(Self::Yuv422),
            3 => Some(Self::Yuv444),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Horizontal and vertical chroma subsampling factors.
    pub fn subsampling(self) -> (u32, u32) {
        match self {
            Self::Mono | Self::Yuv444 => (1, 1),
            Self::Yuv420 => (2, 2),
            Self::Yuv422 => (2, 1),
        }
    }

    /// Plane layout the decoder uses internally for this chroma mode.
    pub fn internal_plane_mode(self) -> PlaneMode {
        match self {
            Self::Mono => PlaneMode::Monoplane,
            Self::Yuv420 | Self::Yuv422 => PlaneMode::SemiPlanar,
            Self::Yuv444 => PlaneMode::Planar,
        }
    }
}

impl fmt::Display for ChromaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mono => "4:0:0",
            Self::Yuv420 => "4:2:0",
            Self::Yuv422 => "4:2:2",
            Self::Yuv444 => "4:4:4",
        })
    }
}

/// How the pixel rows are laid out in memory.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageMode {
    #[default]
    Raster,
    Tile32x4,
    Tile64x4,
}

impl StorageMode {
    pub fn is_tiled(self) -> bool {
        !matches!(self, Self::Raster)
    }

    /// Number of picture rows covered by one pitch-wide row of memory.
    pub fn rows_per_line(self) -> u32 {
        if self.is_tiled() {
            4
        } else {
            1
        }
    }
}

/// Number and arrangement of pixel planes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaneMode {
    /// A single luma plane.
    Monoplane,
    /// Separate Y, U and V planes.
    Planar,
    /// A Y plane followed by one interleaved UV plane.
    SemiPlanar,
}

/// Identifies one pixel plane inside a picture buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaneId {
    Y,
    U,
    V,
    UV,
}

impl PlaneId {
    pub fn is_luma(self) -> bool {
        matches!(self, Self::Y)
    }
}

/// Full description of a picture memory layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PicFormat {
    pub chroma: ChromaMode,
    pub bit_depth: u8,
    pub storage: StorageMode,
    pub plane_mode: PlaneMode,
    /// Samples wider than 8 bits are left-aligned (MSB) in their 16-bit container.
    pub msb: bool,
}

impl PicFormat {
    /// Bytes used to store one sample in a raster layout.
    pub fn bytes_per_sample(&self) -> u32 {
        bytes_per_sample(self.bit_depth)
    }

    /// Planes present in a buffer of this format, in memory order.
    pub fn pixel_planes(&self) -> Vec<PlaneId> {
        match self.plane_mode {
            PlaneMode::Monoplane => vec![PlaneId::Y],
            PlaneMode::SemiPlanar => vec![PlaneId::Y, PlaneId::UV],
            PlaneMode::Planar => vec![PlaneId::Y, PlaneId::U, PlaneId::V],
        }
    }

    /// Minimum luma pitch in bytes for a picture `width` pixels wide.
    pub fn min_pitch(&self, width: u32) -> u32 {
        let row_bytes = match self.storage {
            StorageMode::Raster => width * self.bytes_per_sample(),
            StorageMode::Tile32x4 => round_up(width, 32) * 4 * self.bytes_per_sample(),
            StorageMode::Tile64x4 => round_up(width, 64) * 4 * self.bytes_per_sample(),
        };
        round_up(row_bytes, PITCH_ALIGNMENT)
    }

    /// Pitch of a chroma plane given the luma pitch.
    pub fn chroma_pitch(&self, pitch_y: u32) -> u32 {
        match (self.plane_mode, self.chroma) {
            (PlaneMode::Monoplane, _) | (_, ChromaMode::Mono) => 0,
            (PlaneMode::SemiPlanar, _) => pitch_y,
            (PlaneMode::Planar, ChromaMode::Yuv444) => pitch_y,
            (PlaneMode::Planar, _) => pitch_y / 2,
        }
    }

    /// Number of picture rows a plane holds for a picture `height` rows tall.
    pub fn plane_rows(&self, plane: PlaneId, height: u32) -> u32 {
        if plane.is_luma() {
            return height;
        }
        match self.chroma {
            ChromaMode::Mono => 0,
            ChromaMode::Yuv420 => height.div_ceil(2),
            ChromaMode::Yuv422 | ChromaMode::Yuv444 => height,
        }
    }

    /// Bytes to allocate for `plane` of a picture of size `dim` with the given pitch.
    pub fn plane_alloc_size(&self, plane: PlaneId, dim: Dimension, pitch: u32) -> usize {
        let rows = self.plane_rows(plane, dim.height);
        let lines = round_up(rows, self.storage.rows_per_line()) / self.storage.rows_per_line();
        pitch as usize * lines as usize
    }
}

/// Raster pitches are aligned to the engine's memory burst.
pub const PITCH_ALIGNMENT: u32 = 32;

/// Bytes used to store one sample of the given bit depth.
pub fn bytes_per_sample(bit_depth: u8) -> u32 {
    if bit_depth > 8 {
        2
    } else {
        1
    }
}

// ---------------------------------------------------------------------------
// FourCC
// ---------------------------------------------------------------------------

/// A four-character code identifying a picture memory layout.
///
/// The default value is [`FourCC::NULL`].
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCC(u32);

impl FourCC {
    /// Sentinel meaning "no format chosen".
    pub const NULL: Self = Self(0);

    pub const fn from_bytes(code: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*code))
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Picture format described by this code, if it is a known layout.
    pub fn pic_format(self) -> Option<PicFormat> {
        FOURCC_TABLE
            .iter()
            .find(|(code, _)| *code == self)
            .map(|(_, format)| *format)
    }

    /// FourCC naming exactly `format`, if such a layout is known.
    pub fn from_pic_format(format: &PicFormat) -> Option<Self> {
        FOURCC_TABLE
            .iter()
            .find(|(_, f)| f == format)
            .map(|(code, _)| *code)
    }

    pub fn bit_depth(self) -> Option<u8> {
        self.pic_format().map(|f| f.bit_depth)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("NULL");
        }
        for byte in self.to_bytes() {
            let c = if byte.is_ascii_graphic() { byte as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

/// Error returned when a string is not a four-character code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid FourCC '{0}': expected 4 ASCII characters")]
pub struct ParseFourCCError(pub String);

impl FromStr for FourCC {
    type Err = ParseFourCCError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("null") {
            return Ok(Self::NULL);
        }
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| ParseFourCCError(s.to_string()))?;
        if !bytes.iter().all(u8::is_ascii_graphic) {
            return Err(ParseFourCCError(s.to_string()));
        }
        Ok(Self::from_bytes(&bytes))
    }
}

impl TryFrom<String> for FourCC {
    type Error = ParseFourCCError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FourCC> for String {
    fn from(value: FourCC) -> Self {
        value.to_string()
    }
}

const fn pic(
    chroma: ChromaMode,
    bit_depth: u8,
    storage: StorageMode,
    plane_mode: PlaneMode,
    msb: bool,
) -> PicFormat {
    PicFormat {
        chroma,
        bit_depth,
        storage,
        plane_mode,
        msb,
    }
}

use ChromaMode::{Mono, Yuv420, Yuv422, Yuv444};
use PlaneMode::{Monoplane, Planar, SemiPlanar};
use StorageMode::{Raster, Tile32x4, Tile64x4};

/// Every layout the pipeline knows about.
static FOURCC_TABLE: &[(FourCC, PicFormat)] = &[
    (FourCC::from_bytes(b"Y800"), pic(Mono, 8, Raster, Monoplane, false)),
    (FourCC::from_bytes(b"Y010"), pic(Mono, 10, Raster, Monoplane, false)),
    (FourCC::from_bytes(b"Y012"), pic(Mono, 12, Raster, Monoplane, false)),
    (FourCC::from_bytes(b"I420"), pic(Yuv420, 8, Raster, Planar, false)),
    (FourCC::from_bytes(b"NV12"), pic(Yuv420, 8, Raster, SemiPlanar, false)),
    (FourCC::from_bytes(b"I0AL"), pic(Yuv420, 10, Raster, Planar, false)),
    (FourCC::from_bytes(b"P010"), pic(Yuv420, 10, Raster, SemiPlanar, true)),
    (FourCC::from_bytes(b"I0CL"), pic(Yuv420, 12, Raster, Planar, false)),
    (FourCC::from_bytes(b"P012"), pic(Yuv420, 12, Raster, SemiPlanar, true)),
    (FourCC::from_bytes(b"I422"), pic(Yuv422, 8, Raster, Planar, false)),
    (FourCC::from_bytes(b"NV16"), pic(Yuv422, 8, Raster, SemiPlanar, false)),
    (FourCC::from_bytes(b"I2AL"), pic(Yuv422, 10, Raster, Planar, false)),
    (FourCC::from_bytes(b"P210"), pic(Yuv422, 10, Raster, SemiPlanar, true)),
    (FourCC::from_bytes(b"I2CL"), pic(Yuv422, 12, Raster, Planar, false)),
    (FourCC::from_bytes(b"P212"), pic(Yuv422, 12, Raster, SemiPlanar, true)),
    (FourCC::from_bytes(b"I444"), pic(Yuv444, 8, Raster, Planar, false)),
    (FourCC::from_bytes(b"I4AL"), pic(Yuv444, 10, Raster, Planar, false)),
    (FourCC::from_bytes(b"I4CL"), pic(Yuv444, 12, Raster, Planar, false)),
    (FourCC::from_bytes(b"T508"), pic(Yuv420, 8, Tile32x4, SemiPlanar, false)),
    (FourCC::from_bytes(b"T50A"), pic(Yuv420, 10, Tile32x4, SemiPlanar, false)),
    (FourCC::from_bytes(b"T608"), pic(Yuv420, 8, Tile64x4, SemiPlanar, false)),
    (FourCC::from_bytes(b"T60A"), pic(Yuv420, 10, Tile64x4, SemiPlanar, false)),
    (FourCC::from_bytes(b"T628"), pic(Yuv422, 8, Tile64x4, SemiPlanar, false)),
    (FourCC::from_bytes(b"T62A"), pic(Yuv422, 10, Tile64x4, SemiPlanar, false)),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let nv12: FourCC = "NV12".parse().unwrap();
        assert_eq!(nv12, FourCC::from_bytes(b"NV12"));
        assert_eq!(nv12.to_string(), "NV12");
        assert_eq!(FourCC::NULL.to_string(), "NULL");
        assert!("NV1".parse::<FourCC>().is_err());
        assert!("null".parse::<FourCC>().unwrap().is_null());
    }

    #[test]
    fn table_lookup_is_bidirectional() {
        for (code, format) in FOURCC_TABLE {
            assert_eq!(code.pic_format(), Some(*format));
            assert_eq!(FourCC::from_pic_format(format), Some(*code));
        }
    }

    #[test]
    fn msb_semiplanar_10bit_is_p010() {
        let format = pic(Yuv420, 10, Raster, SemiPlanar, true);
        assert_eq!(
            FourCC::from_pic_format(&format),
            Some(FourCC::from_bytes(b"P010"))
        );
    }

    #[test]
    fn pitch_and_plane_sizes() {
        let nv12 = FourCC::from_bytes(b"NV12").pic_format().unwrap();
        let pitch = nv12.min_pitch(1920);
        assert_eq!(pitch, 1920);
        assert_eq!(nv12.chroma_pitch(pitch), 1920);
        let dim = Dimension::new(1920, 1088);
        assert_eq!(nv12.plane_alloc_size(PlaneId::Y, dim, pitch), 1920 * 1088);
        assert_eq!(nv12.plane_alloc_size(PlaneId::UV, dim, pitch), 1920 * 544);

        let i0al = FourCC::from_bytes(b"I0AL").pic_format().unwrap();
        assert_eq!(i0al.min_pitch(100), 224);
        assert_eq!(i0al.chroma_pitch(224), 112);
    }

    #[test]
    fn tiled_pitch_covers_four_rows() {
        let t608 = FourCC::from_bytes(b"T608").pic_format().unwrap();
        let pitch = t608.min_pitch(1920);
        assert_eq!(pitch, 1920 * 4);
        let dim = Dimension::new(1920, 1088);
        assert_eq!(t608.plane_alloc_size(PlaneId::Y, dim, pitch), 1920 * 1088);
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&FourCC::from_bytes(b"I420")).unwrap();
        assert_eq!(json, "\"I420\"");
        let back: FourCC = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FourCC::from_bytes(b"I420"));
    }
}
