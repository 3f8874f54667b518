//! Software pixel-format conversion between picture buffers.
//!
//! Conversion goes through a planar 16-bit intermediate: the source is
//! unpacked (raster or tiled, planar or semi-planar, LSB or MSB aligned),
//! chroma is resampled to the destination subsampling, samples are shifted
//! to the destination bit depth and the result is packed into the
//! destination layout. Tiled destinations are not supported.

use vcu_common::{
    ChromaMode, DecodeError, DecodeResult, FourCC, PicFormat, PlaneId, PlaneMode, StorageMode,
};

use crate::buffer::{HwBuffer, PixMapMeta};

/// Planar picture with one `u16` per sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanarImage {
    pub width: u32,
    pub height: u32,
    pub chroma: ChromaMode,
    pub bit_depth: u8,
    pub y: Vec<u16>,
    pub u: Vec<u16>,
    pub v: Vec<u16>,
}

impl PlanarImage {
    pub fn chroma_size(&self) -> (u32, u32) {
        chroma_size(self.chroma, self.width, self.height)
    }
}

fn chroma_size(chroma: ChromaMode, width: u32, height: u32) -> (u32, u32) {
    match chroma {
        ChromaMode::Mono => (0, 0),
        _ => {
            let (sx, sy) = chroma.subsampling();
            (width.div_ceil(sx), height.div_ceil(sy))
        }
    }
}

/// Convert the pixels of `src` into `dst` according to their pixmap records.
pub fn convert_pixmap(src: &HwBuffer, dst: &HwBuffer) -> DecodeResult<()> {
    let src_meta = src
        .pixmap_meta()
        .ok_or_else(|| DecodeError::metadata("source has no pixmap metadata"))?;
    let dst_meta = dst
        .pixmap_meta()
        .ok_or_else(|| DecodeError::metadata("destination has no pixmap metadata"))?;
    let src_format = format_of(&src_meta)?;
    let dst_format = format_of(&dst_meta)?;
    if dst_format.storage.is_tiled() {
        return Err(unsupported(src_meta.fourcc, dst_meta.fourcc));
    }

    let width = src_meta.dim.width.min(dst_meta.dim.width);
    let height = src_meta.dim.height.min(dst_meta.dim.height);

    let image = {
        let bytes = src.read();
        unpack(&bytes, &src_meta, &src_format, width, height)
            .ok_or_else(|| out_of_bounds(src_meta.fourcc))?
    };
    let image = resample_chroma(image, dst_format.chroma);
    let image = shift_bit_depth(image, dst_format.bit_depth);

    let mut bytes = dst.write();
    pack(&image, &mut bytes, &dst_meta, &dst_format).ok_or_else(|| out_of_bounds(dst_meta.fourcc))
}

fn format_of(meta: &PixMapMeta) -> DecodeResult<PicFormat> {
    meta.fourcc
        .pic_format()
        .ok_or_else(|| DecodeError::InvalidArgument(format!("unknown FourCC {}", meta.fourcc)))
}

fn unsupported(from: FourCC, to: FourCC) -> DecodeError {
    DecodeError::UnsupportedConversion {
        from: from.to_string(),
        to: to.to_string(),
    }
}

fn out_of_bounds(fourcc: FourCC) -> DecodeError {
    DecodeError::InvalidArgument(format!("{fourcc} buffer too small for its picture"))
}

// ---------------------------------------------------------------------------
// Sample addressing
// ---------------------------------------------------------------------------

/// Byte offset of sample `(x, y)` of a plane, `x` counted in samples.
fn sample_offset(storage: StorageMode, plane: usize, pitch: u32, x: u32, y: u32, bps: u32) -> usize {
    let (x, y, pitch, bps) = (x as usize, y as usize, pitch as usize, bps as usize);
    match storage {
        StorageMode::Raster => plane + y * pitch + x * bps,
        StorageMode::Tile32x4 | StorageMode::Tile64x4 => {
            let tile_w = if storage == StorageMode::Tile32x4 { 32 } else { 64 };
            plane
                + (y / 4) * pitch
                + (x / tile_w) * tile_w * 4 * bps
                + ((y % 4) * tile_w + x % tile_w) * bps
        }
    }
}

fn read_sample(bytes: &[u8], offset: usize, format: &PicFormat) -> Option<u16> {
    if format.bit_depth <= 8 {
        return bytes.get(offset).map(|b| *b as u16);
    }
    let raw = u16::from_le_bytes([*bytes.get(offset)?, *bytes.get(offset + 1)?]);
    Some(if format.msb {
        raw >> (16 - format.bit_depth)
    } else {
        raw
    })
}

fn write_sample(bytes: &mut [u8], offset: usize, format: &PicFormat, value: u16) -> Option<()> {
    if format.bit_depth <= 8 {
        *bytes.get_mut(offset)? = value as u8;
        return Some(());
    }
    let raw = if format.msb {
        value << (16 - format.bit_depth)
    } else {
        value
    };
    bytes.get_mut(offset..offset + 2)?.copy_from_slice(&raw.to_le_bytes());
    Some(())
}

// ---------------------------------------------------------------------------
// Unpack / pack
// ---------------------------------------------------------------------------

fn unpack(
    bytes: &[u8],
    meta: &PixMapMeta,
    format: &PicFormat,
    width: u32,
    height: u32,
) -> Option<PlanarImage> {
    let bps = format.bytes_per_sample();
    let read_plane = |id: PlaneId, w: u32, h: u32, stride: u32, phase: u32| -> Option<Vec<u16>> {
        let plane = meta.plane(id)?;
        let mut out = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let sx = x * stride + phase;
                let offset = sample_offset(format.storage, plane.offset, plane.pitch, sx, y, bps);
                out.push(read_sample(bytes, offset, format)?);
            }
        }
        Some(out)
    };

    let y = read_plane(PlaneId::Y, width, height, 1, 0)?;
    let (cw, ch) = chroma_size(format.chroma, width, height);
    let (u, v) = match (format.chroma, format.plane_mode) {
        (ChromaMode::Mono, _) | (_, PlaneMode::Monoplane) => (Vec::new(), Vec::new()),
        (_, PlaneMode::SemiPlanar) => (
            read_plane(PlaneId::UV, cw, ch, 2, 0)?,
            read_plane(PlaneId::UV, cw, ch, 2, 1)?,
        ),
        (_, PlaneMode::Planar) => (
            read_plane(PlaneId::U, cw, ch, 1, 0)?,
            read_plane(PlaneId::V, cw, ch, 1, 0)?,
        ),
    };

    Some(PlanarImage {
        width,
        height,
        chroma: format.chroma,
        bit_depth: format.bit_depth,
        y,
        u,
        v,
    })
}

fn pack(image: &PlanarImage, bytes: &mut [u8], meta: &PixMapMeta, format: &PicFormat) -> Option<()> {
    let bps = format.bytes_per_sample();
    let mut write_plane =
        |id: PlaneId, samples: &[u16], w: u32, stride: u32, phase: u32| -> Option<()> {
            let plane = meta.plane(id)?;
            for (i, value) in samples.iter().enumerate() {
                let (x, y) = (i as u32 % w, i as u32 / w);
                let offset =
                    sample_offset(format.storage, plane.offset, plane.pitch, x * stride + phase, y, bps);
                write_sample(bytes, offset, format, *value)?;
            }
            Some(())
        };

    write_plane(PlaneId::Y, &image.y, image.width, 1, 0)?;
    let (cw, _) = image.chroma_size();
    match (format.chroma, format.plane_mode) {
        (ChromaMode::Mono, _) | (_, PlaneMode::Monoplane) => {}
        (_, PlaneMode::SemiPlanar) => {
            write_plane(PlaneId::UV, &image.u, cw, 2, 0)?;
            write_plane(PlaneId::UV, &image.v, cw, 2, 1)?;
        }
        (_, PlaneMode::Planar) => {
            write_plane(PlaneId::U, &image.u, cw, 1, 0)?;
            write_plane(PlaneId::V, &image.v, cw, 1, 0)?;
        }
    }
    Some(())
}

// ---------------------------------------------------------------------------
// Chroma resampling and bit depth
// ---------------------------------------------------------------------------

/// Resample chroma planes to the `target` subsampling.
///
/// Each destination sample averages the source samples covering the same
/// luma area. A monochrome source produces neutral chroma.
pub fn resample_chroma(image: PlanarImage, target: ChromaMode) -> PlanarImage {
    if image.chroma == target {
        return image;
    }
    let (dw, dh) = chroma_size(target, image.width, image.height);
    let neutral = 1u16 << (image.bit_depth - 1);

    let (u, v) = if target == ChromaMode::Mono {
        (Vec::new(), Vec::new())
    } else if image.chroma == ChromaMode::Mono {
        let n = (dw * dh) as usize;
        (vec![neutral; n], vec![neutral; n])
    } else {
        let (ssx, ssy) = image.chroma.subsampling();
        let (dsx, dsy) = target.subsampling();
        let (sw, _) = image.chroma_size();
        let resample = |plane: &[u16]| -> Vec<u16> {
            let mut out = Vec::with_capacity((dw * dh) as usize);
            for cy in 0..dh {
                for cx in 0..dw {
                    let mut sum = 0u32;
                    let mut count = 0u32;
                    for ly in (cy * dsy)..((cy + 1) * dsy).min(image.height) {
                        for lx in (cx * dsx)..((cx + 1) * dsx).min(image.width) {
                            let idx = (ly / ssy) * sw + lx / ssx;
                            sum += plane[idx as usize] as u32;
                            count += 1;
                        }
                    }
                    out.push(if count == 0 { neutral } else { ((sum + count / 2) / count) as u16 });
                }
            }
            out
        };
        (resample(&image.u), resample(&image.v))
    };

    PlanarImage {
        chroma: target,
        u,
        v,
        ..image
    }
}

/// Shift every sample to `bit_depth`.
pub fn shift_bit_depth(mut image: PlanarImage, bit_depth: u8) -> PlanarImage {
    if image.bit_depth == bit_depth {
        return image;
    }
    let from = image.bit_depth;
    let shift = |v: &mut u16| {
        *v = if bit_depth > from {
            *v << (bit_depth - from)
        } else {
            *v >> (from - bit_depth)
        };
    };
    image.y.iter_mut().for_each(shift);
    image.u.iter_mut().for_each(shift);
    image.v.iter_mut().for_each(shift);
    image.bit_depth = bit_depth;
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{PixelMemory, PlaneDesc};
    use vcu_common::Dimension;

    fn buffer(fourcc: &[u8; 4], width: u32, height: u32) -> HwBuffer {
        let fourcc = FourCC::from_bytes(fourcc);
        let format = fourcc.pic_format().unwrap();
        let dim = Dimension::new(width, height);
        let pitch_y = format.min_pitch(width);
        let mut planes = Vec::new();
        let mut offset = 0;
        for id in format.pixel_planes() {
            let pitch = if id.is_luma() {
                pitch_y
            } else {
                format.chroma_pitch(pitch_y)
            };
            planes.push(PlaneDesc { id, offset, pitch });
            offset += format.plane_alloc_size(id, dim, pitch);
        }
        let buffer = HwBuffer::new(PixelMemory::new(offset), "conv-test");
        buffer.add_pixmap_meta(PixMapMeta {
            dim,
            fourcc,
            planes,
            compressed: false,
        });
        buffer
    }

    fn fill_nv12(buf: &HwBuffer, width: u32, height: u32) {
        let meta = buf.pixmap_meta().unwrap();
        let uv = meta.offset(PlaneId::UV);
        let pitch = meta.pitch(PlaneId::Y) as usize;
        let mut bytes = buf.write();
        for y in 0..height as usize {
            for x in 0..width as usize {
                bytes[y * pitch + x] = (x + y) as u8;
            }
        }
        for y in 0..(height / 2) as usize {
            for x in 0..(width / 2) as usize {
                bytes[uv + y * pitch + 2 * x] = 100 + x as u8;
                bytes[uv + y * pitch + 2 * x + 1] = 200 - y as u8;
            }
        }
    }

    #[test]
    fn nv12_to_i420_deinterleaves_chroma() {
        let src = buffer(b"NV12", 64, 16);
        fill_nv12(&src, 64, 16);
        let dst = buffer(b"I420", 64, 16);
        convert_pixmap(&src, &dst).unwrap();

        let meta = dst.pixmap_meta().unwrap();
        let bytes = dst.read();
        assert_eq!(bytes[3 * 64 + 5], 8);
        let (u, v, cp) = (
            meta.offset(PlaneId::U),
            meta.offset(PlaneId::V),
            meta.pitch(PlaneId::U) as usize,
        );
        assert_eq!(bytes[u + 2 * cp + 7], 107);
        assert_eq!(bytes[v + 2 * cp + 7], 198);
    }

    #[test]
    fn nv12_to_p010_shifts_into_msb() {
        let src = buffer(b"NV12", 64, 8);
        fill_nv12(&src, 64, 8);
        let dst = buffer(b"P010", 64, 8);
        convert_pixmap(&src, &dst).unwrap();

        let bytes = dst.read();
        let luma = u16::from_le_bytes([bytes[2 * 10], bytes[2 * 10 + 1]]);
        // 10 << 2 in the ten most significant bits
        assert_eq!(luma, (10 << 2) << 6);
    }

    #[test]
    fn tiled_source_is_untiled() {
        let src = buffer(b"T608", 64, 8);
        let meta = src.pixmap_meta().unwrap();
        {
            let mut bytes = src.write();
            let pitch = meta.pitch(PlaneId::Y);
            for y in 0..8 {
                for x in 0..64 {
                    let off = sample_offset(StorageMode::Tile64x4, 0, pitch, x, y, 1);
                    bytes[off] = (y * 64 + x) as u8;
                }
            }
        }
        let dst = buffer(b"NV12", 64, 8);
        convert_pixmap(&src, &dst).unwrap();
        let bytes = dst.read();
        assert_eq!(bytes[5 * 64 + 9], (5 * 64 + 9) as u8);
    }

    #[test]
    fn tiled_destination_is_rejected() {
        let src = buffer(b"NV12", 64, 8);
        let dst = buffer(b"T608", 64, 8);
        assert!(matches!(
            convert_pixmap(&src, &dst),
            Err(DecodeError::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn chroma_resampling() {
        let image = PlanarImage {
            width: 4,
            height: 2,
            chroma: ChromaMode::Yuv422,
            bit_depth: 8,
            y: vec![0; 8],
            u: vec![10, 20, 30, 40],
            v: vec![50, 60, 70, 80],
        };
        let out = resample_chroma(image.clone(), ChromaMode::Yuv420);
        assert_eq!(out.u, vec![20, 30]);
        assert_eq!(out.v, vec![60, 70]);

        let up = resample_chroma(image, ChromaMode::Yuv444);
        assert_eq!(up.u, vec![10, 10, 20, 20, 30, 30, 40, 40]);

        let mono = PlanarImage {
            width: 2,
            height: 2,
            chroma: ChromaMode::Mono,
            bit_depth: 10,
            y: vec![1; 4],
            u: vec![],
            v: vec![],
        };
        assert_eq!(resample_chroma(mono, ChromaMode::Yuv420).u, vec![512]);
    }

    #[test]
    fn bit_depth_round_trip_of_top_bits() {
        let image = PlanarImage {
            width: 1,
            height: 1,
            chroma: ChromaMode::Mono,
            bit_depth: 10,
            y: vec![1023],
            u: vec![],
            v: vec![],
        };
        assert_eq!(shift_bit_depth(image, 8).y, vec![255]);
    }
}
