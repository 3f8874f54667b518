//! Decoded frames.
//!
//! A [`Frame`] owns one reference to a hardware picture buffer together with
//! a snapshot of the decode information the engine delivered with it.
//!
//! ## Lifecycle
//!
//! Frames are shared as `Arc<Frame>`. When the last reference goes away the
//! optional completion callback runs exactly once, while the buffer is still
//! held, and only then is the buffer reference released. The callback is
//! how decoded-picture buffers find their way back to the engine.
//!
//! A frame may be *linked* to another frame. The link only extends the
//! lifetime of the target: a derived frame (a shallow copy, or a converted
//! copy) keeps its source alive until the derived frame is dropped too.

use std::sync::Arc;

use parking_lot::Mutex;

use vcu_common::{
    round_up, CropInfo, DecodeError, DecodeResult, Dimension, FourCC, InfoDecode, PicFormat,
    PicStruct, PlaneId, PlaneMode, Position,
};

use crate::buffer::{HwBuffer, MetaType, PixMapMeta, PixelMemory, PlaneDesc};

/// Invoked once when a frame is destroyed.
pub type FrameCallback = Box<dyn FnOnce(&Frame) + Send>;

/// Consumer-facing description of a frame's memory layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawInfo {
    pub fourcc: FourCC,
    pub pic_struct: PicStruct,
    pub bits_per_luma: u8,
    pub bits_per_chroma: u8,
    /// Luma row pitch in bytes.
    pub stride: u32,
    /// Chroma row pitch in bytes (UV plane for semi-planar, U otherwise).
    pub stride_chroma: u32,
    pub width: u32,
    pub height: u32,
    pub pos_x: u32,
    pub pos_y: u32,
    pub crop_top: u32,
    pub crop_bottom: u32,
    pub crop_left: u32,
    pub crop_right: u32,
    /// Set by the consumer side once the stream has ended.
    pub eos: bool,
}

pub struct Frame {
    buffer: Arc<HwBuffer>,
    info: InfoDecode,
    callback: Mutex<Option<FrameCallback>>,
    linked: Mutex<Option<Arc<Frame>>>,
}

impl Frame {
    /// Wrap an engine-delivered buffer.
    pub fn create(
        buffer: Arc<HwBuffer>,
        info: &InfoDecode,
        callback: Option<FrameCallback>,
    ) -> Arc<Frame> {
        Arc::new(Frame {
            buffer,
            info: info.clone(),
            callback: Mutex::new(callback),
            linked: Mutex::new(None),
        })
    }

    /// Frame sharing `source`'s pixel memory with cloned metadata records.
    ///
    /// Every engine-delivered buffer carries a pixmap and a display-info
    /// record; a missing one is reported as [`DecodeError::MetadataCloneFailure`].
    /// The copy is not linked to its source; callers that need the source
    /// to outlive the copy call [`link`](Self::link).
    pub fn create_shallow_copy(source: &Arc<Frame>) -> DecodeResult<Arc<Frame>> {
        let pixmap = source
            .buffer
            .pixmap_meta()
            .ok_or_else(|| DecodeError::metadata("pixmap metadata is missing"))?;
        let display = source
            .buffer
            .display_info_meta()
            .ok_or_else(|| DecodeError::metadata("display info metadata is missing"))?;

        let copy = HwBuffer::shallow_copy(&source.buffer);
        if !copy.add_pixmap_meta(pixmap) {
            return Err(DecodeError::metadata("cloned pixmap metadata was not added"));
        }
        if !copy.add_display_info_meta(display) {
            return Err(DecodeError::metadata(
                "cloned display info metadata was not added",
            ));
        }

        Ok(Frame::create(Arc::new(copy), &source.info, None))
    }

    /// Fresh CPU-side frame used as the destination of a format conversion.
    pub fn create_yuv_io(size: Dimension, fourcc: FourCC) -> DecodeResult<Arc<Frame>> {
        let layout = YuvIoLayout::new(size, fourcc)?;
        let buffer = Arc::new(HwBuffer::new(
            PixelMemory::new(layout.alloc_size),
            "IO frame buffer",
        ));
        Ok(layout.into_frame(buffer, None))
    }

    /// Like [`create_yuv_io`](Self::create_yuv_io), reusing `buffer`'s memory.
    ///
    /// Any metadata left on the buffer from a previous use is replaced. When
    /// `source_crop` crops, its offsets are carried over on top of the
    /// rounding padding.
    pub fn create_yuv_io_on(
        buffer: Arc<HwBuffer>,
        size: Dimension,
        fourcc: FourCC,
        source_crop: Option<&CropInfo>,
        callback: Option<FrameCallback>,
    ) -> DecodeResult<Arc<Frame>> {
        let layout = YuvIoLayout::new(size, fourcc)?;
        if buffer.size() < layout.alloc_size {
            return Err(DecodeError::InvalidArgument(format!(
                "buffer of {} bytes cannot hold a {size} {fourcc} picture ({} bytes)",
                buffer.size(),
                layout.alloc_size
            )));
        }
        buffer.remove_meta(MetaType::PixMap);
        buffer.remove_meta(MetaType::DisplayInfo);
        buffer.remove_meta(MetaType::PictureDec);
        let mut frame_layout = layout;
        frame_layout.source_crop = source_crop.filter(|c| c.cropping).copied();
        Ok(frame_layout.into_frame(buffer, callback))
    }

    /// Bytes needed by a conversion destination of this size and format.
    pub fn yuv_io_size(size: Dimension, fourcc: FourCC) -> DecodeResult<usize> {
        Ok(YuvIoLayout::new(size, fourcc)?.alloc_size)
    }

    /// Keep `frame` alive at least as long as this frame.
    pub fn link(&self, frame: Arc<Frame>) {
        *self.linked.lock() = Some(frame);
    }

    pub fn linked(&self) -> Option<Arc<Frame>> {
        self.linked.lock().clone()
    }

    /// Must run once before the CPU reads pixels written by the hardware.
    pub fn invalidate(&self) {
        self.buffer.invalidate();
    }

    pub fn buffer(&self) -> &Arc<HwBuffer> {
        &self.buffer
    }

    pub fn info(&self) -> &InfoDecode {
        &self.info
    }

    pub fn is_main_output(&self) -> bool {
        self.info.output_role.is_main()
    }

    pub fn bit_depth_y(&self) -> u8 {
        self.info.bit_depth_y
    }

    pub fn bit_depth_uv(&self) -> u8 {
        self.info.bit_depth_c
    }

    pub fn crop_info(&self) -> &CropInfo {
        &self.info.crop
    }

    pub fn dimension(&self) -> Dimension {
        self.info.dim
    }

    pub fn fourcc(&self) -> FourCC {
        self.buffer.fourcc()
    }

    pub fn raw_info(&self) -> RawInfo {
        let pixmap = self.buffer.pixmap_meta();
        let fourcc = pixmap.as_ref().map_or(FourCC::NULL, |m| m.fourcc);
        let dim = pixmap.as_ref().map_or(self.info.dim, |m| m.dim);
        let chroma_plane = match fourcc.pic_format().map(|f| f.plane_mode) {
            Some(PlaneMode::SemiPlanar) => PlaneId::UV,
            _ => PlaneId::U,
        };
        let crop = &self.info.crop;
        let cropped = |value: u32| if crop.cropping { value } else { 0 };

        RawInfo {
            fourcc,
            pic_struct: self.info.pic_struct,
            bits_per_luma: self.bit_depth_y(),
            bits_per_chroma: self.bit_depth_uv(),
            stride: pixmap.as_ref().map_or(0, |m| m.pitch(PlaneId::Y)),
            stride_chroma: pixmap.as_ref().map_or(0, |m| m.pitch(chroma_plane)),
            width: dim.width,
            height: dim.height,
            pos_x: 0,
            pos_y: 0,
            crop_top: cropped(crop.top),
            crop_bottom: cropped(crop.bottom),
            crop_left: cropped(crop.left),
            crop_right: cropped(crop.right),
            eos: false,
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.get_mut().take() {
            callback(self);
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("buffer", &self.buffer.id())
            .field("dim", &self.info.dim)
            .field("role", &self.info.output_role)
            .field("linked", &self.linked.lock().is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Conversion destination layout
// ---------------------------------------------------------------------------

struct YuvIoLayout {
    size: Dimension,
    rounded: Dimension,
    fourcc: FourCC,
    format: PicFormat,
    planes: Vec<PlaneDesc>,
    alloc_size: usize,
    source_crop: Option<CropInfo>,
}

impl YuvIoLayout {
    fn new(size: Dimension, fourcc: FourCC) -> DecodeResult<Self> {
        if fourcc.is_null() {
            return Err(DecodeError::InvalidArgument(
                "FourCC cannot be NULL".to_string(),
            ));
        }
        let format = fourcc.pic_format().ok_or_else(|| {
            DecodeError::InvalidArgument(format!("unknown FourCC {fourcc}"))
        })?;

        let rounded = Dimension::new(round_up(size.width, 8), round_up(size.height, 8));
        let pitch_y = format.min_pitch(rounded.width);
        let mut planes = Vec::new();
        let mut offset = 0;
        for id in format.pixel_planes() {
            let pitch = if id.is_luma() {
                pitch_y
            } else {
                format.chroma_pitch(pitch_y)
            };
            planes.push(PlaneDesc { id, offset, pitch });
            offset += format.plane_alloc_size(id, rounded, pitch);
        }

        Ok(Self {
            size,
            rounded,
            fourcc,
            format,
            planes,
            alloc_size: offset,
            source_crop: None,
        })
    }

    fn into_frame(self, buffer: Arc<HwBuffer>, callback: Option<FrameCallback>) -> Arc<Frame> {
        buffer.add_pixmap_meta(PixMapMeta {
            dim: self.size,
            fourcc: self.fourcc,
            planes: self.planes,
            compressed: false,
        });

        let pad_right = self.rounded.width - self.size.width;
        let pad_bottom = self.rounded.height - self.size.height;
        let crop = match self.source_crop {
            Some(src) => CropInfo {
                cropping: true,
                left: src.left,
                top: src.top,
                right: src.right + pad_right,
                bottom: src.bottom + pad_bottom,
            },
            None => CropInfo {
                cropping: self.size != self.rounded,
                left: 0,
                top: 0,
                right: pad_right,
                bottom: pad_bottom,
            },
        };
        let info = InfoDecode {
            dim: self.rounded,
            crop,
            bit_depth_y: self.format.bit_depth,
            bit_depth_c: self.format.bit_depth,
            chroma: self.format.chroma,
            storage_mode: self.format.storage,
            pic_struct: PicStruct::Frame,
            position: Position::default(),
            ..InfoDecode::default()
        };
        Frame::create(buffer, &info, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DisplayInfoMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vcu_common::OutputRole;

    fn engine_frame(callback: Option<FrameCallback>) -> Arc<Frame> {
        let buffer = Arc::new(HwBuffer::new(PixelMemory::new(64 * 96), "dpb"));
        buffer.add_pixmap_meta(PixMapMeta {
            dim: Dimension::new(64, 64),
            fourcc: FourCC::from_bytes(b"NV12"),
            planes: vec![
                PlaneDesc {
                    id: PlaneId::Y,
                    offset: 0,
                    pitch: 64,
                },
                PlaneDesc {
                    id: PlaneId::UV,
                    offset: 64 * 64,
                    pitch: 64,
                },
            ],
            compressed: false,
        });
        buffer.add_display_info_meta(DisplayInfoMeta::default());
        let info = InfoDecode {
            dim: Dimension::new(64, 64),
            crop: CropInfo {
                cropping: true,
                bottom: 4,
                ..Default::default()
            },
            ..Default::default()
        };
        Frame::create(buffer, &info, callback)
    }

    // -- lifecycle -----------------------------------------------------------

    #[test]
    fn callback_runs_once_on_last_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let frame = engine_frame(Some(Box::new(move |f: &Frame| {
            assert!(f.buffer().has_data());
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        let second = Arc::clone(&frame);
        drop(frame);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn link_extends_source_lifetime() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let source = engine_frame(Some(Box::new(move |_: &Frame| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        let copy = Frame::create_shallow_copy(&source).unwrap();
        copy.link(source);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(copy);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // -- shallow copy ----------------------------------------------------------

    #[test]
    fn shallow_copy_shares_pixels_not_metadata() {
        let source = engine_frame(None);
        let copy = Frame::create_shallow_copy(&source).unwrap();
        assert_eq!(copy.buffer().data_ptr(), source.buffer().data_ptr());

        copy.buffer().update_display_info_meta(|m| m.crop.top = 16);
        copy.buffer().set_dimension(Dimension::new(32, 32));
        assert_eq!(source.buffer().display_info_meta().unwrap().crop.top, 0);
        assert_eq!(source.buffer().dimension(), Dimension::new(64, 64));
        assert_eq!(copy.info(), source.info());
    }

    #[test]
    fn shallow_copy_requires_both_records() {
        let source = engine_frame(None);
        source.buffer().remove_meta(MetaType::DisplayInfo);
        let err = Frame::create_shallow_copy(&source).unwrap_err();
        assert!(matches!(err, DecodeError::MetadataCloneFailure { .. }));
    }

    // -- conversion destination ------------------------------------------------

    #[test]
    fn yuv_io_rejects_null_fourcc() {
        assert!(Frame::create_yuv_io(Dimension::new(64, 64), FourCC::NULL).is_err());
    }

    #[test]
    fn yuv_io_rounds_to_eight() {
        let frame = Frame::create_yuv_io(Dimension::new(100, 50), FourCC::from_bytes(b"I420"))
            .unwrap();
        assert_eq!(frame.dimension(), Dimension::new(104, 56));
        assert_eq!(frame.buffer().dimension(), Dimension::new(100, 50));
        let crop = frame.crop_info();
        assert!(crop.cropping);
        assert_eq!((crop.right, crop.bottom), (4, 6));
        assert_eq!(frame.info().output_role, OutputRole::Main);

        // 128 * 56 luma + 2 * 64 * 28 chroma
        assert_eq!(frame.buffer().size(), 128 * 56 + 2 * 64 * 28);
    }

    #[test]
    fn yuv_io_reuses_large_enough_buffer() {
        let size = Frame::yuv_io_size(Dimension::new(64, 64), FourCC::from_bytes(b"NV12")).unwrap();
        let buffer = Arc::new(HwBuffer::new(PixelMemory::new(size), "conv"));
        let ptr = buffer.data_ptr();
        let frame = Frame::create_yuv_io_on(
            buffer.clone(),
            Dimension::new(64, 64),
            FourCC::from_bytes(b"NV12"),
            None,
            None,
        )
        .unwrap();
        assert_eq!(frame.buffer().data_ptr(), ptr);
        drop(frame);

        // Reuse replaces the old records.
        let crop = CropInfo {
            cropping: true,
            bottom: 2,
            ..Default::default()
        };
        let again = Frame::create_yuv_io_on(
            buffer,
            Dimension::new(32, 30),
            FourCC::from_bytes(b"NV12"),
            Some(&crop),
            None,
        )
        .unwrap();
        assert_eq!(again.buffer().dimension(), Dimension::new(32, 30));
        assert_eq!(again.crop_info().bottom, 4);

        let small = Arc::new(HwBuffer::new(PixelMemory::new(16), "small"));
        assert!(Frame::create_yuv_io_on(
            small,
            Dimension::new(64, 64),
            FourCC::from_bytes(b"NV12"),
            None,
            None
        )
        .is_err());
    }

    #[test]
    fn raw_info_reports_layout() {
        let frame = engine_frame(None);
        let raw = frame.raw_info();
        assert_eq!(raw.fourcc, FourCC::from_bytes(b"NV12"));
        assert_eq!(raw.stride, 64);
        assert_eq!(raw.stride_chroma, 64);
        assert_eq!((raw.width, raw.height), (64, 64));
        assert_eq!(raw.crop_bottom, 4);
        assert!(!raw.eos);
    }
}
