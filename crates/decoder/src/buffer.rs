//! Hardware picture and stream buffers with attached metadata.
//!
//! An [`HwBuffer`] is a block of pixel (or bitstream) memory plus a set of
//! metadata records. Buffers are shared through `Arc` because the decode
//! engine and the output pipeline may both hold one at the same time.
//!
//! ## Shallow copies
//!
//! [`HwBuffer::shallow_copy`] creates a buffer that *aliases* the pixel
//! memory of its source instead of owning memory itself. The alias keeps the
//! source alive and never frees memory it does not own. Metadata is never
//! shared: the copy starts with an empty metadata set so clones can be added
//! and edited independently of the source.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use vcu_common::{
    CropInfo, Dimension, FourCC, HwStatus, OutputRole, PicStruct, PlaneId,
};

/// Process-wide unique identifier of a buffer.
pub type BufferId = u64;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

fn next_buffer_id() -> BufferId {
    NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Metadata records
// ---------------------------------------------------------------------------

/// Location of one pixel plane inside the buffer memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlaneDesc {
    pub id: PlaneId,
    /// Byte offset of the plane from the start of the buffer.
    pub offset: usize,
    /// Row pitch in bytes.
    pub pitch: u32,
}

/// Describes how pixels are laid out in the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixMapMeta {
    pub dim: Dimension,
    pub fourcc: FourCC,
    pub planes: Vec<PlaneDesc>,
    /// Pixel data is stored with frame-buffer compression.
    pub compressed: bool,
}

impl PixMapMeta {
    pub fn plane(&self, id: PlaneId) -> Option<&PlaneDesc> {
        self.planes.iter().find(|p| p.id == id)
    }

    pub fn pitch(&self, id: PlaneId) -> u32 {
        self.plane(id).map_or(0, |p| p.pitch)
    }

    pub fn offset(&self, id: PlaneId) -> usize {
        self.plane(id).map_or(0, |p| p.offset)
    }
}

/// Display-related information attached to a decoded picture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayInfoMeta {
    pub crop: CropInfo,
    pub pic_struct: PicStruct,
    pub output_role: OutputRole,
    pub bit_depth_y: u8,
    pub bit_depth_c: u8,
}

/// Decode bookkeeping attached by the engine to each output picture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PictureDecMeta {
    /// Decode order index of the picture held by the buffer.
    pub decoded_index: u64,
    pub status: HwStatus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MetaType {
    PixMap,
    DisplayInfo,
    PictureDec,
}

#[derive(Clone, Debug, Default)]
struct BufferMeta {
    pixmap: Option<PixMapMeta>,
    display_info: Option<DisplayInfoMeta>,
    picture_dec: Option<PictureDecMeta>,
}

// ---------------------------------------------------------------------------
// Pixel memory
// ---------------------------------------------------------------------------

/// Owned block of buffer memory.
pub struct PixelMemory {
    bytes: RwLock<Vec<u8>>,
    /// Live-byte counter of the allocator that produced this block.
    accounting: Option<Arc<AtomicUsize>>,
}

impl PixelMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: RwLock::new(vec![0; size]),
            accounting: None,
        }
    }

    pub(crate) fn tracked(size: usize, accounting: Arc<AtomicUsize>) -> Self {
        accounting.fetch_add(size, Ordering::Relaxed);
        Self {
            bytes: RwLock::new(vec![0; size]),
            accounting: Some(accounting),
        }
    }
}

impl Drop for PixelMemory {
    fn drop(&mut self) {
        if let Some(accounting) = &self.accounting {
            accounting.fetch_sub(self.bytes.get_mut().len(), Ordering::Relaxed);
        }
    }
}

/// Memory backing a buffer: either its own, or an alias of another buffer.
pub enum BufferMemory {
    Owned(PixelMemory),
    Aliased(Arc<HwBuffer>),
}

// ---------------------------------------------------------------------------
// HwBuffer
// ---------------------------------------------------------------------------

/// A hardware buffer: memory plus metadata records.
pub struct HwBuffer {
    id: BufferId,
    name: String,
    memory: BufferMemory,
    meta: Mutex<BufferMeta>,
    invalidations: AtomicU32,
}

impl HwBuffer {
    pub fn new(memory: PixelMemory, name: impl Into<String>) -> Self {
        Self {
            id: next_buffer_id(),
            name: name.into(),
            memory: BufferMemory::Owned(memory),
            meta: Mutex::new(BufferMeta::default()),
            invalidations: AtomicU32::new(0),
        }
    }

    /// Buffer sharing the pixel memory of `source`, with no metadata attached.
    pub fn shallow_copy(source: &Arc<HwBuffer>) -> Self {
        Self {
            id: next_buffer_id(),
            name: format!("{} (shallow)", source.name),
            memory: BufferMemory::Aliased(Arc::clone(source)),
            meta: Mutex::new(BufferMeta::default()),
            invalidations: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.memory, BufferMemory::Aliased(_))
    }

    /// Memory of the buffer at the end of the alias chain.
    fn owned_memory(&self) -> &PixelMemory {
        let mut current = self;
        loop {
            match &current.memory {
                BufferMemory::Owned(memory) => return memory,
                BufferMemory::Aliased(source) => current = source,
            }
        }
    }

    pub fn size(&self) -> usize {
        self.owned_memory().bytes.read().len()
    }

    pub fn has_data(&self) -> bool {
        self.size() > 0
    }

    /// Address of the first byte of pixel memory (identical for aliases).
    pub fn data_ptr(&self) -> *const u8 {
        self.owned_memory().bytes.read().as_ptr()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.owned_memory().bytes.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.owned_memory().bytes.write()
    }

    /// Zero the whole memory block.
    pub fn cleanup(&self) {
        self.write().fill(0);
    }

    /// Make device writes visible to the CPU before the memory is read.
    pub fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::Release);
    }

    pub fn invalidation_count(&self) -> u32 {
        self.invalidations.load(Ordering::Acquire)
    }

    // -- metadata ------------------------------------------------------------

    pub fn has_meta(&self, kind: MetaType) -> bool {
        let meta = self.meta.lock();
        match kind {
            MetaType::PixMap => meta.pixmap.is_some(),
            MetaType::DisplayInfo => meta.display_info.is_some(),
            MetaType::PictureDec => meta.picture_dec.is_some(),
        }
    }

    /// Attach a pixmap record. Returns `false` if one is already attached.
    pub fn add_pixmap_meta(&self, record: PixMapMeta) -> bool {
        insert_once(&mut self.meta.lock().pixmap, record)
    }

    pub fn add_display_info_meta(&self, record: DisplayInfoMeta) -> bool {
        insert_once(&mut self.meta.lock().display_info, record)
    }

    pub fn add_picture_dec_meta(&self, record: PictureDecMeta) -> bool {
        insert_once(&mut self.meta.lock().picture_dec, record)
    }

    pub fn remove_meta(&self, kind: MetaType) {
        let mut meta = self.meta.lock();
        match kind {
            MetaType::PixMap => meta.pixmap = None,
            MetaType::DisplayInfo => meta.display_info = None,
            MetaType::PictureDec => meta.picture_dec = None,
        }
    }

    pub fn pixmap_meta(&self) -> Option<PixMapMeta> {
        self.meta.lock().pixmap.clone()
    }

    pub fn display_info_meta(&self) -> Option<DisplayInfoMeta> {
        self.meta.lock().display_info.clone()
    }

    pub fn picture_dec_meta(&self) -> Option<PictureDecMeta> {
        self.meta.lock().picture_dec.clone()
    }

    /// Edit the pixmap record in place. Returns `None` if it is absent.
    pub fn update_pixmap_meta<R>(&self, f: impl FnOnce(&mut PixMapMeta) -> R) -> Option<R> {
        self.meta.lock().pixmap.as_mut().map(f)
    }

    pub fn update_display_info_meta<R>(
        &self,
        f: impl FnOnce(&mut DisplayInfoMeta) -> R,
    ) -> Option<R> {
        self.meta.lock().display_info.as_mut().map(f)
    }

    pub fn update_picture_dec_meta<R>(
        &self,
        f: impl FnOnce(&mut PictureDecMeta) -> R,
    ) -> Option<R> {
        self.meta.lock().picture_dec.as_mut().map(f)
    }

    pub fn fourcc(&self) -> FourCC {
        self.meta
            .lock()
            .pixmap
            .as_ref()
            .map_or(FourCC::NULL, |m| m.fourcc)
    }

    pub fn dimension(&self) -> Dimension {
        self.meta
            .lock()
            .pixmap
            .as_ref()
            .map_or(Dimension::default(), |m| m.dim)
    }

    pub fn set_dimension(&self, dim: Dimension) -> bool {
        self.update_pixmap_meta(|m| m.dim = dim).is_some()
    }
}

fn insert_once<T>(slot: &mut Option<T>, record: T) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(record);
    true
}

impl std::fmt::Debug for HwBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwBuffer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size())
            .field("alias", &self.is_alias())
            .finish()
    }
}
