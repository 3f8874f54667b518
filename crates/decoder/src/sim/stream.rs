//! Synthetic bitstream understood by the simulated engine.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "VSIM", version u8
//! records, each starting with a one-byte tag:
//!   'H'  sequence header: width u32, height u32, chroma u8, bit depth u8,
//!        profile u8, level u8 (0xFF = none), sequence mode u8,
//!        cropping u8, crop left/right/top/bottom u32, buffer number u8
//!   'F'  picture: status u8, output role u8, picture structure u8
//!   'R'  release-only display event
//!   'E'  engine error report: status u8
//! ```

use std::io::{self, Cursor, Read};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use vcu_common::{
    ChromaMode, CropInfo, DecodeError, DecodeResult, Dimension, HwStatus, OutputRole, PicStruct,
    SequenceMode, StreamSettings,
};

pub const MAGIC: &[u8; 4] = b"VSIM";
pub const VERSION: u8 = 1;

const TAG_SEQUENCE: u8 = b'H';
const TAG_PICTURE: u8 = b'F';
const TAG_RELEASE: u8 = b'R';
const TAG_ERROR: u8 = b'E';

const NO_LEVEL: u8 = 0xFF;

/// One parsed bitstream record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Sequence {
        settings: StreamSettings,
        crop: CropInfo,
        buffer_number: u8,
    },
    Picture {
        status: HwStatus,
        role: OutputRole,
        pic_struct: PicStruct,
    },
    Release,
    Error(HwStatus),
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Builds a synthetic bitstream in memory.
#[derive(Clone, Debug)]
pub struct SimStreamWriter {
    bytes: Vec<u8>,
}

impl SimStreamWriter {
    pub fn new() -> Self {
        let mut bytes = MAGIC.to_vec();
        bytes.push(VERSION);
        Self { bytes }
    }

    fn put_u32(&mut self, value: u32) {
        let mut word = [0; 4];
        LittleEndian::write_u32(&mut word, value);
        self.bytes.extend_from_slice(&word);
    }

    pub fn sequence(
        &mut self,
        settings: &StreamSettings,
        crop: &CropInfo,
        buffer_number: u8,
    ) -> &mut Self {
        self.bytes.push(TAG_SEQUENCE);
        self.put_u32(settings.dim.width);
        self.put_u32(settings.dim.height);
        self.bytes.extend_from_slice(&[
            settings.chroma.code(),
            settings.bit_depth,
            settings.profile_idc,
            settings.level.unwrap_or(NO_LEVEL),
            settings.sequence_mode.code(),
            u8::from(crop.cropping),
        ]);
        self.put_u32(crop.left);
        self.put_u32(crop.right);
        self.put_u32(crop.top);
        self.put_u32(crop.bottom);
        self.bytes.push(buffer_number);
        self
    }

    pub fn picture(&mut self, status: HwStatus, role: OutputRole, pic_struct: PicStruct) -> &mut Self {
        self.bytes
            .extend_from_slice(&[TAG_PICTURE, status.code(), role.code(), pic_struct.code()]);
        self
    }

    /// `count` clean main-output progressive pictures.
    pub fn frames(&mut self, count: usize) -> &mut Self {
        for _ in 0..count {
            self.picture(HwStatus::Success, OutputRole::Main, PicStruct::Frame);
        }
        self
    }

    pub fn release(&mut self) -> &mut Self {
        self.bytes.push(TAG_RELEASE);
        self
    }

    pub fn error(&mut self, status: HwStatus) -> &mut Self {
        self.bytes.extend_from_slice(&[TAG_ERROR, status.code()]);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn finish(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> DecodeResult<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

impl Default for SimStreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Incremental parser
// ---------------------------------------------------------------------------

/// Parses records out of input arriving in arbitrary chunks.
#[derive(Debug, Default)]
pub struct SimParser {
    pending: Vec<u8>,
    header_seen: bool,
}

impl SimParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Bytes received but not yet part of a complete record.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Next complete record, or `None` if more input is needed.
    pub fn next_record(&mut self) -> DecodeResult<Option<Record>> {
        if !self.header_seen {
            if self.pending.len() < MAGIC.len() + 1 {
                return Ok(None);
            }
            if &self.pending[..MAGIC.len()] != MAGIC {
                return Err(DecodeError::InvalidArgument(
                    "input is not a VSIM bitstream".into(),
                ));
            }
            let version = self.pending[MAGIC.len()];
            if version != VERSION {
                return Err(DecodeError::InvalidArgument(format!(
                    "unsupported VSIM version {version}"
                )));
            }
            self.pending.drain(..MAGIC.len() + 1);
            self.header_seen = true;
        }

        let mut cursor = Cursor::new(self.pending.as_slice());
        match parse_record(&mut cursor) {
            Ok(record) => {
                let used = cursor.position() as usize;
                self.pending.drain(..used);
                Ok(Some(record))
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(DecodeError::InvalidArgument(e.to_string())),
        }
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn parse_record(input: &mut impl Read) -> io::Result<Record> {
    let tag = input.read_u8()?;
    match tag {
        TAG_SEQUENCE => {
            let width = input.read_u32::<LittleEndian>()?;
            let height = input.read_u32::<LittleEndian>()?;
            let chroma_code = input.read_u8()?;
            let bit_depth = input.read_u8()?;
            let profile_idc = input.read_u8()?;
            let level = input.read_u8()?;
            let sequence = input.read_u8()?;
            let cropping = input.read_u8()? != 0;
            let left = input.read_u32::<LittleEndian>()?;
            let right = input.read_u32::<LittleEndian>()?;
            let top = input.read_u32::<LittleEndian>()?;
            let bottom = input.read_u32::<LittleEndian>()?;
            let buffer_number = input.read_u8()?;

            let chroma = ChromaMode::from_code(chroma_code)
                .ok_or_else(|| invalid(format!("unknown chroma mode {chroma_code}")))?;
            if !matches!(bit_depth, 8 | 10 | 12) {
                return Err(invalid(format!("unsupported bit depth {bit_depth}")));
            }
            Ok(Record::Sequence {
                settings: StreamSettings {
                    dim: Dimension::new(width, height),
                    chroma,
                    bit_depth,
                    profile_idc,
                    level: (level != NO_LEVEL).then_some(level),
                    sequence_mode: SequenceMode::from_code(sequence),
                },
                crop: CropInfo {
                    cropping,
                    left,
                    right,
                    top,
                    bottom,
                },
                buffer_number,
            })
        }
        TAG_PICTURE => {
            let status = HwStatus::from_code(input.read_u8()?);
            let role_code = input.read_u8()?;
            let struct_code = input.read_u8()?;
            Ok(Record::Picture {
                status,
                role: OutputRole::from_code(role_code)
                    .ok_or_else(|| invalid(format!("unknown output role {role_code}")))?,
                pic_struct: PicStruct::from_code(struct_code)
                    .ok_or_else(|| invalid(format!("unknown picture structure {struct_code}")))?,
            })
        }
        TAG_RELEASE => Ok(Record::Release),
        TAG_ERROR => Ok(Record::Error(HwStatus::from_code(input.read_u8()?))),
        other => Err(invalid(format!("unknown record tag 0x{other:02x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StreamSettings {
        StreamSettings {
            dim: Dimension::new(176, 144),
            chroma: ChromaMode::Yuv420,
            bit_depth: 10,
            profile_idc: 2,
            level: None,
            sequence_mode: SequenceMode::Progressive,
        }
    }

    #[test]
    fn parses_records_split_across_chunks() {
        let crop = CropInfo {
            cropping: true,
            bottom: 8,
            ..Default::default()
        };
        let bytes = SimStreamWriter::new()
            .sequence(&settings(), &crop, 4)
            .picture(HwStatus::ConcealDetect, OutputRole::Main, PicStruct::TopField)
            .release()
            .error(HwStatus::WatchdogTimeout)
            .finish();

        let mut parser = SimParser::new();
        let mut records = Vec::new();
        for chunk in bytes.chunks(3) {
            parser.feed(chunk);
            while let Some(record) = parser.next_record().unwrap() {
                records.push(record);
            }
        }

        assert_eq!(records.len(), 4);
        assert_eq!(
            records[0],
            Record::Sequence {
                settings: settings(),
                crop,
                buffer_number: 4
            }
        );
        assert_eq!(
            records[1],
            Record::Picture {
                status: HwStatus::ConcealDetect,
                role: OutputRole::Main,
                pic_struct: PicStruct::TopField
            }
        );
        assert_eq!(records[2], Record::Release);
        assert_eq!(records[3], Record::Error(HwStatus::WatchdogTimeout));
        assert_eq!(parser.pending_bytes(), 0);
    }

    #[test]
    fn rejects_foreign_input() {
        let mut parser = SimParser::new();
        parser.feed(b"RIFF\x01");
        assert!(parser.next_record().is_err());
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut parser = SimParser::new();
        parser.feed(SimStreamWriter::new().as_bytes());
        parser.feed(b"Z");
        assert!(parser.next_record().is_err());
    }
}
