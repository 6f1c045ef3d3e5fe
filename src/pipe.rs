//! Tracer pipe protocol.
//!
//! The tracer streams fixed-layout little-endian records over a
//! unidirectional pipe, in program order of the traced execution. The
//! layout is pinned by the tracer's C ABI, so the codecs here are written
//! out field by field instead of deriving a serializer; reader and writer
//! live together so both ends stay in sync from one definition.

use std::io::{self, Read, Write};

pub const MSG_COND: u16 = 0;
pub const MSG_GEP: u16 = 1;
pub const MSG_MEMCMP: u16 = 2;
pub const MSG_FSIZE: u16 = 3;

/// Header record preceding every event.
///
/// `label` names the expression graph node for the event; `result` is the
/// taken direction for conditionals and the content length for memcmp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeMsg {
    pub msg_type: u16,
    pub flags: u16,
    pub instance_id: u32,
    pub addr: u32,
    pub context: u32,
    pub id: u32,
    pub label: u32,
    pub result: u64,
}

impl PipeMsg {
    pub const SIZE: usize = 32;

    /// Reads one header; `Ok(None)` on a clean end of stream.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<PipeMsg>> {
        let mut buf = [0u8; Self::SIZE];
        match read_exact_or_eof(reader, &mut buf)? {
            false => Ok(None),
            true => Ok(Some(PipeMsg {
                msg_type: u16::from_le_bytes([buf[0], buf[1]]),
                flags: u16::from_le_bytes([buf[2], buf[3]]),
                instance_id: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
                addr: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
                context: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
                id: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
                label: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
                result: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            })),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[2..4].copy_from_slice(&self.flags.to_le_bytes());
        buf[4..8].copy_from_slice(&self.instance_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.addr.to_le_bytes());
        buf[12..16].copy_from_slice(&self.context.to_le_bytes());
        buf[16..20].copy_from_slice(&self.id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.label.to_le_bytes());
        buf[24..32].copy_from_slice(&self.result.to_le_bytes());
        writer.write_all(&buf)
    }
}

/// Trails a `MSG_GEP` header. Currently only cross-checked and hooked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GepMsg {
    pub ptr_label: u32,
    pub index_label: u32,
    pub ptr: u64,
    pub index: i64,
    pub num_elems: u64,
    pub elem_size: u64,
    pub current_offset: i64,
}

impl GepMsg {
    pub const SIZE: usize = 48;

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<GepMsg> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;
        Ok(GepMsg {
            ptr_label: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            index_label: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            ptr: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            index: i64::from_le_bytes(buf[16..24].try_into().unwrap()),
            num_elems: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            elem_size: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            current_offset: i64::from_le_bytes(buf[40..48].try_into().unwrap()),
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.ptr_label.to_le_bytes());
        buf[4..8].copy_from_slice(&self.index_label.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ptr.to_le_bytes());
        buf[16..24].copy_from_slice(&self.index.to_le_bytes());
        buf[24..32].copy_from_slice(&self.num_elems.to_le_bytes());
        buf[32..40].copy_from_slice(&self.elem_size.to_le_bytes());
        buf[40..48].copy_from_slice(&self.current_offset.to_le_bytes());
        writer.write_all(&buf)
    }
}

/// Trails a `MSG_MEMCMP` header: the concrete operand bytes, length given
/// by the header's `result`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemcmpMsg {
    pub label: u32,
    pub content: Vec<u8>,
}

impl MemcmpMsg {
    pub fn read_from<R: Read>(reader: &mut R, content_len: usize) -> io::Result<MemcmpMsg> {
        let mut head = [0u8; 4];
        reader.read_exact(&mut head)?;
        let mut content = vec![0u8; content_len];
        reader.read_exact(&mut content)?;
        Ok(MemcmpMsg {
            label: u32::from_le_bytes(head),
            content,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.label.to_le_bytes())?;
        writer.write_all(&self.content)
    }
}

/// Like `read_exact` but distinguishes a clean EOF before the first byte
/// (`Ok(false)`) from a mid-record truncation (`Err`).
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated pipe message",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
