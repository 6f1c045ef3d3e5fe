//! The dataflow label table shared with the tracer.
//!
//! The tracer assigns a label to every symbolic value it produces and
//! records the defining operation in a shared-memory array indexed by
//! label id. This side only ever reads: the tracer writes a label strictly
//! before emitting any pipe message that references it, so the pipe read
//! is the synchronization point.

use std::io;
use std::ptr;

use crate::ast::AstKind;
use crate::Error;

pub type Label = u32;

/// Label 0 stands for a concrete operand; the immediate lives in the
/// parent record's `op1`/`op2`.
pub const CONST_LABEL: Label = 0;
/// Smallest label id the tracer hands out.
pub const CONST_OFFSET: Label = 1;
/// Reserved by the instrumentation while a union is being built.
pub const INITIALIZING_LABEL: Label = u32::MAX;

/// Raw operation codes, kept in lockstep with the tracer's
/// instrumentation pass. `ICMP` carries its predicate in bits 8..16.
pub mod ops {
    pub const INPUT: u16 = 0;
    pub const LOAD: u16 = 1;
    pub const EXTRACT: u16 = 2;
    pub const TRUNC: u16 = 3;
    pub const CONCAT: u16 = 4;
    pub const ZEXT: u16 = 5;
    pub const SEXT: u16 = 6;
    pub const ADD: u16 = 7;
    pub const SUB: u16 = 8;
    pub const UDIV: u16 = 9;
    pub const SDIV: u16 = 10;
    pub const SREM: u16 = 11;
    pub const SHL: u16 = 12;
    pub const LSHR: u16 = 13;
    pub const ASHR: u16 = 14;
    pub const AND: u16 = 15;
    pub const OR: u16 = 16;
    pub const XOR: u16 = 17;
    pub const ICMP: u16 = 18;

    // comparison predicates, LLVM numbering
    pub const BVEQ: u16 = 32;
    pub const BVNEQ: u16 = 33;
    pub const BVUGT: u16 = 34;
    pub const BVUGE: u16 = 35;
    pub const BVULT: u16 = 36;
    pub const BVULE: u16 = 37;
    pub const BVSGT: u16 = 38;
    pub const BVSGE: u16 = 39;
    pub const BVSLT: u16 = 40;
    pub const BVSLE: u16 = 41;

    pub const fn icmp(predicate: u16) -> u16 {
        ICMP | (predicate << 8)
    }
}

/// Maps a raw label opcode to the AST kind it lifts to. Closed table:
/// anything else is a malformed stream and drops the branch.
pub fn opcode_to_kind(op: u16) -> Option<AstKind> {
    let kind = match op {
        ops::EXTRACT | ops::TRUNC => AstKind::Extract,
        ops::CONCAT => AstKind::Concat,
        ops::ZEXT => AstKind::ZExt,
        ops::SEXT => AstKind::SExt,
        ops::ADD => AstKind::Add,
        ops::SUB => AstKind::Sub,
        ops::UDIV => AstKind::UDiv,
        ops::SDIV => AstKind::SDiv,
        ops::SREM => AstKind::SRem,
        ops::SHL => AstKind::Shl,
        ops::LSHR => AstKind::LShr,
        ops::ASHR => AstKind::AShr,
        ops::AND => AstKind::And,
        ops::OR => AstKind::Or,
        ops::XOR => AstKind::Xor,
        _ if op & 0xff == ops::ICMP => match op >> 8 {
            p if p == ops::BVEQ => AstKind::Equal,
            p if p == ops::BVNEQ => AstKind::Distinct,
            p if p == ops::BVUGT => AstKind::Ugt,
            p if p == ops::BVUGE => AstKind::Uge,
            p if p == ops::BVULT => AstKind::Ult,
            p if p == ops::BVULE => AstKind::Ule,
            p if p == ops::BVSGT => AstKind::Sgt,
            p if p == ops::BVSGE => AstKind::Sge,
            p if p == ops::BVSLT => AstKind::Slt,
            p if p == ops::BVSLE => AstKind::Sle,
            _ => return None,
        },
        _ => return None,
    };
    Some(kind)
}

pub fn is_icmp(op: u16) -> bool {
    op & 0xff == ops::ICMP
}

pub fn is_rel_cmp(op: u16, predicate: u16) -> bool {
    is_icmp(op) && (op >> 8) == predicate
}

/// One record of the label table; layout matches the tracer's C struct.
///
/// `l1`/`l2` are operand labels (0 = concrete, immediate in `op1`/`op2`).
/// For `LOAD`, `l1` is the label of the first loaded byte and `l2` is the
/// byte count. For `ICMP`, `size` is the operand width in bits.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelInfo {
    pub l1: Label,
    pub l2: Label,
    pub op1: u64,
    pub op2: u64,
    pub op: u16,
    pub size: u16,
    pub hash: u32,
}

impl LabelInfo {
    pub const SIZE: usize = std::mem::size_of::<LabelInfo>();
}

/// Default reservation: 48 GiB of label records. Pages materialize only
/// as the tracer writes them (`SHM_NORESERVE`); the kernel's
/// `shmmax`/`shmall` must allow the reservation.
pub const LABEL_SEGMENT_BYTES: usize = 0xc00000000;

enum Storage {
    Shm {
        id: i32,
        base: *const LabelInfo,
        len: usize,
    },
    Owned(Vec<LabelInfo>),
}

/// Read-only view of the label table.
pub struct LabelTable {
    storage: Storage,
}

impl LabelTable {
    /// Creates the shared segment the tracer will fill. Fatal on failure:
    /// the driver cannot run without it.
    pub fn create_shared() -> Result<Self, Error> {
        Self::create_shared_with_size(LABEL_SEGMENT_BYTES)
    }

    pub fn create_shared_with_size(bytes: usize) -> Result<Self, Error> {
        let id = unsafe {
            libc::shmget(
                libc::IPC_PRIVATE,
                bytes,
                libc::IPC_CREAT | libc::SHM_NORESERVE | 0o600,
            )
        };
        if id == -1 {
            return Err(Error::ShmSetup(io::Error::last_os_error()));
        }
        let base = unsafe { libc::shmat(id, ptr::null(), libc::SHM_RDONLY) };
        if base == usize::MAX as *mut libc::c_void {
            let err = io::Error::last_os_error();
            unsafe {
                libc::shmctl(id, libc::IPC_RMID, ptr::null_mut());
            }
            return Err(Error::ShmSetup(err));
        }
        log::debug!(target: "symsolve::label", "label table shm id {}", id);
        Ok(LabelTable {
            storage: Storage::Shm {
                id,
                base: base as *const LabelInfo,
                len: bytes / LabelInfo::SIZE,
            },
        })
    }

    /// Owned storage, for tests and for replaying recorded label tables.
    pub fn from_labels(labels: Vec<LabelInfo>) -> Self {
        LabelTable {
            storage: Storage::Owned(labels),
        }
    }

    /// The SysV id the tracer attaches to, if the table is shared.
    pub fn shm_id(&self) -> Option<i32> {
        match &self.storage {
            Storage::Shm { id, .. } => Some(*id),
            Storage::Owned(_) => None,
        }
    }

    pub fn get(&self, label: Label) -> Option<&LabelInfo> {
        if label == INITIALIZING_LABEL {
            return None;
        }
        match &self.storage {
            Storage::Shm { base, len, .. } => {
                if (label as usize) < *len {
                    // the tracer wrote this record before the pipe message
                    // that referenced it was read
                    Some(unsafe { &*base.add(label as usize) })
                } else {
                    None
                }
            }
            Storage::Owned(labels) => labels.get(label as usize),
        }
    }
}

impl Drop for LabelTable {
    fn drop(&mut self) {
        if let Storage::Shm { id, base, .. } = self.storage {
            unsafe {
                libc::shmdt(base as *const libc::c_void);
                libc::shmctl(id, libc::IPC_RMID, ptr::null_mut());
            }
        }
    }
}
