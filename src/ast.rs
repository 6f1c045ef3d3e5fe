//! Expression AST lifted from the tracer's dataflow labels.
//!
//! Nodes are a plain tagged tree; most consumers switch on `AstKind`
//! directly. The structural hash is the canonical identity used to share
//! compiled comparison functions, so it must be deterministic across runs.

use std::hash::{BuildHasher, Hasher};

use serde::{Deserialize, Serialize};

/// Kinds of AST nodes. Relational kinds compare two bit-vector operands
/// and produce a single bit; `LAnd`/`LOr`/`LNot`/`Bool` only appear in the
/// boolean skeleton built by the simplifier, never inside a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AstKind {
    Bool = 0,
    Constant = 1,
    Read = 2,
    Concat = 3,
    Extract = 4,
    ZExt = 5,
    SExt = 6,
    Add = 7,
    Sub = 8,
    UDiv = 9,
    SDiv = 10,
    SRem = 11,
    Shl = 12,
    LShr = 13,
    AShr = 14,
    And = 15,
    Or = 16,
    Xor = 17,
    Equal = 18,
    Distinct = 19,
    Ult = 20,
    Ule = 21,
    Ugt = 22,
    Uge = 23,
    Slt = 24,
    Sle = 25,
    Sgt = 26,
    Sge = 27,
    LOr = 28,
    LAnd = 29,
    LNot = 30,
    Memcmp = 31,
    MemcmpN = 32,
}

impl AstKind {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            AstKind::Equal
                | AstKind::Distinct
                | AstKind::Ult
                | AstKind::Ule
                | AstKind::Ugt
                | AstKind::Uge
                | AstKind::Slt
                | AstKind::Sle
                | AstKind::Sgt
                | AstKind::Sge
        )
    }

    /// The comparison that holds exactly when `self` does not.
    pub fn negate(self) -> AstKind {
        debug_assert!(self.is_relational());
        match self {
            AstKind::Equal => AstKind::Distinct,
            AstKind::Distinct => AstKind::Equal,
            AstKind::Ult => AstKind::Uge,
            AstKind::Uge => AstKind::Ult,
            AstKind::Ule => AstKind::Ugt,
            AstKind::Ugt => AstKind::Ule,
            AstKind::Slt => AstKind::Sge,
            AstKind::Sge => AstKind::Slt,
            AstKind::Sle => AstKind::Sgt,
            AstKind::Sgt => AstKind::Sle,
            other => other,
        }
    }
}

/// One node of a lifted expression tree.
///
/// `label` retains the originating dataflow label (0 for synthesized
/// constants), `index` is overloaded per kind: input offset for `Read`,
/// argument ordinal for `Constant`, extract offset for `Extract`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
    pub kind: AstKind,
    pub bits: u32,
    pub label: u32,
    pub index: u32,
    pub hash: u32,
    pub children: Vec<AstNode>,
    pub bool_value: bool,
}

impl Default for AstKind {
    fn default() -> Self {
        AstKind::Bool
    }
}

impl Default for AstNode {
    fn default() -> Self {
        AstNode::empty()
    }
}

impl AstNode {
    pub fn empty() -> Self {
        AstNode {
            kind: AstKind::Bool,
            bits: 0,
            label: 0,
            index: 0,
            hash: 0,
            children: Vec::new(),
            bool_value: false,
        }
    }

    pub fn bool_const(value: bool) -> Self {
        AstNode {
            kind: AstKind::Bool,
            bits: 1,
            bool_value: value,
            ..AstNode::empty()
        }
    }

    /// Appends a blank child and returns it for in-place construction.
    pub fn add_child(&mut self) -> &mut AstNode {
        self.children.push(AstNode::empty());
        self.children.last_mut().unwrap()
    }
}

// Debug dump in the same parenthesized shape the solvers log.
impl std::fmt::Display for AstNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:?}, {}, {}", self.kind, self.label, self.bits)?;
        for child in &self.children {
            write!(f, ", {}", child)?;
        }
        write!(f, ")")
    }
}

/// Deterministic 32-bit mix of three words, fixed-seeded so that hashes
/// are stable across processes.
pub fn hash3(a: u32, b: u32, c: u32) -> u32 {
    let mut hasher = ahash::RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&a.to_le_bytes());
    buf[4..8].copy_from_slice(&b.to_le_bytes());
    buf[8..12].copy_from_slice(&c.to_le_bytes());
    hasher.write(&buf);
    hasher.finish() as u32
}
