//! Lifting label graphs into constraints.
//!
//! `parse_constraint` walks the operand graph of a comparison label
//! depth-first and produces the constraint's AST together with its
//! argument map. Within one constraint a label is expanded at most once;
//! a repeated label collapses to a leaf carrying only its id and width.

use std::collections::HashSet;

use crate::ast::{hash3, AstKind, AstNode};
use crate::constraint::{Constraint, RET_OFFSET};
use crate::label::{
    is_icmp, opcode_to_kind, ops, Label, LabelInfo, LabelTable, CONST_LABEL, CONST_OFFSET,
    INITIALIZING_LABEL,
};

/// Lifts the graph rooted at a comparison label. `None` drops the branch:
/// malformed labels and unknown opcodes are tracer bugs, not ours.
pub fn parse_constraint(table: &LabelTable, root: Label, buf: &[u8]) -> Option<Constraint> {
    let info = match lookup(table, root) {
        Some(info) => info,
        None => return None,
    };
    if !is_icmp(info.op) {
        log::warn!(target: "symsolve::lifter",
            "constraint root {} is not a comparison (op {})", root, info.op);
        return None;
    }
    let comparison = match opcode_to_kind(info.op) {
        Some(kind) => kind,
        None => {
            log::warn!(target: "symsolve::lifter", "invalid op: {}", info.op);
            return None;
        }
    };

    let mut constraint = Constraint {
        comparison,
        ..Constraint::default()
    };
    // keep the immediate operands around for input-to-state matching
    if info.l1 == CONST_LABEL {
        constraint.op1 = info.op1;
    }
    if info.l2 == CONST_LABEL {
        constraint.op2 = info.op2;
    }

    let mut visited = HashSet::new();
    let mut root_node = AstNode::empty();
    if !lift(table, root, &mut root_node, buf, &mut constraint, &mut visited) {
        return None;
    }
    constraint.ast = root_node;
    Some(constraint)
}

fn lookup(table: &LabelTable, label: Label) -> Option<LabelInfo> {
    if label < CONST_OFFSET || label == INITIALIZING_LABEL {
        log::warn!(target: "symsolve::lifter", "invalid label: {}", label);
        return None;
    }
    match table.get(label) {
        Some(info) => Some(*info),
        None => {
            log::warn!(target: "symsolve::lifter", "label {} out of table bounds", label);
            None
        }
    }
}

fn lift(
    table: &LabelTable,
    label: Label,
    node: &mut AstNode,
    buf: &[u8],
    constraint: &mut Constraint,
    visited: &mut HashSet<Label>,
) -> bool {
    let info = match lookup(table, label) {
        Some(info) => info,
        None => return false,
    };
    log::debug!(target: "symsolve::lifter",
        "{} = (l1:{}, l2:{}, op:{}, size:{}, op1:{}, op2:{})",
        label, info.l1, info.l2, info.op, info.size, info.op1, info.op2);

    if visited.contains(&label) {
        // already expanded elsewhere in this constraint
        node.label = label;
        node.bits = info.size as u32;
        return true;
    }

    if info.op == ops::INPUT {
        let offset = info.op1 as u32;
        if offset as usize >= buf.len() {
            log::warn!(target: "symsolve::lifter",
                "input offset {} beyond buffer of {}", offset, buf.len());
            return false;
        }
        node.kind = AstKind::Read;
        node.bits = 8;
        node.label = label;
        node.index = offset;
        node.hash = map_arg(buf, offset, 1, constraint);
        return true;
    }
    if info.op == ops::LOAD {
        let first = match lookup(table, info.l1) {
            Some(first) => first,
            None => return false,
        };
        let offset = first.op1 as u32;
        let width = info.l2;
        if offset as usize + width as usize > buf.len() {
            log::warn!(target: "symsolve::lifter",
                "load of {} bytes at {} beyond buffer of {}", width, offset, buf.len());
            return false;
        }
        node.kind = AstKind::Read;
        node.bits = width * 8;
        node.label = label;
        node.index = offset;
        node.hash = map_arg(buf, offset, width, constraint);
        return true;
    }

    let kind = match opcode_to_kind(info.op) {
        Some(kind) => kind,
        None => {
            log::warn!(target: "symsolve::lifter", "invalid op: {}", info.op);
            return false;
        }
    };
    node.kind = kind;
    node.bits = if kind.is_relational() {
        1
    } else {
        info.size as u32
    };
    node.label = label;

    let left = node.add_child();
    if info.l1 >= CONST_OFFSET {
        if !lift(table, info.l1, left, buf, constraint, visited) {
            return false;
        }
        visited.insert(info.l1);
    } else {
        synthesize_constant(table, left, &info, true, constraint);
    }

    if matches!(info.op, ops::ZEXT | ops::SEXT | ops::EXTRACT | ops::TRUNC) {
        node.hash = hash3(node.bits, kind as u32, node.children[0].hash);
        node.index = if info.op == ops::EXTRACT {
            info.op2 as u32
        } else {
            0
        };
        return true;
    }

    let right = node.add_child();
    if info.l2 >= CONST_OFFSET {
        if !lift(table, info.l2, right, buf, constraint, visited) {
            return false;
        }
        visited.insert(info.l2);
    } else {
        synthesize_constant(table, right, &info, false, constraint);
    }

    // comparisons hash as Bool: the compiled function is shared between
    // polarities as long as the operands agree
    let hash_kind = if kind.is_relational() {
        AstKind::Bool
    } else {
        kind
    };
    node.hash = hash3(
        node.children[0].hash,
        ((hash_kind as u32) << 16) | node.bits,
        node.children[1].hash,
    );
    true
}

/// Builds the `Constant` child for an operand whose label is 0.
fn synthesize_constant(
    table: &LabelTable,
    node: &mut AstNode,
    parent: &LabelInfo,
    is_left: bool,
    constraint: &mut Constraint,
) {
    let (value, other_label) = if is_left {
        (parent.op1, parent.l2)
    } else {
        (parent.op2, parent.l1)
    };
    let mut bits = parent.size as u32;
    if parent.op == ops::CONCAT {
        // a concat's size is the sum of both operands
        if let Some(other) = table.get(other_label) {
            bits -= other.size as u32;
        }
    } else if is_icmp(parent.op) {
        // a comparison produces a single bit, so the operand width comes
        // from the symbolic side
        if other_label >= CONST_OFFSET {
            if let Some(other) = table.get(other_label) {
                bits = other.size as u32;
            }
        }
    }

    node.kind = AstKind::Constant;
    node.label = 0;
    node.bits = bits;
    let ordinal = constraint.const_num;
    node.index = ordinal;
    constraint.input_args.push((false, value));
    constraint.const_num += 1;
    node.hash = hash3(bits, AstKind::Constant as u32, ordinal);
}

/// Registers `length` input bytes starting at `offset` with the
/// constraint's argument map, assigning fresh local indices on first
/// sight, and returns the structural hash of the read.
fn map_arg(buf: &[u8], offset: u32, length: u32, constraint: &mut Constraint) -> u32 {
    let mut hash = 0;
    for i in 0..length {
        let off = offset + i;
        let value = buf[off as usize];
        let arg_index = match constraint.local_map.get(&off) {
            Some(&idx) => idx,
            None => {
                let idx = RET_OFFSET + constraint.local_map.len() as u32;
                constraint.inputs.insert(off, value);
                constraint.local_map.insert(off, idx);
                // the global slot is filled in during task aggregation
                constraint.input_args.push((true, idx as u64));
                idx
            }
        };
        if i == 0 {
            constraint.shapes.insert(off, length);
            hash = hash3(length * 8, AstKind::Read as u32, arg_index);
        } else {
            constraint.shapes.insert(off, 0);
        }
    }
    hash
}
