//! Boolean skeleton extraction.
//!
//! Branch conditions arrive as 1-bit expressions whose boolean structure
//! is encoded with bit-vector And/Or/Xor over zero-extended booleans.
//! `find_roots` rewrites that into a skeleton of LAnd/LOr/LNot whose
//! leaves are relational comparisons, folding constants as it goes. An
//! untouched output node reads as `Bool(false)`: the caller abandons the
//! branch when the whole formula folds to a constant.

use std::collections::HashSet;

use crate::ast::{AstKind, AstNode};
use crate::label::{
    is_rel_cmp, opcode_to_kind, ops, Label, LabelInfo, LabelTable, CONST_LABEL, CONST_OFFSET,
    INITIALIZING_LABEL,
};

fn lnot(child: AstNode) -> AstNode {
    AstNode {
        kind: AstKind::LNot,
        bits: 1,
        children: vec![child],
        ..AstNode::empty()
    }
}

/// Peels `ZExt` wrappers; if a 1-bit value sits underneath, returns its
/// label, otherwise the label is returned unchanged. The lowering round-
/// trips booleans through integers this way.
pub fn strip_zext(table: &LabelTable, label: Label) -> Label {
    let mut cur = label;
    while let Some(info) = table.get(cur) {
        if info.op != ops::ZEXT {
            break;
        }
        let inner = info.l1;
        match table.get(inner) {
            Some(inner_info) if inner_info.size == 1 => return inner,
            Some(_) => cur = inner,
            None => break,
        }
    }
    label
}

/// Builds the boolean skeleton for `label` into `node`. Returns whether
/// any relational leaf was produced; `false` with `node` holding a
/// `Bool` means the sub-formula folded to that constant.
pub fn find_roots(
    table: &LabelTable,
    label: Label,
    node: &mut AstNode,
    visited: &mut HashSet<Label>,
) -> bool {
    if label < CONST_OFFSET || label == INITIALIZING_LABEL {
        log::warn!(target: "symsolve::simplify", "invalid label: {}", label);
        return false;
    }
    if !visited.insert(label) {
        return false;
    }
    let info = match table.get(label) {
        Some(info) => *info,
        None => {
            log::warn!(target: "symsolve::simplify", "label {} out of table bounds", label);
            return false;
        }
    };

    if info.op == ops::INPUT || info.op == ops::LOAD {
        return false;
    }

    match info.op {
        ops::AND => simplify_land(table, &info, node, visited),
        ops::OR => simplify_lor(table, &info, node, visited),
        ops::XOR => simplify_xor(table, &info, node, visited),
        op if op & 0xff == ops::ICMP => simplify_icmp(table, label, &info, node, visited),
        _ => {
            // neither boolean structure nor a comparison: collect roots
            // nested in the operands
            let mut found = false;
            if info.l2 >= CONST_OFFSET {
                found |= find_roots(table, info.l2, node, visited);
            }
            if info.l1 >= CONST_OFFSET {
                found |= find_roots(table, info.l1, node, visited);
            }
            found
        }
    }
}

/// Strips boolean wrappers off both operands of an And and applies
/// `0 ∧ x = 0`, `1 ∧ x = x`, folding when both sides are literal.
fn simplify_land(
    table: &LabelTable,
    info: &LabelInfo,
    ret: &mut AstNode,
    visited: &mut HashSet<Label>,
) -> bool {
    // the lowering keeps the rhs symbolic
    let lhs = if info.l1 >= CONST_OFFSET {
        strip_zext(table, info.l1)
    } else {
        CONST_LABEL
    };
    let rhs = strip_zext(table, info.l2);
    if rhs == info.l2 && lhs == info.l1 && info.size != 1 {
        // nothing got stripped and the value is wider than a bit: plain
        // bitwise and
        let mut found = find_roots(table, rhs, ret, visited);
        if lhs >= CONST_OFFSET {
            found |= find_roots(table, lhs, ret, visited);
        }
        return found;
    }

    log::debug!(target: "symsolve::simplify",
        "simplify land: {} LAnd {}, {}", lhs, rhs, info.size);
    let mut right = AstNode::empty();
    let rr = find_roots(table, rhs, &mut right, visited);
    if !rr && !right.bool_value {
        // x ∧ 0 = 0
        *ret = AstNode::bool_const(false);
        return false;
    }
    if lhs == CONST_LABEL {
        if info.op1 == 0 {
            *ret = AstNode::bool_const(false);
            return false;
        }
        // 1 ∧ x = x
        *ret = right;
        return rr;
    }
    let mut left = AstNode::empty();
    let lr = find_roots(table, lhs, &mut left, visited);
    if !lr {
        if !left.bool_value {
            *ret = AstNode::bool_const(false);
            return false;
        }
        if !rr {
            // both sides literal true
            *ret = AstNode::bool_const(true);
            return false;
        }
        *ret = right;
        return rr;
    }
    if !rr {
        // rhs folded to true
        *ret = left;
        return lr;
    }

    ret.kind = AstKind::LAnd;
    ret.bits = 1;
    ret.children = vec![right, left];
    true
}

/// Dual of `simplify_land`: `1 ∨ x = 1`, `0 ∨ x = x`.
fn simplify_lor(
    table: &LabelTable,
    info: &LabelInfo,
    ret: &mut AstNode,
    visited: &mut HashSet<Label>,
) -> bool {
    let lhs = if info.l1 >= CONST_OFFSET {
        strip_zext(table, info.l1)
    } else {
        CONST_LABEL
    };
    let rhs = strip_zext(table, info.l2);
    if rhs == info.l2 && lhs == info.l1 && info.size != 1 {
        let mut found = find_roots(table, rhs, ret, visited);
        if lhs >= CONST_OFFSET {
            found |= find_roots(table, lhs, ret, visited);
        }
        return found;
    }

    let mut right = AstNode::empty();
    let rr = find_roots(table, rhs, &mut right, visited);
    if !rr && right.bool_value {
        *ret = AstNode::bool_const(true);
        return false;
    }
    if lhs == CONST_LABEL {
        if info.op1 == 1 {
            *ret = AstNode::bool_const(true);
            return false;
        }
        *ret = right;
        return rr;
    }
    let mut left = AstNode::empty();
    let lr = find_roots(table, lhs, &mut left, visited);
    if !lr {
        if left.bool_value {
            *ret = AstNode::bool_const(true);
            return false;
        }
        if !rr {
            *ret = AstNode::bool_const(false);
            return false;
        }
        *ret = right;
        return rr;
    }
    if !rr {
        *ret = left;
        return lr;
    }

    ret.kind = AstKind::LOr;
    ret.bits = 1;
    ret.children = vec![right, left];
    true
}

/// The lowering encodes logical not as `x ⊕ 1`; also folds `x ⊕ 0 = x`.
fn simplify_xor(
    table: &LabelTable,
    info: &LabelInfo,
    ret: &mut AstNode,
    visited: &mut HashSet<Label>,
) -> bool {
    let lhs = if info.l1 >= CONST_OFFSET {
        strip_zext(table, info.l1)
    } else {
        CONST_LABEL
    };
    let rhs = strip_zext(table, info.l2);
    if rhs == info.l2 && lhs == info.l1 && info.size != 1 {
        let mut found = find_roots(table, rhs, ret, visited);
        if lhs >= CONST_OFFSET {
            found |= find_roots(table, lhs, ret, visited);
        }
        return found;
    }

    let mut right = AstNode::empty();
    let rr = find_roots(table, rhs, &mut right, visited);
    if !rr {
        if lhs == CONST_LABEL {
            *ret = AstNode::bool_const(right.bool_value ^ (info.op1 & 1 == 1));
            return false;
        }
        let mut left = AstNode::empty();
        let lr = find_roots(table, lhs, &mut left, visited);
        if !lr {
            *ret = AstNode::bool_const(left.bool_value ^ right.bool_value);
            return false;
        }
        *ret = if right.bool_value { lnot(left) } else { left };
        return true;
    }

    if lhs == CONST_LABEL {
        *ret = if info.op1 & 1 == 1 { lnot(right) } else { right };
        return true;
    }
    let mut left = AstNode::empty();
    let lr = find_roots(table, lhs, &mut left, visited);
    if !lr {
        *ret = if left.bool_value { lnot(right) } else { right };
        return rr;
    }

    // two symbolic booleans xor'ed; no and/or shape for this, leave the
    // raw node and let task construction drop it
    ret.kind = AstKind::Xor;
    ret.bits = 1;
    ret.children = vec![right, left];
    true
}

/// Comparisons are leaves, except when an operand is itself a boolean
/// formula: then only eq/neq against a literal 0/1 is meaningful and
/// reduces to identity or negation of that formula.
fn simplify_icmp(
    table: &LabelTable,
    label: Label,
    info: &LabelInfo,
    ret: &mut AstNode,
    visited: &mut HashSet<Label>,
) -> bool {
    let mut left = AstNode::empty();
    let mut right = AstNode::empty();
    let mut lr = false;
    let mut rr = false;
    if info.l1 >= CONST_OFFSET {
        lr = find_roots(table, strip_zext(table, info.l1), &mut left, visited);
    }
    if info.l2 >= CONST_OFFSET {
        rr = find_roots(table, strip_zext(table, info.l2), &mut right, visited);
    }

    if lr || rr {
        let (formula, other_is_const, literal) = if lr {
            (left, info.l2 == CONST_LABEL, info.op2)
        } else {
            (right, info.l1 == CONST_LABEL, info.op1)
        };
        let legal = other_is_const
            && (is_rel_cmp(info.op, ops::BVEQ) || is_rel_cmp(info.op, ops::BVNEQ));
        if !legal || formula.bits != 1 {
            log::warn!(target: "symsolve::simplify", "bool icmp bool ?!");
            *ret = AstNode::bool_const(false);
            return false;
        }
        let identity = if is_rel_cmp(info.op, ops::BVEQ) {
            literal == 1
        } else {
            literal == 0
        };
        *ret = if identity { formula } else { lnot(formula) };
        return true;
    }

    // ordinary relational leaf
    let kind = match opcode_to_kind(info.op) {
        Some(kind) => kind,
        None => {
            log::warn!(target: "symsolve::simplify", "invalid op: {}", info.op);
            *ret = AstNode::bool_const(false);
            return false;
        }
    };
    ret.kind = kind;
    ret.bits = 1;
    ret.label = label;
    true
}
