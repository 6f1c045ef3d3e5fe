//! Negation normal form and disjunctive normal form.
//!
//! Operates on the boolean skeleton the simplifier produced: interior
//! nodes are LAnd/LOr/LNot, leaves are relational comparisons. NNF pushes
//! negations into the leaves (dual comparisons), eliminating every LNot;
//! DNF then splits the formula into clauses, one solver task each.

use std::mem;

use itertools::Itertools;

use crate::ast::{AstKind, AstNode};

/// Rewrites `node` into negation normal form. With `expected = false` the
/// whole formula is negated first, which is how a branch gets flipped.
pub fn to_nnf(expected: bool, node: &mut AstNode) {
    if expected {
        match node.kind {
            AstKind::LNot => {
                // double negation from here on down
                let mut child = take_only_child(node);
                to_nnf(false, &mut child);
                *node = child;
            }
            AstKind::LAnd | AstKind::LOr => {
                for child in &mut node.children {
                    to_nnf(true, child);
                }
            }
            _ => {}
        }
    } else {
        match node.kind {
            AstKind::LNot => {
                let mut child = take_only_child(node);
                to_nnf(true, &mut child);
                *node = child;
            }
            AstKind::LAnd => {
                node.kind = AstKind::LOr;
                for child in &mut node.children {
                    to_nnf(false, child);
                }
            }
            AstKind::LOr => {
                node.kind = AstKind::LAnd;
                for child in &mut node.children {
                    to_nnf(false, child);
                }
            }
            kind => {
                debug_assert!(kind.is_relational());
                node.kind = kind.negate();
            }
        }
    }
}

fn take_only_child(node: &mut AstNode) -> AstNode {
    debug_assert_eq!(node.children.len(), 1);
    let mut children = mem::take(&mut node.children);
    children.pop().unwrap_or_else(AstNode::empty)
}

/// A DNF formula: a disjunction of clauses, each clause a conjunction of
/// relational leaves borrowed from the skeleton.
pub type Formula<'a> = Vec<Vec<&'a AstNode>>;

/// Splits an NNF skeleton into DNF clauses. Clause count can blow up
/// exponentially; inputs have small boolean structure, so that is
/// accepted.
pub fn to_dnf<'a>(node: &'a AstNode, formula: &mut Formula<'a>) {
    match node.kind {
        AstKind::LAnd => {
            let mut left = Formula::new();
            let mut right = Formula::new();
            to_dnf(&node.children[0], &mut left);
            to_dnf(&node.children[1], &mut right);
            if left.is_empty() {
                formula.extend(right);
                return;
            }
            for (sub1, sub2) in left.iter().cartesian_product(right.iter()) {
                let mut clause = sub1.clone();
                clause.extend(sub2.iter().copied());
                formula.push(clause);
            }
        }
        AstKind::LOr => {
            to_dnf(&node.children[0], formula);
            to_dnf(&node.children[1], formula);
        }
        _ => {
            formula.push(vec![node]);
        }
    }
}
