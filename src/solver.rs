//! Solver contract and the input-to-state reference back-end.
//!
//! Back-ends are opaque to the driver: a solver exposes a number of
//! stages and gets called once per stage until it reports `Sat` (mutation
//! produced), `Unsat` (task hopeless, drop it) or runs out of stages.
//! Solvers read the task and write `task.solution`; shared constraints
//! are never mutated.

use crate::ast::{AstKind, AstNode};
use crate::constraint::{ConsMeta, Constraint, SearchTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverResult {
    Sat,
    Unsat,
    Timeout,
}

pub trait Solver {
    /// Number of sub-strategies this solver retries a task across.
    fn stages(&self) -> usize;

    /// Attempts one stage. On `Sat` the mutated input is in `out` and the
    /// byte assignment in `task.solution`.
    fn solve(
        &mut self,
        stage: usize,
        task: &mut SearchTask,
        input: &[u8],
        out: &mut Vec<u8>,
    ) -> SolverResult;
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let sign = 1u64 << (bits - 1);
    ((value & mask(bits)) ^ sign).wrapping_sub(sign) as i64
}

/// Concretely evaluates an expression over a candidate input. `None`
/// means the candidate cannot be judged (width over 64 bits, division by
/// zero, an unexpanded shared leaf): the caller treats it as a miss.
fn eval_node<F>(node: &AstNode, consts: &[u64], get: &F) -> Option<u64>
where
    F: Fn(u32) -> Option<u8>,
{
    let value = match node.kind {
        AstKind::Read => {
            if node.bits > 64 || node.bits % 8 != 0 {
                return None;
            }
            let mut v = 0u64;
            for i in 0..node.bits / 8 {
                v |= (get(node.index + i)? as u64) << (8 * i);
            }
            v
        }
        AstKind::Constant => *consts.get(node.index as usize)?,
        AstKind::Extract => {
            let inner = eval_node(node.children.first()?, consts, get)?;
            inner >> node.index.min(63)
        }
        AstKind::ZExt => eval_node(node.children.first()?, consts, get)?,
        AstKind::SExt => {
            let child = node.children.first()?;
            let inner = eval_node(child, consts, get)?;
            sign_extend(inner, child.bits) as u64
        }
        AstKind::Concat => {
            if node.bits > 64 {
                return None;
            }
            // the second operand is the high part
            let lo_node = node.children.first()?;
            let lo = eval_node(lo_node, consts, get)?;
            let hi = eval_node(node.children.get(1)?, consts, get)?;
            (hi << lo_node.bits) | lo
        }
        AstKind::Add
        | AstKind::Sub
        | AstKind::UDiv
        | AstKind::SDiv
        | AstKind::SRem
        | AstKind::Shl
        | AstKind::LShr
        | AstKind::AShr
        | AstKind::And
        | AstKind::Or
        | AstKind::Xor => {
            let lhs = eval_node(node.children.first()?, consts, get)?;
            let rhs = eval_node(node.children.get(1)?, consts, get)?;
            let bits = node.bits;
            match node.kind {
                AstKind::Add => lhs.wrapping_add(rhs),
                AstKind::Sub => lhs.wrapping_sub(rhs),
                AstKind::UDiv => {
                    if rhs & mask(bits) == 0 {
                        return None;
                    }
                    (lhs & mask(bits)) / (rhs & mask(bits))
                }
                AstKind::SDiv => {
                    let divisor = sign_extend(rhs, bits);
                    if divisor == 0 {
                        return None;
                    }
                    sign_extend(lhs, bits).wrapping_div(divisor) as u64
                }
                AstKind::SRem => {
                    let divisor = sign_extend(rhs, bits);
                    if divisor == 0 {
                        return None;
                    }
                    sign_extend(lhs, bits).wrapping_rem(divisor) as u64
                }
                AstKind::Shl => {
                    if rhs >= bits as u64 {
                        0
                    } else {
                        lhs << rhs
                    }
                }
                AstKind::LShr => {
                    if rhs >= bits as u64 {
                        0
                    } else {
                        (lhs & mask(bits)) >> rhs
                    }
                }
                AstKind::AShr => {
                    if rhs >= bits as u64 {
                        if sign_extend(lhs, bits) < 0 {
                            mask(bits)
                        } else {
                            0
                        }
                    } else {
                        (sign_extend(lhs, bits) >> rhs) as u64
                    }
                }
                AstKind::And => lhs & rhs,
                AstKind::Or => lhs | rhs,
                AstKind::Xor => lhs ^ rhs,
                _ => unreachable!(),
            }
        }
        // comparisons never nest inside a constraint, and dedup leaves
        // carry no expansion to evaluate
        _ => return None,
    };
    Some(value & mask(node.bits))
}

/// Checks one constraint of a task (under its post-NNF comparison)
/// against a candidate input.
pub fn eval_constraint<F>(constraint: &Constraint, cm: &ConsMeta, get: &F) -> Option<bool>
where
    F: Fn(u32) -> Option<u8>,
{
    let root = &constraint.ast;
    if root.children.len() != 2 {
        return None;
    }
    let consts: Vec<u64> = cm
        .input_args
        .iter()
        .filter(|arg| !arg.0)
        .map(|arg| arg.1)
        .collect();
    let lhs = eval_node(&root.children[0], &consts, get)?;
    let rhs = eval_node(&root.children[1], &consts, get)?;
    let bits = root.children[0].bits.max(root.children[1].bits);
    let (lu, ru) = (lhs & mask(bits), rhs & mask(bits));
    let (ls, rs) = (sign_extend(lhs, bits), sign_extend(rhs, bits));
    let holds = match cm.comparison {
        AstKind::Equal => lu == ru,
        AstKind::Distinct => lu != ru,
        AstKind::Ult => lu < ru,
        AstKind::Ule => lu <= ru,
        AstKind::Ugt => lu > ru,
        AstKind::Uge => lu >= ru,
        AstKind::Slt => ls < rs,
        AstKind::Sle => ls <= rs,
        AstKind::Sgt => ls > rs,
        AstKind::Sge => ls >= rs,
        _ => return None,
    };
    Some(holds)
}

/// Input-to-state matching: when a comparison has a concrete operand and
/// the symbolic side reads a contiguous run of input bytes of the same
/// width, copying the constant into those bytes (little-endian) often
/// satisfies it outright. Stage 0 copies the constant, stage 1 nudges it
/// by one for strict comparisons. Candidates are verified by concrete
/// evaluation before being reported, so this solver never claims an
/// unchecked mutation; it also never proves unsatisfiability.
pub struct I2sSolver;

impl I2sSolver {
    pub fn new() -> Self {
        I2sSolver
    }

    /// The value the symbolic side should take for the comparison to
    /// hold, given the constant sits on `const_on_left`'s side.
    fn target_value(comparison: AstKind, const_on_left: bool, value: u64, stage: usize) -> u64 {
        if stage == 0 {
            return value;
        }
        match (comparison, const_on_left) {
            // sym < C, sym <= C: come in just under
            (AstKind::Ult | AstKind::Slt, false) => value.wrapping_sub(1),
            (AstKind::Ugt | AstKind::Sgt, false) => value.wrapping_add(1),
            // C < sym: go just over
            (AstKind::Ult | AstKind::Slt, true) => value.wrapping_add(1),
            (AstKind::Ugt | AstKind::Sgt, true) => value.wrapping_sub(1),
            (AstKind::Distinct, _) => value.wrapping_add(1),
            _ => value,
        }
    }
}

impl Default for I2sSolver {
    fn default() -> Self {
        I2sSolver::new()
    }
}

impl Solver for I2sSolver {
    fn stages(&self) -> usize {
        2
    }

    fn solve(
        &mut self,
        stage: usize,
        task: &mut SearchTask,
        input: &[u8],
        out: &mut Vec<u8>,
    ) -> SolverResult {
        task.attempts += 1;
        out.clear();
        out.extend_from_slice(input);
        // start from the task's view of the bytes (hints included)
        for &(offset, value) in &task.inputs {
            if let Some(slot) = out.get_mut(offset as usize) {
                *slot = value;
            }
        }

        let mut mutated = false;
        for (i, cm) in task.consmeta.iter().enumerate() {
            let constraint = &task.constraints[i];
            if constraint.const_num == 0 || constraint.ast.children.len() != 2 {
                continue;
            }
            let (value, const_on_left, width_bits) =
                if constraint.ast.children[0].kind == AstKind::Constant {
                    (cm.op1, true, constraint.ast.children[1].bits)
                } else if constraint.ast.children[1].kind == AstKind::Constant {
                    (cm.op2, false, constraint.ast.children[0].bits)
                } else {
                    continue;
                };
            let target = Self::target_value(cm.comparison, const_on_left, value, stage);
            for &(start, len) in &cm.i2s_candidates {
                if len * 8 != width_bits {
                    continue;
                }
                for j in 0..len {
                    if let Some(slot) = out.get_mut((start + j) as usize) {
                        *slot = (target >> (8 * j)) as u8;
                        mutated = true;
                    }
                }
            }
        }
        if !mutated {
            return SolverResult::Timeout;
        }

        let get = |offset: u32| out.get(offset as usize).copied();
        for (i, cm) in task.consmeta.iter().enumerate() {
            if !matches!(eval_constraint(&task.constraints[i], cm, &get), Some(true)) {
                return SolverResult::Timeout;
            }
        }

        task.solved = true;
        for &(offset, _) in &task.inputs {
            if let Some(&byte) = out.get(offset as usize) {
                task.solution.insert(offset, byte);
            }
        }
        log::debug!(target: "symsolve::solver",
            "i2s solved task with {} constraints at stage {}",
            task.constraints.len(), stage);
        SolverResult::Sat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::SearchTask;
    use crate::label::{ops, LabelInfo, LabelTable};
    use crate::lifter::parse_constraint;
    use std::rc::Rc;

    fn blank() -> LabelInfo {
        LabelInfo::default()
    }

    /// load(input[base..base+4]) CMP const
    fn cmp_labels(pred: u16, base: u64, rhs: u64) -> Vec<LabelInfo> {
        let mut labels = vec![blank()];
        for i in 0..4 {
            labels.push(LabelInfo {
                op: ops::INPUT,
                size: 8,
                op1: base + i,
                ..blank()
            });
        }
        labels.push(LabelInfo {
            op: ops::LOAD,
            l1: 1,
            l2: 4,
            size: 32,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::icmp(pred),
            l1: 5,
            l2: 0,
            op2: rhs,
            size: 1,
            ..blank()
        });
        labels
    }

    fn single_constraint_task(
        table: &LabelTable,
        root: u32,
        comparison: AstKind,
        buf: &[u8],
    ) -> SearchTask {
        let constraint = parse_constraint(table, root, buf).unwrap();
        let mut task = SearchTask::new();
        task.constraints.push(Rc::new(constraint));
        task.comparisons.push(comparison);
        task.finalize();
        task
    }

    #[test]
    fn i2s_solves_equality_against_magic() {
        let table = LabelTable::from_labels(cmp_labels(ops::BVEQ, 0, 0xDEADBEEF));
        let input = [0u8; 4];
        let mut task = single_constraint_task(&table, 6, AstKind::Equal, &input);

        let mut out = Vec::new();
        let result = I2sSolver::new().solve(0, &mut task, &input, &mut out);
        assert_eq!(result, SolverResult::Sat);
        assert_eq!(&out[..4], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert!(task.solved);
        assert_eq!(task.solution[&0], 0xEF);
        assert_eq!(task.solution[&3], 0xDE);
    }

    #[test]
    fn i2s_stage_one_handles_strict_compare() {
        // solve load < 0x100 after NNF turned Uge into Ult
        let table = LabelTable::from_labels(cmp_labels(ops::BVULT, 0, 0x100));
        let input = [0xFFu8; 4];
        let mut task = single_constraint_task(&table, 6, AstKind::Ult, &input);

        let mut solver = I2sSolver::new();
        let mut out = Vec::new();
        // stage 0 copies 0x100 itself, which does not satisfy <
        assert_eq!(
            solver.solve(0, &mut task, &input, &mut out),
            SolverResult::Timeout
        );
        assert_eq!(
            solver.solve(1, &mut task, &input, &mut out),
            SolverResult::Sat
        );
        assert_eq!(&out[..4], &[0xFF, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn i2s_gives_up_without_constants() {
        // load(a) == load(b): nothing to copy
        let mut labels = vec![blank()];
        for i in 0..4 {
            labels.push(LabelInfo {
                op: ops::INPUT,
                size: 8,
                op1: i,
                ..blank()
            });
        }
        labels.push(LabelInfo {
            op: ops::LOAD,
            l1: 1,
            l2: 2,
            size: 16,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::LOAD,
            l1: 3,
            l2: 2,
            size: 16,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::icmp(ops::BVEQ),
            l1: 5,
            l2: 6,
            size: 1,
            ..blank()
        });
        let table = LabelTable::from_labels(labels);
        let input = [1u8, 2, 3, 4];
        let mut task = single_constraint_task(&table, 7, AstKind::Equal, &input);
        let mut out = Vec::new();
        assert_eq!(
            I2sSolver::new().solve(0, &mut task, &input, &mut out),
            SolverResult::Timeout
        );
    }

    #[test]
    fn eval_handles_sign_extension() {
        // sext(input[0], 8 -> 32) slt 0
        let mut labels = vec![blank()];
        labels.push(LabelInfo {
            op: ops::INPUT,
            size: 8,
            op1: 0,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::SEXT,
            l1: 1,
            size: 32,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::icmp(ops::BVSLT),
            l1: 2,
            l2: 0,
            op2: 0,
            size: 1,
            ..blank()
        });
        let table = LabelTable::from_labels(labels);
        let constraint = parse_constraint(&table, 3, &[0x80u8]).unwrap();
        let cm = ConsMeta {
            input_args: constraint.input_args.clone(),
            comparison: AstKind::Slt,
            ..ConsMeta::default()
        };
        let negative = |_: u32| Some(0x80u8);
        let positive = |_: u32| Some(0x7Fu8);
        assert_eq!(eval_constraint(&constraint, &cm, &negative), Some(true));
        assert_eq!(eval_constraint(&constraint, &cm, &positive), Some(false));
    }

    #[test]
    fn eval_rejects_division_by_zero() {
        // input[0] / input[1] == 1
        let mut labels = vec![blank()];
        labels.push(LabelInfo {
            op: ops::INPUT,
            size: 8,
            op1: 0,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::INPUT,
            size: 8,
            op1: 1,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::UDIV,
            l1: 1,
            l2: 2,
            size: 8,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::icmp(ops::BVEQ),
            l1: 3,
            l2: 0,
            op2: 1,
            size: 1,
            ..blank()
        });
        let table = LabelTable::from_labels(labels);
        let constraint = parse_constraint(&table, 4, &[6u8, 3]).unwrap();
        let cm = ConsMeta {
            input_args: constraint.input_args.clone(),
            comparison: AstKind::Equal,
            ..ConsMeta::default()
        };
        let zero_divisor = |offset: u32| Some(if offset == 0 { 6u8 } else { 0 });
        assert_eq!(eval_constraint(&constraint, &cm, &zero_divisor), None);
        let fine = |offset: u32| Some(if offset == 0 { 6u8 } else { 6 });
        assert_eq!(eval_constraint(&constraint, &cm, &fine), Some(true));
    }

    #[test]
    fn eval_handles_concat_order() {
        // concat(input[0], const 0xAB as high byte) == 0xAB42 over 16 bits
        let mut labels = vec![blank()];
        labels.push(LabelInfo {
            op: ops::INPUT,
            size: 8,
            op1: 0,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::CONCAT,
            l1: 1,
            l2: 0,
            op2: 0xAB,
            size: 16,
            ..blank()
        });
        labels.push(LabelInfo {
            op: ops::icmp(ops::BVEQ),
            l1: 2,
            l2: 0,
            op2: 0xAB42,
            size: 1,
            ..blank()
        });
        let table = LabelTable::from_labels(labels);
        let constraint = parse_constraint(&table, 3, &[0x42u8]).unwrap();
        let cm = ConsMeta {
            input_args: constraint.input_args.clone(),
            comparison: AstKind::Equal,
            ..ConsMeta::default()
        };
        let get = |_: u32| Some(0x42u8);
        assert_eq!(eval_constraint(&constraint, &cm, &get), Some(true));
    }
}
