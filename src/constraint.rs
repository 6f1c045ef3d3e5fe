//! Constraints and search tasks.
//!
//! A `Constraint` is one relational predicate lifted out of the label
//! graph, independent of the boolean structure around it. Constraints are
//! shared read-only between tasks; everything per-task (polarity, argument
//! remapping, solutions) lives in `ConsMeta`/`SearchTask`.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::ast::{AstKind, AstNode};

/// The first two scratch slots are reserved for the comparison operands,
/// so local argument indices start here.
pub const RET_OFFSET: u32 = 2;

pub type ConstraintRef = Rc<Constraint>;
pub type TaskRef = Rc<RefCell<SearchTask>>;

/// Special decimal/hex-string conversion metadata attached to an input
/// offset: the conversion result width, numeric base, and source string
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtoiInfo {
    pub result_bits: u32,
    pub base: u32,
    pub str_len: u32,
}

/// One lifted relational predicate. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct Constraint {
    /// Root of the lifted AST; always relational, always 1 bit.
    pub ast: AstNode,
    /// Comparison at the root as originally traced. A task may solve for
    /// the negated polarity; that lives in its `ConsMeta`, never here.
    pub comparison: AstKind,
    /// Input offset -> local argument index, ordered so aggregation scans
    /// offsets ascending. Values are contiguous from `RET_OFFSET`.
    pub local_map: BTreeMap<u32, u32>,
    /// Argument list in discovery order: `(true, local_index)` for
    /// symbolic bytes (rewritten to the task-global slot on finalize),
    /// `(false, immediate)` for constants.
    pub input_args: Vec<(bool, u64)>,
    /// Input offset -> byte value observed during tracing.
    pub inputs: HashMap<u32, u8>,
    /// Input offset -> byte width of the load group it belongs to; the
    /// width on the first byte, 0 on the rest.
    pub shapes: HashMap<u32, u32>,
    pub atoi_info: HashMap<u32, AtoiInfo>,
    /// Number of constant arguments.
    pub const_num: u32,
    /// Immediate comparison operands when the traced root had a concrete
    /// side, 0 otherwise.
    pub op1: u64,
    pub op2: u64,
}

/// Per-task overlay on a shared `Constraint`.
#[derive(Debug, Clone, Default)]
pub struct ConsMeta {
    /// Copy of the constraint's argument list with symbolic entries
    /// rewritten to task-global input slots.
    pub input_args: Vec<(bool, u64)>,
    /// Post-NNF comparison for this task.
    pub comparison: AstKind,
    /// Runs of consecutive symbolic input bytes `(start_offset, len)`,
    /// for input-to-state inference.
    pub i2s_candidates: Vec<(u32, u32)>,
    pub op1: u64,
    pub op2: u64,
}

/// One DNF clause packaged for the solvers: shared constraints plus the
/// aggregated argument/byte bookkeeping they need.
pub struct SearchTask {
    pub constraints: Vec<ConstraintRef>,
    /// Post-NNF comparison per constraint, parallel to `constraints`.
    pub comparisons: Vec<AstKind>,
    pub consmeta: Vec<ConsMeta>,

    /// Ordered `(offset, initial_byte)` union of all constraint inputs.
    pub inputs: Vec<(u32, u8)>,
    pub shapes: HashMap<u32, u32>,
    pub atoi_info: HashMap<u32, AtoiInfo>,
    pub max_const_num: u32,
    /// Global input slot -> constraints referencing it. Memcmp-shaped
    /// constraints are excluded.
    pub cmap: HashMap<u32, Vec<usize>>,
    /// Argument array shared by compiled comparison functions: two operand
    /// slots, one per input byte, constants, one guard slot.
    pub scratch_args: Vec<u64>,

    pub min_distances: Vec<u64>,
    pub distances: Vec<u64>,
    pub plus_distances: Vec<u64>,
    pub minus_distances: Vec<u64>,

    pub start: Instant,
    pub stopped: bool,
    pub attempts: u32,

    pub solved: bool,
    pub solution: HashMap<u32, u8>,

    /// Earlier task for the same branch; a solved base task seeds this
    /// task's starting bytes via `load_hint`.
    pub base_task: Option<TaskRef>,
    /// Hint a solver may set after a successful solve: the driver then
    /// discards the next queued task.
    pub skip_next: bool,
}

impl SearchTask {
    pub fn new() -> Self {
        SearchTask {
            constraints: Vec::new(),
            comparisons: Vec::new(),
            consmeta: Vec::new(),
            inputs: Vec::new(),
            shapes: HashMap::new(),
            atoi_info: HashMap::new(),
            max_const_num: 0,
            cmap: HashMap::new(),
            scratch_args: Vec::new(),
            min_distances: Vec::new(),
            distances: Vec::new(),
            plus_distances: Vec::new(),
            minus_distances: Vec::new(),
            start: Instant::now(),
            stopped: false,
            attempts: 0,
            solved: false,
            solution: HashMap::new(),
            base_task: None,
            skip_next: false,
        }
    }

    pub fn has_finalized(&self) -> bool {
        !self.scratch_args.is_empty()
    }

    /// Aggregates the constraints: assigns every input byte a slot in the
    /// task-global input array, rewrites each constraint's argument list
    /// to those slots, collects i2s runs and atoi metadata, and sizes the
    /// scratch storage.
    pub fn finalize(&mut self) {
        let mut sym_map: HashMap<u32, u32> = HashMap::new();
        for i in 0..self.constraints.len() {
            let constraint = self.constraints[i].clone();
            let mut cm = ConsMeta {
                input_args: constraint.input_args.clone(),
                comparison: self.comparisons[i],
                i2s_candidates: Vec::new(),
                op1: constraint.op1,
                op2: constraint.op2,
            };

            // positions of symbolic entries in the argument list, in
            // discovery order: the k-th one carries local index
            // RET_OFFSET + k
            let sym_positions: Vec<usize> = constraint
                .input_args
                .iter()
                .enumerate()
                .filter(|(_, arg)| arg.0)
                .map(|(pos, _)| pos)
                .collect();

            let mut last_offset: Option<u32> = None;
            let mut run_len: u32 = 0;
            for (&offset, &lidx) in &constraint.local_map {
                let gidx = match sym_map.get(&offset) {
                    Some(&gidx) => gidx,
                    None => {
                        let gidx = self.inputs.len() as u32;
                        sym_map.insert(offset, gidx);
                        self.inputs.push((offset, constraint.inputs[&offset]));
                        self.shapes.insert(offset, constraint.shapes[&offset]);
                        gidx
                    }
                };
                // memcmp constraints are solved from the cached operand,
                // not through the byte-to-constraint map
                if cm.comparison != AstKind::Memcmp && cm.comparison != AstKind::MemcmpN {
                    self.cmap.entry(gidx).or_default().push(i);
                }
                cm.input_args[sym_positions[(lidx - RET_OFFSET) as usize]].1 = gidx as u64;

                // the ordered map hands out offsets ascending, so a gap
                // closes the current run of consecutive bytes
                if let Some(last) = last_offset {
                    if last + 1 != offset {
                        cm.i2s_candidates.push((last + 1 - run_len, run_len));
                        run_len = 0;
                    }
                }
                last_offset = Some(offset);
                run_len += 1;
            }
            if let Some(last) = last_offset {
                cm.i2s_candidates.push((last + 1 - run_len, run_len));
            }

            for (&offset, info) in &constraint.atoi_info {
                for j in 0..info.str_len {
                    let used_elsewhere = sym_map
                        .get(&(offset + j))
                        .and_then(|gidx| self.cmap.get(gidx))
                        .map_or(false, |users| users.iter().any(|&u| u != i));
                    if used_elsewhere {
                        log::warn!(target: "symsolve::task",
                            "atoi bytes ({}) used in other constraints", offset + j);
                    }
                }
                if self.atoi_info.contains_key(&offset) {
                    log::warn!(target: "symsolve::task",
                        "atoi bytes ({}) already exist, keeping first", offset);
                } else {
                    self.atoi_info.insert(offset, *info);
                }
            }

            if self.max_const_num < constraint.const_num {
                self.max_const_num = constraint.const_num;
            }
            self.consmeta.push(cm);
        }

        self.scratch_args = vec![0u64; 2 + self.inputs.len() + self.max_const_num as usize + 1];
        let n = self.constraints.len();
        self.min_distances.resize(n, 0);
        self.distances.resize(n, 0);
        self.plus_distances.resize(n, 0);
        self.minus_distances.resize(n, 0);
    }

    /// Seeds starting bytes from a solved base task.
    pub fn load_hint(&mut self) {
        let base = match &self.base_task {
            Some(base) => base.clone(),
            None => return,
        };
        let base = base.borrow();
        if !base.solved {
            return;
        }
        for (offset, value) in self.inputs.iter_mut() {
            if let Some(&solved) = base.solution.get(offset) {
                *value = solved;
            }
        }
    }
}

impl Default for SearchTask {
    fn default() -> Self {
        SearchTask::new()
    }
}
