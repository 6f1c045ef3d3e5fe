//! The fuzzer-facing driver.
//!
//! Owns the whole per-mutation lifecycle: write the queue entry to the
//! input file, fork the tracer against it, drain the pipe message stream
//! into solving tasks, then serve the host's `fuzz` calls from the task
//! queue, one solver stage at a time. The host validates every mutation
//! we hand back and reports survivors through `queue_new_entry`.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::env;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::PathBuf;
use std::rc::Rc;

use nix::sys::wait::waitpid;
use nix::unistd::{close, dup2, execve, fork, lseek, pipe, ForkResult, Pid, Whence};

use crate::ast::{AstKind, AstNode};
use crate::constraint::{ConstraintRef, SearchTask, TaskRef};
use crate::cov::{CovManager, EdgeCovManager};
use crate::formula::{to_dnf, to_nnf, Formula};
use crate::label::{Label, LabelTable, CONST_LABEL};
use crate::lifter::parse_constraint;
use crate::pipe::{GepMsg, MemcmpMsg, PipeMsg, MSG_COND, MSG_FSIZE, MSG_GEP, MSG_MEMCMP};
use crate::simplify::find_roots;
use crate::solver::{Solver, SolverResult};
use crate::stats::SolveStats;
use crate::tasks::{FifoTaskManager, TaskManager};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutationState {
    Invalid,
    InValidation,
    Validated,
}

/// Host-facing configuration. `tracer_args` is the target command line;
/// any `@@` argument is replaced with the input file path.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub tracer_bin: PathBuf,
    pub tracer_args: Vec<String>,
    pub out_dir: PathBuf,
    pub use_stdin: bool,
    pub file_extension: Option<String>,
    pub debug: bool,
}

impl DriverOptions {
    /// Reads `SYMSOLVE_TARGET` (required) and `SYMSOLVE_OUTPUT_DIR`.
    pub fn from_env() -> Result<Self, Error> {
        let tracer_bin = env::var_os("SYMSOLVE_TARGET")
            .map(PathBuf::from)
            .ok_or(Error::MissingTarget)?;
        let out_dir = env::var_os("SYMSOLVE_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("symsolve"));
        Ok(DriverOptions {
            tracer_bin,
            tracer_args: Vec::new(),
            out_dir,
            use_stdin: false,
            file_extension: None,
            debug: false,
        })
    }
}

pub struct Driver {
    options: DriverOptions,
    out_file: PathBuf,
    out_fd: File,
    label_table: LabelTable,
    output_buf: Vec<u8>,

    fuzzed_inputs: HashSet<u32>,
    cur_queue_entry: Option<String>,
    cur_mutation_state: MutationState,

    task_mgr: Box<dyn TaskManager>,
    cov_mgr: Box<dyn CovManager>,
    solvers: Vec<Box<dyn Solver>>,
    cur_task: Option<TaskRef>,
    cur_solver_index: usize,
    cur_solver_stage: usize,

    // per-tracer-run caches, cleared at the top of fuzz_count
    expr_cache: HashMap<Label, ConstraintRef>,
    input_dep_cache: HashMap<Label, HashSet<u32>>,
    memcmp_cache: HashMap<Label, Vec<u8>>,

    stats: SolveStats,
}

impl Driver {
    /// Full initialization including the shared label table. Failure here
    /// is fatal; the driver cannot operate without its resources.
    pub fn new(options: DriverOptions, solvers: Vec<Box<dyn Solver>>) -> Result<Self, Error> {
        let label_table = LabelTable::create_shared()?;
        Self::with_label_table(options, label_table, solvers)
    }

    /// Initialization over a caller-provided label table; used by tests
    /// and by tools replaying recorded tables.
    pub fn with_label_table(
        options: DriverOptions,
        label_table: LabelTable,
        solvers: Vec<Box<dyn Solver>>,
    ) -> Result<Self, Error> {
        fs::create_dir_all(&options.out_dir)?;
        let name = match &options.file_extension {
            Some(ext) => format!(".cur_input.{}", ext),
            None => ".cur_input".to_string(),
        };
        let out_file = options.out_dir.join(name);
        let out_fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&out_file)?;
        Ok(Driver {
            options,
            out_file,
            out_fd,
            label_table,
            output_buf: Vec::new(),
            fuzzed_inputs: HashSet::new(),
            cur_queue_entry: None,
            cur_mutation_state: MutationState::Invalid,
            task_mgr: Box::new(FifoTaskManager::new()),
            cov_mgr: Box::new(EdgeCovManager::new()),
            solvers,
            cur_task: None,
            cur_solver_index: 0,
            cur_solver_stage: 0,
            expr_cache: HashMap::new(),
            input_dep_cache: HashMap::new(),
            memcmp_cache: HashMap::new(),
            stats: SolveStats::default(),
        })
    }

    pub fn stats(&self) -> &SolveStats {
        &self.stats
    }

    pub fn label_table(&self) -> &LabelTable {
        &self.label_table
    }

    /// Concrete memcmp operand recorded for a label this run.
    pub fn memcmp_content(&self, label: Label) -> Option<&[u8]> {
        self.memcmp_cache.get(&label).map(|v| v.as_slice())
    }

    /// Input offsets a lifted constraint depends on.
    pub fn input_deps(&self, label: Label) -> Option<&HashSet<u32>> {
        self.input_dep_cache.get(&label)
    }

    fn clear_per_run_caches(&mut self) {
        self.expr_cache.clear();
        self.input_dep_cache.clear();
        self.memcmp_cache.clear();
    }

    /// Trace stage, called once per queue entry: runs the tracer over the
    /// input and returns an upper bound on the mutations the solver loop
    /// may produce for it.
    pub fn fuzz_count(&mut self, queue_entry_id: u32, queue_entry: &str, buf: &[u8]) -> u32 {
        // an entry is traced at most once per driver lifetime
        if !self.fuzzed_inputs.insert(queue_entry_id) {
            return 0;
        }
        self.cur_queue_entry = Some(queue_entry.to_string());
        log::debug!(target: "symsolve::driver", "fuzzing {}", queue_entry);

        self.clear_per_run_caches();

        if let Err(e) = self.write_input_file(buf) {
            log::warn!(target: "symsolve::driver", "failed to write input file: {}", e);
            return 0;
        }

        let (read_fd, write_fd) = match pipe() {
            Ok(fds) => fds,
            Err(e) => {
                log::warn!(target: "symsolve::driver", "failed to create pipe: {}", e);
                return 0;
            }
        };
        let child = match self.spawn_tracer(read_fd, write_fd) {
            Ok(child) => child,
            Err(e) => {
                log::warn!(target: "symsolve::driver", "failed to spawn tracer: {}", e);
                let _ = close(read_fd);
                let _ = close(write_fd);
                return 0;
            }
        };
        let _ = close(write_fd);

        // the File wrapper closes the read end on drop
        let reader = unsafe { File::from_raw_fd(read_fd) };
        self.process_trace(reader, buf);

        if let Err(e) = waitpid(child, None) {
            log::warn!(target: "symsolve::driver", "waitpid failed: {}", e);
        }

        self.cur_task = None;
        let total_stages: usize = self.solvers.iter().map(|s| s.stages()).sum();
        (self.task_mgr.get_num_tasks() * total_stages).min(u32::MAX as usize) as u32
    }

    /// Drains a tracer message stream, turning interesting branches into
    /// queued tasks. Factored over `Read` so recorded streams can be
    /// replayed without a tracer child.
    pub fn process_trace<R: Read>(&mut self, mut reader: R, buf: &[u8]) {
        loop {
            let msg = match PipeMsg::read_from(&mut reader) {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    log::warn!(target: "symsolve::driver", "truncated pipe stream: {}", e);
                    break;
                }
            };
            match msg.msg_type {
                MSG_COND => self.handle_cond(&msg, buf),
                MSG_GEP => {
                    let gmsg = match GepMsg::read_from(&mut reader) {
                        Ok(gmsg) => gmsg,
                        Err(e) => {
                            log::warn!(target: "symsolve::driver",
                                "failed to receive gep msg: {}", e);
                            break;
                        }
                    };
                    if msg.label != gmsg.index_label {
                        log::warn!(target: "symsolve::driver",
                            "incorrect gep msg: {} vs {}", msg.label, gmsg.index_label);
                        continue;
                    }
                    self.handle_gep(&msg, &gmsg);
                }
                MSG_MEMCMP => {
                    let info = match self.label_table.get(msg.label) {
                        Some(info) => *info,
                        None => {
                            log::warn!(target: "symsolve::driver",
                                "memcmp with invalid label {}", msg.label);
                            continue;
                        }
                    };
                    // both operands symbolic: no content follows
                    if info.l1 != CONST_LABEL && info.l2 != CONST_LABEL {
                        continue;
                    }
                    let mmsg = match MemcmpMsg::read_from(&mut reader, msg.result as usize) {
                        Ok(mmsg) => mmsg,
                        Err(e) => {
                            log::warn!(target: "symsolve::driver",
                                "failed to receive memcmp msg: {}", e);
                            break;
                        }
                    };
                    if msg.label != mmsg.label {
                        log::warn!(target: "symsolve::driver",
                            "incorrect memcmp msg: {} vs {}", msg.label, mmsg.label);
                        continue;
                    }
                    self.memcmp_cache.insert(msg.label, mmsg.content);
                }
                MSG_FSIZE => {}
                other => {
                    log::warn!(target: "symsolve::driver", "unknown message type {}", other);
                }
            }
        }
    }

    fn handle_cond(&mut self, msg: &PipeMsg, buf: &[u8]) {
        if msg.label == 0 {
            return;
        }
        self.stats.branches_seen += 1;
        let ctx = self.cov_mgr.add_branch(
            msg.addr,
            msg.id,
            msg.result != 0,
            msg.context,
            false,
            false,
        );
        let neg_ctx = Rc::new(ctx.negated());
        if !self.cov_mgr.is_branch_interesting(&neg_ctx) {
            return;
        }
        self.stats.branches_interesting += 1;

        let tasks = self.construct_tasks(neg_ctx.direction, msg.label, buf);
        for task in tasks {
            self.task_mgr.add_task(neg_ctx.clone(), task);
            self.stats.tasks_constructed += 1;
        }
    }

    fn handle_gep(&mut self, _msg: &PipeMsg, gmsg: &GepMsg) {
        // hook point; symbolic pointer reasoning would start from the
        // recorded index label and bounds
        log::debug!(target: "symsolve::driver",
            "gep index label {} in [0, {})", gmsg.index_label, gmsg.num_elems);
    }

    /// Parses a branch condition into DNF and builds one task per clause.
    fn construct_tasks(&mut self, target_direction: bool, label: Label, buf: &[u8]) -> Vec<TaskRef> {
        let mut root = AstNode::empty();
        let mut visited = HashSet::new();
        find_roots(&self.label_table, label, &mut root, &mut visited);
        if root.kind == AstKind::Bool {
            // the whole condition folded to a constant
            return Vec::new();
        }

        to_nnf(target_direction, &mut root);

        let mut dnf = Formula::new();
        to_dnf(&root, &mut dnf);

        let mut tasks = Vec::new();
        for clause in &dnf {
            if let Some(task) = self.construct_task(clause, buf) {
                tasks.push(task);
            }
        }
        tasks
    }

    fn construct_task(&mut self, clause: &[&AstNode], buf: &[u8]) -> Option<TaskRef> {
        let mut task = SearchTask::new();
        for node in clause {
            if !node.kind.is_relational() {
                log::warn!(target: "symsolve::driver",
                    "clause leaf {:?} is not relational, dropping task", node.kind);
                return None;
            }
            let constraint = match self.expr_cache.get(&node.label).cloned() {
                Some(constraint) => constraint,
                None => {
                    let parsed = parse_constraint(&self.label_table, node.label, buf)?;
                    self.input_dep_cache
                        .insert(node.label, parsed.local_map.keys().copied().collect());
                    let parsed = Rc::new(parsed);
                    self.expr_cache.insert(node.label, parsed.clone());
                    parsed
                }
            };
            // the leaf carries the post-NNF polarity; the shared
            // constraint keeps the traced one
            task.comparisons.push(node.kind);
            task.constraints.push(constraint);
        }
        if task.constraints.is_empty() {
            return None;
        }
        task.finalize();
        Some(Rc::new(RefCell::new(task)))
    }

    fn pop_task(&mut self) -> Option<TaskRef> {
        let task = self.task_mgr.get_next_task()?;
        task.borrow_mut().load_hint();
        Some(task)
    }

    /// One step of the staged solver loop. Returns the mutated buffer on
    /// a successful solve, the input unchanged while there is nothing to
    /// report, and an empty slice on internal failure.
    pub fn fuzz<'a>(&'a mut self, buf: &'a [u8]) -> &'a [u8] {
        if self.solvers.is_empty() {
            return buf;
        }

        // grab a task if we have none, or the previous one was confirmed
        if self.cur_task.is_none() || self.cur_mutation_state == MutationState::Validated {
            self.cur_task = self.pop_task();
            if self.cur_task.is_none() {
                log::debug!(target: "symsolve::driver", "no more tasks to solve");
                return buf;
            }
            self.cur_solver_index = 0;
            self.cur_solver_stage = 0;
            self.cur_mutation_state = MutationState::Invalid;
        }

        // a candidate that was never promoted failed validation silently
        if self.cur_mutation_state == MutationState::InValidation {
            self.cur_solver_stage += 1;
        }

        if self.cur_solver_stage >= self.solvers[self.cur_solver_index].stages() {
            self.cur_solver_index += 1;
            if self.cur_solver_index >= self.solvers.len() {
                // solvers exhausted, move on to the next task
                self.cur_task = self.pop_task();
                if self.cur_task.is_none() {
                    log::debug!(target: "symsolve::driver", "no more tasks to solve");
                    return buf;
                }
                self.cur_solver_index = 0;
                self.cur_mutation_state = MutationState::Invalid;
            }
            self.cur_solver_stage = 0;
        }

        let task = match &self.cur_task {
            Some(task) => task.clone(),
            None => return buf,
        };
        let result = {
            let mut task = task.borrow_mut();
            self.solvers[self.cur_solver_index].solve(
                self.cur_solver_stage,
                &mut task,
                buf,
                &mut self.output_buf,
            )
        };

        match result {
            SolverResult::Sat => {
                log::debug!(target: "symsolve::driver", "task solved");
                self.stats.solve_sat += 1;
                self.cur_mutation_state = MutationState::InValidation;
                if task.borrow().skip_next {
                    // solver hint: the following queued task is subsumed
                    let _ = self.task_mgr.get_next_task();
                }
                &self.output_buf[..]
            }
            SolverResult::Timeout => {
                self.stats.solve_timeout += 1;
                self.cur_mutation_state = MutationState::Invalid;
                self.cur_solver_stage += 1;
                buf
            }
            SolverResult::Unsat => {
                log::debug!(target: "symsolve::driver", "task not solvable");
                self.stats.solve_unsat += 1;
                self.cur_task = None;
                buf
            }
        }
    }

    /// The host confirmed that the last reported mutation survived
    /// triage as a new queue entry.
    pub fn queue_new_entry(&mut self, filename_new_queue: &str, filename_orig_queue: &str) {
        log::debug!(target: "symsolve::driver", "new queue entry: {}", filename_new_queue);
        if self.cur_mutation_state == MutationState::InValidation
            && self.cur_queue_entry.as_deref() == Some(filename_orig_queue)
        {
            self.cur_mutation_state = MutationState::Validated;
            self.stats.mutations_validated += 1;
        }
    }

    fn write_input_file(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.out_fd.seek(SeekFrom::Start(0))?;
        self.out_fd.write_all(buf)?;
        self.out_fd.set_len(buf.len() as u64)?;
        // the tracer must observe exactly this byte range
        self.out_fd.sync_all()?;
        Ok(())
    }

    fn spawn_tracer(&mut self, read_fd: i32, write_fd: i32) -> Result<Pid, Error> {
        let taint_file = if self.options.use_stdin {
            "stdin".to_string()
        } else {
            self.out_file.display().to_string()
        };
        let taint_options = format!(
            "taint_file={}:shm_id={}:pipe_fd={}:debug={}",
            taint_file,
            self.label_table.shm_id().unwrap_or(-1),
            write_fd,
            self.options.debug as u8,
        );
        log::debug!(target: "symsolve::driver", "TAINT_OPTIONS={}", taint_options);

        let out_file = self.out_file.display().to_string();
        let program = self.options.tracer_bin.display().to_string();
        let mut argv = vec![program.clone()];
        for arg in &self.options.tracer_args {
            argv.push(if arg == "@@" { out_file.clone() } else { arg.clone() });
        }

        let c_program = CString::new(program).map_err(|_| Error::BadTracerCommand)?;
        let c_argv = argv
            .into_iter()
            .map(CString::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| Error::BadTracerCommand)?;
        let mut c_env = env::vars()
            .filter(|(key, _)| key != "TAINT_OPTIONS")
            .map(|(key, value)| CString::new(format!("{}={}", key, value)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| Error::BadTracerCommand)?;
        c_env.push(
            CString::new(format!("TAINT_OPTIONS={}", taint_options))
                .map_err(|_| Error::BadTracerCommand)?,
        );

        let devnull = if self.options.debug {
            None
        } else {
            OpenOptions::new().write(true).open("/dev/null").ok()
        };

        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(child),
            ForkResult::Child => {
                let _ = close(read_fd);
                if self.options.use_stdin {
                    let _ = lseek(self.out_fd.as_raw_fd(), 0, Whence::SeekSet);
                    let _ = dup2(self.out_fd.as_raw_fd(), 0);
                }
                if let Some(null) = &devnull {
                    let _ = dup2(null.as_raw_fd(), 1);
                    let _ = dup2(null.as_raw_fd(), 2);
                }
                let _ = execve(&c_program, &c_argv, &c_env);
                // exec failed; nothing sane to do in the forked child
                unsafe { libc::_exit(1) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cov::BranchContext;
    use std::collections::VecDeque;

    fn test_options(tag: &str) -> DriverOptions {
        DriverOptions {
            tracer_bin: PathBuf::from("/bin/true"),
            tracer_args: Vec::new(),
            out_dir: env::temp_dir().join(format!("symsolve-test-{}-{}", tag, std::process::id())),
            use_stdin: false,
            file_extension: None,
            debug: false,
        }
    }

    fn test_driver(tag: &str, solvers: Vec<Box<dyn Solver>>) -> Driver {
        Driver::with_label_table(test_options(tag), LabelTable::from_labels(Vec::new()), solvers)
            .unwrap()
    }

    /// Plays back a fixed script of results; `Sat` writes `fill` bytes.
    struct ScriptedSolver {
        stages: usize,
        script: VecDeque<SolverResult>,
        fill: Vec<u8>,
        set_skip_next: bool,
    }

    impl ScriptedSolver {
        fn new(stages: usize, script: Vec<SolverResult>) -> Self {
            ScriptedSolver {
                stages,
                script: script.into(),
                fill: vec![0xAA, 0xBB],
                set_skip_next: false,
            }
        }
    }

    impl Solver for ScriptedSolver {
        fn stages(&self) -> usize {
            self.stages
        }

        fn solve(
            &mut self,
            _stage: usize,
            task: &mut SearchTask,
            _input: &[u8],
            out: &mut Vec<u8>,
        ) -> SolverResult {
            let result = self.script.pop_front().unwrap_or(SolverResult::Timeout);
            if result == SolverResult::Sat {
                out.clear();
                out.extend_from_slice(&self.fill);
                task.solved = true;
                if self.set_skip_next {
                    task.skip_next = true;
                }
            }
            result
        }
    }

    fn enqueue_tasks(driver: &mut Driver, count: usize) {
        for _ in 0..count {
            driver.task_mgr.add_task(
                Rc::new(BranchContext::default()),
                Rc::new(RefCell::new(SearchTask::new())),
            );
        }
    }

    #[test]
    fn empty_queue_passes_input_through() {
        let mut driver = test_driver(
            "empty",
            vec![Box::new(ScriptedSolver::new(1, vec![]))],
        );
        let input = [1u8, 2, 3];
        assert_eq!(driver.fuzz(&input), &input[..]);
    }

    #[test]
    fn unsat_drops_task_and_moves_on() {
        let mut driver = test_driver(
            "unsat",
            vec![Box::new(ScriptedSolver::new(
                3,
                vec![SolverResult::Unsat, SolverResult::Unsat],
            ))],
        );
        enqueue_tasks(&mut driver, 2);
        let input = [9u8; 4];

        // first call pops task 1, solver says unsat, input unchanged
        assert_eq!(driver.fuzz(&input), &input[..]);
        assert!(driver.cur_task.is_none());
        assert_eq!(driver.task_mgr.get_num_tasks(), 1);

        // second call pops task 2 without burning remaining stages on 1
        assert_eq!(driver.fuzz(&input), &input[..]);
        assert_eq!(driver.task_mgr.get_num_tasks(), 0);
        assert_eq!(driver.stats().solve_unsat, 2);
    }

    #[test]
    fn timeout_walks_stages_then_solvers_then_tasks() {
        let mut driver = test_driver(
            "timeout",
            vec![
                Box::new(ScriptedSolver::new(
                    2,
                    vec![SolverResult::Timeout, SolverResult::Timeout],
                )),
                Box::new(ScriptedSolver::new(1, vec![SolverResult::Timeout])),
            ],
        );
        enqueue_tasks(&mut driver, 1);
        let input = [0u8; 2];

        driver.fuzz(&input); // solver 0 stage 0
        assert_eq!((driver.cur_solver_index, driver.cur_solver_stage), (0, 1));
        driver.fuzz(&input); // solver 0 stage 1
        assert_eq!((driver.cur_solver_index, driver.cur_solver_stage), (0, 2));
        driver.fuzz(&input); // solver 1 stage 0
        assert_eq!((driver.cur_solver_index, driver.cur_solver_stage), (1, 1));
        // everything exhausted and the queue is empty
        assert_eq!(driver.fuzz(&input), &input[..]);
        assert_eq!(driver.stats().solve_timeout, 3);
    }

    #[test]
    fn sat_reports_candidate_and_promotion_advances() {
        let mut driver = test_driver(
            "sat",
            vec![Box::new(ScriptedSolver::new(2, vec![SolverResult::Sat]))],
        );
        enqueue_tasks(&mut driver, 2);
        driver.cur_queue_entry = Some("id:000000".to_string());
        let input = [0u8; 2];

        let out = driver.fuzz(&input).to_vec();
        assert_eq!(out, vec![0xAA, 0xBB]);
        assert_eq!(driver.cur_mutation_state, MutationState::InValidation);

        driver.queue_new_entry("id:000001", "id:000000");
        assert_eq!(driver.cur_mutation_state, MutationState::Validated);
        assert_eq!(driver.stats().mutations_validated, 1);

        // next call moves on to the second task
        driver.fuzz(&input);
        assert_eq!(driver.task_mgr.get_num_tasks(), 0);
    }

    #[test]
    fn unconfirmed_candidate_bumps_stage() {
        let mut driver = test_driver(
            "noconfirm",
            vec![Box::new(ScriptedSolver::new(
                3,
                vec![SolverResult::Sat, SolverResult::Timeout],
            ))],
        );
        enqueue_tasks(&mut driver, 1);
        let input = [0u8; 2];

        driver.fuzz(&input);
        assert_eq!(driver.cur_mutation_state, MutationState::InValidation);
        assert_eq!(driver.cur_solver_stage, 0);

        // host never promoted: stage advances before the next attempt
        driver.fuzz(&input);
        assert_eq!(driver.cur_solver_stage, 2);
    }

    #[test]
    fn queue_entry_mismatch_does_not_promote() {
        let mut driver = test_driver(
            "mismatch",
            vec![Box::new(ScriptedSolver::new(2, vec![SolverResult::Sat]))],
        );
        enqueue_tasks(&mut driver, 1);
        driver.cur_queue_entry = Some("id:000000".to_string());
        driver.fuzz(&[0u8; 2]);

        driver.queue_new_entry("id:000001", "id:000042");
        assert_eq!(driver.cur_mutation_state, MutationState::InValidation);
    }

    #[test]
    fn skip_next_drops_one_queued_task() {
        let mut solver = ScriptedSolver::new(2, vec![SolverResult::Sat]);
        solver.set_skip_next = true;
        let mut driver = test_driver("skipnext", vec![Box::new(solver)]);
        enqueue_tasks(&mut driver, 3);

        driver.fuzz(&[0u8; 2]);
        // one task current, one silently dropped, one left
        assert_eq!(driver.task_mgr.get_num_tasks(), 1);
    }

    #[test]
    fn fuzz_count_is_idempotent_per_queue_entry() {
        let mut driver = test_driver(
            "idempotent",
            vec![Box::new(ScriptedSolver::new(4, vec![]))],
        );
        let input = [0u8; 4];
        // /bin/true ignores the taint options and writes no messages
        let first = driver.fuzz_count(7, "id:000007", &input);
        assert_eq!(first, 0); // no tasks from an empty stream
        let again = driver.fuzz_count(7, "id:000007", &input);
        assert_eq!(again, 0);
        // a fresh entry id is traced
        let fresh = driver.fuzz_count(8, "id:000008", &input);
        assert_eq!(fresh, 0);
        assert_eq!(driver.cur_queue_entry.as_deref(), Some("id:000008"));
    }

    #[test]
    fn fuzz_count_reports_task_stage_bound() {
        let mut driver = test_driver(
            "bound",
            vec![
                Box::new(ScriptedSolver::new(2, vec![])),
                Box::new(ScriptedSolver::new(3, vec![])),
            ],
        );
        // tasks queued from earlier entries still bound the count
        enqueue_tasks(&mut driver, 4);
        let bound = driver.fuzz_count(1, "id:000001", &[0u8; 4]);
        assert_eq!(bound, 4 * (2 + 3));
    }
}
