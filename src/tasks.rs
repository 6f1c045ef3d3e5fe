//! Task queue.
//!
//! Tasks are solved in discovery order; the manager contract leaves room
//! for smarter policies later, the current one is strict FIFO. When two
//! tasks target the same branch, the later one gets the earlier one as
//! its base task so a solved sibling can seed starting bytes.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::constraint::TaskRef;
use crate::cov::BranchContext;

pub trait TaskManager {
    fn add_task(&mut self, ctx: Rc<BranchContext>, task: TaskRef);
    fn get_num_tasks(&self) -> usize;
    fn get_next_task(&mut self) -> Option<TaskRef>;
}

pub struct FifoTaskManager {
    queue: VecDeque<TaskRef>,
    last_for_branch: HashMap<(u32, u32, u32, bool), TaskRef>,
}

impl FifoTaskManager {
    pub fn new() -> Self {
        FifoTaskManager {
            queue: VecDeque::new(),
            last_for_branch: HashMap::new(),
        }
    }
}

impl Default for FifoTaskManager {
    fn default() -> Self {
        FifoTaskManager::new()
    }
}

impl TaskManager for FifoTaskManager {
    fn add_task(&mut self, ctx: Rc<BranchContext>, task: TaskRef) {
        let key = (ctx.addr, ctx.id, ctx.context, ctx.direction);
        if let Some(prev) = self.last_for_branch.get(&key) {
            if !Rc::ptr_eq(prev, &task) {
                task.borrow_mut().base_task = Some(prev.clone());
            }
        }
        self.last_for_branch.insert(key, task.clone());
        self.queue.push_back(task);
    }

    fn get_num_tasks(&self) -> usize {
        self.queue.len()
    }

    fn get_next_task(&mut self) -> Option<TaskRef> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::SearchTask;
    use std::cell::RefCell;

    fn task(marker: u32) -> TaskRef {
        let mut t = SearchTask::new();
        t.attempts = marker;
        Rc::new(RefCell::new(t))
    }

    fn ctx(id: u32) -> Rc<BranchContext> {
        Rc::new(BranchContext {
            addr: 0x1000,
            id,
            direction: false,
            context: 0,
            is_loop: false,
            is_counted: false,
        })
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut mgr = FifoTaskManager::new();
        for i in 0..5 {
            mgr.add_task(ctx(i), task(i));
        }
        assert_eq!(mgr.get_num_tasks(), 5);
        for i in 0..5 {
            let t = mgr.get_next_task().unwrap();
            assert_eq!(t.borrow().attempts, i);
        }
        assert!(mgr.get_next_task().is_none());
        assert_eq!(mgr.get_num_tasks(), 0);
    }

    #[test]
    fn same_branch_links_base_task() {
        let mut mgr = FifoTaskManager::new();
        let first = task(0);
        let second = task(1);
        mgr.add_task(ctx(7), first.clone());
        mgr.add_task(ctx(7), second.clone());
        assert!(second.borrow().base_task.is_some());
        assert!(Rc::ptr_eq(
            second.borrow().base_task.as_ref().unwrap(),
            &first
        ));
        // different branch does not link
        let third = task(2);
        mgr.add_task(ctx(8), third.clone());
        assert!(third.borrow().base_task.is_none());
    }
}
