//! Task registries.
//!
//! The ready queue (FIFO of READY tasks) and the all-tasks list (every
//! unreclaimed task, in creation order). Membership errors are kernel bugs
//! and abort.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::task::TaskRef;

pub struct TaskRegistry {
    /// Queue of ready tasks.
    ready: VecDeque<TaskRef>,
    /// Every live task, oldest first.
    all: Vec<TaskRef>,
}

impl TaskRegistry {
    pub const fn new() -> Self {
        TaskRegistry {
            ready: VecDeque::new(),
            all: Vec::new(),
        }
    }

    /// Add a task to the end of the ready queue.
    pub fn enqueue(&mut self, task: TaskRef) {
        assert!(!self.is_ready(task), "task already in ready queue");
        self.ready.push_back(task);
    }

    /// Add a task to the front of the ready queue.
    pub fn enqueue_front(&mut self, task: TaskRef) {
        assert!(!self.is_ready(task), "task already in ready queue");
        self.ready.push_front(task);
    }

    /// Remove and return the task at the front of the queue.
    pub fn dequeue(&mut self) -> Option<TaskRef> {
        self.ready.pop_front()
    }

    /// Remove a specific task from the ready queue, if queued.
    pub fn remove_ready(&mut self, task: TaskRef) -> bool {
        match self.ready.iter().position(|&t| t == task) {
            Some(pos) => {
                self.ready.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn is_ready(&self, task: TaskRef) -> bool {
        self.ready.contains(&task)
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Add a task to the all-tasks list.
    pub fn register(&mut self, task: TaskRef) {
        assert!(!self.is_registered(task), "task already in all-tasks list");
        self.all.push(task);
    }

    /// Remove a task from the all-tasks list, keeping the others in order.
    pub fn unregister(&mut self, task: TaskRef) -> bool {
        match self.all.iter().position(|&t| t == task) {
            Some(pos) => {
                self.all.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, task: TaskRef) -> bool {
        self.all.contains(&task)
    }

    /// Make a new task visible: tail of the ready queue and all-tasks list.
    pub fn publish(&mut self, task: TaskRef) {
        self.enqueue(task);
        self.register(task);
    }

    /// Every live task, oldest first.
    pub fn tasks(&self) -> impl Iterator<Item = TaskRef> + '_ {
        self.all.iter().copied()
    }

    /// Ready tasks, next to run first.
    pub fn ready(&self) -> impl Iterator<Item = TaskRef> + '_ {
        self.ready.iter().copied()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::scratch_tasks;

    #[test]
    fn fifo_with_front_insert() {
        let [a, b, c] = scratch_tasks::<3>();
        let mut registry = TaskRegistry::new();
        registry.enqueue(a);
        registry.enqueue(b);
        registry.enqueue_front(c);
        assert_eq!(registry.ready().collect::<Vec<_>>(), vec![c, a, b]);
        assert!(registry.remove_ready(a));
        assert!(!registry.remove_ready(a));
        assert_eq!(registry.dequeue(), Some(c));
        assert_eq!(registry.dequeue(), Some(b));
        assert_eq!(registry.dequeue(), None);
    }

    #[test]
    fn unregister_keeps_creation_order() {
        let [a, b, c] = scratch_tasks::<3>();
        let mut registry = TaskRegistry::new();
        for task in [a, b, c] {
            registry.publish(task);
        }
        assert!(registry.unregister(b));
        assert_eq!(registry.tasks().collect::<Vec<_>>(), vec![a, c]);
        assert!(registry.is_ready(b));
    }

    #[test]
    #[should_panic(expected = "already in ready queue")]
    fn double_enqueue_is_fatal() {
        let [a] = scratch_tasks::<1>();
        let mut registry = TaskRegistry::new();
        registry.enqueue(a);
        registry.enqueue_front(a);
    }

    #[test]
    #[should_panic(expected = "already in all-tasks list")]
    fn double_register_is_fatal() {
        let [a] = scratch_tasks::<1>();
        let mut registry = TaskRegistry::new();
        registry.register(a);
        registry.register(a);
    }
}
