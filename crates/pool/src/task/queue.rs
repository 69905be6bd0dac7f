//! Priority queue of pending tasks
//!
//! Stable descending-priority order: a task is inserted before the first
//! entry with strictly lower priority, so equal priorities stay FIFO.

use std::collections::VecDeque;

use super::definition::Task;

#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert by priority, after all entries of equal or higher priority
    pub fn enqueue(&mut self, task: Task) {
        match self.tasks.iter().position(|t| t.priority < task.priority) {
            Some(index) => self.tasks.insert(index, task),
            None => self.tasks.push_back(task),
        }
    }

    /// Insert ahead of everything, ignoring priority
    pub fn enqueue_front(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    pub fn dequeue_head(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remove every pending task
    pub fn drain(&mut self) -> impl Iterator<Item = Task> + '_ {
        self.tasks.drain(..)
    }
}
