//! Dependency-aware task graph.
//!
//! The graph is the authoritative answer to "what can run now". Tasks keep
//! their insertion order, which breaks priority ties in [`TaskGraph::get_ready_tasks`].
//! Edges are only added through [`TaskGraph::add_task`] and
//! [`TaskGraph::set_dependencies`], both of which reject cycles and leave the
//! graph untouched on rejection.

use std::collections::{BTreeMap, HashMap};

use crate::core::types::{MAX_PRIORITY, MIN_PRIORITY, Task, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from persisted tasks, rejecting duplicates, dangling edges and cycles.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, String> {
        let mut graph = Self::new();
        for task in tasks {
            if task.id.trim().is_empty() {
                return Err("task with empty id".to_string());
            }
            if graph.index.contains_key(&task.id) {
                return Err(format!("duplicate task id '{}'", task.id));
            }
            graph.index.insert(task.id.clone(), graph.tasks.len());
            graph.tasks.push(task);
        }
        let errors = graph.validate_invariants();
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }
        if let Some(cycle) = graph.find_cycle() {
            return Err(format!("dependency cycle: {}", cycle.join(" -> ")));
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&idx| &self.tasks[idx])
    }

    /// Mutable access for status and log updates. Dependency edges must not be
    /// edited through this handle; use [`TaskGraph::set_dependencies`].
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        let idx = *self.index.get(id)?;
        self.tasks.get_mut(idx)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    /// Insert a task and its edges (`depends_on` plus reverse `blocks` edges).
    ///
    /// Fails without mutating the graph when the id is taken, an edge points at
    /// an unknown task, or the new edges would close a cycle.
    pub fn add_task(&mut self, task: Task) -> Result<(), String> {
        if task.id.trim().is_empty() {
            return Err("task with empty id".to_string());
        }
        if self.contains(&task.id) {
            return Err(format!("duplicate task id '{}'", task.id));
        }
        for dep in &task.depends_on {
            if dep == &task.id {
                return Err(format!("task '{}' depends on itself", task.id));
            }
            if !self.contains(dep) {
                return Err(format!("task '{}' depends on unknown task '{dep}'", task.id));
            }
        }
        for blocked in &task.blocks {
            if !self.contains(blocked) {
                return Err(format!("task '{}' blocks unknown task '{blocked}'", task.id));
            }
        }

        let id = task.id.clone();
        let blocks = task.blocks.clone();
        self.index.insert(id.clone(), self.tasks.len());
        self.tasks.push(task);

        let mut added_edges = Vec::new();
        for blocked in &blocks {
            if let Some(target) = self.get_mut(blocked)
                && !target.depends_on.contains(&id)
            {
                target.depends_on.push(id.clone());
                added_edges.push(blocked.clone());
            }
        }

        if let Some(cycle) = self.find_cycle() {
            for blocked in &added_edges {
                if let Some(target) = self.get_mut(blocked) {
                    target.depends_on.retain(|dep| dep != &id);
                }
            }
            self.tasks.pop();
            self.index.remove(&id);
            return Err(format!(
                "adding task '{id}' would create a cycle: {}",
                cycle.join(" -> ")
            ));
        }
        Ok(())
    }

    /// Replace a task's dependency list, rolling back if the result is cyclic.
    pub fn set_dependencies(&mut self, id: &str, deps: Vec<String>) -> Result<(), String> {
        for dep in &deps {
            if dep == id {
                return Err(format!("task '{id}' depends on itself"));
            }
            if !self.contains(dep) {
                return Err(format!("task '{id}' depends on unknown task '{dep}'"));
            }
        }
        let task = self
            .get_mut(id)
            .ok_or_else(|| format!("unknown task '{id}'"))?;
        let previous = std::mem::replace(&mut task.depends_on, deps);
        if let Some(cycle) = self.find_cycle() {
            if let Some(task) = self.get_mut(id) {
                task.depends_on = previous;
            }
            return Err(format!("dependency cycle: {}", cycle.join(" -> ")));
        }
        Ok(())
    }

    /// All `BACKLOG` tasks with attempts left whose dependencies are `COMPLETE`,
    /// highest priority first, ties in insertion order.
    pub fn get_ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|task| {
                task.status == TaskStatus::Backlog
                    && !task.attempts_exhausted()
                    && self.dependencies_complete(task)
            })
            .collect();
        // `sort_by` is stable, so equal priorities keep insertion order.
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));
        ready
    }

    /// Every dependency is `COMPLETE`, except that a remediation task may
    /// start once the task it remediates has `FAILED`.
    pub fn dependencies_complete(&self, task: &Task) -> bool {
        task.depends_on.iter().all(|dep| {
            self.get(dep).is_some_and(|dep_task| match dep_task.status {
                TaskStatus::Complete => true,
                TaskStatus::Failed => task.remediates.as_deref() == Some(dep.as_str()),
                _ => false,
            })
        })
    }

    pub fn has_cycles(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Return one dependency cycle as a list of ids (first id repeated at the end).
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            graph: &'a TaskGraph,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            match marks.get(id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|entry| *entry == id).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|entry| entry.to_string()).collect();
                    cycle.push(id.to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            stack.push(id);
            if let Some(task) = graph.get(id) {
                for dep in &task.depends_on {
                    if !graph.contains(dep) {
                        continue;
                    }
                    if let Some(cycle) = visit(graph, dep, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            marks.insert(id, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        for task in &self.tasks {
            if let Some(cycle) = visit(self, &task.id, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    /// Ids of tasks that directly depend on `id`, sorted.
    pub fn dependents(&self, id: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .tasks
            .iter()
            .filter(|task| task.depends_on.iter().any(|dep| dep == id))
            .map(|task| task.id.clone())
            .collect();
        out.sort();
        out
    }

    pub fn ids_with_status(&self, status: TaskStatus) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|task| task.status == status)
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|task| task.status == status).count()
    }

    /// Task id to status string, ordered by id for stable serialization.
    pub fn status_map(&self) -> BTreeMap<String, String> {
        self.tasks
            .iter()
            .map(|task| (task.id.clone(), task.status.as_str().to_string()))
            .collect()
    }

    /// Check per-task invariants that the type system cannot express.
    pub fn validate_invariants(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for task in &self.tasks {
            if task.max_attempts == 0 {
                errors.push(format!("task '{}': max_attempts must be > 0", task.id));
            }
            if task.attempt_count > task.max_attempts {
                errors.push(format!(
                    "task '{}': attempt_count {} exceeds max_attempts {}",
                    task.id, task.attempt_count, task.max_attempts
                ));
            }
            if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&task.priority) {
                errors.push(format!(
                    "task '{}': priority {} outside {MIN_PRIORITY}..={MAX_PRIORITY}",
                    task.id, task.priority
                ));
            }
            for dep in &task.depends_on {
                if !self.contains(dep) {
                    errors.push(format!("task '{}': unknown dependency '{dep}'", task.id));
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_with_deps};

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|task| task.id.clone()).collect()
    }

    #[test]
    fn ready_tasks_sorted_by_priority_then_insertion() {
        let mut graph = TaskGraph::new();
        let mut low = task("low");
        low.priority = 2;
        let mut high_a = task("high-a");
        high_a.priority = 9;
        let mut high_b = task("high-b");
        high_b.priority = 9;
        graph.add_task(low).expect("add");
        graph.add_task(high_a).expect("add");
        graph.add_task(high_b).expect("add");

        assert_eq!(
            ids(&graph.get_ready_tasks()),
            vec!["high-a", "high-b", "low"]
        );
    }

    #[test]
    fn ready_tasks_exclude_incomplete_dependencies_and_non_backlog() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).expect("add");
        graph.add_task(task_with_deps("b", &["a"])).expect("add");
        let mut running = task("c");
        running.status = TaskStatus::InProgress;
        graph.add_task(running).expect("add");

        assert_eq!(ids(&graph.get_ready_tasks()), vec!["a"]);

        graph.get_mut("a").expect("a").status = TaskStatus::Complete;
        assert_eq!(ids(&graph.get_ready_tasks()), vec!["b"]);
    }

    #[test]
    fn failed_dependency_only_releases_its_remediation() {
        let mut graph = TaskGraph::new();
        let mut failed = task("a");
        failed.status = TaskStatus::Failed;
        graph.add_task(failed).expect("add");
        graph.add_task(task_with_deps("downstream", &["a"])).expect("add");
        let mut fix = task_with_deps("fix", &["a"]);
        fix.remediates = Some("a".to_string());
        graph.add_task(fix).expect("add");

        assert_eq!(ids(&graph.get_ready_tasks()), vec!["fix"]);
    }

    #[test]
    fn add_task_rejects_cycle_through_blocks_and_rolls_back() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).expect("add");
        let mut remediation = task_with_deps("fix", &["a"]);
        remediation.blocks = vec!["a".to_string()];

        let err = graph.add_task(remediation).unwrap_err();
        assert!(err.contains("cycle"), "{err}");
        assert_eq!(graph.len(), 1);
        assert!(graph.get("a").expect("a").depends_on.is_empty());
        assert!(!graph.has_cycles());
    }

    #[test]
    fn add_task_materializes_blocks_edges() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("later")).expect("add");
        let mut first = task("first");
        first.blocks = vec!["later".to_string()];
        graph.add_task(first).expect("add");

        assert_eq!(graph.get("later").expect("later").depends_on, vec!["first"]);
        assert_eq!(ids(&graph.get_ready_tasks()), vec!["first"]);
    }

    #[test]
    fn add_task_rejects_unknown_dependency_and_duplicates() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).expect("add");
        assert!(graph.add_task(task("a")).is_err());
        assert!(graph.add_task(task_with_deps("b", &["ghost"])).is_err());
        assert!(graph.add_task(task_with_deps("c", &["c"])).is_err());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn set_dependencies_rolls_back_cycles() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).expect("add");
        graph.add_task(task_with_deps("b", &["a"])).expect("add");

        let err = graph
            .set_dependencies("a", vec!["b".to_string()])
            .unwrap_err();
        assert!(err.contains("cycle"));
        assert!(graph.get("a").expect("a").depends_on.is_empty());
    }

    #[test]
    fn from_tasks_detects_persisted_cycle() {
        let a = task_with_deps("a", &["b"]);
        let b = task_with_deps("b", &["a"]);
        let err = TaskGraph::from_tasks(vec![a, b]).unwrap_err();
        assert!(err.contains("dependency cycle"), "{err}");
    }

    #[test]
    fn dependents_are_direct_only() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).expect("add");
        graph.add_task(task_with_deps("b", &["a"])).expect("add");
        graph.add_task(task_with_deps("c", &["b"])).expect("add");

        assert_eq!(graph.dependents("a"), vec!["b"]);
        assert!(graph.dependents("c").is_empty());
    }

    #[test]
    fn exhausted_backlog_task_is_not_ready() {
        let mut spent = task("a");
        spent.attempt_count = 2;
        spent.max_attempts = 2;
        let graph = TaskGraph::from_tasks(vec![spent, task("b")]).expect("graph");

        let ready: Vec<&str> = graph.get_ready_tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn invariants_flag_attempt_overflow() {
        let mut over = task("a");
        over.attempt_count = 4;
        over.max_attempts = 3;
        let err = TaskGraph::from_tasks(vec![over]).unwrap_err();
        assert!(err.contains("exceeds max_attempts"));
    }
}
