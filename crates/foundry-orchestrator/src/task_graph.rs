use foundry_core::{FoundryError, FoundryResult, TaskPhase, TaskSpecification, TaskStatus};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// A feature's tasks with dependency resolution.
///
/// Built only from a validated decomposition: non-empty, every dependency
/// resolves, no cycles, and no implementation task waits on a deployment task.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    order: Vec<Uuid>,
    tasks: HashMap<Uuid, TaskSpecification>,
    completed: BTreeSet<Uuid>,
}

impl TaskGraph {
    /// Validates a decomposition and builds the graph.
    pub fn build(tasks: Vec<TaskSpecification>) -> FoundryResult<Self> {
        if tasks.is_empty() {
            return Err(FoundryError::UnsatisfiableDependency(
                "decomposition produced no tasks".into(),
            ));
        }
        let mut order = Vec::with_capacity(tasks.len());
        let mut map = HashMap::with_capacity(tasks.len());
        for task in tasks {
            let id = task.id;
            if map.insert(id, task).is_some() {
                return Err(FoundryError::UnsatisfiableDependency(format!(
                    "duplicate task id {id}"
                )));
            }
            order.push(id);
        }

        let graph = Self {
            order,
            tasks: map,
            completed: BTreeSet::new(),
        };
        graph.check_references()?;
        if let Some(id) = graph.find_cycle() {
            return Err(FoundryError::DependencyCycle(format!(
                "task {id} depends on itself through its dependencies"
            )));
        }
        Ok(graph)
    }

    fn check_references(&self) -> FoundryResult<()> {
        for task in self.tasks() {
            for dep in &task.dependencies {
                let Some(target) = self.tasks.get(dep) else {
                    return Err(FoundryError::UnsatisfiableDependency(format!(
                        "task '{}' depends on unknown task {dep}",
                        task.title
                    )));
                };
                if task.phase == TaskPhase::Implementation && target.phase == TaskPhase::Deployment
                {
                    return Err(FoundryError::UnsatisfiableDependency(format!(
                        "implementation task '{}' depends on deployment task '{}'",
                        task.title, target.title
                    )));
                }
            }
        }
        Ok(())
    }

    /// First task found on a dependency cycle.
    fn find_cycle(&self) -> Option<Uuid> {
        let mut visited = HashMap::new();
        self.order
            .iter()
            .copied()
            .find(|&id| self.dfs_cycle(id, &mut visited))
    }

    fn dfs_cycle(&self, id: Uuid, visited: &mut HashMap<Uuid, u8>) -> bool {
        match visited.get(&id) {
            Some(1) => return true,  // back edge
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(task) = self.tasks.get(&id) {
            for dep in &task.dependencies {
                if self.dfs_cycle(*dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }

    /// Task ids in decomposition order.
    pub fn order(&self) -> &[Uuid] {
        &self.order
    }

    /// All tasks in decomposition order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpecification> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn get(&self, id: Uuid) -> Option<&TaskSpecification> {
        self.tasks.get(&id)
    }

    /// `Todo` tasks in `phase` whose dependencies are all completed.
    pub fn ready(&self, phase: TaskPhase) -> Vec<&TaskSpecification> {
        self.tasks()
            .filter(|t| t.phase == phase && t.is_ready(&self.completed))
            .collect()
    }

    /// Tasks that have not completed, in decomposition order.
    pub fn outstanding(&self) -> impl Iterator<Item = &TaskSpecification> {
        self.tasks().filter(|t| t.status != TaskStatus::Completed)
    }

    pub fn mark_in_progress(&mut self, id: Uuid, endpoint: &str) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Todo => {
                task.status = TaskStatus::InProgress;
                task.assigned_endpoint = Some(endpoint.to_string());
                true
            }
            _ => false,
        }
    }

    /// Marks a task as under validation.
    pub fn mark_review(&mut self, id: Uuid) -> bool {
        self.set_status(id, TaskStatus::Review)
    }

    pub fn mark_completed(&mut self, id: Uuid) -> bool {
        if self.set_status(id, TaskStatus::Completed) {
            self.completed.insert(id);
            true
        } else {
            false
        }
    }

    pub fn mark_failed(&mut self, id: Uuid) -> bool {
        self.set_status(id, TaskStatus::Failed)
    }

    /// Returns a task to `Todo` for another attempt.
    pub fn reset(&mut self, id: Uuid) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.status = TaskStatus::Todo;
                task.assigned_endpoint = None;
                true
            }
            None => false,
        }
    }

    fn set_status(&mut self, id: Uuid, status: TaskStatus) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.status = status;
                true
            }
            None => false,
        }
    }

    /// Tasks currently dispatched to an agent.
    pub fn in_progress(&self) -> impl Iterator<Item = &TaskSpecification> {
        self.tasks()
            .filter(|t| matches!(t.status, TaskStatus::InProgress | TaskStatus::Review))
    }

    /// Whether every task of `phase` is completed. Vacuously true when the
    /// phase has no tasks.
    pub fn phase_complete(&self, phase: TaskPhase) -> bool {
        self.tasks()
            .filter(|t| t.phase == phase)
            .all(|t| t.status == TaskStatus::Completed)
    }

    pub fn total_count(&self) -> usize {
        self.order.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// `completed / total * 100`, rounded down.
    pub fn progress(&self) -> u8 {
        let total = self.total_count();
        if total == 0 {
            return 0;
        }
        u8::try_from(self.completed_count() * 100 / total).unwrap_or(100)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn task(feature: Uuid, title: &str) -> TaskSpecification {
        TaskSpecification::new(feature, title, title).requires("coding")
    }

    #[test]
    fn test_empty_decomposition_rejected() {
        let err = TaskGraph::build(Vec::new()).unwrap_err();
        assert!(matches!(err, FoundryError::UnsatisfiableDependency(_)));
    }

    #[test]
    fn test_ready_follows_dependencies() {
        let f = Uuid::new_v4();
        let spec = task(f, "Spec");
        let code = task(f, "Code").with_dependencies([spec.id]);
        let test = task(f, "Test").with_dependencies([code.id]);
        let review = task(f, "Review").with_dependencies([code.id, test.id]);
        let (spec_id, code_id, test_id) = (spec.id, code.id, test.id);
        let mut graph = TaskGraph::build(vec![spec, code, test, review]).unwrap();

        let ready = graph.ready(TaskPhase::Implementation);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].title, "Spec");

        for id in [spec_id, code_id, test_id] {
            assert!(graph.mark_in_progress(id, "coder-1"));
            assert!(graph.mark_completed(id));
        }
        let ready = graph.ready(TaskPhase::Implementation);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].title, "Review");
        assert_eq!(graph.progress(), 75);
    }

    #[test]
    fn test_parallel_roots_in_order() {
        let f = Uuid::new_v4();
        let graph =
            TaskGraph::build(vec![task(f, "A"), task(f, "B"), task(f, "C")]).unwrap();
        let titles: Vec<_> = graph
            .ready(TaskPhase::Implementation)
            .into_iter()
            .map(|t| t.title.as_str())
            .collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_cycle_detection() {
        let f = Uuid::new_v4();
        let mut a = task(f, "A");
        let mut b = task(f, "B");
        a.dependencies.insert(b.id);
        b.dependencies.insert(a.id);
        let err = TaskGraph::build(vec![a, b]).unwrap_err();
        assert!(matches!(err, FoundryError::DependencyCycle(_)));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let f = Uuid::new_v4();
        let mut a = task(f, "A");
        a.dependencies.insert(a.id);
        assert!(matches!(
            TaskGraph::build(vec![a]).unwrap_err(),
            FoundryError::DependencyCycle(_)
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let f = Uuid::new_v4();
        let a = task(f, "A").with_dependencies([Uuid::new_v4()]);
        let err = TaskGraph::build(vec![a]).unwrap_err();
        assert!(err.to_string().contains("unknown task"));
    }

    #[test]
    fn test_implementation_cannot_wait_on_deployment() {
        let f = Uuid::new_v4();
        let deploy = task(f, "Deploy").in_phase(TaskPhase::Deployment);
        let code = task(f, "Code").with_dependencies([deploy.id]);
        assert!(matches!(
            TaskGraph::build(vec![deploy, code]).unwrap_err(),
            FoundryError::UnsatisfiableDependency(_)
        ));
    }

    #[test]
    fn test_phase_completion_and_reset() {
        let f = Uuid::new_v4();
        let code = task(f, "Code");
        let deploy = task(f, "Deploy")
            .in_phase(TaskPhase::Deployment)
            .with_dependencies([code.id]);
        let code_id = code.id;
        let mut graph = TaskGraph::build(vec![code, deploy]).unwrap();

        assert!(!graph.phase_complete(TaskPhase::Implementation));
        assert!(graph.ready(TaskPhase::Deployment).is_empty());

        graph.mark_in_progress(code_id, "coder-1");
        assert_eq!(graph.in_progress().count(), 1);
        graph.reset(code_id);
        assert!(graph.get(code_id).unwrap().assigned_endpoint.is_none());
        assert_eq!(graph.ready(TaskPhase::Implementation).len(), 1);

        graph.mark_in_progress(code_id, "coder-2");
        graph.mark_completed(code_id);
        assert!(graph.phase_complete(TaskPhase::Implementation));
        assert_eq!(graph.ready(TaskPhase::Deployment).len(), 1);
        assert_eq!(graph.progress(), 50);
    }

    #[test]
    fn test_outstanding_shrinks_as_tasks_complete() {
        let f = Uuid::new_v4();
        let code = task(f, "Code");
        let deploy = TaskSpecification::new(f, "Deploy", "ship")
            .requires("deploy")
            .in_phase(TaskPhase::Deployment)
            .with_dependencies([code.id]);
        let code_id = code.id;
        let mut graph = TaskGraph::build(vec![code, deploy]).unwrap();
        assert_eq!(graph.outstanding().count(), 2);
        graph.mark_in_progress(code_id, "c");
        graph.mark_completed(code_id);
        let outstanding: Vec<_> = graph.outstanding().collect();
        assert_eq!(outstanding.len(), 1);
        assert!(outstanding[0].required_capabilities.contains("deploy"));
    }

    #[test]
    fn test_mark_in_progress_requires_todo() {
        let f = Uuid::new_v4();
        let a = task(f, "A");
        let id = a.id;
        let mut graph = TaskGraph::build(vec![a]).unwrap();
        assert!(graph.mark_in_progress(id, "x"));
        assert!(!graph.mark_in_progress(id, "y"));
        assert_eq!(graph.get(id).unwrap().assigned_endpoint.as_deref(), Some("x"));
    }
}
