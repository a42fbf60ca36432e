use crate::types::Feature;
use async_trait::async_trait;
use foundry_core::{FoundryResult, TaskPhase, TaskSpecification};

/// Decomposes a feature into task specifications.
///
/// The returned tasks must carry the feature's id. Dependency edges are
/// expressed on the tasks; the coordinator validates the resulting graph.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn decompose(&self, feature: &Feature) -> FoundryResult<Vec<TaskSpecification>>;
}

/// Fixed implement, test, review, deploy pipeline.
///
/// Test and review both depend on implement; deploy depends on both and
/// runs in the deployment phase.
#[derive(Debug, Default, Clone)]
pub struct DefaultPlanner;

#[async_trait]
impl Planner for DefaultPlanner {
    async fn decompose(&self, feature: &Feature) -> FoundryResult<Vec<TaskSpecification>> {
        let implement = TaskSpecification::new(
            feature.id,
            format!("Implement {}", feature.title),
            feature.description.clone(),
        )
        .requires("coding")
        .with_requirements(feature.requirements.clone())
        .with_acceptance_criteria(feature.acceptance_criteria.clone());

        let test = TaskSpecification::new(
            feature.id,
            format!("Test {}", feature.title),
            format!("Write and run tests for: {}", feature.description),
        )
        .requires("testing")
        .with_dependencies([implement.id])
        .with_requirements(feature.requirements.clone())
        .with_acceptance_criteria(feature.acceptance_criteria.clone());

        let review = TaskSpecification::new(
            feature.id,
            format!("Review {}", feature.title),
            format!("Review the implementation of: {}", feature.description),
        )
        .requires("review")
        .with_dependencies([implement.id])
        .with_requirements(feature.requirements.clone());

        let deploy = TaskSpecification::new(
            feature.id,
            format!("Deploy {}", feature.title),
            format!("Release: {}", feature.title),
        )
        .requires("deploy")
        .with_dependencies([test.id, review.id])
        .in_phase(TaskPhase::Deployment);

        Ok(vec![implement, test, review, deploy])
    }
}
