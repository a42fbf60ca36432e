use foundry_core::ArtifactKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Specialization of a worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Turns requirements into specifications.
    Planner,
    /// Writes the implementation.
    Coder,
    /// Writes and runs tests.
    Tester,
    /// Reviews produced work.
    Reviewer,
    /// Ships the result.
    DevOps,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Planner => write!(f, "planner"),
            AgentRole::Coder => write!(f, "coder"),
            AgentRole::Tester => write!(f, "tester"),
            AgentRole::Reviewer => write!(f, "reviewer"),
            AgentRole::DevOps => write!(f, "devops"),
        }
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "planner" | "spec" => Ok(AgentRole::Planner),
            "coder" => Ok(AgentRole::Coder),
            "tester" => Ok(AgentRole::Tester),
            "reviewer" => Ok(AgentRole::Reviewer),
            "devops" => Ok(AgentRole::DevOps),
            other => Err(format!("unknown agent role '{other}'")),
        }
    }
}

impl AgentRole {
    /// Every role, in pipeline order.
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Planner,
        AgentRole::Coder,
        AgentRole::Tester,
        AgentRole::Reviewer,
        AgentRole::DevOps,
    ];

    /// Capability tags an agent of this role advertises by default.
    pub fn default_capabilities(&self) -> BTreeSet<String> {
        let caps: &[&str] = match self {
            AgentRole::Planner => &["planning"],
            AgentRole::Coder => &["coding"],
            AgentRole::Tester => &["testing"],
            AgentRole::Reviewer => &["review"],
            AgentRole::DevOps => &["deploy"],
        };
        caps.iter().map(|c| (*c).to_string()).collect()
    }

    /// Kind of artifact this role produces.
    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            AgentRole::Planner => ArtifactKind::Spec,
            AgentRole::Coder => ArtifactKind::Code,
            AgentRole::Tester => ArtifactKind::Test,
            AgentRole::Reviewer => ArtifactKind::Review,
            AgentRole::DevOps => ArtifactKind::Deployment,
        }
    }

    /// Role preamble placed at the top of every prompt.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            AgentRole::Planner => PLANNER_PROMPT,
            AgentRole::Coder => CODER_PROMPT,
            AgentRole::Tester => TESTER_PROMPT,
            AgentRole::Reviewer => REVIEWER_PROMPT,
            AgentRole::DevOps => DEVOPS_PROMPT,
        }
    }
}

const PLANNER_PROMPT: &str = "\
You are the Planner agent in Foundry. Turn the task below into a concrete \
technical specification.

Rules:
1. List the interfaces, data types and contracts involved.
2. Call out edge cases and constraints.
3. Reuse patterns from the provided context when they apply.
4. Respond with the specification as plain text.
";

const CODER_PROMPT: &str = "\
You are the Coder agent in Foundry. Implement the task below.

Rules:
1. Follow the requirements exactly; every acceptance criterion must be met.
2. Handle errors explicitly and never leave placeholder code.
3. Keep the implementation simple and consistent with the provided context.
4. Respond with the code in markdown code blocks.
";

const TESTER_PROMPT: &str = "\
You are the Tester agent in Foundry. Write tests for the task below.

Rules:
1. Cover the happy path, edge cases and error conditions.
2. Derive one test per acceptance criterion at minimum.
3. Use descriptive test names.
4. Respond with the test code in markdown code blocks.
";

const REVIEWER_PROMPT: &str = "\
You are the Reviewer agent in Foundry. Review the work for the task below.

Rules:
1. Check every acceptance criterion and state whether it is met.
2. Flag unhandled errors, placeholder code and vague statements.
3. Respond with a review report as plain text.
";

const DEVOPS_PROMPT: &str = "\
You are the DevOps agent in Foundry. Prepare the deployment for the task below.

Rules:
1. Describe build, configuration and rollout steps.
2. Include a rollback procedure.
3. Respond with the deployment plan as plain text.
";
