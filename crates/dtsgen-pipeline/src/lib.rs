//! dtsgen pipeline
//!
//! Stages that turn an npm package into validated usage examples,
//! run-time derived TypeScript declarations and comparisons against
//! DefinitelyTyped, plus the controller that runs them resumably and the
//! evaluation sweep that aggregates many runs into metrics.

pub mod agent;
pub mod comparisons;
pub mod config;
pub mod context;
pub mod declarations;
pub mod evaluation;
pub mod examples;
pub mod fakes;
pub mod metrics;
pub mod pipeline;
pub mod stage;
pub mod validation;
pub mod workspace;

pub use agent::{AgentFactory, ExampleAgent, PackageContext, ProcessAgentFactory, Screening};
pub use config::{AgentConfig, EvaluationConfig, PipelineConfig};
pub use context::{RunContext, ToolContext};
pub use evaluation::{
    AutoContinue, EvaluationDriver, EvaluationError, EvaluationReport, OperatorInput,
    StdinOperator,
};
pub use metrics::{AbsoluteMetrics, MetricsError, MetricsReport, ModeMetrics};
pub use pipeline::{PipelineController, RunOutcome, RunReport, RunState};
pub use stage::{ArtifactProducer, StageKind, StageReport, StageRunner};
pub use validation::{RefinementOutcome, RefinementPolicy, ValidationOutcome, Validator};
