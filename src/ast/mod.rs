//! AST Module - domain model for workflows
//!
//! Contains the typed workflow documents and their inputs:
//! - `workflow`: Workflow, WorkflowSpec, WorkflowPatch, WorkflowStatus, Target
//! - `step`: Step, StepAction, StepSpec (validated on conversion)
//! - `result`: StepResult, StepOutcome
//! - `template`: built-in step lists workflows can be created from
//!
//! These types represent the "what". For execution, see the `runtime` module.

mod result;
mod step;
mod template;
mod workflow;

// Re-export all public types
pub use result::{StepOutcome, StepResult, StepStatus, STOPPED};
pub use step::{validate_steps, ModuleKind, Step, StepAction, StepKind, StepOptions, StepSpec};
pub use template::{find_template, templates, Template, TemplateRequest, TemplateSummary};
pub use workflow::{Target, Workflow, WorkflowPatch, WorkflowSpec, WorkflowStatus};
