//! Opflow - workflow automation engine for unattended post-exploitation playbooks
//!
//! ## Module Architecture (DDD-Inspired)
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  ast/       Workflow, Step, StepResult, templates            │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  runtime/   Run state machine (RunController, StepExecutor)  │
//! │  engine     Control surface (Engine)                         │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  store/     Workflow documents (WorkflowStore, Persistence)  │
//! │  event/     Activity trail (ActivityLog, NDJSON sink)        │
//! │  provider/  Target capability (TargetProvider, mock)         │
//! │  util/      Constants                                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ast`] | Typed workflow documents, step validation, template catalog |
//! | [`runtime`] | Background step loop with pause / resume / stop |
//! | [`engine`] | One handle over store, controller and activity log |
//! | [`store`] | Per-document locked read-modify-write over a backend |
//! | [`event`] | Capacity-bounded activity log |
//! | [`provider`] | Narrow interface to the remote target |
//! | [`error`] | Error types with codes and fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod ast;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER - Execution logic
// ═══════════════════════════════════════════════════════════════
pub mod engine;
pub mod runtime;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER - Storage, events, providers
// ═══════════════════════════════════════════════════════════════
pub mod event;
pub mod provider;
pub mod store;
pub mod util;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING - Error handling, configuration
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{FixSuggestion, OpflowError, Result};

// Config types
pub use config::{ExecutionLimits, OpflowConfig, StepDefaults};

// AST types (Domain Model)
pub use ast::{
    ModuleKind, Step, StepAction, StepKind, StepOutcome, StepResult, StepSpec, StepStatus,
    Target, TemplateRequest, Workflow, WorkflowPatch, WorkflowSpec, WorkflowStatus,
};

// Runtime types (Application Layer)
pub use engine::Engine;
pub use runtime::{ControlOutcome, PendingSignal, RunController, StepExecutor};

// Event types
pub use event::{ActivityEntry, ActivityEvent, ActivityFilter, ActivityKind, ActivityLog, Severity};

// Store types
pub use store::{JsonDirPersistence, MemoryPersistence, Persistence, WorkflowStore};

// Provider types
pub use provider::{MockProvider, MockReply, TargetProvider};
