//! hwsight Engine
//!
//! Turns declarative connector definitions into tables of hardware
//! telemetry for one host.
//!
//! # Overview
//!
//! - [`model`] - Connectors, sources and compute steps, loaded from JSON5
//! - [`registry::ConnectorRegistry`] - The set of loaded connectors
//! - [`resolver`] - Orders a phase's sources into execution waves
//! - [`executor::SourceExecutor`] - Executes one source and its compute chain
//! - [`compute`] - The table transformations
//! - [`orchestrator::JobOrchestrator`] - Runs a job phase wave by wave under
//!   a timeout
//!
//! Protocol access, AWK and document flattening are supplied by the
//! embedding application through the traits in [`collaborator`]. JSON and
//! XML flattening have built-in implementations in [`documents`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hwsight_engine::{
//!     ConnectorRegistry, HostContext, JobOrchestrator, JobRequest, OrchestratorSettings,
//!     PhaseKind, SourceExecutor,
//! };
//!
//! let registry = ConnectorRegistry::load(&["connectors"])?;
//! let orchestrator = JobOrchestrator::new(
//!     SourceExecutor::new(Arc::new(MyProtocolClient)),
//!     OrchestratorSettings::default(),
//! );
//!
//! let connector = registry.get("LinuxDisk").unwrap();
//! let request = JobRequest::new(connector, "disk", PhaseKind::Discovery,
//!     Arc::new(HostContext::new("server-01")));
//! let (_tx, interrupt) = tokio::sync::watch::channel(false);
//! let report = orchestrator.run(request, interrupt).await?;
//! ```

pub mod collaborator;
pub mod compute;
pub mod documents;
pub mod error;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod psl;
pub mod registry;
pub mod resolver;
pub mod table;

pub use collaborator::{
    CancelHandle, CancelSignal, DocumentFlattener, HostContext, NoProtocol, NoScripts,
    ProtocolClient, ScriptRunner, TableLookup, cancellation,
};
pub use documents::{JsonFlattener, StandardDocuments, XmlFlattener};
pub use error::{ComputeError, EngineError, ProtocolError, Result, SourceError};
pub use executor::{ExecutionScope, SourceExecutor, SourceOutcome};
pub use model::{Compute, Connector, PhaseKind, Source, SourceKind};
pub use orchestrator::{
    FailureReason, JobOrchestrator, JobReport, JobRequest, JobResultSet, JobStatus,
    OrchestratorSettings, StatusTracker,
};
pub use registry::ConnectorRegistry;
pub use resolver::ExecutionPlan;
pub use table::SourceTable;
