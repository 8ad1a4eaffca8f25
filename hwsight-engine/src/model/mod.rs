//! In-memory connector model.
//!
//! Connector files are JSON5 documents deserialized into these types and
//! then prepared by [`Connector::from_document`]: source keys become
//! canonical dotted paths, relative references are resolved, constants
//! are substituted, computes are checked and each phase gets its
//! [`ExecutionPlan`](crate::resolver::ExecutionPlan).

pub mod compute;
pub mod connector;
pub(crate) mod de;
pub mod source;
pub mod translation;

pub use compute::*;
pub use connector::{
    Connector, ConnectorDocument, JobPhase, MonitorDocument, MonitorJob, PRE_PREFIX, PhaseDocument,
    PhaseKind,
};
pub use source::{
    CopySource, EntryConcatMethod, ExecuteForEachEntryOf, ProtocolQuery, ReferenceSource, Source,
    SourceKind, StaticSource, TableJoin, TableUnion,
};
pub use translation::{DEFAULT_KEY, TranslationRef, TranslationTable};
