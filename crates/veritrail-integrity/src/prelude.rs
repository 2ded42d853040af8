//! Prelude module - commonly used types for convenient import.
//!
//! Use `use veritrail_integrity::prelude::*;` to import the engine facade,
//! the data model and the result types.

// Errors
pub use crate::{IntegrityError, IntegrityResult, OperationalError};

// Data model
pub use crate::{
    Actor, ActorType, AuditEvent, DataClass, EventId, EventResult, LegalBasis, LogId, Target,
    TargetType,
};

// Accessor
pub use crate::{AccessorError, EventAccessor, KvEventAccessor};

// Engine
pub use crate::{CheckOptions, IntegrityEngine, IntegrityEngineBuilder};

// Results
pub use crate::{
    Alert, BreakType, BrokenChain, ChainHead, CorruptionCriteria, CorruptionReport,
    IntegrityReport, OrderCriteria, RepairPolicy, RepairResult, ReportStatus, SequenceFindings,
    Severity, VerificationResult,
};

// Monitoring
pub use crate::{MonitorState, MonitorStatus, MonitoringConfig};
