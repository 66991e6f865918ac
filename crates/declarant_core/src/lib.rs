pub mod batch;
pub mod domain;
pub mod ports;

pub use batch::BatchOrchestrator;
pub use domain::{
    BatchRun, BatchStats, ClassificationItem, ClassificationResult, ConfidenceThresholds,
    ConfidenceTier, NewClassificationRecord, OverallStatistics, PersistedResult, Session,
    SessionStatus, SessionUpdate, TierCounts, UserStatus, UserStatusCounts,
};
pub use ports::{
    ClassificationService, PortError, PortResult, ProgressObserver, SessionStore,
};
