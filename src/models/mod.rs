//! Data models for RenoGuard.

mod report;
mod stage;
mod submission;
mod task;

pub use report::{Finding, ReportStatus, RiskReport, Severity, BANNED_GRADE_PHRASES};
pub use stage::Stage;
pub use submission::{AnalysisKind, Subject, Submission};
pub use task::{Task, TaskState};
