//! Convenience re-exports for common use.

pub use crate::api::{BankDataClient, Institution, NewRequisition, Requisition, RequisitionStatus};
pub use crate::config::{BankDataConfig, Credentials, RateLimits, RefreshIntervals};
pub use crate::error::{BankDataError, Result};
pub use crate::link::{LinkState, LinkWizard};
pub use crate::ratelimit::Scope;
pub use crate::refresh::{AccountRecord, RefreshOrchestrator, RefreshSnapshot};
pub use crate::scheduler::RefreshScheduler;
pub use crate::store::{FileStateStore, MemoryStateStore, StateStore};
