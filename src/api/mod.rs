//! Bank Account Data API access.

pub mod client;
pub mod headers;
pub mod http;
pub mod operations;
pub mod types;

pub use client::BankDataClient;
pub use headers::ProviderRateLimits;
pub use types::{Institution, NewRequisition, Page, Requisition, RequisitionStatus};
