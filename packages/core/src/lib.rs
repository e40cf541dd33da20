//! Core domain types for the blob ingestion consumer.
//!
//! This crate contains shared types used across all packages:
//! - Notification and its payload, as delivered by the queue
//! - JobId and JobTimestamp for the unit of work derived from one notification
//! - JobOutcome, JobFailure and ConsumerStats for reporting

mod job;
mod notification;
mod outcome;

pub use job::{JobId, JobTimestamp, TimestampError};
pub use notification::{DecodeError, Notification, ObjectLocation, ReceiptHandle};
pub use outcome::{ConsumerStats, JobFailure, JobOutcome};
