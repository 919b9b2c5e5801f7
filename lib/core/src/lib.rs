//! Core domain types and utilities for the flowline platform.
//!
//! This crate provides the strongly-typed identifiers and error handling
//! foundation shared by the workflow engine, rule matcher, and scheduler.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{
    AccountId, AgentId, ConnectorId, EventId, ExecutionId, ParseIdError, RuleId, SkillId, StepId,
    UserId, WorkflowId,
};
