//! Shared domain model for the adaf workspace: configuration, error type,
//! and the small enums (positions, resource priorities) every other crate
//! speaks.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Position, ResourcePriority};

/// Reserved interrupt payload: when an agent (or `adaf loop
/// call-supervisor`) interrupts a turn with this exact string, the step
/// ends with [`Error::CallSupervisor`] instead of continuing.
pub const CONTROL_CALL_SUPERVISOR: &str = "__adaf_control:call_supervisor__";
