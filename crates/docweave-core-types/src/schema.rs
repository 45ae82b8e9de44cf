//! Canonical schema constants for structured logging and events
//!
//! These constants ensure consistency across all logging and error reporting.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_CYCLE_ID: &str = "cycle_id";
pub const FIELD_TRANSACTION_ID: &str = "transaction_id";

// Store identifiers
pub const FIELD_DOCUMENT_ID: &str = "document_id";
pub const FIELD_ENTITY_ID: &str = "entity_id";
pub const FIELD_SLOT: &str = "slot";

// Collection sizes
pub const FIELD_SLOT_COUNT: &str = "slot_count";
pub const FIELD_FAILURE_COUNT: &str = "failure_count";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
