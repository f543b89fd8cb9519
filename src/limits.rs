use crate::model::Ms;

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_WORK_ORDERS_PER_TENANT: usize = 100_000;
pub const MAX_OPERATIONS_PER_WORK_ORDER: usize = 1_000;
pub const MAX_OPERATIONS_PER_MACHINE: usize = 100_000;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 512;

/// Rows accepted by a single multi-row INSERT.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// No single operation or slot request may be wider than a year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
