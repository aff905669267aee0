//! Constants for the cloud lock service and the bridge's timing behaviour.
//!
//! # Cloud wire protocol
//!
//! Every call is an HTTP request with form-encoded parameters. Gated calls
//! carry `clientId`, `accessToken` and a millisecond epoch `date`. Responses
//! share the envelope:
//!
//! ```text
//! { "errcode": 0, "errmsg": "none error message", ...payload }
//! ```
//!
//! A missing `errcode` is treated the same as `0`.
//!
//! # Usage
//!
//! ```
//! use lockbridge_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(PATH_LOCK_LIST, "/v3/lock/list");
//! let debounce = Duration::from_millis(WRITE_DEBOUNCE_MS);
//! assert_eq!(debounce.as_millis(), 500);
//! ```

// ============================================================================
// Cloud endpoints
// ============================================================================

/// Default API host.
pub const DEFAULT_API_BASE_URL: &str = "https://euapi.ttlock.com";

/// OAuth token endpoint (password and refresh grants).
pub const PATH_OAUTH_TOKEN: &str = "/oauth2/token";

pub const PATH_LOCK_LIST: &str = "/v3/lock/list";
pub const PATH_LOCK_DETAIL: &str = "/v3/lock/detail";
pub const PATH_LOCK_OPEN_STATE: &str = "/v3/lock/queryOpenState";
pub const PATH_LOCK_BATTERY: &str = "/v3/lock/queryElectricQuantity";
pub const PATH_LOCK_LOCK: &str = "/v3/lock/lock";
pub const PATH_LOCK_UNLOCK: &str = "/v3/lock/unlock";

pub const PATH_PASSCODE_LIST: &str = "/v3/lock/listKeyboardPwd";
pub const PATH_PASSCODE_ADD: &str = "/v3/keyboardPwd/add";
pub const PATH_PASSCODE_CHANGE: &str = "/v3/keyboardPwd/change";
pub const PATH_PASSCODE_DELETE: &str = "/v3/keyboardPwd/delete";

pub const PATH_CARD_LIST: &str = "/v3/identityCard/list";
pub const PATH_CARD_ADD: &str = "/v3/identityCard/addForReversedCardNumber";
pub const PATH_CARD_DELETE: &str = "/v3/identityCard/delete";

// ============================================================================
// Request parameters
// ============================================================================

/// Page size for listing endpoints. Result sets are assumed to fit one page.
pub const LIST_PAGE_SIZE: u32 = 1000;

/// First (and only) page requested from listing endpoints.
pub const LIST_PAGE_NO: u32 = 1;

/// `addType`/`changeType`/`deleteType` value selecting "via gateway".
pub const OPERATION_VIA_GATEWAY: u8 = 2;

/// Application-level error code reported when the lock gateway is busy.
pub const ERRCODE_GATEWAY_BUSY: i64 = -3003;

// ============================================================================
// Retry policy
// ============================================================================

/// Retries allowed after the first attempt for a transient service error.
pub const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Base of the exponential backoff, in seconds (`base^retry`).
pub const BACKOFF_BASE_SECS: u64 = 2;

/// Token refreshes allowed per queued request.
pub const MAX_REFRESHES_PER_REQUEST: u32 = 1;

/// Default HTTP timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Device coordination
// ============================================================================

/// Window during which repeated user writes collapse into the last one.
pub const WRITE_DEBOUNCE_MS: u64 = 500;

/// A poll does not read the lock state within this long after a user write.
pub const STATE_POLL_SUPPRESSION_SECS: u64 = 5;

/// Battery percentage below which the lock reports low battery.
pub const LOW_BATTERY_THRESHOLD: u8 = 20;

/// Default polling interval in seconds.
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;

/// Smallest polling interval accepted by configuration validation.
pub const MIN_POLLING_INTERVAL_SECS: u64 = 5;

/// Default discovery sweep interval in seconds (one hour).
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 3600;

/// Default offline interval in seconds (seven days).
pub const DEFAULT_OFFLINE_INTERVAL_SECS: u64 = 7 * 24 * 3600;

/// Capacity of accessory notification channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Capacity of the request queue channel.
pub const REQUEST_QUEUE_CAPACITY: usize = 256;
