use crate::{
    Result,
    constants::LOW_BATTERY_THRESHOLD,
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cloud identifier of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(i64);

impl LockId {
    pub const fn new(id: i64) -> Self {
        LockId(id)
    }

    #[must_use]
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LockId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse()
            .map(LockId)
            .map_err(|_| Error::config(format!("invalid lock id: {s:?}")))
    }
}

/// Bolt state of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Secured,
    Unsecured,
    #[default]
    Unknown,
}

impl LockState {
    /// Map the cloud's open-state code (`0` locked, `1` unlocked, `2` unknown).
    ///
    /// Any other code is reported as [`LockState::Unknown`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lockbridge_core::LockState;
    ///
    /// assert_eq!(LockState::from_open_state(0), LockState::Secured);
    /// assert_eq!(LockState::from_open_state(1), LockState::Unsecured);
    /// assert_eq!(LockState::from_open_state(7), LockState::Unknown);
    /// ```
    pub fn from_open_state(code: i64) -> Self {
        match code {
            0 => LockState::Secured,
            1 => LockState::Unsecured,
            _ => LockState::Unknown,
        }
    }

    /// Whether this is a state a user can request.
    pub fn is_target(&self) -> bool {
        !matches!(self, LockState::Unknown)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            LockState::Secured => "secured",
            LockState::Unsecured => "unsecured",
            LockState::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Battery charge in percent, clamped to `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatteryLevel(u8);

impl BatteryLevel {
    /// Build a battery level from a raw cloud value, clamping out-of-range input.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockbridge_core::BatteryLevel;
    ///
    /// assert_eq!(BatteryLevel::from_raw(87).percent(), 87);
    /// assert_eq!(BatteryLevel::from_raw(140).percent(), 100);
    /// assert_eq!(BatteryLevel::from_raw(-3).percent(), 0);
    /// ```
    pub fn from_raw(value: i64) -> Self {
        BatteryLevel(value.clamp(0, 100) as u8)
    }

    #[must_use]
    pub fn percent(&self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_low(&self) -> bool {
        self.0 < LOW_BATTERY_THRESHOLD
    }
}

impl fmt::Display for BatteryLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// A keypad passcode stored on a lock.
///
/// `slot` is the zero-based position of the passcode in the listing it was
/// fetched with. It is NOT stable: any external add or delete shifts it, so a
/// slot is only meaningful against the snapshot it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passcode {
    /// Stable server identifier (`keyboardPwdId`).
    pub id: i64,
    pub slot: usize,
    pub lock_id: LockId,
    pub code: String,
    pub name: Option<String>,
}

/// An NFC/IC card enrolled on a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfcCard {
    /// Stable server identifier (`cardId`).
    pub id: i64,
    pub lock_id: LockId,
    pub number: String,
    pub name: Option<String>,
}

/// Hardware description reported by the lock details endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub model: String,
    pub serial_number: String,
    pub firmware_revision: String,
    pub hardware_revision: String,
}

/// One entry of the account's lock listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSummary {
    pub id: LockId,
    pub name: String,
    pub battery: BatteryLevel,
}

/// Full local snapshot of a lock, owned by its device coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub id: LockId,
    pub name: String,
    pub hardware: HardwareInfo,
    pub state: LockState,
    pub battery: BatteryLevel,
    pub passcodes: Vec<Passcode>,
    pub nfc_cards: Vec<NfcCard>,
    pub offline: bool,
    pub last_seen: DateTime<Utc>,
}

impl Lock {
    /// Replace the passcode snapshot wholesale.
    pub fn replace_passcodes(&mut self, passcodes: Vec<Passcode>) {
        self.passcodes = passcodes;
    }
}
