//! Typed lock operations over the request queue.
//!
//! [`LockCloudGateway`] turns cloud endpoints into typed calls. It holds no
//! state beyond the queue handle and is cheap to clone, so every device
//! coordinator gets its own copy.
//!
//! Passcode and card listings are single-page (`pageSize` 1000). A passcode's
//! `slot` is its position in the listing it came from and is recomputed on
//! every fetch.

use crate::queue::{Params, RequestQueue};
use crate::transport::HttpMethod;
use chrono::Utc;
use lockbridge_core::constants::{
    LIST_PAGE_NO, LIST_PAGE_SIZE, OPERATION_VIA_GATEWAY, PATH_CARD_ADD, PATH_CARD_DELETE,
    PATH_CARD_LIST, PATH_LOCK_BATTERY, PATH_LOCK_DETAIL, PATH_LOCK_LIST, PATH_LOCK_LOCK,
    PATH_LOCK_OPEN_STATE, PATH_LOCK_UNLOCK, PATH_PASSCODE_ADD, PATH_PASSCODE_CHANGE,
    PATH_PASSCODE_DELETE, PATH_PASSCODE_LIST,
};
use lockbridge_core::{
    BatteryLevel, Error, HardwareInfo, Lock, LockId, LockState, LockSummary, NfcCard, Passcode,
    Result,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

/// Lock details as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDetails {
    pub id: LockId,
    pub name: String,
    pub hardware: HardwareInfo,
    pub battery: BatteryLevel,
}

// Wire shapes. Unknown fields are ignored.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockEntry {
    lock_id: i64,
    lock_alias: Option<String>,
    lock_name: Option<String>,
    #[serde(default)]
    electric_quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockDetailBody {
    lock_id: i64,
    lock_alias: Option<String>,
    lock_name: Option<String>,
    lock_mac: Option<String>,
    model_num: Option<String>,
    hardware_revision: Option<String>,
    firmware_revision: Option<String>,
    #[serde(default)]
    electric_quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasscodeEntry {
    keyboard_pwd_id: i64,
    keyboard_pwd: String,
    keyboard_pwd_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardEntry {
    card_id: i64,
    card_number: String,
    card_name: Option<String>,
}

fn display_name(alias: Option<String>, name: Option<String>, id: i64) -> String {
    alias
        .filter(|a| !a.is_empty())
        .or(name.filter(|n| !n.is_empty()))
        .unwrap_or_else(|| format!("Lock {id}"))
}

/// Small builder for form parameters.
#[derive(Debug, Default)]
struct Form(Params);

impl Form {
    fn new() -> Self {
        Self::default()
    }

    fn lock(lock_id: LockId) -> Self {
        Self::new().with("lockId", lock_id.as_i64())
    }

    fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    fn page(self) -> Self {
        self.with("pageNo", LIST_PAGE_NO)
            .with("pageSize", LIST_PAGE_SIZE)
    }

    fn into_params(self) -> Params {
        self.0
    }
}

/// Typed client for the lock cloud.
#[derive(Debug, Clone)]
pub struct LockCloudGateway {
    queue: RequestQueue,
}

impl LockCloudGateway {
    pub fn new(queue: RequestQueue) -> Self {
        Self { queue }
    }

    async fn get(&self, endpoint: &str, form: Form) -> Result<Value> {
        self.queue
            .enqueue(endpoint, HttpMethod::Get, form.into_params())
            .await
    }

    async fn post(&self, endpoint: &str, form: Form) -> Result<Value> {
        self.queue
            .enqueue(endpoint, HttpMethod::Post, form.into_params())
            .await
    }

    /// All locks on the account.
    ///
    /// # Errors
    /// `Error::InvalidResponse` if the body has no `list` array.
    pub async fn get_locks(&self) -> Result<Vec<LockSummary>> {
        let body = self.get(PATH_LOCK_LIST, Form::new().page()).await?;
        let entries: Vec<LockEntry> = list_payload(PATH_LOCK_LIST, body)?;
        debug!(count = entries.len(), "Fetched lock list");

        Ok(entries
            .into_iter()
            .map(|e| LockSummary {
                id: LockId::new(e.lock_id),
                name: display_name(e.lock_alias, e.lock_name, e.lock_id),
                battery: BatteryLevel::from_raw(e.electric_quantity),
            })
            .collect())
    }

    pub async fn get_lock_details(&self, lock_id: LockId) -> Result<LockDetails> {
        let body = self.get(PATH_LOCK_DETAIL, Form::lock(lock_id)).await?;
        let detail: LockDetailBody = payload(PATH_LOCK_DETAIL, body)?;

        Ok(LockDetails {
            id: LockId::new(detail.lock_id),
            name: display_name(detail.lock_alias, detail.lock_name, detail.lock_id),
            hardware: HardwareInfo {
                model: detail.model_num.unwrap_or_default(),
                serial_number: detail.lock_mac.unwrap_or_default(),
                firmware_revision: detail.firmware_revision.unwrap_or_default(),
                hardware_revision: detail.hardware_revision.unwrap_or_default(),
            },
            battery: BatteryLevel::from_raw(detail.electric_quantity),
        })
    }

    pub async fn get_lock_state(&self, lock_id: LockId) -> Result<LockState> {
        let body = self.get(PATH_LOCK_OPEN_STATE, Form::lock(lock_id)).await?;
        let state = body
            .get("state")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::invalid_response(PATH_LOCK_OPEN_STATE, "missing state"))?;
        Ok(LockState::from_open_state(state))
    }

    pub async fn get_battery_level(&self, lock_id: LockId) -> Result<BatteryLevel> {
        let body = self.get(PATH_LOCK_BATTERY, Form::lock(lock_id)).await?;
        let raw = body
            .get("electricQuantity")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::invalid_response(PATH_LOCK_BATTERY, "missing electricQuantity")
            })?;
        Ok(BatteryLevel::from_raw(raw))
    }

    pub async fn lock(&self, lock_id: LockId) -> Result<()> {
        info!(%lock_id, "Locking");
        self.post(PATH_LOCK_LOCK, Form::lock(lock_id)).await?;
        Ok(())
    }

    pub async fn unlock(&self, lock_id: LockId) -> Result<()> {
        info!(%lock_id, "Unlocking");
        self.post(PATH_LOCK_UNLOCK, Form::lock(lock_id)).await?;
        Ok(())
    }

    /// Passcodes in listing order; `slot` is the position in this listing.
    ///
    /// # Errors
    /// `Error::InvalidResponse` if the body has no `list` array.
    pub async fn get_passcodes(&self, lock_id: LockId) -> Result<Vec<Passcode>> {
        let body = self
            .get(PATH_PASSCODE_LIST, Form::lock(lock_id).page())
            .await?;
        let entries: Vec<PasscodeEntry> = list_payload(PATH_PASSCODE_LIST, body)?;

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(slot, e)| Passcode {
                id: e.keyboard_pwd_id,
                slot,
                lock_id,
                code: e.keyboard_pwd,
                name: e.keyboard_pwd_name,
            })
            .collect())
    }

    /// Add a permanent passcode. Returns its server id.
    pub async fn add_passcode(&self, lock_id: LockId, code: &str, name: Option<&str>) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let form = Form::lock(lock_id)
            .with("keyboardPwd", code)
            .with("keyboardPwdName", name.unwrap_or(code))
            .with("startDate", now)
            .with("endDate", 0)
            .with("addType", OPERATION_VIA_GATEWAY);
        let body = self.post(PATH_PASSCODE_ADD, form).await?;
        let id = body
            .get("keyboardPwdId")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::invalid_response(PATH_PASSCODE_ADD, "missing keyboardPwdId"))?;
        info!(%lock_id, passcode_id = id, "Passcode added");
        Ok(id)
    }

    pub async fn change_passcode(&self, lock_id: LockId, passcode_id: i64, code: &str) -> Result<()> {
        let form = Form::lock(lock_id)
            .with("keyboardPwdId", passcode_id)
            .with("newKeyboardPwd", code)
            .with("changeType", OPERATION_VIA_GATEWAY);
        self.post(PATH_PASSCODE_CHANGE, form).await?;
        info!(%lock_id, passcode_id, "Passcode changed");
        Ok(())
    }

    pub async fn delete_passcode(&self, lock_id: LockId, passcode_id: i64) -> Result<()> {
        let form = Form::lock(lock_id)
            .with("keyboardPwdId", passcode_id)
            .with("deleteType", OPERATION_VIA_GATEWAY);
        self.post(PATH_PASSCODE_DELETE, form).await?;
        info!(%lock_id, passcode_id, "Passcode deleted");
        Ok(())
    }

    pub async fn get_nfc_cards(&self, lock_id: LockId) -> Result<Vec<NfcCard>> {
        let body = self.get(PATH_CARD_LIST, Form::lock(lock_id).page()).await?;
        let entries: Vec<CardEntry> = list_payload(PATH_CARD_LIST, body)?;

        Ok(entries
            .into_iter()
            .map(|e| NfcCard {
                id: e.card_id,
                lock_id,
                number: e.card_number,
                name: e.card_name,
            })
            .collect())
    }

    /// Enroll a card. Returns its server id.
    pub async fn add_nfc_card(&self, lock_id: LockId, number: &str, name: Option<&str>) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let form = Form::lock(lock_id)
            .with("cardNumber", number)
            .with("cardName", name.unwrap_or(number))
            .with("startDate", now)
            .with("endDate", 0)
            .with("addType", OPERATION_VIA_GATEWAY);
        let body = self.post(PATH_CARD_ADD, form).await?;
        body.get("cardId")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::invalid_response(PATH_CARD_ADD, "missing cardId"))
    }

    pub async fn delete_nfc_card(&self, lock_id: LockId, card_id: i64) -> Result<()> {
        let form = Form::lock(lock_id)
            .with("cardId", card_id)
            .with("deleteType", OPERATION_VIA_GATEWAY);
        self.post(PATH_CARD_DELETE, form).await?;
        Ok(())
    }

    /// Fetch everything about one lock and assemble its snapshot.
    pub async fn fetch_lock(&self, lock_id: LockId) -> Result<Lock> {
        let details = self.get_lock_details(lock_id).await?;
        let state = self.get_lock_state(lock_id).await?;
        let battery = self.get_battery_level(lock_id).await?;
        let passcodes = self.get_passcodes(lock_id).await?;
        let cards = self.get_nfc_cards(lock_id).await?;
        Ok(assemble_lock(details, state, battery, passcodes, cards))
    }
}

/// Build a lock snapshot from individual fetch results.
///
/// `battery` is the live reading and wins over the one in `details`.
pub fn assemble_lock(
    details: LockDetails,
    state: LockState,
    battery: BatteryLevel,
    passcodes: Vec<Passcode>,
    nfc_cards: Vec<NfcCard>,
) -> Lock {
    Lock {
        id: details.id,
        name: details.name,
        hardware: details.hardware,
        state,
        battery,
        passcodes,
        nfc_cards,
        offline: false,
        last_seen: Utc::now(),
    }
}

fn payload<T: DeserializeOwned>(endpoint: &str, body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::invalid_response(endpoint, e.to_string()))
}

fn list_payload<T: DeserializeOwned>(endpoint: &str, mut body: Value) -> Result<Vec<T>> {
    match body.get_mut("list").map(Value::take) {
        Some(list @ Value::Array(_)) => payload(endpoint, list),
        Some(_) => Err(Error::invalid_response(endpoint, "list is not an array")),
        None => Err(Error::invalid_response(endpoint, "missing list")),
    }
}
