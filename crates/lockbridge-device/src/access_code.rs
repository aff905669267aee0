//! Access Code Control Point execution.
//!
//! Runs decoded [`AccessCodeRequest`]s against a lock's passcode snapshot and
//! the cloud gateway. List and Read answer from the snapshot alone. Add,
//! Change and Delete first resolve every slot against the snapshot the hub
//! addressed, then call the cloud by passcode id, then replace the snapshot
//! wholesale with one fresh listing before building the response, so later
//! slot lookups see the same order the hub was just told about.
//!
//! Slots are positions in the snapshot. A slot is a single TLV byte, so a
//! lock with more than 256 passcodes only exposes the first 256.

use lockbridge_core::{LockId, Passcode, Result};
use lockbridge_network::LockCloudGateway;
use lockbridge_protocol::access_code::{
    AccessCodeOperation, AccessCodeParams, AccessCodeRecord, AccessCodeRequest,
    AccessCodeResponse,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Executes control point commands for one lock.
#[derive(Debug)]
pub struct AccessCodeExecutor {
    lock_id: LockId,
    gateway: LockCloudGateway,
    busy: AtomicBool,
}

/// Holds the busy flag; clears it when dropped, whatever path the mutation
/// took.
#[derive(Debug)]
pub struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An add/change sub-record resolved against the addressed snapshot.
enum Upsert<'a> {
    Add(&'a str),
    Change { id: i64, code: &'a str },
    EmptySlot,
}

impl AccessCodeExecutor {
    pub fn new(lock_id: LockId, gateway: LockCloudGateway) -> Self {
        Self {
            lock_id,
            gateway,
            busy: AtomicBool::new(false),
        }
    }

    /// Whether a mutation is executing.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// `1` while busy, `0` otherwise.
    pub fn configuration_state(&self) -> u8 {
        u8::from(self.is_busy())
    }

    /// Set the busy flag until the guard drops.
    ///
    /// Returns `None` if the flag is already held; the holder clears it.
    pub fn mark_busy(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(&self.busy))
    }

    /// Execute `request` against `passcodes`.
    ///
    /// Slots in a mutation all refer to `passcodes` as given. Once the cloud
    /// calls succeed, `passcodes` is replaced with a single fresh listing.
    ///
    /// # Errors
    /// Returns `Error::ProtocolDecode` when a parameter sub-record lacks a
    /// field the operation needs (before any cloud call), or any cloud error
    /// from the gateway.
    pub async fn execute(
        &self,
        request: &AccessCodeRequest,
        passcodes: &mut Vec<Passcode>,
    ) -> Result<AccessCodeResponse> {
        let operation = request.operation;
        debug!(lock_id = %self.lock_id, %operation, params = request.params.len(), "Access code command");

        let records = match operation {
            AccessCodeOperation::List => list_records(passcodes),
            AccessCodeOperation::Read => read_records(&request.params, passcodes)?,
            AccessCodeOperation::AddOrChange => {
                let _busy = self.mark_busy();
                self.add_or_change(&request.params, passcodes).await?
            }
            AccessCodeOperation::Delete => {
                let _busy = self.mark_busy();
                self.delete(&request.params, passcodes).await?
            }
        };

        Ok(AccessCodeResponse::new(operation, records))
    }

    async fn refetch(&self, passcodes: &mut Vec<Passcode>) -> Result<()> {
        *passcodes = self.gateway.get_passcodes(self.lock_id).await?;
        Ok(())
    }

    async fn add_or_change(
        &self,
        params: &[AccessCodeParams],
        passcodes: &mut Vec<Passcode>,
    ) -> Result<Vec<Option<AccessCodeRecord>>> {
        let upserts = params
            .iter()
            .map(|param| {
                let code = param.require_access_code(AccessCodeOperation::AddOrChange)?;
                Ok(match param.identifier {
                    None => Upsert::Add(code),
                    Some(slot) => match passcodes.get(usize::from(slot)) {
                        Some(existing) => Upsert::Change {
                            id: existing.id,
                            code,
                        },
                        None => {
                            warn!(lock_id = %self.lock_id, slot, "Change targets an empty slot");
                            Upsert::EmptySlot
                        }
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut ids = Vec::with_capacity(upserts.len());
        for upsert in upserts {
            let id = match upsert {
                Upsert::Add(code) => Some(self.gateway.add_passcode(self.lock_id, code, None).await?),
                Upsert::Change { id, code } => {
                    self.gateway.change_passcode(self.lock_id, id, code).await?;
                    Some(id)
                }
                Upsert::EmptySlot => None,
            };
            ids.push(id);
        }

        if ids.iter().all(Option::is_none) {
            return Ok(vec![None; ids.len()]);
        }
        self.refetch(passcodes).await?;
        info!(lock_id = %self.lock_id, count = passcodes.len(), "Passcodes updated");

        let records = ids
            .into_iter()
            .map(|id| {
                let id = id?;
                let record = passcodes.iter().find(|p| p.id == id).and_then(record_for);
                if record.is_none() {
                    warn!(lock_id = %self.lock_id, passcode_id = id, "Passcode missing from refreshed listing");
                }
                record
            })
            .collect();
        Ok(records)
    }

    async fn delete(
        &self,
        params: &[AccessCodeParams],
        passcodes: &mut Vec<Passcode>,
    ) -> Result<Vec<Option<AccessCodeRecord>>> {
        let targets = params
            .iter()
            .map(|param| {
                let slot = param.require_identifier(AccessCodeOperation::Delete)?;
                let target = passcodes.get(usize::from(slot)).cloned();
                if target.is_none() {
                    warn!(lock_id = %self.lock_id, slot, "Delete targets an empty slot");
                }
                Ok((slot, target))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut deleted = HashSet::new();
        for (_, target) in &targets {
            if let Some(target) = target
                && deleted.insert(target.id)
            {
                self.gateway.delete_passcode(self.lock_id, target.id).await?;
            }
        }

        if !deleted.is_empty() {
            self.refetch(passcodes).await?;
            info!(lock_id = %self.lock_id, count = passcodes.len(), "Passcodes deleted");
        }

        // A defunct record keeps the slot it was addressed by.
        Ok(targets
            .into_iter()
            .map(|(slot, target)| target.map(|p| AccessCodeRecord::new(slot, p.code)))
            .collect())
    }
}

fn record_for(passcode: &Passcode) -> Option<AccessCodeRecord> {
    match u8::try_from(passcode.slot) {
        Ok(slot) => Some(AccessCodeRecord::new(slot, passcode.code.clone())),
        Err(_) => {
            warn!(slot = passcode.slot, "Passcode slot beyond protocol range, skipped");
            None
        }
    }
}

/// One record per passcode, in snapshot order.
pub fn list_records(passcodes: &[Passcode]) -> Vec<Option<AccessCodeRecord>> {
    passcodes
        .iter()
        .filter_map(record_for)
        .map(Some)
        .collect()
}

/// Records for the requested slots; out-of-range slots yield empty records.
///
/// # Errors
/// Returns `Error::ProtocolDecode` if a parameter lacks an identifier.
pub fn read_records(
    params: &[AccessCodeParams],
    passcodes: &[Passcode],
) -> Result<Vec<Option<AccessCodeRecord>>> {
    params
        .iter()
        .map(|param| {
            let slot = param.require_identifier(AccessCodeOperation::Read)?;
            Ok(passcodes.get(usize::from(slot)).and_then(record_for))
        })
        .collect()
}
