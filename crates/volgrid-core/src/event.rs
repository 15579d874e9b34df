//! Job events and the mergeable event map.
//!
//! An [`EventMap`] holds the latest known [`Event`] per job. Two maps merge
//! by "highest job-local epoch wins", which makes the merge commutative,
//! associative and idempotent. That is what lets partial maps be reduced
//! along any tree shape and in any arrival order.
//!
//! ```text
//! insert_if_novel(e)  accept iff no held or pruned event for e.job_id has
//!                     epoch >= e.epoch
//! update_by(other)    insert_if_novel for every entry of other
//! filter_by(ref)      drop entries whose epoch is not above ref's
//! remove_old_zeros(n) drop demand-0 tombstones older than n global epochs,
//!                     remembering only their epoch
//! ```
//!
//! A pruned termination keeps rejecting every later event for its job, so a
//! stale reduction delivered late cannot bring the job back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::types::{Epoch, JobId, TERMINATION_EPOCH};

/// The most recent known intent of a job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub job_id: JobId,
    pub epoch: Epoch,
    /// Number of processes the job could use right now. 0 means gone.
    pub demand: u32,
    pub priority: f64,
}

impl Event {
    pub fn new(job_id: JobId, epoch: Epoch, demand: u32, priority: f64) -> Self {
        Self {
            job_id,
            epoch,
            demand,
            priority,
        }
    }

    /// A termination tombstone for `job_id`.
    pub fn termination(job_id: JobId, priority: f64) -> Self {
        Self::new(job_id, TERMINATION_EPOCH, 0, priority)
    }

    pub fn is_termination(&self) -> bool {
        self.epoch == TERMINATION_EPOCH
    }
}

/// Latest event per job plus the advisory global epoch of the last round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMap {
    entries: BTreeMap<JobId, Event>,
    global_epoch: u64,
    /// Global epoch at which each zero-demand entry was accepted here.
    #[serde(skip)]
    zeroed_at: BTreeMap<JobId, u64>,
    /// Epoch of each entry dropped by `remove_old_zeros`.
    #[serde(skip)]
    pruned: BTreeMap<JobId, Epoch>,
}

impl PartialEq for EventMap {
    fn eq(&self, other: &Self) -> bool {
        self.global_epoch == other.global_epoch && self.entries == other.entries
    }
}

impl EventMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `event` unless an event with an equal or greater epoch is
    /// already held, or was pruned, for the same job. Returns whether it
    /// was accepted.
    pub fn insert_if_novel(&mut self, event: Event) -> bool {
        if self
            .latest_epoch(event.job_id)
            .is_some_and(|known| known >= event.epoch)
        {
            return false;
        }
        self.pruned.remove(&event.job_id);

        if event.demand == 0 {
            self.zeroed_at.insert(event.job_id, self.global_epoch);
        } else {
            self.zeroed_at.remove(&event.job_id);
        }
        self.entries.insert(event.job_id, event);
        true
    }

    /// Merge `other` into `self`. Returns whether any entry changed.
    ///
    /// The global epoch becomes the maximum of both maps.
    pub fn update_by(&mut self, other: &EventMap) -> bool {
        self.global_epoch = self.global_epoch.max(other.global_epoch);
        let mut changed = false;
        for event in other.entries.values() {
            changed |= self.insert_if_novel(*event);
        }
        changed
    }

    /// Remove every entry that `reference` already holds, or has pruned, at
    /// an equal or newer epoch.
    pub fn filter_by(&mut self, reference: &EventMap) {
        self.entries.retain(|job_id, event| match reference.latest_epoch(*job_id) {
            Some(known) => event.epoch > known,
            None => true,
        });
        let entries = &self.entries;
        self.zeroed_at.retain(|job_id, _| entries.contains_key(job_id));
    }

    /// Drop zero-demand entries accepted at least `retention` global epochs
    /// ago. Returns how many were dropped.
    pub fn remove_old_zeros(&mut self, retention: u64) -> usize {
        let horizon = self.global_epoch;
        let expired: Vec<JobId> = self
            .zeroed_at
            .iter()
            .filter(|(_, since)| since.saturating_add(retention) <= horizon)
            .map(|(job_id, _)| *job_id)
            .collect();

        for job_id in &expired {
            self.zeroed_at.remove(job_id);
            if let Some(event) = self.entries.remove(job_id) {
                self.pruned.insert(*job_id, event.epoch);
            }
        }
        expired.len()
    }

    pub fn get(&self, job_id: JobId) -> Option<&Event> {
        self.entries.get(&job_id)
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.entries.contains_key(&job_id)
    }

    /// Highest epoch seen for `job_id`, including pruned entries.
    pub fn latest_epoch(&self, job_id: JobId) -> Option<Epoch> {
        self.entries
            .get(&job_id)
            .map(|e| e.epoch)
            .or_else(|| self.pruned.get(&job_id).copied())
    }

    /// Whether a termination for `job_id` was ever accepted here.
    pub fn is_terminated(&self, job_id: JobId) -> bool {
        self.latest_epoch(job_id) == Some(TERMINATION_EPOCH)
    }

    /// Events in ascending job id order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.zeroed_at.clear();
        self.pruned.clear();
    }

    pub fn global_epoch(&self) -> u64 {
        self.global_epoch
    }

    pub fn set_global_epoch(&mut self, epoch: u64) {
        self.global_epoch = epoch;
    }

    /// Number of jobs with non-zero demand.
    pub fn active_jobs(&self) -> usize {
        self.entries.values().filter(|e| e.demand > 0).count()
    }

    /// Encode as a wire payload.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a wire payload.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let mut map: EventMap = serde_json::from_slice(bytes)?;
        let epoch = map.global_epoch;
        map.zeroed_at = map
            .entries
            .values()
            .filter(|e| e.demand == 0)
            .map(|e| (e.job_id, epoch))
            .collect();
        Ok(map)
    }
}

impl FromIterator<Event> for EventMap {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let mut map = EventMap::new();
        for event in iter {
            map.insert_if_novel(event);
        }
        map
    }
}
