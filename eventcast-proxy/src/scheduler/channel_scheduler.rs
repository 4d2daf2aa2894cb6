//! Channel assignment for discovered entries.
//!
//! Entries are packed onto a bounded pool of numbered channels with a greedy
//! first-fit pass:
//!
//! 1. If linear channels are disabled but entries still carry a linear
//!    marker, the schedule is rebuilt from scratch first
//! 2. Unscheduled entries are visited by start time, then insertion order
//! 3. Each entry takes the lowest channel that is free by its start, or a new
//!    channel while the pool has room; otherwise it stays unscheduled

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::database::{ChannelNumberingPolicy, Database, DatabaseHandle, Entry, Result};

/// Migrate, then schedule.
const MAX_PASSES: usize = 2;

/// Outcome of one scheduling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Entries that received a channel.
    pub scheduled: usize,
    /// Entries left unscheduled for lack of a free channel.
    pub skipped: usize,
    /// Whether the schedule was rebuilt before assigning.
    pub migrated: bool,
}

/// Assigns channel numbers to unscheduled entries.
pub struct ChannelScheduler {
    database: DatabaseHandle,
    /// Seeds the persisted policy when none exists yet.
    default_policy: ChannelNumberingPolicy,
    /// Serializes scheduling runs.
    run_lock: Mutex<()>,
}

impl ChannelScheduler {
    /// Create a new channel scheduler.
    pub fn new(database: DatabaseHandle, default_policy: ChannelNumberingPolicy) -> Self {
        Self {
            database,
            default_policy,
            run_lock: Mutex::new(()),
        }
    }

    /// Assign channels to every unscheduled entry, logging any failure.
    pub async fn schedule_entries(&self) {
        match self.try_schedule_entries().await {
            Ok(report) => {
                if report.scheduled > 0 || report.skipped > 0 {
                    info!(
                        "ChannelScheduler: {} entries scheduled, {} without a free channel",
                        report.scheduled, report.skipped
                    );
                }
            }
            Err(e) => error!("ChannelScheduler: Scheduling failed: {}", e),
        }
    }

    /// Assign channels to every unscheduled entry.
    pub async fn try_schedule_entries(&self) -> Result<ScheduleReport> {
        let _run = self.run_lock.lock().await;
        let mut report = ScheduleReport::default();

        let (policy, entries) = {
            let db = self.database.lock().await;
            let policy = db.get_channel_policy(self.default_policy)?;

            let mut pass = 0;
            while needs_migration(&db, &policy)? {
                pass += 1;
                if pass >= MAX_PASSES {
                    warn!("ChannelScheduler: Linear entries remain after rebuild, scheduling anyway");
                    break;
                }
                migrate(&db)?;
                report.migrated = true;
            }

            (policy, db.get_unscheduled_entries()?)
        };

        if entries.is_empty() {
            return Ok(report);
        }
        debug!("ChannelScheduler: Scheduling {} entries", entries.len());

        for entry in &entries {
            // Re-lock per entry so stream requests are not starved by a long run
            let db = self.database.lock().await;
            match place_entry(&db, &policy, entry)? {
                Some(channel) => {
                    debug!("ChannelScheduler: {} -> channel {}", entry.name, channel);
                    report.scheduled += 1;
                }
                None => report.skipped += 1,
            }
        }

        Ok(report)
    }

    /// Current channel numbering policy.
    pub async fn policy(&self) -> Result<ChannelNumberingPolicy> {
        let db = self.database.lock().await;
        db.get_channel_policy(self.default_policy)
    }

    /// Delete every entry and wipe the channel schedule.
    ///
    /// Returns the number of entries removed and slots cleared.
    pub async fn discard_all(&self) -> Result<(usize, usize)> {
        let _run = self.run_lock.lock().await;
        let db = self.database.lock().await;
        let removed = db.remove_all_entries()?;
        let cleared = db.clear_slots()?;
        info!("ChannelScheduler: Discarded {} entries and {} channel slots", removed, cleared);
        Ok((removed, cleared))
    }

    /// Delete all entries of one provider.
    pub async fn remove_entries_provider(&self, provider: &str) -> Result<usize> {
        let db = self.database.lock().await;
        let removed = db.remove_entries_provider(provider)?;
        info!("ChannelScheduler: Removed {} entries of {}", removed, provider);
        Ok(removed)
    }

    /// Wipe the channel schedule only.
    pub async fn reset_channels(&self) -> Result<usize> {
        let _run = self.run_lock.lock().await;
        let db = self.database.lock().await;
        let cleared = db.clear_slots()?;
        info!("ChannelScheduler: Cleared {} channel slots", cleared);
        Ok(cleared)
    }
}

fn needs_migration(db: &Database, policy: &ChannelNumberingPolicy) -> Result<bool> {
    Ok(!policy.use_linear && db.count_linear_entries()? > 0)
}

fn migrate(db: &Database) -> Result<()> {
    warn!("ChannelScheduler: Linear channels were disabled, rebuilding the schedule");
    warn!("ChannelScheduler: Previously assigned channel numbers are invalidated (DVR recordings will break)");

    let result = db.reset_channel_assignments()?;
    info!(
        "ChannelScheduler: Rebuild cleared {} slots, removed {} linear entries, reset {} entries",
        result.slots_cleared, result.linear_removed, result.entries_reset
    );
    Ok(())
}

/// First-fit placement of a single entry.
fn place_entry(db: &Database, policy: &ChannelNumberingPolicy, entry: &Entry) -> Result<Option<u32>> {
    if let Some(slot) = db.find_free_slot(policy.start_channel, entry.start)? {
        db.update_slot_ends_at(slot.channel, entry.end)?;
        db.assign_channel(entry.id, slot.channel)?;
        return Ok(Some(slot.channel));
    }

    let slots = db.count_slots()?;
    if slots >= policy.num_of_channels {
        return Ok(None);
    }

    let channel = policy.start_channel + slots;
    if !db.insert_slot(channel, entry.end)? {
        // Left over from a previous start channel
        warn!(
            "ChannelScheduler: Channel {} already has a slot, leaving {} unscheduled",
            channel, entry.name
        );
        return Ok(None);
    }
    db.assign_channel(entry.id, channel)?;
    Ok(Some(channel))
}
