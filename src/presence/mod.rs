use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::model::{MediaFlags, ParticipantId, ParticipantRecord, Role};
use crate::signaling::PresenceMeta;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Join(PresenceMeta),
    Leave(ParticipantId),
}

/// One row of the participant list shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub participant_id: ParticipantId,
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub media: MediaFlags,
    pub joined_at: u64,
    /// Seen on the realtime channel, not only in the durable records
    pub present: bool,
}

/// Merges ephemeral presence with durable participant records.
///
/// Presence is a two-phase set keyed by participant id: once a leave for an id
/// is seen, later joins for it are ignored. Ids are minted per join, so a
/// reconnect always arrives under a new id.
///
/// The first join for an id fixes its meta. Repeated joins (snapshots, relay
/// replays) are ignored, and media flags only move through `update_media`.
pub struct PresenceReconciler {
    local: ParticipantId,
    joined: HashMap<ParticipantId, PresenceMeta>,
    left: HashSet<ParticipantId>,
    records: HashMap<ParticipantId, ParticipantRecord>,
    absent_since: HashMap<ParticipantId, Instant>,
    presence_grace: Duration,
}

impl PresenceReconciler {
    pub fn new(local: ParticipantId, presence_grace: Duration) -> Self {
        Self {
            local,
            joined: HashMap::new(),
            left: HashSet::new(),
            records: HashMap::new(),
            absent_since: HashMap::new(),
            presence_grace,
        }
    }

    /// Returns whether the roster may have changed.
    pub fn apply(&mut self, event: PresenceEvent) -> bool {
        match event {
            PresenceEvent::Join(meta) => {
                let id = meta.participant_id.clone();
                if self.left.contains(&id) {
                    return false;
                }
                self.absent_since.remove(&id);
                if self.joined.contains_key(&id) {
                    return false;
                }
                self.joined.insert(id, meta);
                true
            }
            PresenceEvent::Leave(id) => {
                if id == self.local {
                    return false;
                }
                self.left.insert(id.clone());
                self.joined.remove(&id).is_some() || self.records.contains_key(&id)
            }
        }
    }

    pub fn is_present(&self, participant_id: &ParticipantId) -> bool {
        self.joined.contains_key(participant_id)
    }

    /// Left, force-closed as stale, or removed. Never comes back under this id.
    pub fn is_departed(&self, participant_id: &ParticipantId) -> bool {
        self.left.contains(participant_id)
    }

    pub fn presence(&self, participant_id: &ParticipantId) -> Option<&PresenceMeta> {
        self.joined.get(participant_id)
    }

    /// Keeps a remote's media flags current between presence snapshots.
    pub fn update_media(&mut self, participant_id: &ParticipantId, media: MediaFlags) -> bool {
        let mut changed = false;
        if let Some(meta) = self.joined.get_mut(participant_id) {
            changed |= meta.media != media;
            meta.media = media;
        }
        if let Some(record) = self.records.get_mut(participant_id) {
            changed |= record.media() != media;
            record.set_media(media);
        }
        changed
    }

    /// Replaces the known open records with a fresh read of the store.
    pub fn sync_records(&mut self, records: Vec<ParticipantRecord>) -> bool {
        let open: HashMap<ParticipantId, ParticipantRecord> = records
            .into_iter()
            .filter(|r| r.is_open())
            .map(|r| (r.id.clone(), r))
            .collect();
        self.absent_since.retain(|id, _| open.contains_key(id));

        let changed = open.len() != self.records.len()
            || open.keys().any(|id| !self.records.contains_key(id));
        self.records = open;
        changed
    }

    pub fn forget_record(&mut self, participant_id: &ParticipantId) {
        self.records.remove(participant_id);
        self.absent_since.remove(participant_id);
    }

    /// Open records with no presence for longer than the grace window.
    /// Stale ids are tombstoned so they stay out of the roster.
    pub fn reconcile(&mut self, now: Instant) -> Vec<ParticipantId> {
        let mut stale = Vec::new();

        for id in self.records.keys() {
            if *id == self.local || self.joined.contains_key(id) {
                self.absent_since.remove(id);
                continue;
            }
            let since = *self.absent_since.entry(id.clone()).or_insert(now);
            if now.saturating_duration_since(since) >= self.presence_grace {
                stale.push(id.clone());
            }
        }

        stale.sort();
        for id in &stale {
            tracing::info!(participant_id = %id, "Participant record has no presence, reporting stale");
            self.left.insert(id.clone());
            self.forget_record(id);
        }
        stale
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut entries: HashMap<&ParticipantId, RosterEntry> = HashMap::new();

        for record in self.records.values() {
            if self.left.contains(&record.id) {
                continue;
            }
            entries.insert(
                &record.id,
                RosterEntry {
                    participant_id: record.id.clone(),
                    user_id: record.user_id.clone(),
                    display_name: record.display_name.clone(),
                    role: record.role,
                    media: record.media(),
                    joined_at: record.joined_at,
                    present: false,
                },
            );
        }

        for meta in self.joined.values() {
            entries.insert(
                &meta.participant_id,
                RosterEntry {
                    participant_id: meta.participant_id.clone(),
                    user_id: meta.user_id.clone(),
                    display_name: meta.display_name.clone(),
                    role: meta.role,
                    media: meta.media,
                    joined_at: meta.joined_at,
                    present: true,
                },
            );
        }

        let mut roster: Vec<RosterEntry> = entries.into_values().collect();
        roster.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        roster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoomId;

    fn meta(id: &str, joined_at: u64) -> PresenceMeta {
        PresenceMeta {
            participant_id: ParticipantId::from(id),
            user_id: format!("user-{}", id),
            display_name: id.to_uppercase(),
            role: Role::Attendee,
            joined_at,
            media: MediaFlags::default(),
        }
    }

    fn record(id: &str, joined_at: u64) -> ParticipantRecord {
        ParticipantRecord {
            id: ParticipantId::from(id),
            room_id: RoomId::from("room"),
            user_id: format!("user-{}", id),
            display_name: id.to_uppercase(),
            role: Role::Attendee,
            audio_enabled: false,
            video_enabled: false,
            screen_sharing: false,
            joined_at,
            left_at: None,
        }
    }

    fn ids(roster: &[RosterEntry]) -> Vec<String> {
        roster.iter().map(|e| e.participant_id.to_string()).collect()
    }

    fn permutations(items: &[PresenceEvent]) -> Vec<Vec<PresenceEvent>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_roster_converges_under_any_order() {
        let events = vec![
            PresenceEvent::Join(meta("a", 1)),
            PresenceEvent::Join(meta("b", 2)),
            PresenceEvent::Leave(ParticipantId::from("a")),
            PresenceEvent::Join(meta("c", 3)),
            PresenceEvent::Join(meta("a", 1)),
        ];

        let mut rosters = Vec::new();
        for order in permutations(&events) {
            let mut reconciler = PresenceReconciler::new(ParticipantId::from("me"), Duration::from_secs(15));
            for event in order {
                reconciler.apply(event);
            }
            rosters.push(reconciler.roster());
        }

        for roster in &rosters {
            assert_eq!(ids(roster), vec!["b", "c"]);
            assert_eq!(roster, &rosters[0]);
        }
    }

    #[test]
    fn test_repeated_events_are_idempotent() {
        let mut once = PresenceReconciler::new(ParticipantId::from("me"), Duration::from_secs(15));
        let mut twice = PresenceReconciler::new(ParticipantId::from("me"), Duration::from_secs(15));
        let events = vec![
            PresenceEvent::Join(meta("a", 1)),
            PresenceEvent::Join(meta("b", 2)),
            PresenceEvent::Leave(ParticipantId::from("b")),
        ];

        for event in &events {
            once.apply(event.clone());
            twice.apply(event.clone());
            assert!(!twice.apply(event.clone()));
        }

        assert_eq!(once.roster(), twice.roster());
        assert_eq!(ids(&once.roster()), vec!["a"]);
    }

    #[test]
    fn test_repeated_join_keeps_first_meta() {
        let a = ParticipantId::from("a");
        let live = MediaFlags {
            audio: true,
            video: true,
            screen: false,
        };
        let mut replayed = meta("a", 1);
        replayed.display_name = "Someone Else".to_string();

        let mut reconciler = PresenceReconciler::new(ParticipantId::from("me"), Duration::from_secs(15));
        assert!(reconciler.apply(PresenceEvent::Join(meta("a", 1))));
        assert!(reconciler.update_media(&a, live));

        // A stale replay must neither rename nor roll back the live media
        assert!(!reconciler.apply(PresenceEvent::Join(replayed)));
        assert!(!reconciler.apply(PresenceEvent::Join(meta("a", 1))));

        let roster = reconciler.roster();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].display_name, "A");
        assert_eq!(roster[0].media, live);
        assert!(!reconciler.is_departed(&a));

        reconciler.apply(PresenceEvent::Leave(a.clone()));
        assert!(reconciler.is_departed(&a));
        assert!(reconciler.roster().is_empty());
    }

    #[test]
    fn test_roster_unions_records_and_presence() {
        let mut reconciler = PresenceReconciler::new(ParticipantId::from("me"), Duration::from_secs(15));
        reconciler.apply(PresenceEvent::Join(meta("a", 5)));
        reconciler.sync_records(vec![record("a", 5), record("b", 2)]);

        let roster = reconciler.roster();
        assert_eq!(ids(&roster), vec!["b", "a"]);
        assert!(!roster[0].present);
        assert!(roster[1].present);
    }

    #[test]
    fn test_closed_records_are_ignored() {
        let mut reconciler = PresenceReconciler::new(ParticipantId::from("me"), Duration::from_secs(15));
        let mut closed = record("z", 1);
        closed.left_at = Some(10);
        reconciler.sync_records(vec![closed]);
        assert!(reconciler.roster().is_empty());
    }

    #[test]
    fn test_stale_records_reported_after_grace() {
        let grace = Duration::from_secs(15);
        let mut reconciler = PresenceReconciler::new(ParticipantId::from("me"), grace);
        reconciler.apply(PresenceEvent::Join(meta("a", 1)));
        reconciler.sync_records(vec![record("a", 1), record("ghost", 2), record("me", 3)]);

        let start = Instant::now();
        assert!(reconciler.reconcile(start).is_empty());
        assert!(reconciler.reconcile(start + Duration::from_secs(10)).is_empty());

        let stale = reconciler.reconcile(start + grace);
        assert_eq!(stale, vec![ParticipantId::from("ghost")]);
        assert!(reconciler.reconcile(start + grace * 2).is_empty());
        assert!(!ids(&reconciler.roster()).contains(&"ghost".to_string()));
    }

    #[test]
    fn test_presence_returning_within_grace_clears_staleness() {
        let grace = Duration::from_secs(15);
        let mut reconciler = PresenceReconciler::new(ParticipantId::from("me"), grace);
        reconciler.sync_records(vec![record("late", 1)]);

        let start = Instant::now();
        reconciler.reconcile(start);
        reconciler.apply(PresenceEvent::Join(meta("late", 1)));

        assert!(reconciler.reconcile(start + grace * 2).is_empty());
    }

    #[test]
    fn test_own_leave_is_ignored() {
        let mut reconciler = PresenceReconciler::new(ParticipantId::from("me"), Duration::from_secs(15));
        reconciler.apply(PresenceEvent::Join(meta("me", 1)));
        reconciler.apply(PresenceEvent::Leave(ParticipantId::from("me")));
        assert_eq!(ids(&reconciler.roster()), vec!["me"]);
    }

    #[test]
    fn test_media_update_reaches_roster() {
        let mut reconciler = PresenceReconciler::new(ParticipantId::from("me"), Duration::from_secs(15));
        reconciler.apply(PresenceEvent::Join(meta("a", 1)));
        let media = MediaFlags {
            audio: true,
            video: false,
            screen: true,
        };

        assert!(reconciler.update_media(&ParticipantId::from("a"), media));
        assert_eq!(reconciler.roster()[0].media, media);
    }
}
