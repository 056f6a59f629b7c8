use huddle::voice::participant::{Participant, ParticipantId, ParticipantState};
use indexmap::IndexMap;

/// Who is in the joined room, in arrival order. The only writer of participant flags
#[derive(Debug, Default)]
pub struct MembershipTable {
    entries: IndexMap<ParticipantId, Participant>,
}

/// What an upsert did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub inserted: bool,
    pub changed: bool,
    pub screen_sharing_changed: bool,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// inserts the participant or overwrites the flags of an existing entry.
    /// an empty display name never replaces a known one
    pub fn upsert(&mut self, participant: Participant) -> Upserted {
        match self.entries.get_mut(&participant.id) {
            Some(existing) => {
                let screen_sharing_changed =
                    existing.state.screen_sharing != participant.state.screen_sharing;
                let mut changed = existing.state != participant.state;
                existing.state = participant.state;
                if !participant.display_name.is_empty()
                    && existing.display_name != participant.display_name
                {
                    existing.display_name = participant.display_name;
                    changed = true;
                }
                Upserted {
                    inserted: false,
                    changed,
                    screen_sharing_changed,
                }
            }
            None => {
                let screen_sharing_changed = participant.state.screen_sharing;
                self.entries.insert(participant.id.clone(), participant);
                Upserted {
                    inserted: true,
                    changed: true,
                    screen_sharing_changed,
                }
            }
        }
    }

    /// merges a state update, inserting the participant if they were not seen yet
    pub fn update_state(
        &mut self,
        id: &ParticipantId,
        display_name: Option<String>,
        state: ParticipantState,
    ) -> Upserted {
        self.upsert(Participant::new(
            id.clone(),
            display_name.unwrap_or_default(),
            state,
        ))
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.entries.shift_remove(id)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn all(&self) -> Vec<Participant> {
        self.entries.values().cloned().collect()
    }

    /// clears the table and re-seeds it with the local participant only
    pub fn reset(&mut self, local: Participant) {
        self.entries.clear();
        self.entries.insert(local.id.clone(), local);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn participant(id: &str, name: &str, muted: bool) -> Participant {
        Participant::new(
            ParticipantId::new(id).unwrap(),
            name,
            ParticipantState {
                muted,
                ..Default::default()
            },
        )
    }

    #[test]
    fn upsert_merges_flags_last_write_wins() {
        let mut table = MembershipTable::new();
        assert!(table.upsert(participant("a", "alice", false)).inserted);

        let result = table.upsert(participant("a", "", true));
        assert!(!result.inserted);
        assert!(result.changed);

        let a = table.get(&ParticipantId::new("a").unwrap()).unwrap();
        assert!(a.state.muted);
        assert_eq!(a.display_name, "alice");
    }

    #[test]
    fn unchanged_upsert_reports_no_change() {
        let mut table = MembershipTable::new();
        table.upsert(participant("a", "alice", true));
        let result = table.upsert(participant("a", "alice", true));
        assert!(!result.changed);
        assert!(!result.screen_sharing_changed);
    }

    #[test]
    fn snapshots_keep_arrival_order() {
        let mut table = MembershipTable::new();
        table.reset(participant("self", "me", false));
        table.upsert(participant("c", "", false));
        table.upsert(participant("b", "", false));
        table.upsert(participant("d", "", false));
        table.remove(&ParticipantId::new("b").unwrap());

        let ids: Vec<_> = table.all().into_iter().map(|p| p.id.to_string()).collect();
        assert_eq!(ids, vec!["self", "c", "d"]);
    }

    #[test]
    fn reset_keeps_only_self() {
        let mut table = MembershipTable::new();
        table.upsert(participant("x", "", false));
        table.reset(participant("self", "me", false));
        assert_eq!(table.all().len(), 1);
        assert!(table.contains(&ParticipantId::new("self").unwrap()));
    }
}
