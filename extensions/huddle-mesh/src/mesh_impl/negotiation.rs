//! Per-session negotiation round bookkeeping.
//!
//! A round is either an outstanding local offer or an inbound offer being answered.
//! Only one round is open per session. Triggers that arrive while a round is open are
//! remembered in a single pending flag and produce at most one fresh offer once the round settles.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundKind {
    Offering,
    Answering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Round {
    pub id: u64,
    pub kind: RoundKind,
}

/// What to do with an inbound offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOffer {
    /// answer it in round `round`. `rollback` discards our own outstanding offer first
    Answer { round: u64, rollback: bool },
    /// our own offer wins
    Ignore,
}

#[derive(Debug, Default)]
pub struct NegotiationGuard {
    round: Option<Round>,
    pending: bool,
    next_id: u64,
}

impl NegotiationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&mut self, kind: RoundKind) -> u64 {
        self.next_id += 1;
        self.round = Some(Round {
            id: self.next_id,
            kind,
        });
        self.next_id
    }

    pub fn current(&self) -> Option<Round> {
        self.round
    }

    pub fn in_progress(&self) -> bool {
        self.round.is_some()
    }

    /// the id of the outstanding local offer, if any
    pub fn outstanding_offer(&self) -> Option<u64> {
        self.round
            .filter(|r| r.kind == RoundKind::Offering)
            .map(|r| r.id)
    }

    /// opens an offering round, or marks a pending trigger if a round is already open
    pub fn request_offer(&mut self) -> Option<u64> {
        if self.round.is_some() {
            self.pending = true;
            return None;
        }
        Some(self.open(RoundKind::Offering))
    }

    /// `keeps_own` decides a collision with our own outstanding offer. The two sides of a
    /// session must pass opposite values
    pub fn inbound_offer(&mut self, keeps_own: bool) -> InboundOffer {
        match self.round {
            Some(Round {
                kind: RoundKind::Offering,
                ..
            }) if keeps_own => InboundOffer::Ignore,
            Some(Round {
                kind: RoundKind::Offering,
                ..
            }) => {
                // our offer is dropped. offer again once the answer is out
                self.pending = true;
                InboundOffer::Answer {
                    round: self.open(RoundKind::Answering),
                    rollback: true,
                }
            }
            _ => InboundOffer::Answer {
                round: self.open(RoundKind::Answering),
                rollback: false,
            },
        }
    }

    /// closes round `id` if it is the open one. returns true if a pending trigger
    /// should now be turned into a fresh offer
    pub fn settle(&mut self, id: u64) -> bool {
        match self.round {
            Some(round) if round.id == id => {
                self.round = None;
                std::mem::take(&mut self.pending)
            }
            _ => false,
        }
    }

    /// drops any open round and pending trigger
    pub fn reset(&mut self) {
        self.round = None;
        self.pending = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn triggers_during_a_round_coalesce() {
        let mut guard = NegotiationGuard::new();
        let first = guard.request_offer().unwrap();
        assert!(guard.request_offer().is_none());
        assert!(guard.request_offer().is_none());
        assert!(guard.pending);

        assert!(guard.settle(first));
        assert!(!guard.in_progress());
        assert!(!guard.pending);

        let second = guard.request_offer().unwrap();
        assert!(!guard.settle(second));
    }

    #[test]
    fn stale_settle_is_ignored() {
        let mut guard = NegotiationGuard::new();
        let first = guard.request_offer().unwrap();
        guard.settle(first);
        let second = guard.request_offer().unwrap();
        assert!(!guard.settle(first));
        assert_eq!(guard.outstanding_offer(), Some(second));
    }

    #[test]
    fn keeping_side_ignores_glaring_offer() {
        let mut guard = NegotiationGuard::new();
        let ours = guard.request_offer().unwrap();
        assert_eq!(guard.inbound_offer(true), InboundOffer::Ignore);
        assert_eq!(guard.outstanding_offer(), Some(ours));
    }

    #[test]
    fn yielding_side_rolls_back_and_reoffers() {
        let mut guard = NegotiationGuard::new();
        guard.request_offer().unwrap();
        let InboundOffer::Answer { round, rollback } = guard.inbound_offer(false) else {
            panic!("expected an answer");
        };
        assert!(rollback);
        assert_eq!(guard.outstanding_offer(), None);
        assert!(guard.settle(round));
    }

    #[test]
    fn idle_session_answers_without_rollback() {
        let mut guard = NegotiationGuard::new();
        assert!(matches!(
            guard.inbound_offer(true),
            InboundOffer::Answer {
                rollback: false,
                ..
            }
        ));
    }

    #[test]
    fn collision_resolves_the_same_way_on_both_sides() {
        // both sides sent an offer before seeing the other's
        let mut lower = NegotiationGuard::new();
        let mut higher = NegotiationGuard::new();
        let kept = lower.request_offer().unwrap();
        higher.request_offer().unwrap();

        assert_eq!(lower.inbound_offer(true), InboundOffer::Ignore);
        let InboundOffer::Answer { round, rollback } = higher.inbound_offer(false) else {
            panic!("expected an answer");
        };
        assert!(rollback);

        // the answer to the kept offer settles it, and the yielding side offers once more
        assert!(!lower.settle(kept));
        assert!(higher.settle(round));
        assert!(higher.request_offer().is_some());
    }
}
