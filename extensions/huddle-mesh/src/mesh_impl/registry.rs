use std::collections::{HashMap, HashSet};

use huddle::{
    error::Error,
    transport::SessionId,
    voice::{participant::ParticipantId, SessionInfo},
};

use super::session::{MediaSession, SessionContext};

/// At most one `MediaSession` per remote participant.
///
/// Also remembers participants that left (or whose transport was lost) so that late
/// negotiation artifacts from them are dropped until they join again.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<ParticipantId, MediaSession>,
    departed: HashSet<ParticipantId>,
    ctx: Option<SessionContext>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// sessions can only be created between `activate` and `deactivate`
    pub fn activate(&mut self, ctx: SessionContext) {
        self.ctx = Some(ctx);
    }

    /// tears down every session and forgets the room
    pub fn deactivate(&mut self) {
        self.teardown_all();
        self.departed.clear();
        self.ctx = None;
    }

    /// returns the session and whether it was created by this call.
    /// an existing session is returned as is, whatever `offering` says
    pub fn get_or_create(
        &mut self,
        peer: &ParticipantId,
        offering: bool,
    ) -> Result<(&mut MediaSession, bool), Error> {
        let ctx = self.ctx.as_ref().ok_or(Error::NotInRoom)?;
        let mut created = false;
        let session = self.sessions.entry(peer.clone()).or_insert_with(|| {
            created = true;
            MediaSession::spawn(peer.clone(), offering, ctx)
        });
        Ok((session, created))
    }

    pub fn get(&self, peer: &ParticipantId) -> Option<&MediaSession> {
        self.sessions.get(peer)
    }

    pub fn get_mut(&mut self, peer: &ParticipantId) -> Option<&mut MediaSession> {
        self.sessions.get_mut(peer)
    }

    /// the session for `peer`, if it is the incarnation `id`
    pub fn get_current(&mut self, peer: &ParticipantId, id: SessionId) -> Option<&mut MediaSession> {
        self.sessions.get_mut(peer).filter(|s| s.id == id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MediaSession> {
        self.sessions.values_mut()
    }

    /// closes and removes the session. calling it again is a no-op
    pub fn teardown(&mut self, peer: &ParticipantId) -> Option<MediaSession> {
        let session = self.sessions.remove(peer)?;
        log::info!("tearing down session {} for {peer}", session.id);
        session.close();
        Some(session)
    }

    pub fn teardown_all(&mut self) -> Vec<ParticipantId> {
        let peers: Vec<_> = self.sessions.keys().cloned().collect();
        for peer in &peers {
            self.teardown(peer);
        }
        peers
    }

    pub fn mark_departed(&mut self, peer: &ParticipantId) {
        self.departed.insert(peer.clone());
    }

    pub fn forget_departed(&mut self, peer: &ParticipantId) {
        self.departed.remove(peer);
    }

    pub fn departed(&self) -> &HashSet<ParticipantId> {
        &self.departed
    }

    pub fn contains(&self, peer: &ParticipantId) -> bool {
        self.sessions.contains_key(peer)
    }

    pub fn infos(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<_> = self.sessions.values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        infos
    }
}
