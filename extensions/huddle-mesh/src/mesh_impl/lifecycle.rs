use huddle::{
    error::Error,
    voice::{participant::RoomId, RoomPhase},
};

/// Idle -> Joining -> Active -> Leaving -> Idle, plus the room being joined or left
#[derive(Debug, Default)]
pub struct RoomLifecycle {
    phase: RoomPhase,
    room: Option<RoomId>,
}

impl RoomLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// the room, while one is joined or being joined/left
    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// the room, only while `Active`
    pub fn active_room(&self) -> Option<&RoomId> {
        match self.phase {
            RoomPhase::Active => self.room.as_ref(),
            _ => None,
        }
    }

    pub fn begin_join(&mut self, room: RoomId) -> Result<(), Error> {
        self.phase.transition(RoomPhase::Joining)?;
        log::info!("joining room {room}");
        self.room = Some(room);
        Ok(())
    }

    pub fn complete_join(&mut self) -> Result<(), Error> {
        self.phase.transition(RoomPhase::Active)?;
        Ok(())
    }

    pub fn abort_join(&mut self) -> Result<(), Error> {
        self.phase.transition(RoomPhase::Idle)?;
        if let Some(room) = self.room.take() {
            log::info!("gave up joining room {room}");
        }
        Ok(())
    }

    pub fn begin_leave(&mut self) -> Result<RoomId, Error> {
        let room = self.room.clone().ok_or(Error::NotInRoom)?;
        self.phase.transition(RoomPhase::Leaving)?;
        log::info!("leaving room {room}");
        Ok(room)
    }

    pub fn finish_leave(&mut self) -> Result<(), Error> {
        self.phase.transition(RoomPhase::Idle)?;
        self.room = None;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn room_is_only_active_while_active() -> anyhow::Result<()> {
        let mut lifecycle = RoomLifecycle::new();
        lifecycle.begin_join(RoomId::new("r"))?;
        assert!(lifecycle.active_room().is_none());
        assert_eq!(lifecycle.room(), Some(&RoomId::new("r")));

        lifecycle.complete_join()?;
        assert_eq!(lifecycle.active_room(), Some(&RoomId::new("r")));

        assert_eq!(lifecycle.begin_leave()?, RoomId::new("r"));
        assert!(lifecycle.active_room().is_none());
        lifecycle.finish_leave()?;
        assert_eq!(lifecycle.phase(), RoomPhase::Idle);
        assert!(lifecycle.room().is_none());
        Ok(())
    }

    #[test]
    fn leave_while_idle_is_rejected() {
        let mut lifecycle = RoomLifecycle::new();
        assert!(matches!(lifecycle.begin_leave(), Err(Error::NotInRoom)));
    }

    #[test]
    fn aborted_join_forgets_the_room() -> anyhow::Result<()> {
        let mut lifecycle = RoomLifecycle::new();
        lifecycle.begin_join(RoomId::new("r"))?;
        lifecycle.abort_join()?;
        assert_eq!(lifecycle.phase(), RoomPhase::Idle);
        assert!(lifecycle.room().is_none());
        Ok(())
    }
}
