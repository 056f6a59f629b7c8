//! A media session with one remote participant.
//!
//! The coordinator owns the `MediaSession` bookkeeping. Every transport operation runs on a
//! worker task, one at a time and in the order it was queued, so a candidate is never applied
//! before the description that precedes it. Results come back as `SessionReport`s.

use std::{collections::HashMap, sync::Arc, time::Duration};

use derive_more::Display;
use huddle::{
    media::{LocalTrack, RemoteStream, TrackKind},
    transport::{
        ConnectionState, PeerConnection, PeerConnector, SenderId, SessionId,
        TransportEventSender,
    },
    voice::{
        participant::ParticipantId,
        signal::{IceCandidate, SessionDescription, SignalPayload},
        SessionInfo,
    },
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Notify,
    },
    task::JoinHandle,
};

use super::{negotiation::NegotiationGuard, router::Outbound};

#[derive(Display)]
pub enum SessionOp {
    #[display(fmt = "AttachTrack")]
    AttachTrack(Arc<dyn LocalTrack>),
    #[display(fmt = "DetachTrack({_0})")]
    DetachTrack(TrackKind),
    #[display(fmt = "MakeOffer({round})")]
    MakeOffer { round: u64 },
    #[display(fmt = "ApplyOffer({round})")]
    ApplyOffer {
        round: u64,
        sdp: SessionDescription,
        rollback: bool,
    },
    #[display(fmt = "ApplyAnswer({round})")]
    ApplyAnswer { round: u64, sdp: SessionDescription },
    #[display(fmt = "AddCandidate")]
    AddCandidate(IceCandidate),
}

#[derive(Debug, Display, Clone)]
pub enum ReportKind {
    #[display(fmt = "OfferSent({round})")]
    OfferSent { round: u64 },
    #[display(fmt = "AnswerSent({round})")]
    AnswerSent { round: u64 },
    #[display(fmt = "AnswerApplied({round})")]
    AnswerApplied { round: u64 },
    #[display(fmt = "RoundTimedOut({round})")]
    RoundTimedOut { round: u64 },
    /// the connection could not be created. the session carries no media
    #[display(fmt = "ConnectFailed: {reason}")]
    ConnectFailed { reason: String },
    /// `round` is None for failures outside a negotiation round
    #[display(fmt = "Failed: {reason}")]
    Failed { round: Option<u64>, reason: String },
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub peer: ParticipantId,
    pub session: SessionId,
    pub kind: ReportKind,
}

/// Everything a session needs from the room it lives in
#[derive(Clone)]
pub struct SessionContext {
    pub connector: Arc<dyn PeerConnector>,
    pub transport_events: TransportEventSender,
    pub reports: UnboundedSender<SessionReport>,
    pub outbound: Outbound,
    pub negotiation_timeout: Duration,
}

pub struct MediaSession {
    pub peer: ParticipantId,
    pub id: SessionId,
    /// true if this side made the initial offer
    pub offering: bool,
    pub state: ConnectionState,
    pub degraded: bool,
    pub remote_stream: Option<RemoteStream>,
    pub senders: Vec<TrackKind>,
    pub negotiation: NegotiationGuard,
    pub offers_sent: u32,
    ops: UnboundedSender<SessionOp>,
    reports: UnboundedSender<SessionReport>,
    negotiation_timeout: Duration,
    quit: Arc<Notify>,
    _worker: JoinHandle<()>,
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.quit.notify_one();
    }
}

impl MediaSession {
    pub fn spawn(peer: ParticipantId, offering: bool, ctx: &SessionContext) -> Self {
        let id = SessionId::random();
        let (tx, rx) = mpsc::unbounded_channel();
        let quit = Arc::new(Notify::new());
        let worker = tokio::spawn(run(peer.clone(), id, ctx.clone(), rx, quit.clone()));
        log::debug!("spawned session {id} for {peer}, offering: {offering}");
        Self {
            peer,
            id,
            offering,
            state: ConnectionState::New,
            degraded: false,
            remote_stream: None,
            senders: vec![],
            negotiation: NegotiationGuard::new(),
            offers_sent: 0,
            ops: tx,
            reports: ctx.reports.clone(),
            negotiation_timeout: ctx.negotiation_timeout,
            quit,
            _worker: worker,
        }
    }

    fn queue(&self, op: SessionOp) {
        let name = op.to_string();
        if self.ops.send(op).is_err() {
            log::debug!("session worker for {} is gone. dropping {name}", self.peer);
        }
    }

    pub fn attach(&mut self, track: Arc<dyn LocalTrack>) {
        let kind = track.kind();
        if self.senders.contains(&kind) {
            log::warn!("{kind} sender already attached for {}", self.peer);
            return;
        }
        self.senders.push(kind);
        self.queue(SessionOp::AttachTrack(track));
    }

    pub fn detach(&mut self, kind: TrackKind) {
        if !self.senders.contains(&kind) {
            return;
        }
        self.senders.retain(|k| *k != kind);
        self.queue(SessionOp::DetachTrack(kind));
    }

    /// offers right away, or once the open round settles
    pub fn renegotiate(&mut self) {
        if let Some(round) = self.negotiation.request_offer() {
            self.queue(SessionOp::MakeOffer { round });
            self.start_round_timer(round);
        } else {
            log::debug!("negotiation with {} in progress. offer deferred", self.peer);
        }
    }

    pub fn answer(&mut self, round: u64, sdp: SessionDescription, rollback: bool) {
        self.queue(SessionOp::ApplyOffer {
            round,
            sdp,
            rollback,
        });
        self.start_round_timer(round);
    }

    pub fn apply_answer(&mut self, round: u64, sdp: SessionDescription) {
        self.queue(SessionOp::ApplyAnswer { round, sdp });
    }

    pub fn add_candidate(&self, candidate: IceCandidate) {
        self.queue(SessionOp::AddCandidate(candidate));
    }

    /// closes round `round` and offers again if something asked for it meanwhile
    pub fn settle(&mut self, round: u64) {
        if self.negotiation.settle(round) {
            self.renegotiate();
        }
    }

    fn start_round_timer(&self, round: u64) {
        let reports = self.reports.clone();
        let timeout = self.negotiation_timeout;
        let peer = self.peer.clone();
        let session = self.id;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = reports.send(SessionReport {
                peer,
                session,
                kind: ReportKind::RoundTimedOut { round },
            });
        });
    }

    /// connected, or still negotiating towards it
    pub fn is_usable(&self) -> bool {
        !self.degraded
            && (self.state == ConnectionState::Connected || self.negotiation.in_progress())
    }

    /// terminal. the worker detaches every sender and closes the connection
    pub fn close(&self) {
        self.quit.notify_one();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            participant_id: self.peer.clone(),
            session_id: self.id,
            offering: self.offering,
            negotiating: self.negotiation.in_progress(),
            state: self.state,
            degraded: self.degraded,
            senders: self.senders.clone(),
            offers_sent: self.offers_sent,
        }
    }
}

struct Worker {
    peer: ParticipantId,
    session: SessionId,
    connection: Arc<dyn PeerConnection>,
    senders: HashMap<TrackKind, SenderId>,
    outbound: Outbound,
    reports: UnboundedSender<SessionReport>,
}

async fn run(
    peer: ParticipantId,
    session: SessionId,
    ctx: SessionContext,
    mut ops: UnboundedReceiver<SessionOp>,
    quit: Arc<Notify>,
) {
    let connect = ctx
        .connector
        .connect(&peer, session, ctx.transport_events.clone());
    let connection = tokio::select! {
        _ = quit.notified() => {
            log::debug!("session {session} closed before connecting");
            return;
        }
        r = connect => match r {
            Ok(r) => r,
            Err(e) => {
                log::error!("failed to create connection to {peer}: {e}");
                let _ = ctx.reports.send(SessionReport {
                    peer,
                    session,
                    kind: ReportKind::ConnectFailed { reason: e.to_string() },
                });
                return;
            }
        }
    };

    let mut worker = Worker {
        peer,
        session,
        connection,
        senders: HashMap::new(),
        outbound: ctx.outbound,
        reports: ctx.reports,
    };

    loop {
        let op = tokio::select! {
            _ = quit.notified() => break,
            opt = ops.recv() => match opt {
                Some(op) => op,
                None => break,
            }
        };
        // closing cancels whatever the connection is waiting on
        tokio::select! {
            _ = quit.notified() => break,
            _ = worker.handle(op) => {}
        }
    }

    worker.shutdown().await;
}

impl Worker {
    fn report(&self, kind: ReportKind) {
        let _ = self.reports.send(SessionReport {
            peer: self.peer.clone(),
            session: self.session,
            kind,
        });
    }

    async fn handle(&mut self, op: SessionOp) {
        log::trace!("session {} for {}: {op}", self.session, self.peer);
        match op {
            SessionOp::AttachTrack(track) => {
                let kind = track.kind();
                match self.connection.add_track(track).await {
                    Ok(sender) => {
                        self.senders.insert(kind, sender);
                    }
                    Err(e) => {
                        log::error!("failed to attach {kind} track for {}: {e}", self.peer);
                        self.report(ReportKind::Failed {
                            round: None,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            SessionOp::DetachTrack(kind) => {
                if let Some(sender) = self.senders.remove(&kind) {
                    if let Err(e) = self.connection.remove_track(sender).await {
                        log::warn!("failed to detach {kind} track for {}: {e}", self.peer);
                    }
                }
            }
            SessionOp::MakeOffer { round } => match self.offer().await {
                Ok(()) => self.report(ReportKind::OfferSent { round }),
                Err(e) => self.report(ReportKind::Failed {
                    round: Some(round),
                    reason: format!("offer failed: {e}"),
                }),
            },
            SessionOp::ApplyOffer {
                round,
                sdp,
                rollback,
            } => match self.answer(sdp, rollback).await {
                Ok(()) => self.report(ReportKind::AnswerSent { round }),
                Err(e) => self.report(ReportKind::Failed {
                    round: Some(round),
                    reason: format!("answer failed: {e}"),
                }),
            },
            SessionOp::ApplyAnswer { round, sdp } => {
                match self.connection.set_remote_description(sdp).await {
                    Ok(()) => self.report(ReportKind::AnswerApplied { round }),
                    Err(e) => self.report(ReportKind::Failed {
                        round: Some(round),
                        reason: format!("failed to apply answer: {e}"),
                    }),
                }
            }
            SessionOp::AddCandidate(candidate) => {
                if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                    log::warn!("failed to add ice candidate from {}: {e}", self.peer);
                }
            }
        }
    }

    // descriptions are put on the relay before they are applied, so no local candidate
    // can reach the peer ahead of them
    async fn offer(&self) -> anyhow::Result<()> {
        let offer = self.connection.create_offer().await?;
        self.outbound
            .direct(&self.peer, SignalPayload::OfferAnswer(offer.clone()))?;
        self.connection.set_local_description(offer).await?;
        Ok(())
    }

    async fn answer(&self, offer: SessionDescription, rollback: bool) -> anyhow::Result<()> {
        if rollback {
            self.connection.rollback().await?;
        }
        self.connection.set_remote_description(offer).await?;
        let answer = self.connection.create_answer().await?;
        self.outbound
            .direct(&self.peer, SignalPayload::OfferAnswer(answer.clone()))?;
        self.connection.set_local_description(answer).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        for (kind, sender) in self.senders.drain() {
            if let Err(e) = self.connection.remove_track(sender).await {
                log::debug!("failed to detach {kind} track for {}: {e}", self.peer);
            }
        }
        if let Err(e) = self.connection.close().await {
            log::error!("failed to close connection to {}: {e}", self.peer);
        }
        log::debug!("session {} for {} terminated", self.session, self.peer);
    }
}
