/// Errors surfaced by the voice room coordinator and its collaborators.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    //Capture Errors
    #[error("CaptureDenied: {_0}")]
    CaptureDenied(String),
    #[error("CaptureUnsupported: {_0}")]
    CaptureUnsupported(String),
    #[error("MicrophoneMissing")]
    MicrophoneMissing,
    #[error("Audio device not found")]
    AudioDeviceNotFound,
    // indicates a problem enumerating audio I/O devices
    #[error("AudioHostError: {_0}")]
    AudioHostError(String),

    //Negotiation Errors
    #[error("NegotiationFailed: {_0}")]
    NegotiationFailed(String),
    #[error("UnroutableSignal: {_0}")]
    UnroutableSignal(String),
    #[error("TransportLost")]
    TransportLost,
    #[error("Invalid envelope: {_0}")]
    InvalidEnvelope(String),

    //Room Errors
    #[error("NotInRoom")]
    NotInRoom,
    #[error("Participant id cannot be empty")]
    InvalidParticipantId,
    #[error("Invalid room transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    //Misc
    #[error("FailedToSendSignal: {_0}")]
    FailedToSendSignal(String),
    #[error("Sender Channel Unavailable")]
    SenderChannelUnavailable,
    #[error("Receiver Channel Unavailable")]
    ReceiverChannelUnavailable,
    #[error("{0}")]
    OtherWithContext(String),
    #[error("{0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::SenderChannelUnavailable
    }
}

impl From<futures::channel::oneshot::Canceled> for Error {
    fn from(_: futures::channel::oneshot::Canceled) -> Self {
        Error::ReceiverChannelUnavailable
    }
}
