pub mod error;
pub mod media;
pub mod relay;
pub mod transport;
pub mod voice;

