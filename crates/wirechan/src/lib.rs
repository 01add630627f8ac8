//! Connection-oriented, message-based transport over TCP and local
//! named pipes.
//!
//! wirechan layers a framing protocol with a negotiating preamble on
//! top of raw byte streams, pluggable message encoders on top of the
//! framing, and a channel model with pooled connections and correlated
//! request/reply exchanges on top of both.
//!
//! # Crate Structure
//!
//! - [`transport`]: raw stream transports and via addressing
//! - [`framing`]: preamble handshake and record framing
//! - [`encoding`]: message model and the binary/text/MTOM encoders
//! - [`channel`]: channel lifecycle, factories, listeners,
//!   request/reply correlation

/// Re-export transport types.
pub mod transport {
    pub use wirechan_transport::*;
}

/// Re-export framing types.
pub mod framing {
    pub use wirechan_framing::*;
}

/// Re-export encoding types.
pub mod encoding {
    pub use wirechan_encoding::*;
}

/// Re-export channel types.
pub mod channel {
    pub use wirechan_channel::*;
}
