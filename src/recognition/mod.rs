//! Streaming speech-recognition session: transport, event decoding, and
//! the reconnecting session state machine.

pub mod event;
pub mod session;
pub mod transport;

pub use event::ServerEvent;
pub use session::{RecognitionSession, SessionState};
pub use transport::{RecognitionTransport, WsTransport};
