pub mod exchange;
pub mod session;
pub mod writer;

pub use exchange::{ExchangeStats, FrameExchange, Offer};
pub use session::{
    LoopState, RelayStats, SessionController, SessionInfo, StartOutcome, StopOutcome, Submitted,
    TARGET_FPS,
};
pub use writer::{OutputWriter, WriterReport, WriterStats};
