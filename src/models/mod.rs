pub mod frame;
pub mod message;
pub mod recording;
pub mod rows;
pub mod session;

pub use frame::{PreSplitFrame, SplitFrameMeta, SplitFramePayload};
pub use message::{Message, MessageKind};
pub use recording::{RecordingConfig, RecordingMode};
pub use session::Session;

pub type RecordingId = i64;
pub type SessionId = i64;
pub type MessageId = i64;
