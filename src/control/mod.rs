//! Run control shared by every extraction step: cancellation, status
//! reporting and the retry/recovery state machine.

pub mod cancel;
pub mod retry;
pub mod status;

pub use cancel::CancellationToken;
pub use retry::{RetryController, RetryOutcome, RetryPolicy};
pub use status::{StatusSink, TracingStatus};
