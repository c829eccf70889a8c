//! Event lifecycle tracking: wall-clock status promotion and closing-line
//! capture. Both loops scan the archive independently of the polling
//! pipeline and are safe to re-run — promotion is status-guarded, capture is
//! filtered on non-existence with conflicts ignored.

pub mod closing;
pub mod status;

pub use closing::ClosingLineCapturer;
pub use status::StatusUpdater;
