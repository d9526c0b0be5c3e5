//! The photo try-out workflow: the actors that move a job from `pending` to a
//! presented result, and the plumbing they share.

pub mod capture;
pub mod error;
pub mod gesture;
pub mod presentation;
pub mod shown;
pub mod submission;
pub mod watcher;

pub use capture::{CaptureHandler, CaptureOutcome};
pub use error::TryoutError;
pub use presentation::{ConfirmInput, FileDisplay, PresentationTimings, ResultDisplay, ResultPresenter};
pub use shown::ShownStore;
pub use submission::{ClothingSource, SubmissionHandler};
pub use watcher::JobWatcher;
