// Stage engine: mailboxes, routing and thread lifecycle

pub mod error;
pub mod mailbox;
pub mod orchestrator;
pub mod router;
pub mod stage;
pub mod stats;
pub mod types;

pub use error::StageError;
pub use mailbox::{Admission, Mailbox};
pub use orchestrator::Pipeline;
pub use router::{FanOutReport, Recipient, Router};
pub use stage::{from_fn, Processor, Stage, StageContext};
pub use stats::StageSnapshot;
pub use types::{OverflowPolicy, Outputs, StageOptions, StageState, WaitPolicy, MAIN_CHANNEL};
