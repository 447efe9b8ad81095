//! The in-tab half of an exam session: integrity monitoring, durable local
//! queues, heartbeat and reconciliation against the session API.

pub mod api;
pub mod capabilities;
pub mod clock;
pub mod error;
pub mod exam_client;
pub mod heartbeat;
pub mod monitor;
pub mod queue;
pub mod sync;

pub use api::{ExamApi, HttpExamApi};
pub use error::{ClientError, ClientResult};
pub use exam_client::{ClientQueues, ExamClient, SubmissionReceipt, SubmitTrigger};
pub use heartbeat::HeartbeatChannel;
pub use monitor::IntegrityMonitor;
pub use queue::{DurableQueue, FileQueue, MemoryQueue};
pub use sync::{SyncReconciler, SyncReport};
