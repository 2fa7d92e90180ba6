pub mod admin;
pub mod batch;
pub mod completion;
pub mod config;
pub mod decoder;
pub mod error;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod poller;
pub mod probe;
pub mod stream;
pub mod telemetry;
pub mod tester;

pub use admin::AdminClient;
pub use batch::{BatchOperation, BatchSummary, SequentialBatchRunner};
pub use completion::{CompletionClient, CompletionHandle};
pub use config::Config;
pub use decoder::FrameDecoder;
pub use error::{ConsoleError, CoreResult};
pub use poller::QueueStatusPoller;
pub use tester::SingleItemTester;
