pub mod adapter;
pub mod distributed;
pub mod monitor;
pub mod orchestrator;
pub mod persistence;
pub mod progress;
pub mod stopping;

pub use adapter::{ConcurrencyAdapter, CycleContext, JobHandle, SerialExecutor, ThreadPoolExecutor};
pub use distributed::{ProcessPoolExecutor, WorkerSource};
pub use monitor::ResourceMonitor;
pub use orchestrator::{equation_search, SearchOrchestrator, SearchOutcome};
pub use persistence::{RunRecord, SearchState};
pub use progress::{
    ChannelProgressCallback, LogProgressCallback, NullProgressCallback, ProgressCallback, ProgressMessage,
    SearchSummary,
};
pub use stopping::{StopReason, StopSignal};
