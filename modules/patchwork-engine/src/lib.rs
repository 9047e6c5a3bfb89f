pub mod agent;
pub mod enrichment;
pub mod feed_worker;
pub mod metrics;
pub mod processor;
pub mod quality;
pub mod run;

pub use agent::{AgentError, AgentService, CreateOutcome, HttpAgentClient, LocalAgentService, MockAgentService};
pub use enrichment::{EnrichmentDispatcher, HttpDispatcher, MockDispatcher, NoopDispatcher};
pub use feed_worker::{pack_memory, FeedConfig, FeedOutcome, FeedWorker};
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use processor::{ProcessOutcome, Processor, ProcessorConfig};
pub use run::{Components, Coordinator, RunReport, RunTicket, RunTuning, StartRunError};
