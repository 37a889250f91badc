mod ids;
pub use ids::{ThreadId, WorkspaceId};
mod message;
pub use message::{QueuedMessage, RunSettings, SendOptions};
mod queue;
pub use queue::{QUEUE_STORAGE_KEY, QueueStore, encode_persisted_queue, sanitize_persisted_queue};
mod ambient;
pub use ambient::AmbientState;
mod status;
pub use status::{ThreadStatus, ThreadStatusSnapshot, resolve_thread_status};
mod workspace;
pub use workspace::{Workspace, WorkspaceResolution, WorkspaceResolver};
mod slash;
pub use slash::{SlashCommand, parse_slash_command, slash_command_remainder};
mod policy;
pub use policy::DispatchPolicy;
mod adapters;
pub use adapters::{MessageTransport, QueuePersistence};
mod actions;
pub use actions::Action;
mod effects;
pub use effects::{DispatchRequest, DispatchRoute, Effect};
mod reducer;
pub use reducer::{DispatchState, FailureRecord, InFlight};
mod staleness;
pub use staleness::{
    InFlightAssessment, PROCESSING_STALE_REASON, TURN_START_LOST_REASON, assess_in_flight,
};
mod health;
pub use health::{BlockedReason, QueueHealthEntry};
mod migrate;
pub use migrate::{MigrationReport, legacy_message_count, migrate_legacy_workspace_ids};
pub mod paths;
