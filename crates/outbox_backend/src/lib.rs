mod env;
mod roots;
mod services;
mod sqlite_store;
#[cfg(test)]
mod test_support;
mod time;

pub use roots::resolve_outbox_root;
pub use services::QueueStoreService;
pub use sqlite_store::SqliteStore;
