pub mod audit;
pub mod config;
pub mod extract;
pub mod preview;
pub mod reconcile;
pub mod record;
pub mod restore;
pub mod runtime;
pub mod sqlite_store;
pub mod store;
pub mod template;
