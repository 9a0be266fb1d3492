pub mod backoff;
pub mod connectivity;
pub mod controller;
pub mod janitor;
pub mod local_watcher;
pub mod ops;
pub mod prepare;
pub mod queue;
pub mod reconcile;
pub mod replace;
pub mod state;
pub mod vault;
