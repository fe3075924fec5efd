pub mod dispatcher;

pub use dispatcher::{Dispatcher, Lifecycle, LifecycleFuture, Outcome, RemoteCommand};
