pub mod dispatcher;
pub mod message;
pub mod transport;

pub use dispatcher::{DispatcherBuilder, ResilientDispatcher};
pub use message::{
    is_transient_failure, FailureKind, Request, Response, TransientClassifier, FAILURE_HEADER,
};
pub use transport::{HttpTransport, Transport};
