pub mod fixtures;
pub mod recorder;
pub mod transport;

pub use fixtures::*;
pub use recorder::EventRecorder;
pub use transport::FakeTransport;
