pub mod fakes;
pub mod fixtures;
pub mod harness;

pub use fakes::{
    FakeConnector, FakeShell, FakeStorage, ManualClock, RecordingSink, TokioClock,
};
pub use harness::EngineHarness;
