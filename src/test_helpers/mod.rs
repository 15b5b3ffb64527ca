//! Shared fixtures for unit and integration tests.
//!
//! Enabled for the crate's own tests and, through the `test-support`
//! feature, for the integration tests under `tests/`.

pub mod capture;
pub mod device;
pub mod harness;

pub use capture::{CapturedEvents, RecordedEvent, capture_events};
pub use device::{ChannelListener, FakeConnector, FakeDevice, Observed, ReceivedCommand};
pub use harness::{Harness, RESET_SEQUENCE_LEN, TEST_ADDRESS, next_event, settle};
