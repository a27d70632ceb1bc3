pub mod bottleneck;
pub mod flaky;
pub mod trend;
