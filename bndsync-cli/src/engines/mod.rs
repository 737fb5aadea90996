mod fake;
mod stdio;

pub use fake::FakeBackend;
pub use stdio::StdioBackend;
