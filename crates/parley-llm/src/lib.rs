pub mod bounded;
pub mod ollama;

pub mod mock;

pub use bounded::BoundedGenerator;
pub use mock::{MockGenerator, MockResponse};
pub use ollama::OllamaGenerator;
