pub mod base;
pub mod errors;
pub mod mock;
pub mod openai;
pub mod utils;

pub use base::{FragmentStream, Provider, SamplingParams};
pub use errors::ProviderError;
pub use openai::OpenAiProvider;
