pub mod openai_image;

#[allow(unused_imports)]
pub use openai_image::{GenerationError, GenerationResponse, OpenAIImageProvider};
