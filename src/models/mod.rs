pub mod generation;
pub mod openai;

#[allow(unused_imports)]
pub use generation::{
    estimate_cost, new_record_id, BlobRole, GenerationKind, GenerationRecord, TokenDetails,
    UsageInfo,
};
#[allow(unused_imports)]
pub use openai::{
    GeneratedImage, ImageEditRequest, ImageGenerationRequest, ImageVariationRequest,
    ImagesApiResponse, OpenAIErrorBody,
};
