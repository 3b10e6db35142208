//! Answer generation from retrieved context
//!
//! - Prompt assembly with numbered, cited sources
//! - Generation backends behind one trait
//! - Refusal when nothing was retrieved

mod generator;
mod prompt;

pub use generator::{
    answer_question, create_generator, Answer, ChatCompletionsGenerator, ExtractiveGenerator,
    Generator, OllamaGenerator,
};
pub use prompt::{build_prompt, clean_response, REFUSAL};
