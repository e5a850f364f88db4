//! Query generation: prompts, completion cleaning, the strategy chain and
//! answer narration.

pub mod answer;
pub mod cleaner;
pub mod generator;
pub mod prompts;

pub use answer::*;
pub use generator::*;
pub use prompts::PromptTemplate;
