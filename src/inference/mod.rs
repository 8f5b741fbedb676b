//! Blank-filling inference: query encoding, generation and answer output.

mod filler;
mod output;
mod query;
mod session;
mod tokenizer;
mod tokens;

#[cfg(test)]
pub(crate) use tokenizer::testing;

pub use filler::{splice, BlankFiller};
pub use output::{output_path_for, write_answers, ANSWER_TIMESTAMP_FORMAT};
pub use query::{encode_query, EncodedQuery, Query};
pub use session::{generate_continually, interactive_loop, Answer, InferenceSession, STOP_WORD};
pub use tokenizer::{HfTokenizer, TextTokenizer};
pub use tokens::{CommandTokens, GMASK_MARKER, MASK_MARKER};
