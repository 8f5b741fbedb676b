//! Model interface used by inference and evaluation.

mod base;
#[cfg(test)]
pub(crate) mod testing;

pub use base::GlmModel;
