pub mod special;
pub mod vocab;

pub use special::{SpecialTokenKind, SpecialVocab};
pub use vocab::{TokenType, Vocab};
