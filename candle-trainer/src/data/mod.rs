//! Batch sources and dataset preparation.

mod bigram;
mod imdb;
mod iterator;
mod padding;
mod ptb;
mod vocab;

pub use bigram::{bigrams, BigramTable};
pub use imdb::{load_imdb, tokenize, ImdbDataset};
pub use iterator::{ArrayIterator, BatchSource};
pub use padding::{padded_tensor, with_padding, Padding};
pub use ptb::{PtbDataset, PtbOptions};
pub use vocab::{Vocabulary, VocabularyBuilder};
