use std::collections::HashMap;

/// Adjacent pairs of a sentence.
pub fn bigrams(sentence: &[u32]) -> impl Iterator<Item = (u32, u32)> + '_ {
    sentence.windows(2).map(|w| (w[0], w[1]))
}

/// Bigram ids for fastText-style n-gram features.
///
/// Ids start right after the unigram vocabulary, in first-seen order.
#[derive(Clone, Debug)]
pub struct BigramTable {
    ids: HashMap<(u32, u32), u32>,
    offset: u32,
}

impl BigramTable {
    pub fn build<'a>(sentences: impl IntoIterator<Item = &'a Vec<u32>>, offset: u32) -> Self {
        let mut ids = HashMap::new();
        let mut next = offset;
        for sentence in sentences {
            for bigram in bigrams(sentence) {
                ids.entry(bigram).or_insert_with(|| {
                    next += 1;
                    next - 1
                });
            }
        }
        tracing::info!(bigrams = ids.len(), "built bigram table");
        Self { ids, offset }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, bigram: (u32, u32)) -> Option<u32> {
        self.ids.get(&bigram).copied()
    }

    /// Embedding rows needed for unigrams plus bigrams (one spare row at the end).
    pub fn vocab_size(&self) -> usize {
        self.offset as usize + self.ids.len() + 1
    }

    /// The sentence followed by the ids of its known bigrams.
    pub fn augment(&self, sentence: &[u32]) -> Vec<u32> {
        let mut out = sentence.to_vec();
        out.extend(bigrams(sentence).filter_map(|b| self.get(b)));
        out
    }
}
