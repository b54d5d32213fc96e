use std::collections::HashMap;

/// Immutable token/index table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vocabulary {
    index: HashMap<String, u32>,
    tokens: Vec<String>,
}

impl Vocabulary {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn index(&self, token: &str) -> Option<u32> {
        self.index.get(token).copied()
    }

    pub fn token(&self, index: u32) -> Option<&str> {
        self.tokens.get(index as usize).map(String::as_str)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Map tokens to indices, using `unk` for anything unknown.
    pub fn encode<'a>(&self, tokens: impl IntoIterator<Item = &'a str>, unk: u32) -> Vec<u32> {
        tokens
            .into_iter()
            .map(|t| self.index(t).unwrap_or(unk))
            .collect()
    }

    pub fn decode(&self, indices: &[u32]) -> Vec<&str> {
        indices.iter().filter_map(|&i| self.token(i)).collect()
    }
}

/// Assigns consecutive indices in first-seen order.
#[derive(Debug, Default)]
pub struct VocabularyBuilder {
    vocab: Vocabulary,
}

impl VocabularyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `token`, inserting it if it is new.
    pub fn add(&mut self, token: &str) -> u32 {
        if let Some(idx) = self.vocab.index(token) {
            return idx;
        }
        let idx = self.vocab.tokens.len() as u32;
        self.vocab.index.insert(token.to_string(), idx);
        self.vocab.tokens.push(token.to_string());
        idx
    }

    pub fn len(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }

    pub fn build(self) -> Vocabulary {
        self.vocab
    }
}
