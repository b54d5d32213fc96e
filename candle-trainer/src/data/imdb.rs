use super::vocab::{Vocabulary, VocabularyBuilder};
use candle::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// IMDB reviews as word indices with binary sentiment labels.
///
/// Index 0 is padding and `vocab_size - 1` stands for every word outside the
/// `vocab_size - 2` most frequent training words.
#[derive(Clone, Debug)]
pub struct ImdbDataset {
    pub x_train: Vec<Vec<u32>>,
    pub y_train: Vec<f32>,
    pub x_test: Vec<Vec<u32>>,
    pub y_test: Vec<f32>,
    pub vocabulary: Vocabulary,
    pub unk_index: u32,
}

/// Lowercased alphanumeric tokens; apostrophes stay inside words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.replace("<br />", " ")
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load the `aclImdb` directory layout: `{train,test}/{pos,neg}/*.txt`.
pub fn load_imdb(dir: impl AsRef<Path>, vocab_size: usize) -> Result<ImdbDataset> {
    if vocab_size < 3 {
        candle::bail!("vocab_size must leave room for padding and unknown words, got {vocab_size}");
    }
    let dir = dir.as_ref();
    let (train_docs, y_train) = read_split(&dir.join("train"))?;
    let (test_docs, y_test) = read_split(&dir.join("test"))?;

    let vocabulary = build_vocabulary(&train_docs, vocab_size);
    let unk_index = (vocab_size - 1) as u32;
    let encode = |docs: &[Vec<String>]| {
        docs.iter()
            .map(|doc| vocabulary.encode(doc.iter().map(String::as_str), unk_index))
            .collect::<Vec<_>>()
    };
    let x_train = encode(&train_docs);
    let x_test = encode(&test_docs);
    tracing::info!(train = x_train.len(), test = x_test.len(), vocab_size, "loaded imdb");

    Ok(ImdbDataset {
        x_train,
        y_train,
        x_test,
        y_test,
        vocabulary,
        unk_index,
    })
}

fn read_split(dir: &Path) -> Result<(Vec<Vec<String>>, Vec<f32>)> {
    let mut docs = Vec::new();
    let mut labels = Vec::new();
    for (label, sub) in [(1f32, "pos"), (0f32, "neg")] {
        for path in text_files(&dir.join(sub))? {
            let text = std::fs::read_to_string(&path).map_err(candle::Error::wrap)?;
            docs.push(tokenize(&text));
            labels.push(label);
        }
    }
    Ok((docs, labels))
}

fn text_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| candle::Error::Msg(format!("cannot read {}: {e}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(candle::Error::wrap)?.path();
        if path.extension().is_some_and(|e| e == "txt") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Most frequent words first (ties alphabetical), starting at index 1.
fn build_vocabulary(docs: &[Vec<String>], vocab_size: usize) -> Vocabulary {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in docs.iter().flatten() {
        *counts.entry(word.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let mut vocab = VocabularyBuilder::new();
    vocab.add("pad");
    for (word, _) in ranked.into_iter().take(vocab_size - 2) {
        vocab.add(word);
    }
    vocab.build()
}
