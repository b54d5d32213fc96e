use super::vocab::{Vocabulary, VocabularyBuilder};
use candle::Result;
use std::path::Path;

pub const PAD: &str = "pad";
pub const EOS: &str = "<eos>";
pub const BOS: &str = "<bos>";

#[derive(Clone, Copy, Debug, Default)]
pub struct PtbOptions {
    /// Start every sentence with `<bos>` (index 2).
    pub with_bos: bool,
    /// Also build a character vocabulary over the raw text.
    pub return_char_info: bool,
}

/// Penn Treebank splits as sentences of word indices, each ending with `<eos>`.
#[derive(Clone, Debug)]
pub struct PtbDataset {
    pub train: Vec<Vec<u32>>,
    pub valid: Vec<Vec<u32>>,
    pub test: Vec<Vec<u32>>,
    pub words: Vocabulary,
    pub chars: Option<Vocabulary>,
}

impl PtbDataset {
    /// Read `ptb.train.txt`, `ptb.valid.txt` and `ptb.test.txt` from `dir`.
    pub fn load(dir: impl AsRef<Path>, options: PtbOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let read = |split: &str| {
            let path = dir.join(format!("ptb.{split}.txt"));
            std::fs::read_to_string(&path)
                .map_err(|e| candle::Error::Msg(format!("cannot read {}: {e}", path.display())))
        };
        let (train, valid, test) = (read("train")?, read("valid")?, read("test")?);
        Ok(Self::from_texts([&train, &valid, &test], options))
    }

    /// Build the dataset from the raw train, valid and test texts.
    ///
    /// The word vocabulary grows across the splits in that order.
    pub fn from_texts(texts: [&str; 3], options: PtbOptions) -> Self {
        let mut words = VocabularyBuilder::new();
        words.add(PAD);
        words.add(EOS);
        if options.with_bos {
            words.add(BOS);
        }
        let mut chars = options.return_char_info.then(|| {
            let mut b = VocabularyBuilder::new();
            b.add(" ");
            b
        });

        let [train, valid, test] = texts.map(|text| {
            if let Some(chars) = chars.as_mut() {
                for c in text.chars().filter(|c| *c != '\n') {
                    chars.add(c.encode_utf8(&mut [0; 4]));
                }
            }
            sentences(text, &mut words, options.with_bos)
        });

        let split_sizes = [train.len(), valid.len(), test.len()];
        tracing::info!(vocab = words.len(), ?split_sizes, "loaded ptb");
        Self {
            train,
            valid,
            test,
            words: words.build(),
            chars: chars.map(VocabularyBuilder::build),
        }
    }
}

fn sentences(text: &str, words: &mut VocabularyBuilder, with_bos: bool) -> Vec<Vec<u32>> {
    let bos = with_bos.then(|| words.add(BOS));
    let eos = words.add(EOS);
    let start = || bos.into_iter().collect::<Vec<u32>>();

    let mut out = Vec::new();
    let mut sentence = start();
    for line in text.split_inclusive('\n') {
        for word in line.split_whitespace() {
            let idx = words.add(word);
            sentence.push(idx);
            if idx == eos {
                out.push(std::mem::replace(&mut sentence, start()));
            }
        }
        // a last line without a newline is unfinished: its words join the
        // vocabulary but it yields no sentence
        if line.ends_with('\n') {
            sentence.push(eos);
            out.push(std::mem::replace(&mut sentence, start()));
        }
    }
    out
}
