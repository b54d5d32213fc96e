use candle::{Device, Result, Tensor};
use std::str::FromStr;

/// Side on which sequences are zero-padded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Padding {
    #[default]
    Post,
    Pre,
}

impl FromStr for Padding {
    type Err = candle::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "post" => Ok(Padding::Post),
            "pre" => Ok(Padding::Pre),
            other => candle::bail!("padding type must be \"post\" or \"pre\", got {other:?}"),
        }
    }
}

/// Truncate every sequence to `max_len` and pad it with zeros to that length.
///
/// Without `max_len` the longest sequence sets the length. Truncation always
/// keeps the head of the sequence.
pub fn with_padding(
    sequences: &[Vec<u32>],
    padding: Padding,
    max_len: Option<usize>,
) -> Result<Vec<Vec<u32>>> {
    let max_len = match max_len {
        Some(0) => candle::bail!("max_sequence_length must be a positive integer"),
        Some(len) => len,
        None => sequences.iter().map(Vec::len).max().unwrap_or(0),
    };
    let padded = sequences
        .iter()
        .map(|seq| -> Vec<u32> {
            let seq = &seq[..seq.len().min(max_len)];
            let pad = std::iter::repeat(0).take(max_len - seq.len());
            match padding {
                Padding::Post => seq.iter().copied().chain(pad).collect(),
                Padding::Pre => pad.chain(seq.iter().copied()).collect(),
            }
        })
        .collect();
    Ok(padded)
}

/// Stack equal-length rows into a `(rows, len)` u32 tensor.
pub fn padded_tensor(rows: &[Vec<u32>], device: &Device) -> Result<Tensor> {
    let len = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(idx) = rows.iter().position(|r| r.len() != len) {
        candle::bail!("row {idx} has length {}, expected {len}", rows[idx].len());
    }
    let flat: Vec<u32> = rows.iter().flatten().copied().collect();
    Tensor::from_vec(flat, (rows.len(), len), device)
}
