use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use docqa_core::{Error, Result};

use crate::model_err;

/// Tokenizes a batch and pads every row to the longest one, truncating at
/// `max_len`. Returns `(input_ids, attention_mask)`, both `[B, T]` u32.
pub fn tokenize_batch(
    tokenizer: &Tokenizer,
    texts: &[String],
    max_len: usize,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| Error::ProviderUnavailable(format!("Tokenization failed: {e}")))?;
    let pad_id = tokenizer.token_to_id("<pad>").unwrap_or(1);

    let seq_len = encodings
        .iter()
        .map(|enc| enc.get_ids().len().min(max_len))
        .max()
        .unwrap_or(0)
        .max(1);

    let mut ids = Vec::with_capacity(texts.len() * seq_len);
    let mut mask = Vec::with_capacity(texts.len() * seq_len);
    for enc in &encodings {
        let row_ids = &enc.get_ids()[..enc.get_ids().len().min(seq_len)];
        let row_mask = &enc.get_attention_mask()[..row_ids.len()];
        ids.extend_from_slice(row_ids);
        mask.extend_from_slice(row_mask);
        let pad = seq_len - row_ids.len();
        ids.extend(std::iter::repeat(pad_id).take(pad));
        mask.extend(std::iter::repeat(0u32).take(pad));
    }

    let input_ids = Tensor::from_vec(ids, (encodings.len(), seq_len), device).map_err(model_err)?;
    let attention_mask = Tensor::from_vec(mask, (encodings.len(), seq_len), device).map_err(model_err)?;
    Ok((input_ids, attention_mask))
}
