use crate::errors::Result;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Appended to text that was cut to fit a token limit
pub const TRUNCATION_MARKER: &str = "\n[... truncated]";

/// Token counter over the `cl100k_base` encoding
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Cut `text` to at most `max_tokens` tokens.
    ///
    /// When cut, [`TRUNCATION_MARKER`] is appended and counted against the
    /// limit, unless the marker alone is larger than the limit.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }

        let marker_tokens = self.count(TRUNCATION_MARKER);
        let marker = if marker_tokens <= max_tokens { TRUNCATION_MARKER } else { "" };
        let mut keep = max_tokens.saturating_sub(if marker.is_empty() { 0 } else { marker_tokens });

        // A cut can split a multi-byte character or re-tokenize differently
        // once the marker is attached, so shrink until the result fits.
        loop {
            if keep == 0 {
                return marker.to_string();
            }
            if let Ok(prefix) = self.bpe.decode(tokens[..keep].to_vec()) {
                let candidate = format!("{}{}", prefix, marker);
                if self.count(&candidate) <= max_tokens {
                    return candidate;
                }
            }
            keep -= 1;
        }
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").field("encoding", &"cl100k_base").finish()
    }
}
