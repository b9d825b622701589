//! Sentence assembly for streaming model output
//!
//! Buffers text deltas and emits complete sentences so synthesis can start
//! before the model finishes. A too-short opening sentence is held and
//! merged with the next one; an oversized buffer is force-flushed so a
//! model that never punctuates cannot stall the pipeline.

use unicode_segmentation::UnicodeSegmentation;

const TERMINATORS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；', '\n'];

/// Streaming sentence splitter
pub struct SentenceSplitter {
    buffer: String,
    /// A completed sentence held back for being too short to speak alone
    pending: Option<String>,
    min_first_chars: usize,
    max_buffer_chars: usize,
    emitted_any: bool,
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new(8, 500)
    }
}

impl SentenceSplitter {
    pub fn new(min_first_chars: usize, max_buffer_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            pending: None,
            min_first_chars,
            max_buffer_chars,
            emitted_any: false,
        }
    }

    /// Feed a delta; returns any sentences completed by it
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut sentences = Vec::new();

        while let Some(boundary) = self.find_boundary() {
            let sentence: String = self.buffer.drain(..boundary).collect();
            let sentence = sentence.trim().to_string();
            if sentence.is_empty() {
                continue;
            }
            let combined = match self.pending.take() {
                Some(held) => format!("{} {}", held, sentence),
                None => sentence,
            };
            // Hold a too-short opening sentence; it joins the next one.
            if !self.emitted_any && combined.graphemes(true).count() < self.min_first_chars {
                self.pending = Some(combined);
                continue;
            }
            self.emitted_any = true;
            sentences.push(combined);
        }

        if self.buffer.len() >= self.max_buffer_chars {
            if let Some(overflow) = self.drain_all() {
                sentences.push(overflow);
            }
        }
        sentences
    }

    /// Drain whatever is left at end of stream
    pub fn flush(&mut self) -> Option<String> {
        self.drain_all()
    }

    fn drain_all(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        let combined = match (self.pending.take(), rest.is_empty()) {
            (Some(held), true) => held,
            (Some(held), false) => format!("{} {}", held, rest),
            (None, true) => return None,
            (None, false) => rest.to_string(),
        };
        self.emitted_any = true;
        Some(combined)
    }

    /// Byte index just past the first confirmed sentence terminator
    fn find_boundary(&self) -> Option<usize> {
        let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
        for (i, &(_, c)) in chars.iter().enumerate() {
            if !TERMINATORS.contains(&c) {
                continue;
            }
            // A dot between digits is a decimal point, not a boundary.
            if c == '.' {
                let prev_digit = i > 0 && chars[i - 1].1.is_ascii_digit();
                let next_digit = chars.get(i + 1).map(|&(_, n)| n.is_ascii_digit());
                if prev_digit && next_digit == Some(true) {
                    continue;
                }
                // Terminator at buffer end: wait for the next delta to rule
                // out a decimal continuation.
                if prev_digit && next_digit.is_none() {
                    return None;
                }
            }
            // Include trailing closing quotes.
            let mut end = i + 1;
            while let Some(&(_, next)) = chars.get(end) {
                if next == '"' || next == '\'' || next == ')' || next == '”' || next == '’' {
                    end += 1;
                } else {
                    break;
                }
            }
            return Some(
                chars
                    .get(end)
                    .map(|&(b, _)| b)
                    .unwrap_or(self.buffer.len()),
            );
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentences_emitted_at_terminators() {
        let mut splitter = SentenceSplitter::new(1, 500);
        let mut out = splitter.push("The weather is nice. Tomorrow will ");
        out.extend(splitter.push("be rainy! And "));
        assert_eq!(out, vec!["The weather is nice.", "Tomorrow will be rainy!"]);
        assert_eq!(splitter.flush(), Some("And".to_string()));
    }

    #[test]
    fn test_short_first_fragment_joins_next_sentence() {
        let mut splitter = SentenceSplitter::new(10, 500);
        let out = splitter.push("Hi. It is a lovely day today.");
        assert_eq!(out, vec!["Hi. It is a lovely day today."]);
    }

    #[test]
    fn test_held_fragment_survives_flush() {
        let mut splitter = SentenceSplitter::new(10, 500);
        assert!(splitter.push("Yes.").is_empty());
        assert_eq!(splitter.flush(), Some("Yes.".to_string()));
    }

    #[test]
    fn test_decimal_point_is_not_a_boundary() {
        let mut splitter = SentenceSplitter::new(1, 500);
        let mut out = splitter.push("The price is 3.");
        assert!(out.is_empty(), "trailing digit-dot must wait for more text");
        out.extend(splitter.push("5 euros. Done."));
        assert_eq!(out, vec!["The price is 3.5 euros.", "Done."]);
    }

    #[test]
    fn test_oversized_buffer_is_force_flushed() {
        let mut splitter = SentenceSplitter::new(1, 20);
        let out = splitter.push("word word word word word word");
        assert_eq!(out.len(), 1);
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn test_cjk_terminators() {
        let mut splitter = SentenceSplitter::new(1, 500);
        let out = splitter.push("你好。今天天气很好！");
        assert_eq!(out, vec!["你好。", "今天天气很好！"]);
    }

    #[test]
    fn test_streamed_word_by_word() {
        let mut splitter = SentenceSplitter::new(1, 500);
        let mut out = Vec::new();
        for delta in ["It ", "is ", "twelve ", "o'clock", ". ", "Anything ", "else?"] {
            out.extend(splitter.push(delta));
        }
        out.extend(splitter.flush());
        assert_eq!(out, vec!["It is twelve o'clock.", "Anything else?"]);
    }
}
