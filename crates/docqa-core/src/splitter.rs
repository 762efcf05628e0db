use crate::config::SplitterSettings;
use crate::types::Chunk;

/// Text of one extracted page. `number` is 1-based and absent when the loader
/// could not tell pages apart.
#[derive(Debug, Clone)]
pub struct PageText {
    pub number: Option<u32>,
    pub text: String,
}

#[derive(Debug, Default, Clone)]
pub struct TextSplitter {
    config: SplitterSettings,
}

impl TextSplitter {
    pub fn new(config: SplitterSettings) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SplitterSettings {
        &self.config
    }

    /// Overlapping character windows over the cleaned text. Windows that trim
    /// down to `min_chars` characters or fewer are dropped.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let cleaned = clean_text(text);
        let chars: Vec<char> = cleaned.chars().collect();
        let size = self.config.chunk_size.max(1);
        let step = size.saturating_sub(self.config.overlap).max(1);

        let mut windows = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let window = window.trim();
            if window.chars().count() > self.config.min_chars {
                windows.push(window.to_string());
            }
            start += step;
        }
        windows
    }

    /// Splits every page and labels the resulting chunks with `source` and the
    /// page number, preserving page order.
    pub fn split_pages(&self, source: &str, pages: &[PageText]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            for text in self.split_text(&page.text) {
                let chunk = Chunk::new(source, text);
                chunks.push(match page.number {
                    Some(n) => chunk.with_page(n),
                    None => chunk,
                });
            }
        }
        chunks
    }
}

/// Normalizes line endings, collapses runs of blank lines to a single blank
/// line and trims the result.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            continue;
        }
        match newlines {
            0 => {}
            1 => out.push('\n'),
            _ => out.push_str("\n\n"),
        }
        newlines = 0;
        out.push(ch);
    }
    out.trim().to_string()
}
