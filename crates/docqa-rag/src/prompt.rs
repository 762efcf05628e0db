//! Prompt construction for question answering and per-document processing.

use std::fmt;
use std::str::FromStr;

use docqa_core::{Chunk, Error};

/// Per-chunk character budget in processing prompts.
pub const SNIPPET_CHARS: usize = 800;

const FOOTER: &str = "\nRespond concisely. Use bullet lists when appropriate. If the requested information is not present in the context, say 'Not found in the document.'";

pub fn build_prompt(query: &str, contexts: &[Chunk]) -> String {
    let mut prompt = String::from("Answer the question based on the following context:\n\n");
    for chunk in contexts {
        prompt.push_str(&format!("Source: {}\n{}\n\n", chunk.source, chunk.text));
    }
    prompt.push_str(&format!("Question: {query}\nAnswer:"));
    prompt
}

/// Canned whole-document tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostProcessOption {
    QuickSummary,
    KeyPoints,
    Outline,
    Entities,
    Faqs,
}

impl PostProcessOption {
    pub const ALL: [PostProcessOption; 5] =
        [Self::QuickSummary, Self::KeyPoints, Self::Outline, Self::Entities, Self::Faqs];

    pub fn key(self) -> &'static str {
        match self {
            Self::QuickSummary => "quick_summary",
            Self::KeyPoints => "key_points",
            Self::Outline => "outline",
            Self::Entities => "entities",
            Self::Faqs => "faqs",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::QuickSummary => "Quick summary",
            Self::KeyPoints => "Key points",
            Self::Outline => "Structured outline (TOC)",
            Self::Entities => "Important entities & facts",
            Self::Faqs => "Auto-generated FAQs",
        }
    }

    /// Instruction block that opens the prompt, ending in `Context:`.
    pub fn header(self, title: &str) -> String {
        match self {
            Self::QuickSummary => format!(
                "You are a helpful summarization assistant. Produce a short concise summary (3-5 sentences) \
                 of the document titled: {title}. Focus on the main idea and key conclusions.\n\nContext:\n"
            ),
            Self::KeyPoints => format!(
                "You are an assistant that extracts the most important takeaways. Provide an ordered list of the \
                 top 8-12 key points from the document titled: {title}.\n\nContext:\n"
            ),
            Self::Outline => format!(
                "You are an assistant that builds an outline or table of contents from document chunks. Produce a \
                 hierarchical outline with short headings and indicate page numbers where available for: {title}.\n\nContext:\n"
            ),
            Self::Entities => format!(
                "Extract named entities, important facts, numbers, dates, metrics, and definitions from the document titled: \
                 {title}. Present them as short labeled bullets grouped by type (People, Organizations, Dates, Numbers, Terms).\n\nContext:\n"
            ),
            Self::Faqs => format!(
                "Create 6 concise FAQ pairs (question + short answer) that a reader would ask after reading the document titled: \
                 {title}. Use the provided context to answer.\n\nContext:\n"
            ),
        }
    }
}

impl fmt::Display for PostProcessOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for PostProcessOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|o| o.key() == s)
            .ok_or_else(|| Error::UnknownOption(s.to_string()))
    }
}

pub fn build_option_prompt(option: PostProcessOption, title: &str, contexts: &[Chunk]) -> String {
    let mut prompt = option.header(title);
    for chunk in contexts {
        let snippet: String = chunk.text.chars().take(SNIPPET_CHARS).collect();
        match chunk.page {
            Some(page) => prompt.push_str(&format!("Source: {} (page {page})\n{snippet}\n\n", chunk.source)),
            None => prompt.push_str(&format!("Source: {}\n{snippet}\n\n", chunk.source)),
        }
    }
    prompt.push_str(FOOTER);
    prompt
}
