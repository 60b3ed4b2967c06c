
use thiserror::Error;

use crate::index::RetrievalResult;

pub const CONTEXT_PLACEHOLDER: &str = "{context}";
pub const QUESTION_PLACEHOLDER: &str = "{question}";

/// Separator placed between retrieved chunk texts
pub const CHUNK_SEPARATOR: &str = "\n\n";

pub const DEFAULT_PROMPT_TEMPLATE: &str = "You are a helpful assistant that answers questions \
using the provided context. Use only the information in the context to answer. \
If you don't know the answer, just say that you don't know.

Context:
{context}

Question: {question}

Answer:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template must contain the placeholder {placeholder}")]
    MissingPlaceholder { placeholder: &'static str },

    #[error("Template must contain the placeholder {placeholder} exactly once, found {count}")]
    RepeatedPlaceholder {
        placeholder: &'static str,
        count: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Context,
    Question,
}

/// A validated prompt template, split around its two placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptAssembler {
    template: String,
    // Literal text before the first slot, between the slots, and after the last.
    head: String,
    middle: String,
    tail: String,
    order: [Slot; 2],
}

impl PromptAssembler {
    #[inline]
    pub fn new(template: &str) -> Result<Self, TemplateError> {
        let context_at = find_single(template, CONTEXT_PLACEHOLDER)?;
        let question_at = find_single(template, QUESTION_PLACEHOLDER)?;

        let (first_at, first_len, second_at, second_len, order) = if context_at < question_at {
            (
                context_at,
                CONTEXT_PLACEHOLDER.len(),
                question_at,
                QUESTION_PLACEHOLDER.len(),
                [Slot::Context, Slot::Question],
            )
        } else {
            (
                question_at,
                QUESTION_PLACEHOLDER.len(),
                context_at,
                CONTEXT_PLACEHOLDER.len(),
                [Slot::Question, Slot::Context],
            )
        };

        // Placeholder matches are ASCII, so every split point is a char boundary.
        let (head, rest) = template.split_at(first_at);
        let (_, rest) = rest.split_at(first_len);
        let (middle, rest) = rest.split_at(second_at - first_at - first_len);
        let (_, tail) = rest.split_at(second_len);

        Ok(Self {
            template: template.to_string(),
            head: head.to_string(),
            middle: middle.to_string(),
            tail: tail.to_string(),
            order,
        })
    }

    #[inline]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Join retrieved chunk texts in ranking order
    #[inline]
    pub fn format_context(retrieved: &RetrievalResult) -> String {
        retrieved
            .hits
            .iter()
            .map(|hit| hit.entry.text.as_str())
            .collect::<Vec<_>>()
            .join(CHUNK_SEPARATOR)
    }

    /// Substitute the context and question in a single pass.
    ///
    /// Placeholder-looking text inside either value is copied through untouched.
    #[inline]
    pub fn assemble(&self, retrieved: &RetrievalResult, question: &str) -> String {
        let context = Self::format_context(retrieved);
        let value = |slot: Slot| match slot {
            Slot::Context => context.as_str(),
            Slot::Question => question,
        };
        let first = value(self.order[0]);
        let second = value(self.order[1]);

        let mut prompt = String::with_capacity(
            self.head.len() + self.middle.len() + self.tail.len() + first.len() + second.len(),
        );
        prompt.push_str(&self.head);
        prompt.push_str(first);
        prompt.push_str(&self.middle);
        prompt.push_str(second);
        prompt.push_str(&self.tail);
        prompt
    }
}

impl Default for PromptAssembler {
    #[inline]
    fn default() -> Self {
        // The built-in template always carries both placeholders once.
        match Self::new(DEFAULT_PROMPT_TEMPLATE) {
            Ok(assembler) => assembler,
            Err(e) => unreachable!("default prompt template is invalid: {e}"),
        }
    }
}

fn find_single(template: &str, placeholder: &'static str) -> Result<usize, TemplateError> {
    let count = template.matches(placeholder).count();
    match count {
        0 => Err(TemplateError::MissingPlaceholder { placeholder }),
        1 => template
            .find(placeholder)
            .ok_or(TemplateError::MissingPlaceholder { placeholder }),
        _ => Err(TemplateError::RepeatedPlaceholder { placeholder, count }),
    }
}
