//! Renders retrieved chunks into an attributed, size-bounded context block.

use crate::retriever::RetrievedChunk;

const SEPARATOR: &str = "==================================================\n";

/// Context handed to the model plus the chunks it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock<'a> {
    /// Rendered text.
    pub text: String,
    /// Chunks that made it into `text`, most similar first.
    pub used: Vec<&'a RetrievedChunk>,
    /// True when the last included chunk had to be cut short.
    pub truncated: bool,
}

/// Renders `chunks` into at most `budget_chars` characters, most similar
/// first whatever the input order.
///
/// Lower-scoring chunks are dropped first. If even the best chunk does not fit
/// it is kept anyway, cut to the budget, so a non-empty input never produces an
/// empty context.
pub fn build_context(chunks: &[RetrievedChunk], budget_chars: usize) -> ContextBlock<'_> {
    let mut ranked: Vec<&RetrievedChunk> = chunks.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut text = String::new();
    let mut used = Vec::new();
    let mut spent = 0usize;
    for chunk in ranked {
        let block = render_chunk(chunk);
        let cost = block.chars().count();
        if spent + cost > budget_chars {
            if used.is_empty() {
                text.push_str(truncate_chars(&block, budget_chars.max(1)));
                used.push(chunk);
                return ContextBlock {
                    text,
                    used,
                    truncated: true,
                };
            }
            break;
        }
        spent += cost;
        text.push_str(&block);
        used.push(chunk);
    }
    ContextBlock {
        text,
        used,
        truncated: false,
    }
}

fn render_chunk(chunk: &RetrievedChunk) -> String {
    let title = if chunk.title.trim().is_empty() {
        "(untitled)"
    } else {
        chunk.title.trim()
    };
    let mut out = format!("Paper: {} [{}]\n", title, chunk.paper_id);
    if let Some(url) = &chunk.url {
        out.push_str(&format!("URL: {url}\n"));
    }
    out.push_str(&format!("[Relevance: {:.3}]\n{}\n", chunk.score, chunk.text.trim()));
    out.push_str(SEPARATOR);
    out
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkId;

    fn chunk(paper: &str, score: f32, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            id: ChunkId::new(paper, 0),
            score,
            text: text.to_string(),
            paper_id: paper.to_string(),
            ordinal: 0,
            title: format!("{paper} title"),
            url: Some(format!("https://arxiv.org/abs/{paper}")),
            authors: Vec::new(),
            published: None,
        }
    }

    #[test]
    fn attributes_each_chunk() {
        let chunks = vec![chunk("1706.03762", 0.91, "Attention weighs inputs.")];
        let context = build_context(&chunks, 10_000);
        assert!(context.text.contains("Paper: 1706.03762 title [1706.03762]"));
        assert!(context.text.contains("URL: https://arxiv.org/abs/1706.03762"));
        assert!(context.text.contains("[Relevance: 0.910]"));
        assert!(!context.truncated);
    }

    #[test]
    fn drops_lowest_scoring_chunks_first() {
        let chunks = vec![
            chunk("a", 0.9, &"x".repeat(40)),
            chunk("b", 0.8, &"y".repeat(40)),
            chunk("c", 0.7, &"z".repeat(40)),
        ];
        let one = render_chunk(&chunks[0]).chars().count();
        let two = one + render_chunk(&chunks[1]).chars().count();
        let context = build_context(&chunks, two + 5);
        let ids: Vec<&str> = context.used.iter().map(|c| c.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(context.text.chars().count() <= two + 5);
    }

    #[test]
    fn ranks_unsorted_input_before_budgeting() {
        let chunks = vec![
            chunk("low", 0.1, &"x".repeat(40)),
            chunk("high", 0.9, &"y".repeat(40)),
        ];
        let one = render_chunk(&chunks[1]).chars().count();
        let context = build_context(&chunks, one + 5);
        let ids: Vec<&str> = context.used.iter().map(|c| c.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["high"]);
        assert!(context.text.starts_with("Paper: high title [high]"));
        assert!(!context.truncated);
    }

    #[test]
    fn keeps_one_truncated_chunk_when_nothing_fits() {
        let chunks = vec![chunk("a", 0.9, &"é".repeat(500))];
        let context = build_context(&chunks, 100);
        assert_eq!(context.used.len(), 1);
        assert!(context.truncated);
        assert_eq!(context.text.chars().count(), 100);
    }

    #[test]
    fn empty_input_gives_empty_context() {
        let context = build_context(&[], 100);
        assert!(context.text.is_empty());
        assert!(context.used.is_empty());
    }
}
