//! Parsing of reasoning tags out of a model response.

use relay_types::ReasoningPhase;

const TAGS: [(&str, ReasoningPhase); 5] = [
    ("analyze", ReasoningPhase::Analyze),
    ("plan", ReasoningPhase::Plan),
    ("observe", ReasoningPhase::Observe),
    ("decide", ReasoningPhase::Decide),
    ("summarize", ReasoningPhase::Summarize),
];

/// Split a response into its reasoning blocks and the residual
/// user-visible text.
///
/// Recognized tags: `<analyze>`, `<plan>`, `<observe>`, `<decide>`,
/// `<summarize>`. Blocks come back in the order they appear; empty
/// blocks are dropped. An unclosed tag swallows the rest of the text
/// as its content.
#[must_use]
pub fn parse_response(text: &str) -> (Vec<(ReasoningPhase, String)>, String) {
    let mut blocks = Vec::new();
    let mut residual = String::new();
    let mut rest = text;

    while !rest.is_empty() {
        let mut earliest: Option<(usize, &str, ReasoningPhase)> = None;
        for (name, phase) in TAGS {
            let open = format!("<{name}>");
            if let Some(pos) = rest.find(&open)
                && earliest.is_none_or(|(e, _, _)| pos < e)
            {
                earliest = Some((pos, name, phase));
            }
        }
        let Some((pos, name, phase)) = earliest else {
            residual.push_str(rest);
            break;
        };

        residual.push_str(&rest[..pos]);
        let after_open = &rest[pos + name.len() + 2..];
        let close = format!("</{name}>");
        match after_open.find(&close) {
            Some(close_pos) => {
                let content = after_open[..close_pos].trim();
                if !content.is_empty() {
                    blocks.push((phase, content.to_string()));
                }
                rest = &after_open[close_pos + close.len()..];
            }
            None => {
                let content = after_open.trim();
                if !content.is_empty() {
                    blocks.push((phase, content.to_string()));
                }
                rest = "";
            }
        }
    }

    (blocks, residual.trim().to_string())
}
