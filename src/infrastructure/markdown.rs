use comrak::nodes::{AstNode, NodeValue};
use comrak::{parse_document, Arena, Options};

/// Renders Markdown as plain text, one line per block.
///
/// Inline formatting is dropped, list items are prefixed with `- ` and code
/// blocks are kept verbatim. Domain documents are authored in Markdown but
/// embedded and shown to the model as text.
pub fn markdown_to_text(markdown: &str) -> String {
    let arena = Arena::new();
    let root = parse_document(&arena, markdown, &Options::default());
    let mut blocks = Vec::new();
    collect_blocks(root, false, &mut blocks);
    blocks.join("\n")
}

fn collect_blocks<'a>(node: &'a AstNode<'a>, in_item: bool, out: &mut Vec<String>) {
    let value = node.data.borrow().value.clone();
    match value {
        NodeValue::Paragraph | NodeValue::Heading(_) => {
            let text = inline_text(node);
            if !text.is_empty() {
                out.push(if in_item { format!("- {}", text) } else { text });
            }
        }
        NodeValue::CodeBlock(block) => {
            let literal = block.literal.trim_end();
            if !literal.is_empty() {
                out.push(literal.to_string());
            }
        }
        NodeValue::Item(_) => {
            for child in node.children() {
                collect_blocks(child, true, out);
            }
        }
        _ => {
            for child in node.children() {
                collect_blocks(child, in_item, out);
            }
        }
    }
}

fn inline_text<'a>(node: &'a AstNode<'a>) -> String {
    let mut text = String::new();
    for descendant in node.descendants() {
        match &descendant.data.borrow().value {
            NodeValue::Text(t) => text.push_str(t),
            NodeValue::Code(code) => text.push_str(&code.literal),
            NodeValue::SoftBreak | NodeValue::LineBreak => text.push(' '),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_and_paragraph_become_lines() {
        let markdown = "# Header\n\nThis is **bold** text.";
        assert_eq!(markdown_to_text(markdown), "Header\nThis is bold text.");
    }

    #[test]
    fn test_link_keeps_label_only() {
        assert_eq!(markdown_to_text("Visit [Google](https://google.com)!"), "Visit Google!");
    }

    #[test]
    fn test_list_items_are_dashed() {
        let markdown = "Rules:\n\n* Item 1\n* Item `two`";
        assert_eq!(markdown_to_text(markdown), "Rules:\n- Item 1\n- Item two");
    }

    #[test]
    fn test_soft_breaks_collapse_into_spaces() {
        assert_eq!(markdown_to_text("one\ntwo"), "one two");
    }
}
