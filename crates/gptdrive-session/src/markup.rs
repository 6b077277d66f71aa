//! Answer markup to Markdown.
//!
//! Asterisks and underscores in text are kept as written: answers are
//! frequently code-heavy and escaping them corrupts identifiers.

use std::fmt::Write as _;

use scraper::{ElementRef, Html, Node};

/// Turns an answer surface's inner HTML into text.
pub trait MarkupConverter: Send + Sync {
    fn convert(&self, html: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownConverter;

impl MarkupConverter for MarkdownConverter {
    fn convert(&self, html: &str) -> String {
        let fragment = Html::parse_fragment(html);
        let mut out = String::new();
        render_children(fragment.root_element(), &mut out, Context::default());
        sanitize(&out)
    }
}

/// Post-conversion cleanup: drop the code-block toolbar label, collapse
/// runs of blank lines and strip surrounding newlines.
pub fn sanitize(markdown: &str) -> String {
    let mut text = markdown.replace("Copy code`", "`");
    while text.contains("\n\n\n") {
        text = text.replace("\n\n\n", "\n\n");
    }
    text.trim_start_matches('\n').trim_end_matches('\n').to_string()
}

#[derive(Debug, Clone, Copy, Default)]
struct Context {
    list_depth: usize,
}

fn render_children(element: ElementRef<'_>, out: &mut String, ctx: Context) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_text(out, text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    render_element(child, out, ctx);
                }
            }
            _ => {}
        }
    }
}

fn render_element(element: ElementRef<'_>, out: &mut String, ctx: Context) {
    let name = element.value().name();
    match name {
        "button" | "script" | "style" | "svg" | "head" => {}
        "p" | "div" if is_block_container(element) => {
            block_start(out);
            render_children(element, out, ctx);
            block_end(out);
        }
        "br" => {
            trim_trailing_spaces(out);
            out.push('\n');
        }
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let inner = render_inline(element, ctx);
            block_start(out);
            out.push_str(&"#".repeat(level));
            out.push(' ');
            out.push_str(&inner);
            block_end(out);
        }
        "strong" | "b" => wrap_inline(element, out, ctx, "**"),
        "em" | "i" => wrap_inline(element, out, ctx, "*"),
        "del" | "s" => wrap_inline(element, out, ctx, "~~"),
        "code" => {
            let code: String = element.text().collect();
            out.push('`');
            out.push_str(&code);
            out.push('`');
        }
        "pre" => render_code_block(element, out),
        "ul" => render_list(element, out, ctx, false),
        "ol" => render_list(element, out, ctx, true),
        "a" => {
            let inner = render_inline(element, ctx);
            match element.value().attr("href") {
                Some(href) if !href.is_empty() && !inner.is_empty() => {
                    let _ = write!(out, "[{inner}]({href})");
                }
                _ => out.push_str(&inner),
            }
        }
        "img" => {
            let alt = element.value().attr("alt").unwrap_or("");
            if let Some(src) = element.value().attr("src") {
                let _ = write!(out, "![{alt}]({src})");
            }
        }
        "blockquote" => {
            let mut inner = String::new();
            render_children(element, &mut inner, ctx);
            let inner = sanitize(&inner);
            block_start(out);
            for line in inner.lines() {
                out.push('>');
                if !line.is_empty() {
                    out.push(' ');
                    out.push_str(line);
                }
                out.push('\n');
            }
            block_end(out);
        }
        "hr" => {
            block_start(out);
            out.push_str("---");
            block_end(out);
        }
        "table" => render_table(element, out, ctx),
        _ => render_children(element, out, ctx),
    }
}

/// A `div` only opens a block when it holds paragraphs or other blocks;
/// wrapper `div`s around inline content stay inline.
fn is_block_container(element: ElementRef<'_>) -> bool {
    if element.value().name() == "p" {
        return true;
    }
    element.children().filter_map(ElementRef::wrap).any(|child| {
        matches!(
            child.value().name(),
            "p" | "pre" | "ul" | "ol" | "table" | "blockquote" | "h1" | "h2" | "h3" | "h4"
                | "h5" | "h6" | "hr"
        )
    })
}

fn render_inline(element: ElementRef<'_>, ctx: Context) -> String {
    let mut inner = String::new();
    render_children(element, &mut inner, ctx);
    inner.trim().to_string()
}

fn wrap_inline(element: ElementRef<'_>, out: &mut String, ctx: Context, marker: &str) {
    let inner = render_inline(element, ctx);
    if inner.is_empty() {
        return;
    }
    out.push_str(marker);
    out.push_str(&inner);
    out.push_str(marker);
}

fn render_code_block(element: ElementRef<'_>, out: &mut String) {
    let code = element
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "code");
    let language = code
        .and_then(|c| {
            c.value()
                .classes()
                .find_map(|class| class.strip_prefix("language-"))
        })
        .unwrap_or("");
    let body: String = match code {
        Some(c) => c.text().collect(),
        None => element.text().collect(),
    };

    block_start(out);
    let _ = write!(out, "```{}\n{}\n```", language, body.trim_end_matches('\n'));
    block_end(out);
}

fn render_list(element: ElementRef<'_>, out: &mut String, ctx: Context, ordered: bool) {
    if ctx.list_depth == 0 {
        block_start(out);
    } else if !out.is_empty() && !out.ends_with('\n') {
        trim_trailing_spaces(out);
        out.push('\n');
    }

    let indent = "  ".repeat(ctx.list_depth);
    let nested = Context {
        list_depth: ctx.list_depth + 1,
    };
    let items = element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "li");

    for (index, item) in items.enumerate() {
        let mut inner = String::new();
        render_children(item, &mut inner, nested);
        let inner = inner.trim().replace("\n\n", "\n");

        out.push_str(&indent);
        if ordered {
            let _ = write!(out, "{}. ", index + 1);
        } else {
            out.push_str("- ");
        }
        for (n, line) in inner.lines().enumerate() {
            if n > 0 {
                out.push('\n');
                if !line.starts_with(char::is_whitespace) {
                    out.push_str(&indent);
                    out.push_str("  ");
                }
            }
            out.push_str(line);
        }
        out.push('\n');
    }

    if ctx.list_depth == 0 {
        block_end(out);
    }
}

fn render_table(element: ElementRef<'_>, out: &mut String, ctx: Context) {
    let rows: Vec<Vec<String>> = element
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "tr")
        .map(|row| {
            row.children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| matches!(cell.value().name(), "th" | "td"))
                .map(|cell| {
                    render_inline(cell, ctx)
                        .replace('\n', " ")
                        .replace('|', "\\|")
                })
                .collect()
        })
        .filter(|cells: &Vec<String>| !cells.is_empty())
        .collect();

    let Some(header) = rows.first() else {
        return;
    };

    block_start(out);
    let _ = writeln!(out, "| {} |", header.join(" | "));
    let separator = vec!["---"; header.len()];
    let _ = write!(out, "| {} |", separator.join(" | "));
    for row in &rows[1..] {
        let _ = write!(out, "\n| {} |", row.join(" | "));
    }
    block_end(out);
}

// ---------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------

fn at_boundary(out: &str) -> bool {
    out.is_empty() || out.ends_with('\n') || out.ends_with(' ')
}

fn push_text(out: &mut String, text: &str) {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        if !text.is_empty() && !at_boundary(out) {
            out.push(' ');
        }
        return;
    }
    if text.starts_with(char::is_whitespace) && !at_boundary(out) {
        out.push(' ');
    }
    out.push_str(&words.join(" "));
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn trim_trailing_spaces(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
}

fn block_start(out: &mut String) {
    trim_trailing_spaces(out);
    if out.is_empty() || out.ends_with("\n\n") {
        return;
    }
    if out.ends_with('\n') {
        out.push('\n');
    } else {
        out.push_str("\n\n");
    }
}

fn block_end(out: &mut String) {
    trim_trailing_spaces(out);
    out.push_str("\n\n");
}
