//! Default tree provider: markdown text to outline tree.
//!
//! Headings nest by level, list items nest beneath the heading they follow
//! and nested lists beneath their item. Loose paragraphs and code blocks
//! become leaves of the current heading.

use crate::tree::{Feature, Node, Outline, TreeProvider};
use crate::{Error, Result};
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use std::collections::BTreeSet;

/// Headings occupy levels 1..=6; list nesting starts above that.
const LIST_BASE_LEVEL: usize = 6;
/// Loose paragraphs and code blocks sit at the first list level.
const LEAF_LEVEL: usize = LIST_BASE_LEVEL + 1;
/// Deepest outline accepted before the input is rejected as malformed
pub const MAX_OUTLINE_DEPTH: usize = 256;

/// Markdown tree provider built on `pulldown-cmark`
#[derive(Debug, Clone)]
pub struct MarkdownTransformer {
    options: Options,
}

impl Default for MarkdownTransformer {
    fn default() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        Self { options }
    }
}

impl MarkdownTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TreeProvider for MarkdownTransformer {
    fn transform(&self, text: &str) -> Result<Outline> {
        let mut builder = OutlineBuilder::new();
        for event in Parser::new_ext(text, self.options) {
            builder.handle(event)?;
        }
        builder.finish()
    }
}

struct Frame {
    level: usize,
    node: Node,
}

struct CodeBuffer {
    lang: Option<String>,
    text: String,
}

struct OutlineBuilder {
    stack: Vec<Frame>,
    inline: String,
    list_depth: usize,
    code: Option<CodeBuffer>,
    features: BTreeSet<Feature>,
}

impl OutlineBuilder {
    fn new() -> Self {
        Self {
            stack: vec![Frame {
                level: 0,
                node: Node::default(),
            }],
            inline: String::new(),
            list_depth: 0,
            code: None,
            features: BTreeSet::new(),
        }
    }

    fn handle(&mut self, event: Event<'_>) -> Result<()> {
        match event {
            Event::Start(tag) => self.start(tag)?,
            Event::End(tag) => self.end(tag),
            Event::Text(text) => match self.code.as_mut() {
                Some(code) => code.text.push_str(&text),
                None => self.inline.push_str(&escape_html(&text)),
            },
            Event::Code(code) => {
                self.inline.push_str("<code>");
                self.inline.push_str(&escape_html(&code));
                self.inline.push_str("</code>");
            }
            // Raw HTML is shown, not interpreted
            Event::Html(html) | Event::InlineHtml(html) => self.inline.push_str(&escape_html(&html)),
            Event::SoftBreak => self.inline.push(' '),
            Event::HardBreak => self.inline.push_str("<br>"),
            Event::TaskListMarker(checked) => {
                self.features.insert(Feature::Checkbox);
                let mark = if checked { "☑" } else { "☐" };
                self.inline.push_str(&format!("<span class=\"mm-checkbox\">{}</span> ", mark));
            }
            _ => {}
        }
        Ok(())
    }

    fn start(&mut self, tag: Tag<'_>) -> Result<()> {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush_inline();
                self.open(level as usize)?;
            }
            Tag::Paragraph => {
                self.flush_inline();
                if self.list_depth == 0 {
                    self.open(LEAF_LEVEL)?;
                }
            }
            Tag::List(_) => {
                self.flush_inline();
                self.list_depth += 1;
            }
            Tag::Item => {
                self.flush_inline();
                self.open(LIST_BASE_LEVEL + self.list_depth)?;
            }
            Tag::CodeBlock(kind) => {
                self.flush_inline();
                if self.list_depth == 0 {
                    self.open(LEAF_LEVEL)?;
                }
                self.features.insert(Feature::CodeBlock);
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(|s| s.to_string()),
                    CodeBlockKind::Indented => None,
                };
                self.code = Some(CodeBuffer {
                    lang,
                    text: String::new(),
                });
            }
            Tag::Emphasis => self.inline.push_str("<em>"),
            Tag::Strong => self.inline.push_str("<strong>"),
            Tag::Strikethrough => self.inline.push_str("<del>"),
            Tag::Link { dest_url, .. } => {
                self.inline.push_str(&format!("<a href=\"{}\">", escape_html(&dest_url)));
            }
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) | TagEnd::Paragraph | TagEnd::Item => self.flush_inline(),
            TagEnd::List(_) => {
                self.flush_inline();
                self.close_from(LIST_BASE_LEVEL + self.list_depth);
                self.list_depth = self.list_depth.saturating_sub(1);
            }
            TagEnd::CodeBlock => {
                if let Some(code) = self.code.take() {
                    let class = code
                        .lang
                        .map(|l| format!(" class=\"language-{}\"", escape_html(&l)))
                        .unwrap_or_default();
                    let html = format!(
                        "<pre><code{}>{}</code></pre>",
                        class,
                        escape_html(code.text.trim_end_matches('\n'))
                    );
                    self.append_content(&html);
                }
            }
            TagEnd::Emphasis => self.inline.push_str("</em>"),
            TagEnd::Strong => self.inline.push_str("</strong>"),
            TagEnd::Strikethrough => self.inline.push_str("</del>"),
            TagEnd::Link => self.inline.push_str("</a>"),
            _ => {}
        }
    }

    /// Start a node at `level`, closing any open node at the same level or deeper.
    fn open(&mut self, level: usize) -> Result<()> {
        self.close_from(level);
        if self.stack.len() > MAX_OUTLINE_DEPTH {
            return Err(Error::TransformError(format!(
                "outline nests deeper than {} levels",
                MAX_OUTLINE_DEPTH
            )));
        }
        self.stack.push(Frame {
            level,
            node: Node::default(),
        });
        Ok(())
    }

    fn close_from(&mut self, level: usize) {
        while self.stack.len() > 1 && self.stack.last().is_some_and(|f| f.level >= level) {
            self.close_top();
        }
    }

    fn close_top(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        if let Some(frame) = self.stack.pop() {
            if let Some(parent) = self.stack.last_mut() {
                parent.node.children.push(frame.node);
            }
        }
    }

    fn flush_inline(&mut self) {
        let text = std::mem::take(&mut self.inline);
        let text = text.trim();
        if !text.is_empty() {
            self.append_content(text);
        }
    }

    fn append_content(&mut self, html: &str) {
        if let Some(top) = self.stack.last_mut() {
            if !top.node.content.is_empty() {
                top.node.content.push_str("<br>");
            }
            top.node.content.push_str(html);
        }
    }

    fn finish(mut self) -> Result<Outline> {
        self.flush_inline();
        while self.stack.len() > 1 {
            self.close_top();
        }
        let mut root = self
            .stack
            .pop()
            .map(|f| f.node)
            .ok_or_else(|| Error::TransformError("outline builder lost its root".into()))?;

        if root.content.is_empty() && root.children.len() == 1 {
            root = root.children.remove(0);
        }
        if root.content.is_empty() && root.children.is_empty() {
            return Err(Error::TransformError("input contains no outline content".into()));
        }

        root.assign_positions();
        Ok(Outline {
            root,
            features: self.features,
        })
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
