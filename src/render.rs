//! turns extracted segments into display units.
//!
//! prose is parsed with pulldown-cmark (gfm tables, strikethrough, task
//! lists) into flat styled runs; code is highlighted with syntect. nothing
//! here interprets html: raw html in model output is shown as literal text.

use bevy::prelude::*;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::extract::{Segment, extract_segments};

const CODE_THEME: &str = "base16-ocean.dark";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStyle {
    pub strong: bool,
    pub emphasis: bool,
    pub strikethrough: bool,
    pub code: bool,
    pub link: bool,
    pub heading: bool,
    pub quote: bool,
    pub muted: bool,
    /// foreground from the syntax theme (code blocks only).
    pub color: Option<(u8, u8, u8)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextRun {
    pub text: String,
    pub style: RunStyle,
}

impl TextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), style: RunStyle::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeBlockView {
    pub language: Option<String>,
    /// exact text placed on the clipboard by the copy button.
    pub source: String,
    pub runs: Vec<TextRun>,
    pub highlighted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayUnit {
    Prose(Vec<TextRun>),
    Code(CodeBlockView),
}

/// syntax definitions + theme, loaded once.
#[derive(Resource)]
pub struct Highlighter {
    syntaxes: SyntaxSet,
    theme: Theme,
}

impl Default for Highlighter {
    fn default() -> Self {
        let mut themes = ThemeSet::load_defaults().themes;
        Self {
            syntaxes: SyntaxSet::load_defaults_newlines(),
            theme: themes.remove(CODE_THEME).unwrap_or_default(),
        }
    }
}

impl Highlighter {
    fn syntax_for(&self, language: Option<&str>) -> Option<&SyntaxReference> {
        let lang = language?.trim();
        if lang.is_empty() {
            return None;
        }
        self.syntaxes.find_syntax_by_token(lang)
    }

    /// highlighted runs, or `None` when the language is unknown or syntect fails.
    pub fn highlight(&self, source: &str, language: Option<&str>) -> Option<Vec<TextRun>> {
        let syntax = self.syntax_for(language)?;
        let mut lines = HighlightLines::new(syntax, &self.theme);
        let mut runs: Vec<TextRun> = Vec::new();
        for line in LinesWithEndings::from(source) {
            let ranges = match lines.highlight_line(line, &self.syntaxes) {
                Ok(r) => r,
                Err(err) => {
                    warn!(target: "bevy_genai_chat", "highlight failed for {:?}: {err}", language);
                    return None;
                }
            };
            for (style, text) in ranges {
                let fg = style.foreground;
                let run_style = RunStyle {
                    code: true,
                    color: Some((fg.r, fg.g, fg.b)),
                    ..default()
                };
                push_run(&mut runs, text, run_style);
            }
        }
        Some(runs)
    }
}

/// maps one segment to the unit the view displays.
pub fn render_segment(segment: &Segment<'_>, highlighter: &Highlighter) -> DisplayUnit {
    match *segment {
        Segment::Prose(text) => DisplayUnit::Prose(render_prose(text)),
        Segment::Code { language, source } => {
            let (runs, highlighted) = match highlighter.highlight(source, language) {
                Some(runs) => (runs, true),
                None => {
                    let style = RunStyle { code: true, ..default() };
                    (vec![TextRun { text: source.to_string(), style }], false)
                }
            };
            DisplayUnit::Code(CodeBlockView {
                language: language.map(str::to_string),
                source: source.to_string(),
                runs,
                highlighted,
            })
        }
    }
}

/// every display unit of a message, in source order.
pub fn render_message(text: &str, highlighter: &Highlighter) -> Vec<DisplayUnit> {
    extract_segments(text)
        .map(|segment| render_segment(&segment, highlighter))
        .collect()
}

/// coalesces with the previous run when the style matches.
fn push_run(runs: &mut Vec<TextRun>, text: &str, style: RunStyle) {
    if text.is_empty() {
        return;
    }
    match runs.last_mut() {
        Some(last) if last.style == style => last.text.push_str(text),
        _ => runs.push(TextRun { text: text.to_string(), style }),
    }
}

#[derive(Default)]
struct TableState {
    rows: Vec<(bool, Vec<String>)>,
    current: Vec<String>,
    cell: String,
    in_head: bool,
}

impl TableState {
    fn end_row(&mut self) {
        let cells = std::mem::take(&mut self.current);
        self.rows.push((self.in_head, cells));
    }

    fn end_cell(&mut self) {
        let cell = std::mem::take(&mut self.cell);
        self.current.push(cell.trim().to_string());
    }

    /// pads columns to a common width; the header is followed by a rule.
    fn emit(self, out: &mut ProseWriter) {
        let cols = self.rows.iter().map(|(_, r)| r.len()).max().unwrap_or(0);
        let mut widths = vec![0usize; cols];
        for (_, row) in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        for (is_head, row) in &self.rows {
            let line = (0..cols)
                .map(|i| {
                    let cell = row.get(i).map(String::as_str).unwrap_or("");
                    let pad = widths[i].saturating_sub(cell.chars().count());
                    format!("{cell}{}", " ".repeat(pad))
                })
                .collect::<Vec<_>>()
                .join(" | ");
            let style = RunStyle { strong: *is_head, ..default() };
            push_run(&mut out.runs, line.trim_end(), style);
            push_run(&mut out.runs, "\n", style);
            if *is_head {
                let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-");
                push_run(&mut out.runs, &rule, RunStyle { muted: true, ..default() });
                push_run(&mut out.runs, "\n", RunStyle { muted: true, ..default() });
            }
        }
    }
}

struct ProseWriter {
    runs: Vec<TextRun>,
    styles: Vec<RunStyle>,
    /// next ordinal per open list; `None` for bullets.
    lists: Vec<Option<u64>>,
    table: Option<TableState>,
    /// (destination, visible text) of the innermost open link.
    link: Option<(String, String)>,
}

impl ProseWriter {
    fn new() -> Self {
        Self {
            runs: Vec::new(),
            styles: vec![RunStyle::default()],
            lists: Vec::new(),
            table: None,
            link: None,
        }
    }

    fn style(&self) -> RunStyle {
        self.styles.last().copied().unwrap_or_default()
    }

    fn push_style(&mut self, f: impl FnOnce(&mut RunStyle)) {
        let mut s = self.style();
        f(&mut s);
        self.styles.push(s);
    }

    fn pop_style(&mut self) {
        if self.styles.len() > 1 {
            self.styles.pop();
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(table) = self.table.as_mut() {
            table.cell.push_str(text);
            return;
        }
        if let Some((_, seen)) = self.link.as_mut() {
            seen.push_str(text);
        }
        let style = self.style();
        push_run(&mut self.runs, text, style);
    }

    fn text_styled(&mut self, text: &str, style: RunStyle) {
        if let Some(table) = self.table.as_mut() {
            table.cell.push_str(text);
            return;
        }
        push_run(&mut self.runs, text, style);
    }

    fn ends_with_newline(&self) -> bool {
        self.runs.last().is_none_or(|r| r.text.ends_with('\n'))
    }

    fn ensure_newline(&mut self) {
        if !self.ends_with_newline() {
            let style = self.style();
            push_run(&mut self.runs, "\n", style);
        }
    }

    /// closes a block; top-level blocks are separated by a blank line.
    fn end_block(&mut self) {
        self.ensure_newline();
        if self.lists.is_empty() && !self.runs.is_empty() {
            let style = self.style();
            push_run(&mut self.runs, "\n", style);
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { .. } => {
                self.ensure_newline();
                self.push_style(|s| {
                    s.heading = true;
                    s.strong = true;
                });
            }
            Tag::BlockQuote { .. } => {
                self.ensure_newline();
                self.push_style(|s| s.quote = true);
                self.text_styled("> ", RunStyle { quote: true, muted: true, ..default() });
            }
            Tag::CodeBlock(_) => {
                self.ensure_newline();
                self.push_style(|s| s.code = true);
            }
            Tag::List(start) => {
                self.ensure_newline();
                self.lists.push(start);
            }
            Tag::Item => {
                self.ensure_newline();
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let m = format!("{n}. ");
                        *n += 1;
                        m
                    }
                    _ => "• ".to_string(),
                };
                let indent = "  ".repeat(depth);
                self.text_styled(&format!("{indent}{marker}"), RunStyle { muted: true, ..default() });
            }
            Tag::Emphasis => self.push_style(|s| s.emphasis = true),
            Tag::Strong => self.push_style(|s| s.strong = true),
            Tag::Strikethrough => self.push_style(|s| s.strikethrough = true),
            Tag::Link { dest_url, .. } => {
                self.push_style(|s| s.link = true);
                self.link = Some((dest_url.to_string(), String::new()));
            }
            Tag::Table(_) => {
                self.ensure_newline();
                self.table = Some(TableState::default());
            }
            Tag::TableHead => {
                if let Some(t) = self.table.as_mut() {
                    t.in_head = true;
                }
            }
            Tag::TableRow => {
                if let Some(t) = self.table.as_mut() {
                    t.in_head = false;
                }
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => self.end_block(),
            TagEnd::Heading(_) => {
                self.pop_style();
                self.end_block();
            }
            TagEnd::BlockQuote { .. } | TagEnd::CodeBlock => {
                self.pop_style();
                self.end_block();
            }
            TagEnd::List(_) => {
                self.lists.pop();
                self.end_block();
            }
            TagEnd::Item => self.ensure_newline(),
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => self.pop_style(),
            TagEnd::Link => {
                self.pop_style();
                if let Some((url, seen)) = self.link.take()
                    && !url.is_empty()
                    && url != seen
                {
                    self.text_styled(&format!(" ({url})"), RunStyle { muted: true, ..default() });
                }
            }
            TagEnd::TableCell => {
                if let Some(t) = self.table.as_mut() {
                    t.end_cell();
                }
            }
            TagEnd::TableHead | TagEnd::TableRow => {
                if let Some(t) = self.table.as_mut() {
                    t.end_row();
                }
            }
            TagEnd::Table => {
                if let Some(t) = self.table.take() {
                    t.emit(self);
                }
                self.end_block();
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<TextRun> {
        while let Some(last) = self.runs.last_mut() {
            let trimmed = last.text.trim_end_matches('\n').len();
            if trimmed == 0 {
                self.runs.pop();
            } else {
                last.text.truncate(trimmed);
                break;
            }
        }
        self.runs
    }
}

/// markdown prose to styled runs. newlines are carried inside run text.
pub fn render_prose(markdown: &str) -> Vec<TextRun> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut w = ProseWriter::new();
    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(tag) => w.start(tag),
            Event::End(tag) => w.end(tag),
            Event::Text(t) => w.text(&t),
            Event::Code(c) => {
                let style = RunStyle { code: true, ..w.style() };
                w.text_styled(&c, style);
            }
            Event::Html(h) | Event::InlineHtml(h) => w.text(&h),
            Event::SoftBreak => w.text(" "),
            Event::HardBreak => w.text("\n"),
            Event::Rule => {
                w.ensure_newline();
                w.text_styled("────────\n", RunStyle { muted: true, ..default() });
            }
            Event::TaskListMarker(done) => {
                w.text_styled(if done { "[x] " } else { "[ ] " }, RunStyle { muted: true, ..default() });
            }
            _ => {}
        }
    }
    w.finish()
}
