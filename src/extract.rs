//! splits a completion into prose and fenced code segments.

const FENCE: &str = "```";

/// a contiguous span of a completion, borrowed from the source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    Prose(&'a str),
    Code {
        language: Option<&'a str>,
        source: &'a str,
    },
}

/// lazily walks `text`, yielding segments in source order.
///
/// an opening fence without a matching close runs to the end of the input.
pub fn extract_segments(text: &str) -> Segments<'_> {
    Segments { rest: text }
}

#[derive(Debug)]
pub struct Segments<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.rest.is_empty() {
            let Some(open) = self.rest.find(FENCE) else {
                let prose = std::mem::take(&mut self.rest);
                return non_blank(prose);
            };

            if open > 0 {
                let prose = &self.rest[..open];
                self.rest = &self.rest[open..];
                if let Some(seg) = non_blank(prose) {
                    return Some(seg);
                }
                continue;
            }

            let (segment, rest) = split_code(&self.rest[FENCE.len()..]);
            self.rest = rest;
            return Some(segment);
        }
        None
    }
}

impl std::iter::FusedIterator for Segments<'_> {}

fn non_blank(prose: &str) -> Option<Segment<'_>> {
    (!prose.trim().is_empty()).then_some(Segment::Prose(prose))
}

/// `after_fence` starts right after an opening fence. returns the code
/// segment and whatever follows its closing fence.
fn split_code(after_fence: &str) -> (Segment<'_>, &str) {
    let tag_len = after_fence
        .find(|c: char| c.is_whitespace() || c == '`')
        .unwrap_or(after_fence.len());
    let tag = &after_fence[..tag_len];
    let language = (!tag.is_empty()).then_some(tag);

    // a fence closed on its own opening line has no fence line to skip
    let same_line_close = after_fence[tag_len..].find(FENCE).map(|i| i + tag_len);
    let body_start = match (after_fence.find('\n'), same_line_close) {
        (Some(nl), Some(close)) if close < nl => tag_len,
        (Some(nl), _) => nl + 1,
        (None, _) => tag_len,
    };
    let body = &after_fence[body_start..];

    let (source, rest) = match body.find(FENCE) {
        Some(close) => (&body[..close], &body[close + FENCE.len()..]),
        None => (body, ""),
    };
    let source = source.strip_suffix('\n').unwrap_or(source);

    (Segment::Code { language, source }, rest)
}
