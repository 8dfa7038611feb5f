//! Tag-local text scanning.
//!
//! The export documents are far too large for a tree parser, so every
//! extractor works on the flat tag stream instead. All knowledge about tag
//! and attribute syntax is kept in this module: the record, workout and
//! derived-entity extractors only ever ask for "the next `<Name ...>` tag" and
//! "the value of attribute `x`".

/// A single opening (or self-closing) tag located in a text buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag<'a> {
    /// Element name as written in the text
    pub name: &'a str,
    /// Byte offset of the `<`
    pub start: usize,
    /// Byte offset just past the closing `>`
    pub end: usize,
    /// The attribute region between the element name and `>` (or `/>`)
    pub body: &'a str,
    /// Whether the tag ends in `/>`
    pub self_closing: bool,
}

impl<'a> Tag<'a> {
    /// Look up an attribute of this tag.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        extract_attribute(self.body, name)
    }
}

/// Return the raw value of attribute `name` inside a tag body.
///
/// The value runs from the opening quote to the next double quote that is not
/// preceded by a backslash; the escape sequence itself is returned verbatim.
/// `None` when the attribute is absent or its value is unterminated.
pub fn extract_attribute<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    if name.is_empty() {
        return None;
    }

    let bytes = body.as_bytes();
    let mut search_from = 0;
    loop {
        let start = search_from + body[search_from..].find(name)?;
        let after_name = start + name.len();

        // `type` must not match the tail of `subtype`
        let at_boundary = start == 0 || bytes[start - 1].is_ascii_whitespace();
        if at_boundary && body[after_name..].starts_with("=\"") {
            let value_start = after_name + 2;
            let value_end = closing_quote(body, value_start)?;
            return Some(&body[value_start..value_end]);
        }

        search_from = after_name;
    }
}

/// Find the next unescaped `"` at or after `from`.
fn closing_quote(body: &str, from: usize) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut pos = from;
    loop {
        let idx = pos + body[pos..].find('"')?;
        if bytes[idx - 1] == b'\\' {
            pos = idx + 1;
            continue;
        }
        return Some(idx);
    }
}

/// Find the `<` of the next `<name` tag at or after `from`.
///
/// The element name must be followed by whitespace, `>` or `/`, so looking for
/// `Workout` does not stop at `<WorkoutStatistics`.
pub fn find_open_tag(text: &str, name: &str, from: usize) -> Option<usize> {
    find_open_tag_any(text, &[name], from).map(|(start, _)| start)
}

/// Like [`find_open_tag`] for several element names; also returns the name
/// that matched.
pub fn find_open_tag_any<'n>(
    text: &str,
    names: &[&'n str],
    from: usize,
) -> Option<(usize, &'n str)> {
    let bytes = text.as_bytes();
    let mut pos = from;
    while pos < text.len() {
        let idx = pos + text[pos..].find('<')?;
        let rest = &text[idx + 1..];
        for name in names {
            if !rest.starts_with(name) {
                continue;
            }
            // A name running into the end of the buffer is not a complete tag yet
            let terminated = bytes
                .get(idx + 1 + name.len())
                .map_or(false, |b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/');
            if terminated {
                return Some((idx, name));
            }
        }
        pos = idx + 1;
    }
    None
}

/// How the text after a tag's element name ends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagEnd {
    /// Offset of the `>` closing the tag, outside any quoted value
    Closed(usize),
    /// Offset of a `<` that starts before the tag closes. Attribute values
    /// cannot contain a raw `<`, so the tag is malformed and scanning resumes
    /// there.
    Broken(usize),
    /// The buffer ends inside the tag
    Open,
}

/// Scan for the end of a tag whose attribute region starts at `from`.
///
/// A `>` inside a quoted value does not end the tag. An unbalanced quote
/// only swallows text up to the next `<`.
pub fn scan_tag_end(text: &str, from: usize) -> TagEnd {
    let bytes = text.as_bytes();
    let mut in_quote = false;
    for i in from..bytes.len() {
        match bytes[i] {
            b'"' => {
                if !(in_quote && i > 0 && bytes[i - 1] == b'\\') {
                    in_quote = !in_quote;
                }
            }
            b'>' if !in_quote => return TagEnd::Closed(i),
            b'<' => return TagEnd::Broken(i),
            _ => {}
        }
    }
    TagEnd::Open
}

/// Outcome of reading the tag that starts at a known `<`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagRead<'a> {
    Complete(Tag<'a>),
    /// Malformed; the next tag may start at `resume`
    Broken { resume: usize },
    /// More text is needed to decide
    Incomplete,
}

/// Read the `<name ...>` tag starting at `start`.
pub fn read_tag<'a>(text: &'a str, start: usize, name: &str) -> TagRead<'a> {
    let body_start = start + 1 + name.len();
    let close = match scan_tag_end(text, body_start) {
        TagEnd::Closed(close) => close,
        TagEnd::Broken(resume) => return TagRead::Broken { resume },
        TagEnd::Open => return TagRead::Incomplete,
    };
    let self_closing = text.as_bytes()[close - 1] == b'/';
    let body_end = if self_closing { close - 1 } else { close };

    TagRead::Complete(Tag {
        name: &text[start + 1..body_start],
        start,
        end: close + 1,
        body: &text[body_start.min(body_end)..body_end],
        self_closing,
    })
}

/// Locate the next complete `<name ...>` tag at or after `from`.
///
/// Malformed tags are skipped. Returns `None` when there is no further tag
/// or the next one has not been fully received yet.
pub fn next_tag<'a>(text: &'a str, name: &str, from: usize) -> Option<Tag<'a>> {
    next_tag_any(text, &[name], from)
}

/// Locate the next complete tag whose element name is one of `names`.
pub fn next_tag_any<'a>(text: &'a str, names: &[&str], from: usize) -> Option<Tag<'a>> {
    let mut from = from;
    loop {
        let (start, name) = find_open_tag_any(text, names, from)?;
        match read_tag(text, start, name) {
            TagRead::Complete(tag) => return Some(tag),
            TagRead::Broken { resume } => from = resume,
            TagRead::Incomplete => return None,
        }
    }
}

/// Trimmed text content of the first `<child>...</child>` element in `block`.
pub fn element_text<'a>(block: &'a str, child: &str) -> Option<&'a str> {
    let tag = next_tag(block, child, 0)?;
    if tag.self_closing {
        return None;
    }
    let closing = format!("</{}>", child);
    let content_end = tag.end + block[tag.end..].find(&closing)?;
    Some(block[tag.end..content_end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_simple_attribute() {
        let body = r#" type="HKQuantityTypeIdentifierHeartRate" value="72" unit="count/min""#;
        assert_eq!(
            extract_attribute(body, "type"),
            Some("HKQuantityTypeIdentifierHeartRate")
        );
        assert_eq!(extract_attribute(body, "value"), Some("72"));
        assert_eq!(extract_attribute(body, "unit"), Some("count/min"));
    }

    #[test]
    fn test_missing_attribute() {
        let body = r#" type="StepCount" value="500""#;
        assert_eq!(extract_attribute(body, "endDate"), None);
        assert_eq!(extract_attribute(body, ""), None);
    }

    #[test]
    fn test_escaped_quote_is_not_a_terminator() {
        let body = r#" type="Height" value="5\"2" unit="ft""#;
        assert_eq!(extract_attribute(body, "value"), Some(r#"5\"2"#));
        assert_eq!(extract_attribute(body, "unit"), Some("ft"));
    }

    #[test]
    fn test_unterminated_value() {
        let body = r#" type="HeartRate" value="7"#;
        assert_eq!(extract_attribute(body, "value"), None);
    }

    #[test]
    fn test_name_must_start_at_boundary() {
        let body = r#" subtype="wrong" type="right""#;
        assert_eq!(extract_attribute(body, "type"), Some("right"));

        let body = r#" workoutActivityType="HKWorkoutActivityTypeRunning""#;
        assert_eq!(extract_attribute(body, "type"), None);
    }

    #[test]
    fn test_empty_value() {
        assert_eq!(extract_attribute(r#"value="""#, "value"), Some(""));
    }

    #[test]
    fn test_find_open_tag_skips_longer_names() {
        let text = r#"<WorkoutStatistics type="x"/><Workout a="1">"#;
        assert_eq!(find_open_tag(text, "Workout", 0), Some(29));
        assert_eq!(find_open_tag("<Workout", "Workout", 0), None);
    }

    #[test]
    fn test_find_open_tag_any_reports_name() {
        let text = r#"<Root><HKCategoryTypeRecord type="x"/>"#;
        let names = ["HKQuantityTypeRecord", "HKCategoryTypeRecord"];
        assert_eq!(
            find_open_tag_any(text, &names, 0),
            Some((6, "HKCategoryTypeRecord"))
        );
    }

    #[test]
    fn test_tag_end_ignores_quoted_gt() {
        let text = r#"<Record sourceName="A > B" value="1"/>"#;
        assert_eq!(
            scan_tag_end(text, "<Record".len()),
            TagEnd::Closed(text.len() - 1)
        );
    }

    #[test]
    fn test_unbalanced_quote_stops_at_next_tag() {
        let text = "<Record type=\"A\" value=\"1 endDate=\"2023-09-08\"/>\n<Record type=\"B\"/>";
        let second = text.rfind('<').unwrap();
        assert_eq!(scan_tag_end(text, "<Record".len()), TagEnd::Broken(second));
    }

    #[test]
    fn test_self_close_inside_value_keeps_tag_open() {
        let text = r#"<Record sourceName="X/>"#;
        assert_eq!(scan_tag_end(text, "<Record".len()), TagEnd::Open);
        assert_eq!(read_tag(text, 0, "Record"), TagRead::Incomplete);
    }

    #[test]
    fn test_next_tag_skips_malformed_tag() {
        let text = r#"<Record type="A" value="1 endDate="x"/>
<Record type="B" value="2"/>
<Record type="C" value="3"/>"#;
        let first = next_tag(text, "Record", 0).unwrap();
        assert_eq!(first.attr("type"), Some("B"));
        let second = next_tag(text, "Record", first.end).unwrap();
        assert_eq!(second.attr("type"), Some("C"));
        assert!(next_tag(text, "Record", second.end).is_none());
    }

    #[test]
    fn test_next_tag_self_closing() {
        let text = r#"junk <Record type="HeartRate" value="72"/> tail"#;
        let tag = next_tag(text, "Record", 0).unwrap();
        assert!(tag.self_closing);
        assert_eq!(tag.name, "Record");
        assert_eq!(tag.attr("value"), Some("72"));
        assert_eq!(&text[tag.start..tag.end], r#"<Record type="HeartRate" value="72"/>"#);
    }

    #[test]
    fn test_next_tag_incomplete() {
        let text = r#"<Record type="HeartRate" val"#;
        assert!(next_tag(text, "Record", 0).is_none());
    }

    #[test]
    fn test_element_text() {
        let block = "<trkpt lat=\"1\" lon=\"2\">\n  <ele> 12.5 </ele>\n  <time>2023</time>\n</trkpt>";
        assert_eq!(element_text(block, "ele"), Some("12.5"));
        assert_eq!(element_text(block, "time"), Some("2023"));
        assert_eq!(element_text(block, "speed"), None);
    }
}
