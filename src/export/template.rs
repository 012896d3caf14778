//! `{Tag}` templating over WordprocessingML
//!
//! Word splits text into runs freely, so a tag typed as `{ProjectName}` can
//! end up spread over several `<w:t>` elements. Rendering happens in three
//! passes over a part's XML:
//!
//! 1. tags split across runs are merged into the run where they start
//! 2. `{#name}...{/name}` sections are expanded once per loop item
//! 3. remaining tags are replaced inside `<w:t>` text only
//!
//! A section whose tags sit in one table row repeats the row. A section
//! whose tags each fill a paragraph of their own repeats the paragraphs in
//! between. Anything else repeats inline.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::tracking::text::NOT_AVAILABLE;
use crate::types::{Result, SitetrackError};

/// Tags bound to pictures. They render empty; the picture itself is
/// replaced separately.
pub const IMAGE_TAGS: [&str; 6] = [
    "ProjectPhoto1",
    "ProjectPhoto2",
    "ProjectPhoto3",
    "Project Photo 1",
    "Project Photo 2",
    "Project Photo 3",
];

/// Values for one render
#[derive(Debug, Clone, Default)]
pub struct TemplateData {
    pub fields: HashMap<String, String>,
    pub loops: HashMap<String, Vec<HashMap<String, String>>>,
}

impl TemplateData {
    pub fn set(&mut self, tag: &str, value: impl Into<String>) {
        self.fields.insert(tag.to_string(), value.into());
    }
}

fn segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<w:p[ >]|</w:p>|<w:t(?:\s[^>]*)?>(.*?)</w:t>")
            .expect("segment regex is valid")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{([^{}]+)\}").expect("tag regex is valid")
    })
}

fn open_loop_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{#\s*([A-Za-z0-9_]+)\s*\}").expect("loop regex is valid")
    })
}

/// One `<w:t>` element
#[derive(Debug, Clone)]
struct Segment {
    /// Byte range of the whole element
    outer: (usize, usize),
    /// Byte range of its text content
    inner: (usize, usize),
    /// Paragraph group the text belongs to
    group: usize,
}

fn scan_segments(xml: &str) -> Vec<Segment> {
    let mut group = 0;
    let mut segments = Vec::new();
    for caps in segment_regex().captures_iter(xml) {
        let Some(whole) = caps.get(0) else { continue };
        match caps.get(1) {
            Some(text) => segments.push(Segment {
                outer: (whole.start(), whole.end()),
                inner: (text.start(), text.end()),
                group,
            }),
            None => group += 1,
        }
    }
    segments
}

/// Write new texts back into the XML. `None` keeps a segment untouched.
fn rebuild(xml: &str, segments: &[Segment], texts: Vec<Option<String>>) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0;
    for (segment, text) in segments.iter().zip(texts) {
        let Some(text) = text else { continue };
        out.push_str(&xml[cursor..segment.outer.0]);
        out.push_str("<w:t xml:space=\"preserve\">");
        out.push_str(&text);
        out.push_str("</w:t>");
        cursor = segment.outer.1;
    }
    out.push_str(&xml[cursor..]);
    out
}

/// Move every tag that spans several runs into the run where it starts
pub fn merge_split_tags(xml: &str) -> String {
    let segments = scan_segments(xml);
    let mut texts: Vec<String> = segments
        .iter()
        .map(|s| xml[s.inner.0..s.inner.1].to_string())
        .collect();
    let mut changed = vec![false; segments.len()];

    let mut start = 0;
    while start < segments.len() {
        let group = segments[start].group;
        let end = segments[start..]
            .iter()
            .position(|s| s.group != group)
            .map_or(segments.len(), |p| start + p);
        merge_group(&mut texts[start..end], &mut changed[start..end]);
        start = end;
    }

    let texts = texts
        .into_iter()
        .zip(changed)
        .map(|(t, c)| c.then_some(t))
        .collect();
    rebuild(xml, &segments, texts)
}

fn merge_group(texts: &mut [String], changed: &mut [bool]) {
    // (segment, offset) of each byte of the paragraph text
    let mut positions = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        positions.extend((0..text.len()).map(|off| (i, off)));
    }
    let combined: String = texts.concat();

    let mut spans = Vec::new();
    let mut search = 0;
    while let Some(open) = combined[search..].find('{').map(|p| search + p) {
        let Some(close) = combined[open..].find('}').map(|p| open + p) else { break };
        let (first, _) = positions[open];
        let (last, _) = positions[close];
        if first != last {
            spans.push((open, close));
        }
        search = close + 1;
    }

    for (open, close) in spans.into_iter().rev() {
        let tag = combined[open..=close].to_string();
        let (first, first_off) = positions[open];
        let (last, last_off) = positions[close];
        texts[last].replace_range(..=last_off, "");
        for text in &mut texts[first + 1..last] {
            text.clear();
        }
        texts[first].truncate(first_off);
        texts[first].push_str(&tag);
        for flag in &mut changed[first..=last] {
            *flag = true;
        }
    }
}

/// Escape a value for XML text and turn newlines into breaks
fn text_value(value: &str) -> String {
    let escaped = value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");
    escaped
        .replace("\r\n", "\n")
        .replace('\n', "</w:t><w:br/><w:t xml:space=\"preserve\">")
}

fn resolve(tag: &str, scopes: &[&HashMap<String, String>]) -> String {
    let tag = tag.trim();
    if IMAGE_TAGS.contains(&tag) {
        return String::new();
    }
    scopes
        .iter()
        .find_map(|scope| scope.get(tag))
        .cloned()
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Replace the tags of one run's text. Section markers are left alone.
fn substitute_text(text: &str, scopes: &[&HashMap<String, String>]) -> Option<String> {
    if !tag_regex().is_match(text) {
        return None;
    }
    let replaced = tag_regex().replace_all(text, |caps: &Captures| {
        let tag = &caps[1];
        if tag.starts_with('#') || tag.starts_with('/') {
            caps[0].to_string()
        } else {
            text_value(&resolve(tag, scopes))
        }
    });
    Some(replaced.into_owned())
}

/// Replace plain tags inside text runs
fn substitute(xml: &str, scopes: &[&HashMap<String, String>]) -> String {
    let segments = scan_segments(xml);
    let texts = segments
        .iter()
        .map(|s| substitute_text(&xml[s.inner.0..s.inner.1], scopes))
        .collect();
    rebuild(xml, &segments, texts)
}

/// Substitute a fragment cut out of a paragraph. Its leading and trailing
/// text belongs to the `<w:t>` elements the section markers sit in.
fn substitute_inline(unit: &str, scopes: &[&HashMap<String, String>]) -> String {
    let raw = |text: &str| substitute_text(text, scopes).unwrap_or_else(|| text.to_string());
    let (Some(first), Some(last)) = (unit.find('<'), unit.rfind('>')) else {
        return raw(unit);
    };
    format!(
        "{}{}{}",
        raw(&unit[..first]),
        substitute(&unit[first..=last], scopes),
        raw(&unit[last + 1..])
    )
}

fn last_of(haystack: &str, needles: &[&str]) -> Option<usize> {
    needles.iter().filter_map(|n| haystack.rfind(n)).max()
}

/// Byte range of the element named `tag` enclosing `pos`, if any
fn enclosing(xml: &str, pos: usize, tag: &str) -> Option<(usize, usize)> {
    let open_plain = format!("<{}>", tag);
    let open_attr = format!("<{} ", tag);
    let close = format!("</{}>", tag);
    let start = last_of(&xml[..pos], &[&open_plain, &open_attr])?;
    let end = xml[pos..].find(&close).map(|p| pos + p + close.len())?;
    // A closing tag between start and pos means start is not enclosing
    if xml[start..pos].contains(&close) {
        return None;
    }
    Some((start, end))
}

/// Concatenated run text of a fragment
fn plain_text(xml: &str) -> String {
    scan_segments(xml)
        .iter()
        .map(|s| &xml[s.inner.0..s.inner.1])
        .collect()
}

fn expand_loops(mut xml: String, data: &TemplateData) -> Result<String> {
    loop {
        let found = open_loop_regex().captures(&xml).and_then(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            Some((name.as_str().to_string(), (whole.start(), whole.end())))
        });
        let Some((name, open)) = found else {
            return Ok(xml);
        };

        let close_re = Regex::new(&format!(r"\{{/\s*{}\s*\}}", regex::escape(&name)))
            .map_err(|e| SitetrackError::Template(e.to_string()))?;
        let close = close_re
            .find_at(&xml, open.1)
            .map(|m| (m.start(), m.end()))
            .ok_or_else(|| {
                SitetrackError::Template(format!("Section {{#{}}} is never closed", name))
            })?;

        let empty = Vec::new();
        let items = data.loops.get(&name).unwrap_or(&empty);
        xml = expand_section(&xml, open, close, items, &data.fields);
    }
}

fn expand_section(
    xml: &str,
    open: (usize, usize),
    close: (usize, usize),
    items: &[HashMap<String, String>],
    root: &HashMap<String, String>,
) -> String {
    let repeat = |unit: &str| -> String {
        items
            .iter()
            .map(|item| substitute(unit, &[item, root]))
            .collect()
    };

    // Table row holding both markers
    if let (Some(row), Some(close_row)) = (enclosing(xml, open.0, "w:tr"), enclosing(xml, close.0, "w:tr")) {
        if row == close_row {
            let mut unit = String::with_capacity(row.1 - row.0);
            unit.push_str(&xml[row.0..open.0]);
            unit.push_str(&xml[open.1..close.0]);
            unit.push_str(&xml[close.1..row.1]);
            return format!("{}{}{}", &xml[..row.0], repeat(&unit), &xml[row.1..]);
        }
    }

    // Markers alone in their own paragraphs
    if let (Some(p_open), Some(p_close)) = (enclosing(xml, open.0, "w:p"), enclosing(xml, close.0, "w:p")) {
        let marker_only = |range: (usize, usize), marker: (usize, usize)| {
            plain_text(&xml[range.0..range.1]).trim() == xml[marker.0..marker.1].trim()
        };
        if p_open != p_close && marker_only(p_open, open) && marker_only(p_close, close) {
            let unit = &xml[p_open.1..p_close.0];
            return format!("{}{}{}", &xml[..p_open.0], repeat(unit), &xml[p_close.1..]);
        }
    }

    let unit = &xml[open.1..close.0];
    let inline: String = items
        .iter()
        .map(|item| substitute_inline(unit, &[item, root]))
        .collect();
    format!("{}{}{}", &xml[..open.0], inline, &xml[close.1..])
}

/// Render one XML part
pub fn render_part(xml: &str, data: &TemplateData) -> Result<String> {
    let merged = merge_split_tags(xml);
    let expanded = expand_loops(merged, data)?;
    Ok(substitute(&expanded, &[&data.fields]))
}

/// Whether a zip entry holds templated text
pub fn is_templated_part(name: &str) -> bool {
    name == "word/document.xml"
        || (name.starts_with("word/header") && name.ends_with(".xml"))
        || (name.starts_with("word/footer") && name.ends_with(".xml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn para(runs: &[&str]) -> String {
        let runs: String = runs
            .iter()
            .map(|t| format!("<w:r><w:t>{}</w:t></w:r>", t))
            .collect();
        format!("<w:p>{}</w:p>", runs)
    }

    fn data() -> TemplateData {
        let mut data = TemplateData::default();
        data.set("ProjectName", "Seawall & Dike");
        data.set("Remarks", "line one\nline two");
        data
    }

    #[test]
    fn test_merges_tag_split_over_runs() {
        let xml = para(&["Name: {Pro", "ject", "Name} end"]);
        let merged = merge_split_tags(&xml);
        assert_eq!(plain_text(&merged), "Name: {ProjectName} end");
        assert!(merged.contains("{ProjectName}"));
    }

    #[test]
    fn test_substitutes_and_escapes() {
        let out = render_part(&para(&["{Project", "Name}"]), &data()).unwrap();
        assert!(out.contains("Seawall &amp; Dike"));
        assert!(!out.contains('{'));
    }

    #[test]
    fn test_missing_tag_is_na_and_image_tag_empty() {
        let out = render_part(&para(&["[{Unknown}][{ProjectPhoto1}]"]), &data()).unwrap();
        assert_eq!(plain_text(&out), "[n/a][]");
    }

    #[test]
    fn test_newlines_become_breaks() {
        let out = render_part(&para(&["{Remarks}"]), &data()).unwrap();
        assert!(out.contains("line one</w:t><w:br/><w:t xml:space=\"preserve\">line two"));
    }

    #[test]
    fn test_row_loop_repeats_table_row() {
        let row = format!(
            "<w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr>",
            para(&["{#accomplishments}{date}"]),
            para(&["{percent}{/accomplishments}"])
        );
        let xml = format!("<w:tbl><w:tr><w:tc>{}</w:tc></w:tr>{}</w:tbl>", para(&["Header"]), row);

        let mut data = data();
        data.loops.insert(
            "accomplishments".into(),
            vec![
                HashMap::from([("date".into(), "2024-01-01".into()), ("percent".into(), "10.00%".into())]),
                HashMap::from([("date".into(), "2024-02-01".into())]),
            ],
        );

        let out = render_part(&xml, &data).unwrap();
        assert_eq!(out.matches("<w:tr>").count(), 3);
        assert_eq!(plain_text(&out), "Header2024-01-0110.00%2024-02-01n/a");
    }

    #[test]
    fn test_paragraph_loop_drops_marker_paragraphs() {
        let xml = format!(
            "{}{}{}",
            para(&["{#accomplishments}"]),
            para(&["- {date} {ProjectName}"]),
            para(&["{/accomplishments}"])
        );
        let mut data = data();
        data.loops.insert(
            "accomplishments".into(),
            vec![
                HashMap::from([("date".into(), "A".into())]),
                HashMap::from([("date".into(), "B".into())]),
            ],
        );

        let out = render_part(&xml, &data).unwrap();
        assert_eq!(out.matches("<w:p>").count(), 2);
        assert_eq!(plain_text(&out), "- A Seawall &amp; Dike- B Seawall &amp; Dike");
    }

    #[test]
    fn test_empty_loop_removes_section() {
        let xml = para(&["before {#accomplishments}{date}{/accomplishments}after"]);
        let out = render_part(&xml, &data()).unwrap();
        assert_eq!(plain_text(&out), "before after");
    }

    fn two_dates() -> TemplateData {
        let mut data = data();
        data.loops.insert(
            "accomplishments".into(),
            vec![
                HashMap::from([("date".into(), "A".into())]),
                HashMap::from([("date".into(), "B & C".into())]),
            ],
        );
        data
    }

    #[test]
    fn test_inline_loop_within_one_run() {
        let xml = para(&["{#accomplishments}[{date}]{/accomplishments}"]);
        let out = render_part(&xml, &two_dates()).unwrap();
        assert_eq!(plain_text(&out), "[A][B &amp; C]");
    }

    #[test]
    fn test_inline_loop_across_runs() {
        let xml = para(&["x {#accomplishments}[", "{date}", "]{/accomplishments} y"]);
        let out = render_part(&xml, &two_dates()).unwrap();
        assert_eq!(plain_text(&out), "x [A][B &amp; C] y");
        assert_eq!(out.matches("<w:t").count(), out.matches("</w:t>").count());
    }

    #[test]
    fn test_unclosed_loop_is_an_error() {
        let xml = para(&["{#accomplishments}{date}"]);
        assert!(matches!(
            render_part(&xml, &data()),
            Err(SitetrackError::Template(_))
        ));
    }

    #[test]
    fn test_templated_parts() {
        assert!(is_templated_part("word/document.xml"));
        assert!(is_templated_part("word/header1.xml"));
        assert!(!is_templated_part("word/styles.xml"));
    }
}
