//! Picture replacement by alt text
//!
//! Template pictures carry their slot name in the drawing's `descr`
//! attribute (`ProjectPhoto1`, or `Project Photo 1`). The picture's
//! relationship id is looked up near that attribute and its media part is
//! overwritten with the project photo. Slots without a photo lose the
//! drawing and show `n/a` instead.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::photos::{is_data_url, to_png, DataUrl};
use crate::types::{Result, SitetrackError};

/// Number of photo slots in the report
pub const PHOTO_SLOTS: usize = 3;

/// How far past the alt text to look for the embed id
const EMBED_WINDOW: usize = 5000;

/// Content of one photo slot
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoSlot {
    /// No photo; the drawing becomes `n/a`
    Empty,
    Png(Vec<u8>),
    /// The photo could not be loaded; the template picture is kept
    Unavailable,
}

/// Result of placing photos into a document
#[derive(Debug, Default)]
pub struct Placement {
    /// Rewritten `word/document.xml`, when any drawing was removed
    pub document_xml: Option<String>,
    /// Media parts to overwrite, keyed by zip path
    pub media: Vec<(String, Vec<u8>)>,
}

fn slot_keys(slot: usize) -> [String; 2] {
    [
        format!("ProjectPhoto{}", slot + 1),
        format!("Project Photo {}", slot + 1),
    ]
}

fn embed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"r:embed="(rId[0-9]+)""#).expect("embed regex is valid")
    })
}

fn relationship_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<Relationship\s[^>]*>").expect("rels regex is valid")
    })
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Relationship id of the picture described by `key`
pub fn find_embed_id(document_xml: &str, key: &str) -> Option<String> {
    let idx = document_xml.find(&format!("descr=\"{}\"", key))?;

    let end = floor_boundary(document_xml, idx + EMBED_WINDOW);
    if let Some(caps) = embed_regex().captures(&document_xml[idx..end]) {
        return Some(caps[1].to_string());
    }

    let start = floor_boundary(document_xml, idx.saturating_sub(EMBED_WINDOW));
    embed_regex()
        .captures_iter(&document_xml[start..idx])
        .last()
        .map(|caps| caps[1].to_string())
}

fn attribute<'a>(element: &'a str, name: &str) -> Option<&'a str> {
    let marker = format!("{}=\"", name);
    let mut search = 0;
    while let Some(pos) = element[search..].find(&marker).map(|p| search + p) {
        // Skip matches inside longer attribute names such as TargetMode
        let preceded_ok = pos == 0 || element.as_bytes()[pos - 1].is_ascii_whitespace();
        let value_start = pos + marker.len();
        if preceded_ok {
            let value_end = element[value_start..].find('"')? + value_start;
            return Some(&element[value_start..value_end]);
        }
        search = value_start;
    }
    None
}

/// Zip path of the media part behind a relationship id
pub fn media_path(rels_xml: &str, rid: &str) -> Option<String> {
    relationship_regex()
        .find_iter(rels_xml)
        .map(|m| m.as_str())
        .find(|element| attribute(element, "Id") == Some(rid))
        .and_then(|element| attribute(element, "Target"))
        .map(|target| {
            let target = target.replace('\\', "/");
            match target.strip_prefix('/') {
                Some(absolute) => absolute.to_string(),
                None => format!("word/{}", target),
            }
        })
}

/// Replace each drawing described by `key` with literal `n/a` text
fn drop_drawings(document_xml: &mut String, key: &str) -> bool {
    let marker = format!("descr=\"{}\"", key);
    let mut replaced = false;
    for _ in 0..PHOTO_SLOTS {
        let Some(idx) = document_xml.find(&marker) else { break };
        let Some(start) = document_xml[..idx].rfind("<w:drawing") else { break };
        let Some(end) = document_xml[idx..].find("</w:drawing>").map(|p| idx + p) else { break };
        document_xml.replace_range(start..end + "</w:drawing>".len(), "<w:t>n/a</w:t>");
        replaced = true;
    }
    replaced
}

/// Work out which parts change for the given photo slots
pub fn place_photos(document_xml: &str, rels_xml: &str, slots: &[PhotoSlot]) -> Placement {
    let mut placement = Placement::default();
    let mut xml = document_xml.to_string();
    let mut xml_changed = false;

    for (slot, photo) in slots.iter().enumerate().take(PHOTO_SLOTS) {
        let keys = slot_keys(slot);
        match photo {
            PhotoSlot::Png(bytes) => {
                let mut found = false;
                for key in &keys {
                    let Some(rid) = find_embed_id(&xml, key) else { continue };
                    found = true;
                    match media_path(rels_xml, &rid) {
                        Some(path) => {
                            debug!("Replacing picture {} -> {}", key, path);
                            placement.media.push((path, bytes.clone()));
                        }
                        None => warn!("Relationship target not found for {}", rid),
                    }
                }
                if !found {
                    warn!("No picture with alt text {} in template", keys[0]);
                }
            }
            PhotoSlot::Empty => {
                for key in &keys {
                    xml_changed |= drop_drawings(&mut xml, key);
                }
            }
            PhotoSlot::Unavailable => {}
        }
    }

    if xml_changed {
        placement.document_xml = Some(xml);
    }
    placement
}

/// PNG bytes for a stored photo: a data URL or an http(s) URL
pub async fn load_photo(http: &reqwest::Client, value: &str) -> Result<Vec<u8>> {
    let value = value.trim();
    if is_data_url(value) {
        let photo = DataUrl::parse(value)?;
        if photo.mime.eq_ignore_ascii_case("image/png") {
            return Ok(photo.bytes);
        }
        return to_png(&photo.bytes);
    }

    let lower = value.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        let bytes = http
            .get(value)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        return to_png(&bytes);
    }

    Err(SitetrackError::Image(
        "Photo is neither a data URL nor an http(s) URL".into(),
    ))
}

/// Photo slots for a project's display photos. Load failures are logged
/// and leave the template picture in place.
pub async fn load_slots(http: &reqwest::Client, photos: &[String]) -> Vec<PhotoSlot> {
    let mut slots = Vec::with_capacity(PHOTO_SLOTS);
    for i in 0..PHOTO_SLOTS {
        let slot = match photos.get(i).filter(|p| !p.trim().is_empty()) {
            None => PhotoSlot::Empty,
            Some(photo) => match load_photo(http, photo).await {
                Ok(png) => PhotoSlot::Png(png),
                Err(e) => {
                    warn!("Photo {} could not be loaded: {}", i + 1, e);
                    PhotoSlot::Unavailable
                }
            },
        };
        slots.push(slot);
    }
    slots
}
