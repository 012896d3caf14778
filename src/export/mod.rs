//! Site inspection report export
//!
//! A project is rendered into a Word template (`{Tag}` placeholders, an
//! `accomplishments` table section and up to three photos) and optionally
//! converted to PDF by an external converter.

pub mod images;
pub mod pdf;
pub mod report;
pub mod template;

use chrono::NaiveDate;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::Args;
use crate::db::schemas::{AppConfigDoc, Project};
use crate::types::{Result, SitetrackError};

pub use images::{PhotoSlot, Placement};
pub use pdf::{EndpointKind, PdfConverter, DOCX_CONTENT_TYPE, PDF_CONTENT_TYPE};
pub use report::{export_filename, report_data};
pub use template::TemplateData;

/// Template locations tried after the configured one, relative to the
/// assets root
pub const TEMPLATE_CANDIDATES: [&str; 3] = [
    "assets/site_inspection_template.docx",
    "assets/templates/site_inspection_template.docx",
    "site_inspection_template.docx",
];

const DOCUMENT_PART: &str = "word/document.xml";
const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";

/// Where the template comes from and where PDFs are converted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSettings {
    pub template_url: Option<String>,
    pub assets_root: PathBuf,
    pub pdf_endpoint: Option<String>,
    pub pdf_endpoint_type: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ExportSettings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            template_url: non_empty(&args.docx_template_url),
            assets_root: args.assets_root.clone(),
            pdf_endpoint: non_empty(&args.pdf_endpoint),
            pdf_endpoint_type: non_empty(&args.pdf_endpoint_type),
        }
    }

    /// Apply the admin-editable overrides from `config/app`
    pub fn with_overrides(mut self, overrides: &AppConfigDoc) -> Self {
        if let Some(url) = non_empty(&overrides.template_url) {
            self.template_url = Some(url);
        }
        if let Some(endpoint) = non_empty(&overrides.pdf_endpoint) {
            self.pdf_endpoint = Some(endpoint);
        }
        if let Some(kind) = non_empty(&overrides.pdf_endpoint_type) {
            self.pdf_endpoint_type = Some(kind);
        }
        self
    }

    /// Template sources in the order they are tried
    pub fn template_candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = self.template_url.iter().cloned().collect();
        candidates.extend(TEMPLATE_CANDIDATES.iter().map(|c| c.to_string()));
        candidates
    }
}

fn is_http(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

async fn fetch_source(http: &reqwest::Client, root: &Path, source: &str) -> Result<Vec<u8>> {
    if is_http(source) {
        let response = http.get(source).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SitetrackError::Template(status.to_string()));
        }
        return Ok(response.bytes().await?.to_vec());
    }
    let path = Path::new(source);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    Ok(tokio::fs::read(&path).await?)
}

/// Load the first template that can be read
pub async fn load_template(http: &reqwest::Client, settings: &ExportSettings) -> Result<Vec<u8>> {
    let mut tried = Vec::new();
    for source in settings.template_candidates() {
        match fetch_source(http, &settings.assets_root, &source).await {
            Ok(bytes) => {
                debug!("Using template {}", source);
                return Ok(bytes);
            }
            Err(e) => tried.push(format!("{} -> {}", source, e)),
        }
    }
    Err(SitetrackError::Template(format!(
        "Failed to load template from any path. Tried: {}",
        tried.join(" | ")
    )))
}

fn read_entries(docx: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(docx))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if !file.is_file() {
            continue;
        }
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        entries.push((file.name().to_string(), contents));
    }
    Ok(entries)
}

fn write_entries(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, contents) in entries {
        writer.start_file(name, options)?;
        writer.write_all(&contents)?;
    }
    Ok(writer.finish()?.into_inner())
}

fn part_text(name: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| SitetrackError::Template(format!("{} is not valid UTF-8", name)))
}

/// Fill a template archive. Photo placement never fails the render.
pub fn render_docx(template: &[u8], data: &TemplateData, photos: &[PhotoSlot]) -> Result<Vec<u8>> {
    let mut entries = read_entries(template)?;
    if !entries.iter().any(|(name, _)| name == DOCUMENT_PART) {
        return Err(SitetrackError::Template(format!(
            "Template has no {}",
            DOCUMENT_PART
        )));
    }

    for (name, contents) in entries.iter_mut() {
        if template::is_templated_part(name) {
            let xml = part_text(name, std::mem::take(contents))?;
            *contents = template::render_part(&xml, data)?.into_bytes();
        }
    }

    let rels = entries
        .iter()
        .find(|(name, _)| name == DOCUMENT_RELS_PART)
        .and_then(|(_, bytes)| String::from_utf8(bytes.clone()).ok());
    let document = entries
        .iter()
        .find(|(name, _)| name == DOCUMENT_PART)
        .and_then(|(_, bytes)| String::from_utf8(bytes.clone()).ok());

    match (document, rels) {
        (Some(document), Some(rels)) => {
            let placement = images::place_photos(&document, &rels, photos);
            apply_placement(&mut entries, placement);
        }
        _ => warn!("Template has no {}, photos skipped", DOCUMENT_RELS_PART),
    }

    write_entries(entries)
}

fn apply_placement(entries: &mut Vec<(String, Vec<u8>)>, placement: Placement) {
    let mut updates: HashMap<String, Vec<u8>> = placement.media.into_iter().collect();
    if let Some(xml) = placement.document_xml {
        updates.insert(DOCUMENT_PART.to_string(), xml.into_bytes());
    }
    for (name, contents) in entries.iter_mut() {
        if let Some(bytes) = updates.remove(name.as_str()) {
            *contents = bytes;
        }
    }
    // Targets that did not exist yet become new parts
    let mut added: Vec<(String, Vec<u8>)> = updates.into_iter().collect();
    added.sort_by(|a, b| a.0.cmp(&b.0));
    entries.extend(added);
}

/// Report rendering with a shared HTTP client
#[derive(Clone)]
pub struct Exporter {
    http: reqwest::Client,
}

impl Exporter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn docx(
        &self,
        settings: &ExportSettings,
        project: &Project,
        today: NaiveDate,
    ) -> Result<Vec<u8>> {
        let template = load_template(&self.http, settings).await?;
        let data = report_data(project, today);
        let photos = project.display_photos();
        info!("Exporting project {} with {} photos", project.id, photos.len());
        let slots = images::load_slots(&self.http, &photos).await;
        render_docx(&template, &data, &slots)
    }

    pub async fn pdf(&self, settings: &ExportSettings, docx: Vec<u8>) -> Result<Vec<u8>> {
        let endpoint = settings.pdf_endpoint.as_deref().ok_or_else(|| {
            SitetrackError::Conversion("PDF conversion endpoint is not configured".into())
        })?;
        PdfConverter::new(self.http.clone(), endpoint, settings.pdf_endpoint_type.as_deref())
            .convert(docx)
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::schemas::Accomplishment;

    /// Minimal template with a photo slot and an accomplishment table
    pub(crate) fn sample_template() -> Vec<u8> {
        let document = concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<w:document><w:body>"#,
            r#"<w:p><w:r><w:t>{Project</w:t></w:r><w:r><w:t>Name} - {Status}</w:t></w:r></w:p>"#,
            r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t>{#accomplishments}{date}</w:t></w:r></w:p></w:tc>"#,
            r#"<w:tc><w:p><w:r><w:t>{percent}{/accomplishments}</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
            r#"<w:p><w:r><w:drawing><wp:docPr id="1" descr="ProjectPhoto1"/>"#,
            r#"<a:blip r:embed="rId7"/></w:drawing></w:r></w:p>"#,
            r#"</w:body></w:document>"#
        );
        let rels = r#"<Relationships><Relationship Id="rId7" Type="image" Target="media/image1.png"/></Relationships>"#;
        write_entries(vec![
            ("[Content_Types].xml".into(), b"<Types/>".to_vec()),
            (DOCUMENT_PART.into(), document.as_bytes().to_vec()),
            (DOCUMENT_RELS_PART.into(), rels.as_bytes().to_vec()),
            ("word/media/image1.png".into(), vec![0u8; 4]),
        ])
        .unwrap()
    }

    fn entry(entries: &[(String, Vec<u8>)], name: &str) -> String {
        let bytes = &entries.iter().find(|(n, _)| n == name).unwrap().1;
        String::from_utf8_lossy(bytes).to_string()
    }

    fn project() -> Project {
        Project {
            id: "p1".into(),
            name: "Seawall".into(),
            accomplishments: vec![
                Accomplishment {
                    date: NaiveDate::from_ymd_opt(2024, 1, 1),
                    percent: 10.0,
                    ..Default::default()
                },
                Accomplishment {
                    date: NaiveDate::from_ymd_opt(2024, 2, 1),
                    percent: 100.0,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_render_fills_document() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let data = report_data(&project(), today);
        let out = render_docx(&sample_template(), &data, &[PhotoSlot::Png(vec![9, 9])]).unwrap();

        let entries = read_entries(&out).unwrap();
        let document = entry(&entries, DOCUMENT_PART);
        assert!(document.contains("Seawall - Completed"));
        assert!(document.contains("2024-01-01"));
        assert!(document.contains("100.00%"));
        assert!(!document.contains("{"));
        assert_eq!(
            entries.iter().find(|(n, _)| n == "word/media/image1.png").unwrap().1,
            vec![9, 9]
        );
    }

    #[test]
    fn test_missing_photo_becomes_text() {
        let data = report_data(&project(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        let out = render_docx(&sample_template(), &data, &[PhotoSlot::Empty]).unwrap();
        let document = entry(&read_entries(&out).unwrap(), DOCUMENT_PART);
        assert!(!document.contains("<w:drawing>"));
        assert!(document.contains("<w:t>n/a</w:t>"));
    }

    #[test]
    fn test_not_a_docx() {
        let data = TemplateData::default();
        assert!(render_docx(b"plain text", &data, &[]).is_err());
    }

    #[test]
    fn test_overrides_replace_cli_settings() {
        let settings = ExportSettings {
            template_url: Some("cli.docx".into()),
            pdf_endpoint: Some("http://cli/pdf".into()),
            ..Default::default()
        };
        let overrides = AppConfigDoc {
            pdf_endpoint: Some("http://gotenberg/forms/libreoffice/convert".into()),
            pdf_endpoint_type: Some("  ".into()),
            template_url: None,
        };
        let merged = settings.with_overrides(&overrides);
        assert_eq!(merged.template_url.as_deref(), Some("cli.docx"));
        assert_eq!(
            merged.pdf_endpoint.as_deref(),
            Some("http://gotenberg/forms/libreoffice/convert")
        );
        assert!(merged.pdf_endpoint_type.is_none());
        assert_eq!(merged.template_candidates().len(), 4);
    }

    #[tokio::test]
    async fn test_load_template_falls_back_and_reports_tries() {
        let dir = tempfile::tempdir().unwrap();
        let http = reqwest::Client::new();
        let settings = ExportSettings {
            template_url: Some("missing.docx".into()),
            assets_root: dir.path().to_path_buf(),
            ..Default::default()
        };

        let err = load_template(&http, &settings).await.unwrap_err().to_string();
        assert!(err.contains("Tried: missing.docx -> "));
        assert!(err.contains("assets/templates/site_inspection_template.docx -> "));

        let template = sample_template();
        std::fs::create_dir_all(dir.path().join("assets/templates")).unwrap();
        std::fs::write(
            dir.path().join("assets/templates/site_inspection_template.docx"),
            &template,
        )
        .unwrap();
        let bytes = load_template(&http, &settings).await.unwrap();
        assert_eq!(bytes, template);
    }

    #[tokio::test]
    async fn test_pdf_requires_endpoint() {
        let exporter = Exporter::new(reqwest::Client::new());
        let err = exporter
            .pdf(&ExportSettings::default(), b"docx".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, SitetrackError::Conversion(_)));
    }
}
