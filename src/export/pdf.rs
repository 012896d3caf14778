//! DOCX to PDF conversion through an HTTP converter
//!
//! Two kinds of endpoint are supported: Gotenberg's LibreOffice route,
//! which takes a multipart form, and plain endpoints that take the DOCX as
//! the raw request body.

use reqwest::multipart::{Form, Part};
use std::fmt;
use tracing::{debug, info};

use crate::types::{Result, SitetrackError};

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Gotenberg,
    Raw,
}

impl EndpointKind {
    /// Explicit type wins when it says gotenberg; otherwise the URL decides
    pub fn detect(configured: Option<&str>, endpoint: &str) -> Self {
        let configured = configured.map(|t| t.trim().to_lowercase());
        let url = endpoint.to_lowercase();
        if configured.as_deref() == Some("gotenberg")
            || url.contains("/forms/libreoffice/convert")
            || url.contains("/convert/office")
        {
            EndpointKind::Gotenberg
        } else {
            EndpointKind::Raw
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Gotenberg => write!(f, "gotenberg"),
            EndpointKind::Raw => write!(f, "raw"),
        }
    }
}

#[derive(Clone)]
pub struct PdfConverter {
    http: reqwest::Client,
    endpoint: String,
    kind: EndpointKind,
}

impl PdfConverter {
    pub fn new(http: reqwest::Client, endpoint: &str, configured_kind: Option<&str>) -> Self {
        Self {
            http,
            endpoint: endpoint.trim().to_string(),
            kind: EndpointKind::detect(configured_kind, endpoint),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn convert(&self, docx: Vec<u8>) -> Result<Vec<u8>> {
        debug!("Converting {} byte DOCX via {} endpoint", docx.len(), self.kind);

        let request = match self.kind {
            EndpointKind::Gotenberg => {
                let part = Part::bytes(docx)
                    .file_name("document.docx")
                    .mime_str(DOCX_CONTENT_TYPE)?;
                self.http
                    .post(&self.endpoint)
                    .multipart(Form::new().part("files", part))
            }
            EndpointKind::Raw => self
                .http
                .post(&self.endpoint)
                .header(reqwest::header::CONTENT_TYPE, DOCX_CONTENT_TYPE)
                .body(docx),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SitetrackError::Conversion(format!(
                "PDF conversion failed: {}",
                status
            )));
        }

        let pdf = response.bytes().await?;
        if pdf.is_empty() {
            return Err(SitetrackError::Conversion(
                "PDF conversion returned an empty body".into(),
            ));
        }

        info!("Converted report to PDF ({} bytes)", pdf.len());
        Ok(pdf.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    #[test]
    fn test_detect_endpoint_kind() {
        assert_eq!(
            EndpointKind::detect(None, "http://gotenberg:3000/forms/libreoffice/convert"),
            EndpointKind::Gotenberg
        );
        assert_eq!(
            EndpointKind::detect(None, "http://conv/Convert/Office"),
            EndpointKind::Gotenberg
        );
        assert_eq!(
            EndpointKind::detect(Some("Gotenberg"), "http://conv/pdf"),
            EndpointKind::Gotenberg
        );
        assert_eq!(EndpointKind::detect(Some("raw"), "http://conv/pdf"), EndpointKind::Raw);
        assert_eq!(EndpointKind::detect(None, "http://conv/pdf"), EndpointKind::Raw);
    }

    #[tokio::test]
    async fn test_raw_endpoint_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pdf"))
            .and(header("content-type", DOCX_CONTENT_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let converter = PdfConverter::new(reqwest::Client::new(), &format!("{}/pdf", server.uri()), None);
        let pdf = converter.convert(b"docx".to_vec()).await.unwrap();
        assert_eq!(pdf, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn test_gotenberg_sends_multipart_files_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/forms/libreoffice/convert"))
            .and(|req: &Request| {
                let body = String::from_utf8_lossy(&req.body);
                body.contains("name=\"files\"") && body.contains("filename=\"document.docx\"")
            })
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let converter = PdfConverter::new(
            reqwest::Client::new(),
            &format!("{}/forms/libreoffice/convert", server.uri()),
            None,
        );
        assert_eq!(converter.kind(), EndpointKind::Gotenberg);
        assert!(converter.convert(b"docx".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_error_status_and_empty_body_fail() {
        let server = MockServer::start().await;
        Mock::given(path("/fail"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(path("/empty"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        for route in ["fail", "empty"] {
            let converter = PdfConverter::new(
                reqwest::Client::new(),
                &format!("{}/{}", server.uri(), route),
                Some("raw"),
            );
            let err = converter.convert(b"docx".to_vec()).await.unwrap_err();
            assert!(matches!(err, SitetrackError::Conversion(_)), "{route}: {err}");
        }
    }
}
