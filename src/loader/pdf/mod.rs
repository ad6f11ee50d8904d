
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use super::{Document, LoadError, PAGE_KEY, SOURCE_KEY};

/// One document per page, in page order, with 0-based `page` metadata
pub fn load_pdf(path: &Path) -> Result<Vec<Document>, LoadError> {
    let pdf_error = |message: String| LoadError::Pdf {
        path: path.to_path_buf(),
        message,
    };

    let pdf = lopdf::Document::load(path).map_err(|e| pdf_error(e.to_string()))?;
    let pages = pdf.get_pages();
    debug!("{} has {} pages", path.display(), pages.len());

    let source = path.display().to_string();
    let mut documents = Vec::with_capacity(pages.len());

    // Page numbers from lopdf start at 1
    for page_number in pages.keys().copied() {
        let text = pdf
            .extract_text(&[page_number])
            .map_err(|e| pdf_error(format!("page {page_number}: {e}")))?;

        let mut metadata = BTreeMap::new();
        metadata.insert(SOURCE_KEY.to_string(), source.clone());
        metadata.insert(PAGE_KEY.to_string(), (page_number - 1).to_string());
        documents.push(Document::new(text, metadata));
    }

    Ok(documents)
}
