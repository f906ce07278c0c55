//! Research paper extraction from PDF.
//!
//! Text extraction is delegated to `pdf-extract`. What happens here is
//! line-level layout recovery: title and author lines, the abstract,
//! numbered and unnumbered section headings, and paragraphs stitched back
//! together across line and page breaks.

use std::fs;
use std::panic;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::FactoredError;

/// Headings that papers commonly leave unnumbered.
const UNNUMBERED_SECTIONS: [&str; 2] = ["introduction", "references"];
/// First words of figure/table captions.
const CAPTION_WORDS: [&str; 4] = ["figure", "table", "equation", "algorithm"];
const SENTENCE_ENDINGS: [char; 3] = ['.', '!', '?'];
/// Headings are short; longer numbered lines are body text.
const MAX_HEADING_WORDS: usize = 10;

/// An extracted paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_paragraphs: Vec<String>,
    pub sections: Vec<Section>,
}

/// A high-level section ("3 Model Architecture").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub number: u32,
    pub heading: String,
    /// 1-based page the heading appears on.
    pub page: usize,
    /// The first subsection holds the text between the section heading
    /// and its first numbered subsection; it shares the section's heading.
    pub subsections: Vec<Subsection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subsection {
    /// Dotted number, e.g. "3.2".
    pub number: String,
    pub heading: String,
    pub page: usize,
    pub paragraphs: Vec<String>,
}

/// One paragraph with its location in the paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphRef {
    pub heading: String,
    pub subsection: String,
    /// 1-based within its subsection.
    pub number: usize,
    pub text: String,
}

impl Section {
    /// All paragraphs of the section, subsections included, in order.
    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.subsections
            .iter()
            .flat_map(|s| s.paragraphs.iter().map(String::as_str))
    }

    /// Section body as one string, paragraphs separated by blank lines.
    pub fn text(&self) -> String {
        self.paragraphs().collect::<Vec<_>>().join("\n\n")
    }

    fn is_references(&self) -> bool {
        self.heading.eq_ignore_ascii_case("references")
    }
}

impl Document {
    pub fn abstract_text(&self) -> String {
        self.abstract_paragraphs.join("\n\n")
    }

    /// Ordered `(heading, text)` view of the body.
    pub fn section_texts(&self) -> Vec<(&str, String)> {
        self.sections
            .iter()
            .map(|s| (s.heading.as_str(), s.text()))
            .collect()
    }

    pub fn section(&self, number: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.number == number)
    }

    /// Flatten the paper into paragraphs: abstract first, then every
    /// section up to (not including) the references.
    pub fn paragraphs(&self) -> Vec<ParagraphRef> {
        let mut out: Vec<ParagraphRef> = self
            .abstract_paragraphs
            .iter()
            .enumerate()
            .map(|(i, text)| ParagraphRef {
                heading: "abstract".to_string(),
                subsection: "1".to_string(),
                number: i + 1,
                text: text.clone(),
            })
            .collect();

        for section in self.sections.iter().take_while(|s| !s.is_references()) {
            for subsection in &section.subsections {
                for (i, text) in subsection.paragraphs.iter().enumerate() {
                    out.push(ParagraphRef {
                        heading: subsection.heading.clone(),
                        subsection: subsection.number.clone(),
                        number: i + 1,
                        text: text.clone(),
                    });
                }
            }
        }
        out
    }
}

/// Extract a paper from a PDF file.
pub fn extract_document<P: AsRef<Path>>(path: P) -> Result<Document, FactoredError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| {
        FactoredError::ExtractionError(format!("cannot read {}: {e}", path.display()))
    })?;
    info!(path = %path.display(), bytes = bytes.len(), "extracting paper");
    extract_document_from_bytes(&bytes)
}

/// Extract a paper from PDF bytes.
pub fn extract_document_from_bytes(bytes: &[u8]) -> Result<Document, FactoredError> {
    let pages = extract_pages(bytes)?;
    parse_pages(&pages)
}

/// Per-page plain text from the PDF library.
fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, FactoredError> {
    match panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(FactoredError::ExtractionError(e.to_string())),
        Err(_) => Err(FactoredError::ExtractionError(
            "PDF library aborted on malformed input".to_string(),
        )),
    }
}

/// Recover paper structure from per-page text.
pub fn parse_pages<S: AsRef<str>>(pages: &[S]) -> Result<Document, FactoredError> {
    let mut parser = PaperParser::default();
    for (page_index, page) in pages.iter().enumerate() {
        for line in page.as_ref().lines() {
            parser.feed(line, page_index + 1);
        }
    }
    parser.finish()
}

/// What a cleaned line turned out to be.
#[derive(Debug, PartialEq)]
enum LineKind {
    Heading { high: u32, number: String, name: String },
    UnnumberedHeading { name: String },
    Body,
    Skip,
}

#[derive(Debug, Default)]
struct PaperParser {
    title: Option<String>,
    authors: Option<String>,
    abstract_paragraphs: Vec<String>,
    sections: Vec<Section>,
    /// Paragraph still waiting for its sentence ending.
    hanging: String,
}

impl PaperParser {
    fn current_section(&self) -> u32 {
        self.sections.last().map(|s| s.number).unwrap_or(0)
    }

    fn feed(&mut self, raw: &str, page: usize) {
        let line = collapse_whitespace(raw);
        if line.chars().count() < 3 {
            return;
        }

        if self.title.is_none() {
            debug!(title = %line, "title");
            self.title = Some(line);
            return;
        }
        if self.authors.is_none() {
            debug!(authors = %line, "authors");
            self.authors = Some(line);
            return;
        }

        match classify(&line, !self.hanging.is_empty()) {
            LineKind::Heading { high, number, name } => self.heading(high, number, name, page),
            LineKind::UnnumberedHeading { name } => {
                let high = self.current_section() + 1;
                self.heading(high, high.to_string(), name, page);
            }
            LineKind::Body => self.body(&line),
            LineKind::Skip => {}
        }
    }

    fn heading(&mut self, high: u32, number: String, name: String, page: usize) {
        let current = self.current_section();

        if high != current {
            // Tolerate up to one missed section; anything further away is noise.
            if high < current || high > current + 2 {
                debug!(high, current, line = %name, "ignoring out-of-order heading");
                return;
            }
            self.flush_paragraph();
            debug!(number = %number, heading = %name, page, "section");
            self.sections.push(Section {
                number: high,
                heading: name.clone(),
                page,
                subsections: vec![Subsection {
                    number: high.to_string(),
                    heading: name,
                    page,
                    paragraphs: Vec::new(),
                }],
            });
        } else {
            self.flush_paragraph();
            debug!(number = %number, heading = %name, page, "subsection");
            if let Some(section) = self.sections.last_mut() {
                section.subsections.push(Subsection {
                    number,
                    heading: name,
                    page,
                    paragraphs: Vec::new(),
                });
            }
        }
    }

    fn body(&mut self, line: &str) {
        let line = strip_footnote_marker(line);
        match line.strip_suffix('-') {
            Some(stem) => self.hanging.push_str(stem),
            None => {
                self.hanging.push_str(line);
                self.hanging.push(' ');
            }
        }
        if line.ends_with(SENTENCE_ENDINGS) {
            self.flush_paragraph();
        }
    }

    fn flush_paragraph(&mut self) {
        let paragraph = self.hanging.trim().to_string();
        self.hanging.clear();
        if paragraph.is_empty() {
            return;
        }

        let target = self
            .sections
            .last_mut()
            .and_then(|s| s.subsections.last_mut())
            .map(|s| &mut s.paragraphs);
        match target {
            Some(paragraphs) => paragraphs.push(paragraph),
            None => self.abstract_paragraphs.push(paragraph),
        }
    }

    fn finish(mut self) -> Result<Document, FactoredError> {
        self.flush_paragraph();

        let title = self.title.ok_or_else(|| {
            FactoredError::ExtractionError("no text found in document".to_string())
        })?;
        if self.sections.is_empty() {
            warn!(title = %title, "no section headings recognised");
        }
        info!(
            title = %title,
            sections = self.sections.len(),
            abstract_paragraphs = self.abstract_paragraphs.len(),
            "paper parsed"
        );

        Ok(Document {
            title,
            authors: self.authors.unwrap_or_default(),
            abstract_paragraphs: self.abstract_paragraphs,
            sections: self.sections,
        })
    }
}

fn classify(line: &str, continuing: bool) -> LineKind {
    let lower = line.to_lowercase();
    if lower == "abstract" {
        return LineKind::Skip;
    }
    if UNNUMBERED_SECTIONS.contains(&lower.as_str()) {
        return LineKind::UnnumberedHeading {
            name: line.to_string(),
        };
    }

    let mut words = line.split(' ');
    let first_word = words.next().unwrap_or_default();
    let Some(first_char) = first_word.chars().next() else {
        return LineKind::Skip;
    };

    if first_char.is_ascii_digit() {
        let lead = first_word.split('.').next().unwrap_or_default();
        let Ok(high) = lead.parse::<u32>() else {
            // Digits glued to a word ("1Footnote") mark a footnote.
            return LineKind::Skip;
        };
        let rest: Vec<&str> = words.collect();
        // A bare number is a page number, even in the middle of a paragraph.
        if rest.is_empty() {
            return LineKind::Skip;
        }
        // A wrapped paragraph may continue on a line that starts with a number.
        if !continuing {
            let name = rest.join(" ");
            if rest.len() < MAX_HEADING_WORDS && !name.ends_with(SENTENCE_ENDINGS) {
                return LineKind::Heading {
                    high,
                    number: first_word.trim_end_matches('.').to_string(),
                    name,
                };
            }
        }
    }

    if continuing {
        return LineKind::Body;
    }

    if !first_char.is_ascii_alphanumeric() {
        return LineKind::Skip;
    }

    if CAPTION_WORDS.contains(&first_word.to_lowercase().as_str()) {
        let label = line
            .split(' ')
            .nth(1)
            .unwrap_or_default()
            .trim_end_matches(':')
            .trim_end_matches('.');
        if label.parse::<u32>().is_ok() {
            return LineKind::Skip;
        }
    }

    if line.split(' ').count() < 3 {
        return LineKind::Skip;
    }

    LineKind::Body
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop a footnote number glued after a sentence's final period
/// ("the model.3" becomes "the model.").
fn strip_footnote_marker(line: &str) -> &str {
    let Some((head, tail)) = line.rsplit_once('.') else {
        return line;
    };
    let word_before = head.chars().last().is_some_and(char::is_alphabetic);
    if word_before && !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
        &line[..head.len() + 1]
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_ONE: &str = "\
Attention Is All You Need
Ashish Vaswani Noam Shazeer Niki Parmar
Abstract
The dominant sequence transduction models are based on complex recur-
rent neural networks.
We propose a new simple network architecture, the Transformer.
1 Introduction
Recurrent neural networks have been firmly established as state of the art
approaches in sequence modeling.1
1Equal contribution. Listing order is random.
Figure 1: The Transformer - model architecture.
2 Background
The goal of reducing sequential computation also forms the foundation.
2.1 Self-attention
Self-attention is an attention mechanism relating different positions
";

    const PAGE_TWO: &str = "\
2
of a single sequence in order to compute a representation.
7 Future Work
3 Model Architecture
Most competitive neural sequence transduction models have an encoder-decoder structure.
References
Jimmy Lei Ba, Jamie Ryan Kiros, and Geoffrey E Hinton. Layer normalization.
";

    fn parsed() -> Document {
        parse_pages(&[PAGE_ONE, PAGE_TWO]).unwrap()
    }

    #[test]
    fn test_title_and_authors() {
        let doc = parsed();
        assert_eq!(doc.title, "Attention Is All You Need");
        assert_eq!(doc.authors, "Ashish Vaswani Noam Shazeer Niki Parmar");
    }

    #[test]
    fn test_abstract_paragraphs_are_dehyphenated() {
        let doc = parsed();
        assert_eq!(
            doc.abstract_paragraphs,
            vec![
                "The dominant sequence transduction models are based on complex recurrent neural networks.",
                "We propose a new simple network architecture, the Transformer.",
            ]
        );
    }

    #[test]
    fn test_sections_in_order() {
        let doc = parsed();
        let headings: Vec<(u32, &str)> = doc
            .sections
            .iter()
            .map(|s| (s.number, s.heading.as_str()))
            .collect();
        assert_eq!(
            headings,
            vec![
                (1, "Introduction"),
                (2, "Background"),
                (3, "Model Architecture"),
                (4, "References"),
            ]
        );
    }

    #[test]
    fn test_footnotes_and_captions_skipped() {
        let doc = parsed();
        let intro = doc.section(1).unwrap();
        assert_eq!(
            intro.text(),
            "Recurrent neural networks have been firmly established as state of the art approaches in sequence modeling."
        );
    }

    #[test]
    fn test_paragraph_spans_page_break() {
        let doc = parsed();
        let background = doc.section(2).unwrap();
        assert_eq!(background.subsections.len(), 2);
        let sub = &background.subsections[1];
        assert_eq!(sub.number, "2.1");
        assert_eq!(sub.heading, "Self-attention");
        assert_eq!(sub.page, 1);
        assert_eq!(
            sub.paragraphs,
            vec!["Self-attention is an attention mechanism relating different positions of a single sequence in order to compute a representation."]
        );
    }

    #[test]
    fn test_out_of_order_heading_ignored() {
        let doc = parsed();
        assert!(doc.section(7).is_none());
        let architecture = doc.section(3).unwrap();
        assert_eq!(architecture.page, 2);
    }

    #[test]
    fn test_paragraphs_stop_at_references() {
        let doc = parsed();
        let paragraphs = doc.paragraphs();
        assert_eq!(paragraphs[0].heading, "abstract");
        assert_eq!(paragraphs[1].number, 2);
        assert!(paragraphs.iter().all(|p| !p.text.contains("Layer normalization")));
        assert!(paragraphs.iter().any(|p| p.subsection == "2.1"));
        assert_eq!(doc.section_texts().len(), 4);
    }

    #[test]
    fn test_wrapped_line_starting_with_number_stays_in_paragraph() {
        let page = "\
Training Notes
Jane Doe
1 Introduction
The model was trained on eight GPUs for a total of
3 days using the Adam optimizer.
2 Background
Prior work exists on this topic and it matters.
";
        let doc = parse_pages(&[page]).unwrap();
        let headings: Vec<(u32, &str)> = doc
            .sections
            .iter()
            .map(|s| (s.number, s.heading.as_str()))
            .collect();
        assert_eq!(headings, vec![(1, "Introduction"), (2, "Background")]);
        assert_eq!(
            doc.section(1).unwrap().text(),
            "The model was trained on eight GPUs for a total of 3 days using the Adam optimizer."
        );
        assert_eq!(
            doc.section(2).unwrap().text(),
            "Prior work exists on this topic and it matters."
        );
    }

    #[test]
    fn test_numbered_sentence_is_not_a_heading() {
        let page = "\
Training Notes
Jane Doe
1 Introduction
We start here.
2 models were compared.
";
        let doc = parse_pages(&[page]).unwrap();
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].subsections[0].paragraphs.len(), 2);
    }

    #[test]
    fn test_page_number_inside_paragraph_skipped() {
        let pages = [
            "Long Paper\nJane Doe\n1 Introduction\nThis paragraph runs across the\n",
            "104\npage boundary without a break.\n",
        ];
        let doc = parse_pages(&pages).unwrap();
        assert_eq!(
            doc.section(1).unwrap().text(),
            "This paragraph runs across the page boundary without a break."
        );
    }

    #[test]
    fn test_empty_pages_fail() {
        let result = parse_pages(&["", " \n  "]);
        assert!(matches!(result, Err(FactoredError::ExtractionError(_))));
    }

    #[test]
    fn test_strip_footnote_marker() {
        assert_eq!(strip_footnote_marker("sequence modeling.12"), "sequence modeling.");
        assert_eq!(strip_footnote_marker("version 2.0"), "version 2.0");
        assert_eq!(strip_footnote_marker("no marker."), "no marker.");
    }

    /// Build a one-page PDF with one Helvetica text line per entry.
    fn make_test_pdf(lines: &[(i64, &str)]) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document as PdfDocument, Object, Stream};

        let mut doc = PdfDocument::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut content = String::new();
        let mut y = 720;
        for (size, text) in lines {
            content.push_str(&format!("BT /F1 {size} Tf 72 {y} Td ({text}) Tj ET\n"));
            y -= 40;
        }
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! {
                    "F1" => font_id,
                },
            },
        });

        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        });

        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_extract_title_from_pdf() {
        let bytes = make_test_pdf(&[
            (20, "Attention Is All You Need"),
            (12, "Ashish Vaswani Noam Shazeer"),
            (12, "We propose a new simple network architecture."),
        ]);
        let file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        fs::write(file.path(), &bytes).unwrap();

        let doc = extract_document(file.path()).unwrap();
        assert_eq!(doc.title, "Attention Is All You Need");
    }

    #[test]
    fn test_corrupted_pdf_is_extraction_error() {
        let mut bytes = make_test_pdf(&[(12, "Truncated Paper Title")]);
        bytes.truncate(bytes.len() / 3);
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), &bytes).unwrap();

        assert!(matches!(
            extract_document(file.path()),
            Err(FactoredError::ExtractionError(_))
        ));
        assert!(matches!(
            extract_document_from_bytes(b"not a pdf"),
            Err(FactoredError::ExtractionError(_))
        ));
    }

    #[test]
    fn test_missing_file_is_extraction_error() {
        assert!(matches!(
            extract_document("/nonexistent/paper.pdf"),
            Err(FactoredError::ExtractionError(_))
        ));
    }
}
