//! PDF document backend built on `lopdf`.
//!
//! Walks each page's content stream, and the Form XObjects it draws, turning
//! every shown string into a [`TextFragment`] at the current text-space
//! origin. Glyph widths are not measured; line recovery relies on the
//! vertical position only.

use crate::error::ExtractionError;
use crate::extractor::DocumentSource;
use crate::layout::TextFragment;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

/// `TJ` adjustments beyond this many thousandths of an em read as a word gap.
const TJ_WORD_GAP: f32 = -200.0;
/// Leading assumed for `T*` and `'` when the stream never sets `TL`.
const FALLBACK_LEADING_FACTOR: f32 = 1.2;
/// Forms nested deeper than this are skipped, which also stops self-drawing forms.
const MAX_FORM_DEPTH: usize = 8;

type Matrix = [f32; 6];
const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

pub struct PdfDocument {
    doc: Document,
    pages: Vec<ObjectId>,
    fold_compatibility_forms: bool,
}

impl PdfDocument {
    pub fn load_mem(bytes: &[u8]) -> Result<Self, ExtractionError> {
        let doc = Document::load_mem(bytes)?;
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        info!(pages = pages.len(), bytes = bytes.len(), "Loaded PDF document");
        Ok(Self {
            doc,
            pages,
            fold_compatibility_forms: true,
        })
    }

    pub fn open(path: &Path) -> Result<Self, ExtractionError> {
        let bytes = std::fs::read(path)
            .map_err(|err| ExtractionError::Load(format!("{}: {err}", path.display())))?;
        Self::load_mem(&bytes)
    }

    /// Apply NFKC to fragment text so ligature glyphs become plain letters.
    pub fn with_compatibility_folding(mut self, enabled: bool) -> Self {
        self.fold_compatibility_forms = enabled;
        self
    }

    /// The `Title` entry of the document information dictionary.
    pub fn title(&self) -> Option<String> {
        let info = match self.doc.trailer.get(b"Info").ok()? {
            Object::Reference(id) => self.doc.get_dictionary(*id).ok()?,
            Object::Dictionary(dict) => dict,
            _ => return None,
        };
        match info.get(b"Title").ok()? {
            Object::String(bytes, _) => {
                let title = decode_text_string(bytes);
                let title = title.trim();
                (!title.is_empty()).then(|| title.to_string())
            }
            _ => None,
        }
    }

    fn page_error(page: usize, err: impl std::fmt::Display) -> ExtractionError {
        ExtractionError::Page {
            page,
            reason: err.to_string(),
        }
    }
}

impl DocumentSource for PdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_fragments(&self, page: usize) -> Result<Vec<TextFragment>, ExtractionError> {
        let page_id = page
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx))
            .copied()
            .ok_or_else(|| Self::page_error(page, "no such page"))?;
        let fonts = self.doc.get_page_fonts(page_id).unwrap_or_default();
        let xobjects = page_resources(&self.doc, page_id)
            .map(|resources| named_resources(&self.doc, &resources, b"XObject"))
            .unwrap_or_default();
        let data = self
            .doc
            .get_page_content(page_id)
            .map_err(|err| Self::page_error(page, err))?;
        let content = Content::decode(&data).map_err(|err| Self::page_error(page, err))?;

        let mut walker = ContentWalker::new(&self.doc, fonts, xobjects);
        walker.walk(&content);
        let mut fragments = walker.fragments;
        if self.fold_compatibility_forms {
            for fragment in &mut fragments {
                fragment.content = fragment.content.nfkc().collect();
            }
        }
        debug!(
            page,
            operations = content.operations.len(),
            fragments = fragments.len(),
            "Read page content stream"
        );
        Ok(fragments)
    }
}

/// Text and graphics state needed to place shown strings.
struct ContentWalker<'a> {
    doc: &'a Document,
    fonts: BTreeMap<Vec<u8>, &'a Dictionary>,
    xobjects: BTreeMap<Vec<u8>, &'a Object>,
    depth: usize,
    font: Vec<u8>,
    font_size: f32,
    leading: Option<f32>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    ctm: Matrix,
    saved_ctm: Vec<Matrix>,
    fragments: Vec<TextFragment>,
}

impl<'a> ContentWalker<'a> {
    fn new(
        doc: &'a Document,
        fonts: BTreeMap<Vec<u8>, &'a Dictionary>,
        xobjects: BTreeMap<Vec<u8>, &'a Object>,
    ) -> Self {
        Self {
            doc,
            fonts,
            xobjects,
            depth: 0,
            font: Vec::new(),
            font_size: 12.0,
            leading: None,
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            ctm: IDENTITY,
            saved_ctm: Vec::new(),
            fragments: Vec::new(),
        }
    }

    fn walk(&mut self, content: &Content) {
        for operation in &content.operations {
            self.apply(&operation.operator, &operation.operands);
        }
    }

    fn apply(&mut self, operator: &str, operands: &[Object]) {
        match operator {
            "q" => self.saved_ctm.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.saved_ctm.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(matrix) = matrix_operand(operands) {
                    self.ctm = multiply(&matrix, &self.ctm);
                }
            }
            "BT" => {
                self.text_matrix = IDENTITY;
                self.line_matrix = IDENTITY;
            }
            "Tf" => {
                if let Some(Ok(name)) = operands.first().map(Object::as_name) {
                    self.font = name.to_vec();
                }
                if let Some(size) = operands.get(1).and_then(number) {
                    self.font_size = size;
                }
            }
            "TL" => self.leading = operands.first().and_then(number),
            "Td" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(number),
                    operands.get(1).and_then(number),
                ) {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(number),
                    operands.get(1).and_then(number),
                ) {
                    self.leading = Some(-ty);
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(matrix) = matrix_operand(operands) {
                    self.text_matrix = matrix;
                    self.line_matrix = matrix;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(text) = operands.first().and_then(|op| self.decode(op)) {
                    self.push_fragment(text);
                }
            }
            "TJ" => {
                if let Some(Ok(items)) = operands.first().map(Object::as_array) {
                    let text = self.decode_array(items);
                    self.push_fragment(text);
                }
            }
            "'" => {
                self.next_line();
                if let Some(text) = operands.first().and_then(|op| self.decode(op)) {
                    self.push_fragment(text);
                }
            }
            "\"" => {
                self.next_line();
                if let Some(text) = operands.get(2).and_then(|op| self.decode(op)) {
                    self.push_fragment(text);
                }
            }
            "Do" => {
                if let Some(Ok(name)) = operands.first().map(Object::as_name) {
                    self.draw_form(name);
                }
            }
            _ => {}
        }
    }

    /// Walk a Form XObject with its own resources layered over ours and its
    /// `/Matrix` applied on top of the current CTM. Image XObjects are ignored.
    fn draw_form(&mut self, name: &[u8]) {
        let Some(Object::Stream(form)) = self.xobjects.get(name).copied() else {
            return;
        };
        if form.dict.get(b"Subtype").and_then(Object::as_name).ok() != Some(b"Form".as_slice()) {
            return;
        }
        if self.depth >= MAX_FORM_DEPTH {
            debug!(form = %String::from_utf8_lossy(name), "Form nesting too deep, skipping");
            return;
        }
        let content = match form
            .get_plain_content()
            .and_then(|data| Content::decode(&data))
        {
            Ok(content) => content,
            Err(err) => {
                warn!(form = %String::from_utf8_lossy(name), "Unreadable form content: {err}");
                return;
            }
        };

        let mut fonts = self.fonts.clone();
        let mut xobjects = self.xobjects.clone();
        if let Ok(resources) = self.doc.get_dict_in_dict(&form.dict, b"Resources") {
            fonts.extend(font_resources(self.doc, &[resources]));
            xobjects.extend(named_resources(self.doc, &[resources], b"XObject"));
        }
        let matrix = form
            .dict
            .get(b"Matrix")
            .and_then(Object::as_array)
            .ok()
            .and_then(|items| matrix_operand(items))
            .unwrap_or(IDENTITY);

        let mut inner = ContentWalker::new(self.doc, fonts, xobjects);
        inner.ctm = multiply(&matrix, &self.ctm);
        inner.depth = self.depth + 1;
        inner.walk(&content);
        self.fragments.extend(inner.fragments);
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        let translation = [1.0, 0.0, 0.0, 1.0, tx, ty];
        self.line_matrix = multiply(&translation, &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self
            .leading
            .unwrap_or(self.font_size * FALLBACK_LEADING_FACTOR);
        self.move_line(0.0, -leading);
    }

    fn push_fragment(&mut self, content: String) {
        if content.is_empty() {
            return;
        }
        let [a, b, c, d, e, f] = self.ctm;
        let (x, y) = (self.text_matrix[4], self.text_matrix[5]);
        let origin_x = a * x + c * y + e;
        let origin_y = b * x + d * y + f;
        self.fragments
            .push(TextFragment::new(content, origin_x, origin_y));
    }

    fn decode_array(&self, items: &[Object]) -> String {
        let mut text = String::new();
        for item in items {
            if let Some(adjustment) = number(item) {
                if adjustment < TJ_WORD_GAP && !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
            } else if let Some(piece) = self.decode(item) {
                text.push_str(&piece);
            }
        }
        text
    }

    fn decode(&self, operand: &Object) -> Option<String> {
        let Object::String(bytes, _) = operand else {
            return None;
        };
        if has_utf16_bom(bytes) {
            return Some(decode_utf16be(&bytes[2..]));
        }
        if let Some(font) = self.fonts.get(&self.font) {
            if let Ok(encoding) = font.get_font_encoding(self.doc) {
                if let Ok(text) = Document::decode_text(&encoding, bytes) {
                    return Some(text);
                }
            }
        }
        Some(decode_latin1(bytes))
    }
}

/// Resource dictionaries of a page, own first, then inherited.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<Vec<&Dictionary>> {
    let (own, inherited) = doc.get_page_resources(page_id).ok()?;
    let mut resources: Vec<&Dictionary> = own.into_iter().collect();
    resources.extend(
        inherited
            .into_iter()
            .filter_map(|id| doc.get_dictionary(id).ok()),
    );
    Some(resources)
}

/// Entries of one resource category (`Font`, `XObject`); earlier dictionaries win.
fn named_resources<'a>(
    doc: &'a Document,
    resources: &[&'a Dictionary],
    category: &[u8],
) -> BTreeMap<Vec<u8>, &'a Object> {
    let mut named = BTreeMap::new();
    for &dict in resources {
        let Ok(entries) = doc.get_dict_in_dict(dict, category) else {
            continue;
        };
        for (name, value) in entries.iter() {
            if let Ok((_, object)) = doc.dereference(value) {
                named.entry(name.clone()).or_insert(object);
            }
        }
    }
    named
}

fn font_resources<'a>(
    doc: &'a Document,
    resources: &[&'a Dictionary],
) -> BTreeMap<Vec<u8>, &'a Dictionary> {
    named_resources(doc, resources, b"Font")
        .into_iter()
        .filter_map(|(name, object)| object.as_dict().ok().map(|dict| (name, dict)))
        .collect()
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value),
        _ => None,
    }
}

fn matrix_operand(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let mut matrix = IDENTITY;
    for (slot, operand) in matrix.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(matrix)
}

/// Row-vector product `m1 × m2` of two PDF affine matrices.
fn multiply(m1: &Matrix, m2: &Matrix) -> Matrix {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn has_utf16_bom(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF
}

fn decode_utf16be(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| byte as char).collect()
}

fn decode_text_string(bytes: &[u8]) -> String {
    if has_utf16_bom(bytes) {
        decode_utf16be(&bytes[2..])
    } else {
        decode_latin1(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractionOptions, extract_document};
    use lopdf::content::Operation;
    use lopdf::{Stream, StringFormat, dictionary};

    fn build_pdf(pages: Vec<Vec<Operation>>, title: Option<&str>) -> Vec<u8> {
        build_pdf_with_forms(pages, title, Vec::new())
    }

    /// Like `build_pdf`, with Form XObjects `(name, operations, matrix)`
    /// registered in the shared page resources.
    fn build_pdf_with_forms(
        pages: Vec<Vec<Operation>>,
        title: Option<&str>,
        forms: Vec<(&str, Vec<Operation>, [i64; 6])>,
    ) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let mut xobjects = Dictionary::new();
        for (name, operations, matrix) in forms {
            let content = Content { operations };
            let form = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                    "Matrix" => matrix.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>(),
                },
                content.encode().unwrap(),
            );
            xobjects.set(name, doc.add_object(form));
        }
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => xobjects,
        });
        let mut kids: Vec<Object> = Vec::new();
        for operations in pages {
            let content = Content { operations };
            let stream = Stream::new(dictionary! {}, content.encode().unwrap());
            let content_id = doc.add_object(stream);
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        if let Some(title) = title {
            let info_id = doc.add_object(dictionary! {
                "Title" => Object::string_literal(title),
            });
            doc.trailer.set("Info", info_id);
        }
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn show_at(x: i64, y: i64, text: &str) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]
    }

    fn texts(fragments: &[TextFragment]) -> Vec<&str> {
        fragments.iter().map(|f| f.content.as_str()).collect()
    }

    #[test]
    fn reads_fragments_with_positions() {
        let mut page = show_at(72, 700, "Hello");
        page.extend(show_at(120, 700, "world"));
        let pdf = PdfDocument::load_mem(&build_pdf(vec![page], None)).unwrap();
        assert_eq!(pdf.page_count(), 1);

        let fragments = pdf.page_fragments(1).unwrap();
        assert_eq!(texts(&fragments), vec!["Hello", "world"]);
        assert_eq!(fragments[0].origin_y, 700.0);
        assert_eq!(fragments[1].origin_x, 120.0);
        assert!(fragments.iter().all(|f| !f.ends_line));
    }

    #[test]
    fn leading_and_next_line_operators_move_down() {
        let page = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("TL", vec![14.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal("first")]),
            Operation::new("T*", vec![]),
            Operation::new("Tj", vec![Object::string_literal("second")]),
            Operation::new("'", vec![Object::string_literal("third")]),
            Operation::new("ET", vec![]),
        ];
        let pdf = PdfDocument::load_mem(&build_pdf(vec![page], None)).unwrap();
        let fragments = pdf.page_fragments(1).unwrap();
        let ys: Vec<f32> = fragments.iter().map(|f| f.origin_y).collect();
        assert_eq!(ys, vec![700.0, 686.0, 672.0]);
    }

    #[test]
    fn tj_word_gap_inserts_space() {
        let page = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Kern"),
                    Object::Integer(-40),
                    Object::string_literal("ing"),
                    Object::Integer(-600),
                    Object::string_literal("gap"),
                ])],
            ),
            Operation::new("ET", vec![]),
        ];
        let pdf = PdfDocument::load_mem(&build_pdf(vec![page], None)).unwrap();
        assert_eq!(texts(&pdf.page_fragments(1).unwrap()), vec!["Kerning gap"]);
    }

    #[test]
    fn text_matrix_and_ctm_set_origin() {
        let page = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), 10.into(), 20.into()],
            ),
            Operation::new("BT", vec![]),
            Operation::new(
                "Tm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 400.into()],
            ),
            Operation::new("Tj", vec![Object::string_literal("moved")]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ];
        let pdf = PdfDocument::load_mem(&build_pdf(vec![page], None)).unwrap();
        let fragment = &pdf.page_fragments(1).unwrap()[0];
        assert_eq!((fragment.origin_x, fragment.origin_y), (60.0, 420.0));
    }

    #[test]
    fn reads_text_inside_form_xobjects() {
        let mut page = show_at(72, 700, "Body");
        page.extend(vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), 72.into(), 500.into()],
            ),
            Operation::new("Do", vec!["Fm1".into()]),
            Operation::new("Q", vec![]),
            Operation::new("Do", vec!["Missing".into()]),
        ]);
        let forms = vec![("Fm1", show_at(0, 0, "Stamped"), [1, 0, 0, 1, 0, 100])];
        let pdf = PdfDocument::load_mem(&build_pdf_with_forms(vec![page], None, forms)).unwrap();

        let fragments = pdf.page_fragments(1).unwrap();
        assert_eq!(texts(&fragments), vec!["Body", "Stamped"]);
        assert_eq!((fragments[1].origin_x, fragments[1].origin_y), (72.0, 600.0));
    }

    #[test]
    fn folds_ligatures_from_utf16_strings() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "ﬁne ﬂow".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let page = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tj", vec![Object::String(bytes, StringFormat::Hexadecimal)]),
            Operation::new("ET", vec![]),
        ];
        let raw = build_pdf(vec![page], None);

        let folded = PdfDocument::load_mem(&raw).unwrap();
        assert_eq!(texts(&folded.page_fragments(1).unwrap()), vec!["fine flow"]);

        let kept = PdfDocument::load_mem(&raw)
            .unwrap()
            .with_compatibility_folding(false);
        assert_eq!(texts(&kept.page_fragments(1).unwrap()), vec!["ﬁne ﬂow"]);
    }

    #[test]
    fn extracts_pages_in_order_with_title() {
        let pages = vec![show_at(72, 700, "Page one."), show_at(72, 700, "Page two.")];
        let pdf = PdfDocument::load_mem(&build_pdf(pages, Some("Field Notes"))).unwrap();
        assert_eq!(pdf.title().as_deref(), Some("Field Notes"));

        let outcome = extract_document(&pdf, &ExtractionOptions::default(), None, None).unwrap();
        assert_eq!(outcome.text(), Some("Page one.\n\nPage two."));
    }

    #[test]
    fn garbage_bytes_fail_to_load() {
        let err = PdfDocument::load_mem(b"definitely not a pdf")
            .err()
            .expect("garbage should not parse");
        assert!(matches!(err, ExtractionError::Load(_)));
    }

    #[test]
    fn out_of_range_page_is_a_page_error() {
        let pdf = PdfDocument::load_mem(&build_pdf(vec![show_at(0, 0, "x")], None)).unwrap();
        assert!(matches!(
            pdf.page_fragments(2),
            Err(ExtractionError::Page { page: 2, .. })
        ));
        assert_eq!(pdf.title(), None);
    }
}
