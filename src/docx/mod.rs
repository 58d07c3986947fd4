//! DOCX template filling.
//!
//! A `.docx` is a ZIP whose main story lives in `word/document.xml`. Two
//! substitution passes run over that part:
//!
//! 1. literal `{FIELD}` placeholders are replaced textually;
//! 2. Word field instructions (`DOCVARIABLE`/`MERGEFIELD`) are resolved: the
//!    run carrying `fldChar begin`, the instruction runs and everything up to
//!    the run carrying `fldChar end` collapse into a single run holding the
//!    substituted text.
//!
//! Template mode leaves unmapped fields untouched so a sample document stays
//! reusable; dynamic mode replaces every recognized field, unmapped ones with
//! an empty string. A dynamic pass erases the field structure, so the
//! operation is not idempotent by design.

use lazy_static::lazy_static;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const DOCUMENT_PART: &str = "word/document.xml";

lazy_static! {
    static ref FIELD_RE: Regex =
        Regex::new(r"(?i)(DOCVARIABLE|MERGEFIELD)\s+([A-Z0-9_ ]+)").unwrap();
}

#[derive(Error, Debug)]
pub enum DocxError {
    #[error("Invalid DOCX archive: {0}")]
    Archive(#[from] ZipError),

    #[error("DOCX is missing word/document.xml")]
    MissingDocumentPart,

    #[error("Malformed document XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to do with a recognized field that has no mapped value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Leave unmapped fields in the document ("vzor" documents)
    Template,
    /// Replace every recognized field, unmapped ones with an empty string
    Dynamic,
}

impl FromStr for FillMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "template" | "vzor" => Ok(FillMode::Template),
            "dynamic" => Ok(FillMode::Dynamic),
            other => Err(format!("Unknown fill mode: {}", other)),
        }
    }
}

/// Fill a DOCX template and return the rebuilt archive.
pub fn fill_document(
    data: &[u8],
    fields: &HashMap<String, String>,
    mode: FillMode,
) -> Result<Vec<u8>, DocxError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;

    let mut document_xml = String::new();
    {
        let mut entry = match archive.by_name(DOCUMENT_PART) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Err(DocxError::MissingDocumentPart),
            Err(e) => return Err(e.into()),
        };
        entry.read_to_string(&mut document_xml)?;
    }

    let document_xml = substitute_placeholders(document_xml, fields);
    let document_xml = rewrite_field_runs(&document_xml, fields, mode)?;

    // Rebuild the archive with the transformed part; everything else is
    // copied through unchanged.
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();

        if entry.is_dir() {
            out.add_directory(name, options)?;
            continue;
        }

        out.start_file(name.clone(), options)?;
        if name == DOCUMENT_PART {
            out.write_all(document_xml.as_bytes())?;
        } else {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            out.write_all(&buf)?;
        }
    }

    Ok(out.finish()?.into_inner())
}

/// Pass 1: literal `{FIELD}` placeholders.
fn substitute_placeholders(mut xml: String, fields: &HashMap<String, String>) -> String {
    for (name, value) in fields {
        let placeholder = format!("{{{}}}", name);
        if xml.contains(&placeholder) {
            xml = xml.replace(&placeholder, &quick_xml::escape::escape(value.as_str()));
        }
    }
    xml
}

/// Parse the field name out of accumulated `instrText` content.
fn parse_field_name(instr: &str) -> Option<String> {
    let normalized = instr.split_whitespace().collect::<Vec<_>>().join(" ");
    let caps = FIELD_RE.captures(&normalized)?;
    let name: String = caps[2]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// One `<w:r>` element in the event stream
#[derive(Debug)]
struct Run {
    /// Index of the run's Start event
    start_ev: usize,
    /// Index of the run's End event (inclusive)
    end_ev: usize,
    /// Enclosing paragraph (fields never span paragraphs)
    paragraph: usize,
    fld_begin: bool,
    fld_end: bool,
    instr: String,
}

fn fld_char_type(e: &BytesStart) -> Result<Option<String>, quick_xml::Error> {
    for key in ["w:fldCharType", "fldCharType"] {
        if let Some(attr) = e.try_get_attribute(key).map_err(quick_xml::Error::from)? {
            let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Pass 2: resolve Word field instructions run by run.
fn rewrite_field_runs(
    xml: &str,
    fields: &HashMap<String, String>,
    mode: FillMode,
) -> Result<String, DocxError> {
    let mut reader = Reader::from_str(xml);

    // Collect the whole event stream; documents are bounded (a template is
    // at most a few MB of XML) so one pass into memory keeps the span
    // replacement simple.
    let mut events: Vec<Event<'static>> = Vec::new();
    loop {
        let event = reader.read_event()?;
        if matches!(event, Event::Eof) {
            break;
        }
        events.push(event.into_owned());
    }

    let runs = collect_runs(&events)?;
    let spans = find_field_spans(&runs);

    // Map: begin-run start event -> (end-run end event, substituted value)
    let mut replacements: HashMap<usize, (usize, String)> = HashMap::new();
    for (begin, end, name) in spans {
        let value = match mode {
            FillMode::Template => match fields.get(&name) {
                Some(v) if !v.trim().is_empty() => v.clone(),
                _ => continue,
            },
            FillMode::Dynamic => fields.get(&name).cloned().unwrap_or_default(),
        };
        replacements.insert(runs[begin].start_ev, (runs[end].end_ev, value));
    }

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut idx = 0;
    while idx < events.len() {
        if let Some((end_ev, value)) = replacements.get(&idx) {
            writer.write_event(Event::Start(BytesStart::new("w:r")))?;
            let mut text_start = BytesStart::new("w:t");
            text_start.push_attribute(("xml:space", "preserve"));
            writer.write_event(Event::Start(text_start))?;
            writer.write_event(Event::Text(BytesText::new(value)))?;
            writer.write_event(Event::End(BytesEnd::new("w:t")))?;
            writer.write_event(Event::End(BytesEnd::new("w:r")))?;
            idx = end_ev + 1;
            continue;
        }
        writer.write_event(events[idx].clone())?;
        idx += 1;
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| DocxError::Io(std::io::Error::other(e)))
}

fn collect_runs(events: &[Event<'static>]) -> Result<Vec<Run>, DocxError> {
    let mut runs = Vec::new();
    let mut paragraph = 0usize;
    let mut current: Option<Run> = None;
    let mut in_instr = false;

    for (idx, event) in events.iter().enumerate() {
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => paragraph += 1,
                b"r" if current.is_none() => {
                    current = Some(Run {
                        start_ev: idx,
                        end_ev: idx,
                        paragraph,
                        fld_begin: false,
                        fld_end: false,
                        instr: String::new(),
                    });
                }
                b"instrText" if current.is_some() => in_instr = true,
                b"fldChar" => {
                    if let Some(run) = current.as_mut() {
                        match fld_char_type(e)?.as_deref() {
                            Some("begin") => run.fld_begin = true,
                            Some("end") => run.fld_end = true,
                            _ => {}
                        }
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"fldChar" {
                    if let Some(run) = current.as_mut() {
                        match fld_char_type(e)?.as_deref() {
                            Some("begin") => run.fld_begin = true,
                            Some("end") => run.fld_end = true,
                            _ => {}
                        }
                    }
                }
            }
            Event::Text(t) => {
                if in_instr {
                    if let Some(run) = current.as_mut() {
                        run.instr
                            .push_str(&t.unescape().map_err(quick_xml::Error::from)?);
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"instrText" => in_instr = false,
                b"r" => {
                    if let Some(mut run) = current.take() {
                        run.end_ev = idx;
                        runs.push(run);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    Ok(runs)
}

/// Locate complete field spans: a begin run and the first end run after it
/// within the same paragraph, with the instruction text accumulated across
/// the runs in between.
fn find_field_spans(runs: &[Run]) -> Vec<(usize, usize, String)> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < runs.len() {
        if runs[i].fld_begin {
            let mut instr = runs[i].instr.clone();
            let mut end_idx = None;
            let mut j = i + 1;
            while j < runs.len() && runs[j].paragraph == runs[i].paragraph {
                instr.push_str(&runs[j].instr);
                if runs[j].fld_end {
                    end_idx = Some(j);
                    break;
                }
                j += 1;
            }
            if let Some(end) = end_idx {
                if let Some(name) = parse_field_name(&instr) {
                    spans.push((i, end, name));
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELD_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Dodavatel: </w:t></w:r><w:r><w:fldChar w:fldCharType="begin"/></w:r><w:r><w:instrText xml:space="preserve"> DOCVARIABLE OJMENO \* MERGEFORMAT </w:instrText></w:r><w:r><w:fldChar w:fldCharType="separate"/></w:r><w:r><w:t>stara hodnota</w:t></w:r><w:r><w:fldChar w:fldCharType="end"/></w:r></w:p></w:body></w:document>"#;

    fn make_docx(document_xml: &str) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buffer);
            let options = SimpleFileOptions::default();

            zip.start_file("[Content_Types].xml", options).unwrap();
            zip.write_all(b"<Types/>").unwrap();

            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();

            zip.finish().unwrap();
        }
        buffer.into_inner()
    }

    fn extract_document_xml(docx: &[u8]) -> String {
        let mut archive = ZipArchive::new(Cursor::new(docx)).unwrap();
        let mut entry = archive.by_name("word/document.xml").unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        content
    }

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_field_name() {
        assert_eq!(
            parse_field_name(" DOCVARIABLE OJMENO \\* MERGEFORMAT "),
            Some("OJMENO".to_string())
        );
        assert_eq!(
            parse_field_name("mergefield client name"),
            Some("CLIENTNAME".to_string())
        );
        assert_eq!(parse_field_name("PAGE \\* MERGEFORMAT"), None);
        assert_eq!(parse_field_name(""), None);
    }

    #[test]
    fn test_field_is_replaced() {
        let docx = make_docx(FIELD_DOCUMENT);
        let result = fill_document(
            &docx,
            &fields(&[("OJMENO", "Acme s.r.o.")]),
            FillMode::Template,
        )
        .unwrap();

        let xml = extract_document_xml(&result);
        assert!(xml.contains("Acme s.r.o."));
        assert!(!xml.contains("instrText"), "field structure must be gone");
        assert!(!xml.contains("stara hodnota"), "stale result text must be gone");
        assert!(xml.contains("Dodavatel: "), "surrounding runs stay");
    }

    #[test]
    fn test_template_mode_keeps_unmapped_field() {
        let docx = make_docx(FIELD_DOCUMENT);
        let result = fill_document(&docx, &HashMap::new(), FillMode::Template).unwrap();

        let xml = extract_document_xml(&result);
        assert!(xml.contains("instrText"), "unmapped field must survive");
        assert!(xml.contains("DOCVARIABLE OJMENO"));
    }

    #[test]
    fn test_template_mode_treats_blank_value_as_unmapped() {
        let docx = make_docx(FIELD_DOCUMENT);
        let result =
            fill_document(&docx, &fields(&[("OJMENO", "   ")]), FillMode::Template).unwrap();

        let xml = extract_document_xml(&result);
        assert!(xml.contains("instrText"));
    }

    #[test]
    fn test_dynamic_mode_blanks_unmapped_field() {
        let docx = make_docx(FIELD_DOCUMENT);
        let result = fill_document(&docx, &HashMap::new(), FillMode::Dynamic).unwrap();

        let xml = extract_document_xml(&result);
        assert!(!xml.contains("instrText"), "dynamic mode erases the field");
        assert!(!xml.contains("stara hodnota"));
    }

    #[test]
    fn test_placeholder_substitution() {
        let document = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Odberatel: {OJMENO}, {OEMAIL}</w:t></w:r></w:p></w:body></w:document>"#;
        let docx = make_docx(document);
        let result = fill_document(
            &docx,
            &fields(&[("OJMENO", "Acme"), ("OEMAIL", "acme@example.org")]),
            FillMode::Template,
        )
        .unwrap();

        let xml = extract_document_xml(&result);
        assert!(xml.contains("Odberatel: Acme, acme@example.org"));
        assert!(!xml.contains("{OJMENO}"));
    }

    #[test]
    fn test_substituted_value_is_escaped() {
        let docx = make_docx(FIELD_DOCUMENT);
        let result = fill_document(
            &docx,
            &fields(&[("OJMENO", "Novak & synove <s.r.o.>")]),
            FillMode::Dynamic,
        )
        .unwrap();

        let xml = extract_document_xml(&result);
        assert!(xml.contains("Novak &amp; synove &lt;s.r.o.&gt;"));
    }

    #[test]
    fn test_other_archive_entries_survive() {
        let docx = make_docx(FIELD_DOCUMENT);
        let result =
            fill_document(&docx, &fields(&[("OJMENO", "Acme")]), FillMode::Dynamic).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(result.as_slice())).unwrap();
        let mut entry = archive.by_name("[Content_Types].xml").unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "<Types/>");
    }

    #[test]
    fn test_missing_document_part() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buffer);
            zip.start_file("other.txt", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"data").unwrap();
            zip.finish().unwrap();
        }

        let result = fill_document(&buffer.into_inner(), &HashMap::new(), FillMode::Dynamic);
        assert!(matches!(result, Err(DocxError::MissingDocumentPart)));
    }

    #[test]
    fn test_unterminated_field_is_left_alone() {
        // begin without a matching end in the same paragraph
        let document = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:fldChar w:fldCharType="begin"/></w:r><w:r><w:instrText> DOCVARIABLE OJMENO </w:instrText></w:r></w:p></w:body></w:document>"#;
        let docx = make_docx(document);
        let result =
            fill_document(&docx, &fields(&[("OJMENO", "Acme")]), FillMode::Dynamic).unwrap();

        let xml = extract_document_xml(&result);
        assert!(xml.contains("instrText"), "incomplete field stays untouched");
    }

    #[test]
    fn test_field_does_not_cross_paragraphs() {
        let document = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:fldChar w:fldCharType="begin"/></w:r><w:r><w:instrText> DOCVARIABLE OJMENO </w:instrText></w:r></w:p><w:p><w:r><w:fldChar w:fldCharType="end"/></w:r></w:p></w:body></w:document>"#;
        let docx = make_docx(document);
        let result =
            fill_document(&docx, &fields(&[("OJMENO", "Acme")]), FillMode::Dynamic).unwrap();

        let xml = extract_document_xml(&result);
        assert!(xml.contains("instrText"), "span across paragraphs is invalid");
    }

    #[test]
    fn test_two_fields_in_one_paragraph() {
        let document = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:fldChar w:fldCharType="begin"/></w:r><w:r><w:instrText> MERGEFIELD OJMENO </w:instrText></w:r><w:r><w:fldChar w:fldCharType="end"/></w:r><w:r><w:t> / </w:t></w:r><w:r><w:fldChar w:fldCharType="begin"/></w:r><w:r><w:instrText> MERGEFIELD DJMENO </w:instrText></w:r><w:r><w:fldChar w:fldCharType="end"/></w:r></w:p></w:body></w:document>"#;
        let docx = make_docx(document);
        let result = fill_document(
            &docx,
            &fields(&[("OJMENO", "Odberatel a.s."), ("DJMENO", "Dodavatel s.r.o.")]),
            FillMode::Dynamic,
        )
        .unwrap();

        let xml = extract_document_xml(&result);
        assert!(xml.contains("Odberatel a.s."));
        assert!(xml.contains("Dodavatel s.r.o."));
        assert!(xml.contains(" / "));
    }

    #[test]
    fn test_fill_mode_from_str() {
        assert_eq!("vzor".parse::<FillMode>(), Ok(FillMode::Template));
        assert_eq!("template".parse::<FillMode>(), Ok(FillMode::Template));
        assert_eq!("Dynamic".parse::<FillMode>(), Ok(FillMode::Dynamic));
        assert!("other".parse::<FillMode>().is_err());
    }
}
