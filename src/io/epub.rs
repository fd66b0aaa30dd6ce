//! EPUB 3 packaging of a textbook
//!
//! The container is a zip archive whose first entry is an uncompressed
//! `mimetype` file; everything else is deflated.

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::output::{escape_html, prerequisite_line};
use crate::models::{MergedKnowledge, Textbook, TextbookChapter};

const MIMETYPE: &str = "application/epub+zip";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const STYLE: &str = "body { font-family: system-ui, sans-serif; line-height: 1.6; }
h2 { color: #333; border-bottom: 2px solid #007bff; }
h3 { color: #555; margin-top: 1.5em; }
.transition { font-style: italic; color: #666; }
.video-ref { background: #f0f0f0; padding: 10px; margin: 10px 0; }
.provenance { color: #888; font-size: 0.9em; }
";

/// Write `textbook` as an EPUB file at `path`
pub fn write_epub(textbook: &Textbook, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    let mut zip = ZipWriter::new(file);

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let language = language_of(textbook);
    let mut entries: Vec<(String, String)> = vec![
        ("META-INF/container.xml".to_string(), CONTAINER_XML.to_string()),
        ("OEBPS/content.opf".to_string(), package_document(textbook, language)),
        ("OEBPS/nav.xhtml".to_string(), navigation(textbook, language)),
        ("OEBPS/style.css".to_string(), STYLE.to_string()),
    ];
    for chapter in &textbook.chapters {
        entries.push((
            format!("OEBPS/{}", chapter_file(chapter)),
            chapter_document(textbook, chapter, language),
        ));
    }

    zip.start_file("mimetype", stored)
        .context("Failed to add EPUB entry: mimetype")?;
    zip.write_all(MIMETYPE.as_bytes())
        .context("Failed to write EPUB entry: mimetype")?;

    for (name, body) in entries {
        zip.start_file(name.as_str(), deflated)
            .with_context(|| format!("Failed to add EPUB entry: {}", name))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("Failed to write EPUB entry: {}", name))?;
    }

    zip.finish()
        .with_context(|| format!("Failed to finish EPUB: {:?}", path))?;
    Ok(())
}

fn chapter_file(chapter: &TextbookChapter) -> String {
    format!("chapter_{}.xhtml", chapter.order)
}

/// "zh" when the course is written in Chinese, "en" otherwise
fn language_of(textbook: &Textbook) -> &'static str {
    let is_cjk = |c: char| ('\u{4e00}'..='\u{9fff}').contains(&c);
    let titles = std::iter::once(textbook.name.as_str()).chain(textbook.chapters.iter().map(|c| c.title.as_str()));
    if titles.flat_map(str::chars).any(is_cjk) { "zh" } else { "en" }
}

fn package_document(textbook: &Textbook, language: &str) -> String {
    let identifier = Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("lecturebook:{}", textbook.name).as_bytes());
    let modified = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

    let mut manifest = String::new();
    let mut spine = String::new();
    for chapter in &textbook.chapters {
        let _ = writeln!(
            manifest,
            "    <item id=\"chapter-{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>",
            chapter.order,
            chapter_file(chapter)
        );
        let _ = writeln!(spine, "    <itemref idref=\"chapter-{}\"/>", chapter.order);
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id" xml:lang="{language}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">urn:uuid:{identifier}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>{language}</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="style" href="style.css" media-type="text/css"/>
{manifest}  </manifest>
  <spine>
{spine}  </spine>
</package>
"#,
        title = escape_html(&textbook.name),
    )
}

fn xhtml_page(title: &str, language: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{language}" lang="{language}">
<head>
<meta charset="UTF-8"/>
<title>{title}</title>
<link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
{body}</body>
</html>
"#
    )
}

fn navigation(textbook: &Textbook, language: &str) -> String {
    let mut body = String::from("<nav epub:type=\"toc\" id=\"toc\">\n<h1>Contents</h1>\n<ol>\n");
    for chapter in &textbook.chapters {
        let _ = writeln!(
            body,
            "<li><a href=\"{}\">Chapter {}: {}</a></li>",
            chapter_file(chapter),
            chapter.order,
            escape_html(&chapter.title)
        );
    }
    body.push_str("</ol>\n</nav>\n");
    xhtml_page(&escape_html(&textbook.name), language, &body)
}

fn chapter_document(textbook: &Textbook, chapter: &TextbookChapter, language: &str) -> String {
    let heading = format!("Chapter {}: {}", chapter.order, escape_html(&chapter.title));
    let mut body = String::new();
    let _ = writeln!(body, "<h2>{}</h2>", heading);
    if let Some(prereqs) = prerequisite_line(textbook, chapter) {
        let _ = writeln!(body, "<p class=\"provenance\">Prerequisites: {}</p>", escape_html(&prereqs));
    }
    if let Some(transition) = &chapter.transition {
        let _ = writeln!(body, "<p class=\"transition\">{}</p>", escape_html(transition));
    }
    for entry in &chapter.entries {
        entry_section(&mut body, entry);
    }
    xhtml_page(&heading, language, &body)
}

fn entry_section(out: &mut String, entry: &MergedKnowledge) {
    let _ = writeln!(out, "<h3>{}</h3>", escape_html(&entry.title));
    for paragraph in entry.content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let _ = writeln!(out, "<p>{}</p>", escape_html(paragraph).replace('\n', "<br/>"));
    }
    if let Some(transition) = entry.transition_text.as_ref().filter(|_| entry.is_merge()) {
        let _ = writeln!(out, "<p class=\"transition\">{}</p>", escape_html(transition));
    }
    if !entry.examples.is_empty() {
        out.push_str("<p><strong>Examples</strong></p>\n<ul>\n");
        for example in &entry.examples {
            let _ = writeln!(out, "<li>{}</li>", escape_html(example));
        }
        out.push_str("</ul>\n");
    }
    if !entry.video_markers.is_empty() {
        out.push_str("<div class=\"video-ref\">\n<p>Video references:</p>\n<ul>\n");
        for marker in &entry.video_markers {
            let _ = writeln!(
                out,
                "<li>[{}] {}</li>",
                marker.time_label(),
                escape_html(&marker.description)
            );
        }
        out.push_str("</ul>\n</div>\n");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::io::Read;

    use super::*;
    use crate::models::{PointId, SourceId, VideoMarker};

    fn textbook(name: &str) -> Textbook {
        let source = SourceId::new("lecture1.srt");
        let entry = |title: &str, index: usize| MergedKnowledge {
            title: title.to_string(),
            content: "First line\nsecond line & more.".to_string(),
            contributing_point_ids: vec![PointId::new(&source, index)],
            transition_text: None,
            video_markers: vec![VideoMarker {
                start_ms: 60_000,
                end_ms: 75_000,
                description: "graph <sketch>".to_string(),
            }],
            sources: vec![source.clone()],
            importance: 3,
            examples: vec!["For example, lim 1/x as x grows is 0.".to_string()],
        };
        Textbook {
            name: name.to_string(),
            chapters: vec![
                TextbookChapter {
                    title: "Limits".to_string(),
                    order: 1,
                    transition: None,
                    entries: vec![entry("Limit Concept", 0)],
                },
                TextbookChapter {
                    title: "Derivatives".to_string(),
                    order: 2,
                    transition: Some("With limits in hand, we turn to derivatives.".to_string()),
                    entries: vec![entry("Derivative", 1)],
                },
            ],
            prerequisites: BTreeMap::from([(2, BTreeSet::from([1]))]),
            warnings: vec![],
        }
    }

    fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> String {
        let mut body = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut body).unwrap();
        body
    }

    #[test]
    fn test_epub_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calculus.epub");
        write_epub(&textbook("Calculus"), &path).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        {
            let first = archive.by_index(0).unwrap();
            assert_eq!(first.name(), "mimetype");
            assert_eq!(first.compression(), CompressionMethod::Stored);
        }
        assert_eq!(read_entry(&mut archive, "mimetype"), MIMETYPE);
        assert!(read_entry(&mut archive, "META-INF/container.xml").contains("OEBPS/content.opf"));

        let opf = read_entry(&mut archive, "OEBPS/content.opf");
        assert!(opf.contains("<dc:title>Calculus</dc:title>"));
        assert!(opf.contains("<dc:language>en</dc:language>"));
        assert!(opf.contains("<itemref idref=\"chapter-1\"/>\n    <itemref idref=\"chapter-2\"/>"));

        let nav = read_entry(&mut archive, "OEBPS/nav.xhtml");
        assert!(nav.contains("<a href=\"chapter_2.xhtml\">Chapter 2: Derivatives</a>"));

        let chapter = read_entry(&mut archive, "OEBPS/chapter_2.xhtml");
        assert!(chapter.contains("Prerequisites: Chapter 1 (Limits)"));
        assert!(chapter.contains("<p class=\"transition\">With limits in hand, we turn to derivatives.</p>"));
        assert!(chapter.contains("<p>First line<br/>second line &amp; more.</p>"));
        assert!(chapter.contains("<li>For example, lim 1/x as x grows is 0.</li>"));
        assert!(chapter.contains("[01:00-01:15] graph &lt;sketch&gt;"));
    }

    #[test]
    fn test_chinese_course_language() {
        assert_eq!(language_of(&textbook("微积分")), "zh");
        assert_eq!(language_of(&textbook("Calculus")), "en");
    }
}
