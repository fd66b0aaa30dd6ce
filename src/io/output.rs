use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::epub::write_epub;
use crate::models::{MergedKnowledge, Textbook, TextbookChapter};

/// Rendered textbook format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Html,
    Epub,
    Json,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Markdown,
        ExportFormat::Html,
        ExportFormat::Epub,
        ExportFormat::Json,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Html => "html",
            ExportFormat::Epub => "epub",
            ExportFormat::Json => "json",
        }
    }
}

/// Render a textbook as Markdown with a table of contents
pub fn render_markdown(textbook: &Textbook) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", textbook.name);
    out.push_str("## Contents\n\n");
    for chapter in &textbook.chapters {
        let _ = writeln!(out, "{}. {}", chapter.order, chapter.title);
    }
    out.push_str("\n---\n\n");

    for chapter in &textbook.chapters {
        let _ = writeln!(out, "## Chapter {}: {}\n", chapter.order, chapter.title);
        if let Some(prereqs) = prerequisite_line(textbook, chapter) {
            let _ = writeln!(out, "_Prerequisites: {}_\n", prereqs);
        }
        if let Some(transition) = &chapter.transition {
            let _ = writeln!(out, "*{}*\n", transition);
        }

        for entry in &chapter.entries {
            let _ = writeln!(out, "### {}\n", entry.title);
            let _ = writeln!(out, "{}\n", entry.content.trim());

            if entry.is_merge() {
                let sources: Vec<&str> = entry.sources.iter().map(|s| s.as_str()).collect();
                let _ = writeln!(
                    out,
                    "> Combines {} points from: {}",
                    entry.contributing_point_ids.len(),
                    sources.join(", ")
                );
                if let Some(transition) = &entry.transition_text {
                    let _ = writeln!(out, ">\n> {}", transition);
                }
                out.push('\n');
            }

            if !entry.examples.is_empty() {
                out.push_str("**Examples:**\n\n");
                for example in &entry.examples {
                    let _ = writeln!(out, "- {}", example);
                }
                out.push('\n');
            }

            if !entry.video_markers.is_empty() {
                out.push_str("> **Video references:**\n");
                for marker in &entry.video_markers {
                    let _ = writeln!(out, "> - [{}] {}", marker.time_label(), marker.description);
                }
                out.push('\n');
            }
        }
        out.push_str("---\n\n");
    }

    out
}

/// Render a standalone HTML page; all model-written text is escaped
pub fn render_html(textbook: &Textbook) -> String {
    let name = escape_html(&textbook.name);
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<title>{}</title>\n<style>\n{}</style>\n</head>\n<body>\n<h1>{}</h1>\n",
        name, STYLE, name
    );

    out.push_str("<nav class=\"toc\">\n<ol>\n");
    for chapter in &textbook.chapters {
        let _ = writeln!(
            out,
            "<li><a href=\"#chapter-{}\">{}</a></li>",
            chapter.order,
            escape_html(&chapter.title)
        );
    }
    out.push_str("</ol>\n</nav>\n");

    for chapter in &textbook.chapters {
        let _ = writeln!(
            out,
            "<section id=\"chapter-{}\">\n<h2>Chapter {}: {}</h2>",
            chapter.order,
            chapter.order,
            escape_html(&chapter.title)
        );
        if let Some(prereqs) = prerequisite_line(textbook, chapter) {
            let _ = writeln!(out, "<p class=\"prereq\">Prerequisites: {}</p>", escape_html(&prereqs));
        }
        if let Some(transition) = &chapter.transition {
            let _ = writeln!(out, "<p class=\"transition\">{}</p>", escape_html(transition));
        }
        for entry in &chapter.entries {
            render_html_entry(&mut out, entry);
        }
        out.push_str("</section>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

const STYLE: &str = "body { font-family: system-ui, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; line-height: 1.6; }
.toc { background: #f8f9fa; padding: 10px 20px; }
.transition { font-style: italic; color: #666; border-left: 3px solid #007bff; padding-left: 15px; }
.video-ref { background: #f0f7ff; padding: 10px 15px; }
.provenance { color: #888; font-size: 0.9em; }
.examples { border-left: 3px solid #28a745; padding-left: 15px; }
";

fn render_html_entry(out: &mut String, entry: &MergedKnowledge) {
    let _ = writeln!(out, "<article>\n<h3>{}</h3>", escape_html(&entry.title));
    for paragraph in entry.content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let _ = writeln!(out, "<p>{}</p>", escape_html(paragraph).replace('\n', "<br>"));
    }
    if entry.is_merge() {
        let sources: Vec<String> = entry.sources.iter().map(|s| escape_html(s.as_str())).collect();
        let _ = writeln!(out, "<p class=\"provenance\">Combined from: {}</p>", sources.join(", "));
        if let Some(transition) = &entry.transition_text {
            let _ = writeln!(out, "<p class=\"transition\">{}</p>", escape_html(transition));
        }
    }
    if !entry.examples.is_empty() {
        out.push_str("<div class=\"examples\">\n<h4>Examples</h4>\n<ul>\n");
        for example in &entry.examples {
            let _ = writeln!(out, "<li>{}</li>", escape_html(example));
        }
        out.push_str("</ul>\n</div>\n");
    }
    if !entry.video_markers.is_empty() {
        out.push_str("<div class=\"video-ref\">\n<ul>\n");
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
    out.push_str("</article>\n");
}

pub(super) fn prerequisite_line(textbook: &Textbook, chapter: &TextbookChapter) -> Option<String> {
    let prereqs = textbook.prerequisites.get(&chapter.order)?;
    let titles: Vec<String> = prereqs
        .iter()
        .filter_map(|order| textbook.chapters.iter().find(|c| c.order == *order))
        .map(|c| format!("Chapter {} ({})", c.order, c.title))
        .collect();
    (!titles.is_empty()).then(|| titles.join(", "))
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Write a textbook to a JSON file
pub fn write_json(textbook: &Textbook, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    serde_json::to_writer_pretty(file, textbook).context("Failed to write JSON")?;
    Ok(())
}

/// Load a textbook previously written with [`write_json`]
pub fn read_textbook(path: &Path) -> Result<Textbook> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse textbook JSON: {:?}", path))
}

/// File-system safe stem derived from the course name
pub fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() { "course".to_string() } else { stem.to_string() }
}

/// Export a textbook in each requested format into `dir`
pub fn export(textbook: &Textbook, dir: &Path, formats: &[ExportFormat]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;
    let stem = file_stem(&textbook.name);

    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let path = dir.join(format!("{}.{}", stem, format.extension()));
        match format {
            ExportFormat::Json => write_json(textbook, &path)?,
            ExportFormat::Markdown => std::fs::write(&path, render_markdown(textbook))
                .with_context(|| format!("Failed to write file: {:?}", path))?,
            ExportFormat::Html => std::fs::write(&path, render_html(textbook))
                .with_context(|| format!("Failed to write file: {:?}", path))?,
            ExportFormat::Epub => write_epub(textbook, &path)?,
        }
        written.push(path);
    }
    Ok(written)
}
