pub mod epub;
pub mod input;
pub mod output;

pub use epub::write_epub;

pub use input::{discover_sources, load_document, parse_srt, parse_subtitle_file, parse_txt};
pub use output::{export, read_textbook, render_html, render_markdown, write_json, ExportFormat};
