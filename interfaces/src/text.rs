use html2text::render::TrivialDecorator;

/// Maximum stored length of a description, in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// Truncate to `max_chars` characters, appending `...` when anything was cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
    }
}

pub fn truncate_description(text: &str) -> String {
    truncate(text, DESCRIPTION_MAX_CHARS)
}

/// Wrap width handed to the renderer. Output is collapsed to one line, so
/// this only needs to exceed any realistic word.
const RENDER_WIDTH: usize = 4096;

/// Render HTML as a single line of plain text for excerpts. Script and style
/// contents are dropped and entities decoded. Unparseable input yields "".
pub fn html_to_text(html: &str) -> String {
    html2text::from_read_with_decorator(html.as_bytes(), RENDER_WIDTH, TrivialDecorator::new())
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}
