//! Source URL templating.

/// Placeholder replaced with the 1-based unit index.
pub const INDEX_PLACEHOLDER: &str = "{index}";

/// Renders the source URL for one unit. Templates without the placeholder
/// are returned verbatim, so every unit fetches the same URL.
pub fn render_url(template: &str, index: usize) -> String {
    if template.contains(INDEX_PLACEHOLDER) {
        template.replace(INDEX_PLACEHOLDER, &index.to_string())
    } else {
        template.to_string()
    }
}
