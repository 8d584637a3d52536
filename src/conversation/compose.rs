//! Compose-mode post-processing.

/// Unwrap a response that is exactly one fenced block.
///
/// Returns the block body and its lower-cased language tag. Anything else
/// comes back unchanged with no language.
pub fn extract_block(response: &str) -> (String, Option<String>) {
    let trimmed = response.trim();
    if trimmed.len() < 6 || !trimmed.starts_with("```") || !trimmed.ends_with("```") {
        return (response.to_string(), None);
    }

    let inner = &trimmed[3..trimmed.len() - 3];
    let (tag, body) = match inner.split_once('\n') {
        Some((tag, body)) => (tag.trim(), body),
        None => return (response.to_string(), None),
    };
    // A fence inside the body means more than one block.
    if body.contains("\n```") {
        return (response.to_string(), None);
    }

    let language = (!tag.is_empty()).then(|| tag.to_lowercase());
    (body.trim().to_string(), language)
}
