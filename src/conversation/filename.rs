//! Filename suggestions for composed content.

use chrono::Local;
use tracing::{debug, warn};

use crate::error::Result;
use crate::prompts::{filename_suggestion_prompt, BASE_SYSTEM_PROMPT};
use crate::provider::{ModelProvider, ProviderRequest};
use crate::types::{GenerationSettings, ModelMessage};

/// Characters of content shown to the model.
const CONTENT_PREVIEW_CHARS: usize = 500;

const DEFAULT_EXTENSION: &str = ".md";

/// File extension for a fenced-block language tag. `None` for tags without a
/// known mapping.
pub fn extension_for(language: &str) -> Option<&'static str> {
    let ext = match language.trim().to_lowercase().as_str() {
        "python" | "py" => ".py",
        "javascript" | "js" => ".js",
        "typescript" | "ts" => ".ts",
        "java" => ".java",
        "c" => ".c",
        "cpp" | "c++" => ".cpp",
        "csharp" | "c#" => ".cs",
        "go" => ".go",
        "rust" | "rs" => ".rs",
        "ruby" => ".rb",
        "php" => ".php",
        "swift" => ".swift",
        "kotlin" => ".kt",
        "html" => ".html",
        "css" => ".css",
        "sql" => ".sql",
        "shell" | "bash" | "sh" => ".sh",
        "json" => ".json",
        "xml" => ".xml",
        "yaml" => ".yaml",
        "yml" => ".yml",
        "markdown" | "md" => ".md",
        "text" | "plaintext" => ".txt",
        _ => return None,
    };
    Some(ext)
}

/// Ask the model for a filename for `content`.
///
/// The extension follows `language` (`.md` when unknown) and is enforced on
/// whatever the model returns. Never fails: a model error or an unusable
/// reply yields `dasi_response_<timestamp><ext>`.
pub async fn suggest_filename(
    provider: &dyn ModelProvider,
    content: &str,
    recent_query: &str,
    language: Option<&str>,
) -> String {
    let known = language.and_then(|lang| extension_for(lang).map(|ext| (lang, ext)));
    let extension = known.map_or(DEFAULT_EXTENSION, |(_, ext)| ext);

    match request_filename(provider, content, recent_query, known).await {
        Ok(reply) => match normalize_filename(&reply, extension) {
            Some(name) => {
                debug!(filename = %name, "filename suggested");
                name
            }
            None => {
                warn!(reply = %reply, "model returned no usable filename");
                fallback_filename(extension)
            }
        },
        Err(e) => {
            warn!(error = %e, "filename suggestion failed");
            fallback_filename(extension)
        }
    }
}

async fn request_filename(
    provider: &dyn ModelProvider,
    content: &str,
    recent_query: &str,
    known: Option<(&str, &'static str)>,
) -> Result<String> {
    let extension = known.map_or(DEFAULT_EXTENSION, |(_, ext)| ext);
    let hint = known
        .map(|(lang, ext)| format!("(use {ext} extension for this {lang} code)"))
        .unwrap_or_default();
    let preview: String = content.chars().take(CONTENT_PREVIEW_CHARS).collect();

    let request = ProviderRequest {
        messages: vec![
            ModelMessage::system(BASE_SYSTEM_PROMPT),
            ModelMessage::user(filename_suggestion_prompt(
                extension,
                &hint,
                recent_query,
                &preview,
            )),
        ],
        settings: GenerationSettings::builder()
            .temperature(0.2)
            .max_tokens(50)
            .build(),
        tools: None,
    };
    Ok(provider.generate_text(&request).await?.text)
}

/// First line of the reply, unquoted, path separators and leading dots
/// dropped, with `extension` forced on.
fn normalize_filename(reply: &str, extension: &str) -> Option<String> {
    let line = reply.trim().lines().next()?;
    let name: String = line
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\'))
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    if name.ends_with(extension) && name.len() > extension.len() {
        return Some(name);
    }
    let stem = name
        .trim_start_matches('.')
        .split('.')
        .next()
        .unwrap_or_default();
    if stem.is_empty() {
        return None;
    }
    Some(format!("{stem}{extension}"))
}

fn fallback_filename(extension: &str) -> String {
    format!("dasi_response_{}{extension}", Local::now().format("%Y%m%d_%H%M%S"))
}
