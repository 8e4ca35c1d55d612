//! Server-rendered upload page.

use catvox_core::pipeline::ResponseEnvelope;

/// Outcome shown under the upload form.
#[derive(Debug, Default, PartialEq)]
pub struct PageResult {
    pub message: String,
    pub timestamp: Option<String>,
    pub confidence: Option<f32>,
}

impl PageResult {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

impl From<&ResponseEnvelope> for PageResult {
    fn from(envelope: &ResponseEnvelope) -> Self {
        match envelope {
            ResponseEnvelope::Success(prediction) => Self {
                message: prediction.result.clone(),
                timestamp: Some(prediction.timestamp.clone()),
                confidence: Some(prediction.confidence),
            },
            ResponseEnvelope::Error { error } => Self::message(error.clone()),
        }
    }
}

/// Render the index page, optionally with the last result.
pub fn render_index(result: Option<&PageResult>) -> String {
    let result_html = result.map(render_result).unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>catvox - cat meow translator</title>
</head>
<body>
<main>
<h1>Cat Meow Translator</h1>
<form method="post" action="/" enctype="multipart/form-data">
<input type="file" name="audio_file" accept=".wav,.mp3,.webm,audio/*" required>
<button type="submit">Translate</button>
</form>
{result_html}</main>
</body>
</html>
"#
    )
}

fn render_result(result: &PageResult) -> String {
    let mut html = format!(
        "<section id=\"result\">\n<p class=\"label\">{}</p>\n",
        escape_html(&result.message)
    );

    if let Some(confidence) = result.confidence {
        html.push_str(&format!(
            "<p class=\"confidence\">Confidence: {:.1}%</p>\n",
            confidence * 100.0
        ));
    }

    if let Some(timestamp) = &result.timestamp {
        html.push_str(&format!(
            "<p class=\"timestamp\">{}</p>\n",
            escape_html(timestamp)
        ));
    }

    html.push_str("</section>\n");
    html
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_page_has_form_only() {
        let html = render_index(None);

        assert!(html.contains(r#"name="audio_file""#));
        assert!(!html.contains("id=\"result\""));
    }

    #[test]
    fn result_is_escaped() {
        let result = PageResult::message("<script>alert('x')</script>");
        let html = render_index(Some(&result));

        assert!(html.contains("&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn success_shows_confidence_and_timestamp() {
        let result = PageResult {
            message: "Happy".to_string(),
            timestamp: Some("2024-05-01 10:00:00".to_string()),
            confidence: Some(0.8731),
        };
        let html = render_index(Some(&result));

        assert!(html.contains(">Happy<"));
        assert!(html.contains("Confidence: 87.3%"));
        assert!(html.contains("2024-05-01 10:00:00"));
    }

    #[test]
    fn error_envelope_maps_to_message() {
        let envelope = ResponseEnvelope::error("Audio file is empty");
        assert_eq!(
            PageResult::from(&envelope),
            PageResult::message("Audio file is empty")
        );
    }
}
