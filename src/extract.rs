//! Pulling artifacts and envelopes out of generator replies.
//!
//! Every extraction fails loudly: an unparseable reply is an
//! [`Error::Extraction`], never an empty artifact.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Feedback recorded when a verifier envelope has no feedback field.
pub const DEFAULT_ACCEPT_FEEDBACK: &str =
    "No feedback was provided by the verifier; the artifact was accepted by default.";

/// Returns the body of the first fenced block tagged `language`.
pub fn extract_code(response: &str, language: &str) -> Result<String> {
    let fence = format!("```{}", language);
    let start = response
        .find(&fence)
        .ok_or_else(|| Error::Extraction(format!("no ```{} block in reply", language)))?;

    // Skip the rest of the opening fence line.
    let after_fence = &response[start + fence.len()..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
    let body = &after_fence[body_start..];

    let end = body
        .find("```")
        .ok_or_else(|| Error::Extraction(format!("unterminated ```{} block", language)))?;

    let code = body[..end].trim();
    if code.is_empty() {
        return Err(Error::Extraction(format!("empty ```{} block", language)));
    }
    Ok(code.to_string())
}

/// Returns the JSON object in a reply: a fenced `json` block if present,
/// else the outermost braces.
fn json_text(response: &str) -> Result<&str> {
    if let Some(start) = response.find("```json") {
        let after = &response[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            return Ok(after[..end].trim());
        }
    }

    let start = response
        .find('{')
        .ok_or_else(|| Error::Extraction("no JSON object in reply".to_string()))?;
    let end = response
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| Error::Extraction("no JSON object in reply".to_string()))?;
    Ok(&response[start..=end])
}

/// Deserializes the JSON object carried by a reply.
pub fn extract_json<T: DeserializeOwned>(response: &str) -> Result<T> {
    let text = json_text(response)?;
    serde_json::from_str(text).map_err(|e| Error::Extraction(format!("invalid JSON: {}", e)))
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    accepted: Option<bool>,
    #[serde(alias = "text")]
    feedback: Option<String>,
}

/// A parsed `{accepted, feedback}` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub accepted: bool,
    pub feedback: String,
    /// True when the feedback field was missing and acceptance was assumed.
    pub defaulted: bool,
}

/// Parses a verifier (or orchestrator) envelope.
///
/// A well-formed object without `feedback`/`text` is accepted with
/// [`DEFAULT_ACCEPT_FEEDBACK`]. A missing `accepted` with feedback present
/// is an extraction failure.
pub fn parse_envelope(response: &str) -> Result<Envelope> {
    let raw: RawEnvelope = extract_json(response)?;

    match (raw.accepted, raw.feedback) {
        (_, None) => Ok(Envelope {
            accepted: true,
            feedback: DEFAULT_ACCEPT_FEEDBACK.to_string(),
            defaulted: true,
        }),
        (Some(accepted), Some(feedback)) => Ok(Envelope {
            accepted,
            feedback,
            defaulted: false,
        }),
        (None, Some(_)) => Err(Error::Extraction(
            "envelope is missing the accepted field".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_code_returns_trimmed_block_body() {
        let reply = "Here you go:\n```python\nprint('hi')\n```\nThanks";
        assert_eq!(extract_code(reply, "python").unwrap(), "print('hi')");
    }

    #[test]
    fn extract_code_picks_the_requested_language() {
        let reply = "```sql\nSELECT 1;\n```\n```html\n<p>x</p>\n```";
        assert_eq!(extract_code(reply, "html").unwrap(), "<p>x</p>");
    }

    #[test]
    fn extract_code_fails_loudly() {
        assert!(matches!(
            extract_code("no code here", "python"),
            Err(Error::Extraction(_))
        ));
        assert!(matches!(
            extract_code("```python\n\n```", "python"),
            Err(Error::Extraction(_))
        ));
        assert!(matches!(
            extract_code("```python\nprint(1)", "python"),
            Err(Error::Extraction(_))
        ));
    }

    #[test]
    fn envelope_reads_feedback_or_text() {
        let rejected = parse_envelope("```json\n{\"accepted\": false, \"feedback\": \"add index\"}\n```")
            .unwrap();
        assert!(!rejected.accepted);
        assert_eq!(rejected.feedback, "add index");
        assert!(!rejected.defaulted);

        let accepted = parse_envelope("{\"accepted\": true, \"text\": \"looks good\"}").unwrap();
        assert!(accepted.accepted);
        assert_eq!(accepted.feedback, "looks good");
    }

    #[test]
    fn envelope_without_feedback_defaults_to_acceptance() {
        let envelope = parse_envelope("{\"accepted\": false}").unwrap();

        assert!(envelope.accepted);
        assert!(envelope.defaulted);
        assert_eq!(
            envelope.feedback,
            "No feedback was provided by the verifier; the artifact was accepted by default."
        );
    }

    #[test]
    fn envelope_without_accepted_is_an_extraction_failure() {
        assert!(matches!(
            parse_envelope("{\"feedback\": \"hmm\"}"),
            Err(Error::Extraction(_))
        ));
        assert!(matches!(
            parse_envelope("I think it is fine"),
            Err(Error::Extraction(_))
        ));
    }

    #[test]
    fn extract_json_deserializes_typed_objects() {
        #[derive(Deserialize)]
        struct Tasks {
            database: String,
        }
        let tasks: Tasks = extract_json("```json\n{\"database\": \"polls table\"}\n```").unwrap();
        assert_eq!(tasks.database, "polls table");
    }
}
