use crate::domain::types::ChatMessage;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read session file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("session file {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Load a saved conversation. A missing file is an empty session, not an
/// error; a present but malformed file is.
pub fn load_history(path: &Path) -> Result<Vec<ChatMessage>, SessionError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no session file, starting fresh");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(SessionError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };
    serde_json::from_str(&raw).map_err(|source| SessionError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn save_history(path: &Path, messages: &[ChatMessage]) -> Result<(), SessionError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| SessionError::Io {
            path: path.display().to_string(),
            source,
        })?;
    }
    let raw = serde_json::to_string_pretty(messages).map_err(|source| SessionError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, raw).map_err(|source| SessionError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MessageRole;

    #[test]
    fn missing_file_is_an_empty_session() {
        let dir = tempfile::tempdir().expect("temp dir");
        let history = load_history(&dir.path().join("absent.json")).expect("empty session");
        assert!(history.is_empty());
    }

    #[test]
    fn history_survives_a_save_and_load() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested/session.json");
        let messages = vec![
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi there"),
            ChatMessage::tool_result("call-1", "42"),
        ];

        save_history(&path, &messages).expect("save");
        let restored = load_history(&path).expect("load");
        assert_eq!(restored.len(), 3);
        assert_eq!(restored[0].role, MessageRole::User);
        assert_eq!(restored[2].tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn malformed_session_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").expect("write");

        let err = load_history(&path).expect_err("parse fails");
        assert!(matches!(err, SessionError::Parse { .. }));
    }
}
