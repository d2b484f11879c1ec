//! Content error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors the content pipeline surfaces to callers.
///
/// Policy vetoes and publish eligibility failures are not errors; they come
/// back as `false` or a failed [`crate::content::PublishStatus`]. Everything
/// here means the operation could not even be attempted.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("no content type matching alias '{0}' was found")]
    UnknownContentType(String),

    #[error("no content type with id {0} was found")]
    UnknownContentTypeId(i32),

    #[error("content {0} not found")]
    NotFound(i32),

    #[error("version {0} not found")]
    VersionNotFound(Uuid),

    #[error("version {version} does not belong to content {content_id}")]
    VersionMismatch { content_id: i32, version: Uuid },

    #[error("version {version} is the current version of content {content_id}; delete the content instead")]
    CurrentVersion { content_id: i32, version: Uuid },

    #[error("version {version} is the published version of content {content_id}; unpublish it first")]
    PublishedVersion { content_id: i32, version: Uuid },

    #[error("content type '{content_type}' has no property '{alias}'")]
    UnknownProperty { content_type: String, alias: String },

    #[error("malformed path '{0}'")]
    InvalidPath(String),

    #[error("storage error")]
    Storage(#[from] anyhow::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Result type alias using ContentError.
pub type ContentResult<T> = Result<T, ContentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_errors_name_the_missing_thing() {
        let err = ContentError::UnknownContentType("textpage".to_string());
        assert_eq!(
            err.to_string(),
            "no content type matching alias 'textpage' was found"
        );

        let err = ContentError::NotFound(1046);
        assert_eq!(err.to_string(), "content 1046 not found");
    }

    #[test]
    fn protected_versions_say_what_to_do_instead() {
        let version = Uuid::nil();
        let err = ContentError::PublishedVersion {
            content_id: 1046,
            version,
        };
        assert_eq!(
            err.to_string(),
            format!("version {version} is the published version of content 1046; unpublish it first")
        );
    }

    #[test]
    fn storage_errors_convert_from_anyhow() {
        let err: ContentError = anyhow::anyhow!("connection reset").into();
        assert!(matches!(err, ContentError::Storage(_)));
    }
}
