//! Render graph error types.
//!
//! Only runtime failures surface here. Malformed graphs (double writes, stale
//! reads, cycles, undefined layouts) are programmer errors and panic at the
//! point where they are detected.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors that can occur while compiling or executing a render graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderGraphError {
    /// The resource provider failed to allocate a graph-owned resource.
    /// The compiled graph is not produced.
    #[error("failed to create resource '{name}': {source}")]
    ResourceCreation {
        name: String,
        #[source]
        source: BackendError,
    },

    /// An external resource handle is no longer alive in the resource provider.
    #[error("external resource '{name}' has no live handle for frame slot {frame}")]
    ExternalResourceMissing { name: String, frame: usize },

    /// An external resource was registered without any per-frame handle.
    #[error("external resource '{name}' was registered without handles")]
    ExternalResourceEmpty { name: String },

    /// A pass failed while recording its commands.
    #[error("pass '{pass}' failed: {source}")]
    PassFailed {
        pass: String,
        #[source]
        source: BackendError,
    },

    /// Queue submission or fence operation failed. Fatal for the current frame.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RenderGraphResult<T> = Result<T, RenderGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderGraphError::ResourceCreation {
            name: "gbuffer".into(),
            source: BackendError::OutOfMemory,
        };
        assert_eq!(
            err.to_string(),
            "failed to create resource 'gbuffer': Out of memory"
        );

        let err: RenderGraphError = BackendError::DeviceLost.into();
        assert_eq!(err.to_string(), "Device lost");
    }
}
