//! Building blocks of the build pass: context digests, build-arg filtering,
//! output decoding and the failure hook.

mod args;
mod fingerprint;
mod hook;
mod log;

pub use args::{applicable_build_args, declared_args};
pub use fingerprint::{
    context_digest, dependency_digest, CONTEXT_DIGEST_LABEL, DEPENDENCY_DIGEST_LABEL,
};
pub use hook::{hook_from_settings, CommandHook, FailureHook, NoopHook};
pub use log::{LogDecoder, LogSegment, LogTail};

use std::fmt;

/// Why a container is part of the build set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildReason {
    /// No local image and the registry does not have one.
    Missing,
    /// The context digest differs from the image's label.
    Changed,
    /// Requested with `--force`.
    Forced,
    /// Depends on a container that is being rebuilt, or was rebuilt since
    /// this image was built.
    AncestorOfChanged,
}

impl fmt::Display for BuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BuildReason::Missing => "image missing",
            BuildReason::Changed => "context changed",
            BuildReason::Forced => "forced",
            BuildReason::AncestorOfChanged => "dependency rebuilt",
        };
        f.write_str(text)
    }
}
