//! Shared error classification for the ordering and state-tracking engines.
//!
//! Every fallible operation in this workspace returns `anyhow::Result<T>`,
//! and operations that need to be programmatically classified (retry vs.
//! fatal, conflict vs. ordering violation, ...) attach an
//! [`ErrorMetadata`] via `.context(...)`, which can then be recovered with
//! [`ErrorMetadataAnyhowExt`].
#![allow(clippy::result_large_err)]

use std::borrow::Cow;

pub mod shutdown;

/// A tag attached to an `anyhow::Error` chain classifying it for retry
/// policy, metrics, and operator-facing diagnostics.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// Short, grep-friendly, stable identifier. Used in tests and metrics
    /// tags; should not change across releases even if `msg` does.
    pub short_msg: Cow<'static, str>,
    /// Operator/developer facing description.
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub enum ErrorCode {
    /// A malformed wire payload, unrecognized enum tag, unset required
    /// field, or protocol version conflict observed at ingest. Always
    /// non-retryable.
    Deserialization,
    /// Conflicting payload id, double create/archive at different `toc`,
    /// inconsistent counter checkpoint, or watermark ownership conflict.
    Conflict,
    /// Event timestamp below writer watermark, request timestamp mismatch,
    /// or a cursor that would move backwards. Fatal.
    OrderingViolation,
    /// Driver-classified retryable I/O error. Retried with bounded backoff.
    Transient,
    /// Cancellation observed; does not resume.
    Shutdown,
    /// Handshake/version negotiation or authentication failure.
    Handshake,
    /// A required storage setting (e.g. synchronous_commit) could not be
    /// confirmed.
    CommitModeValidation,
}

impl ErrorMetadata {
    pub fn conflict(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Conflict,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn ordering_violation(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::OrderingViolation,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn transient(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Transient,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn shutdown() -> Self {
        Self {
            code: ErrorCode::Shutdown,
            short_msg: "AbortedDueToShutdown".into(),
            msg: "operation aborted because shutdown was requested".into(),
        }
    }

    pub fn handshake(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Handshake,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn deserialization(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Deserialization,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn commit_mode_validation(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::CommitModeValidation,
            short_msg: "CommitModeMismatch".into(),
            msg: msg.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.code == ErrorCode::Conflict
    }

    pub fn is_transient(&self) -> bool {
        self.code == ErrorCode::Transient
    }

    pub fn is_shutdown(&self) -> bool {
        self.code == ErrorCode::Shutdown
    }

    pub fn is_ordering_violation(&self) -> bool {
        self.code == ErrorCode::OrderingViolation
    }

    /// Fatal errors terminate the writer; nothing in the retry combinator
    /// should retry them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::OrderingViolation
                | ErrorCode::Conflict
                | ErrorCode::Deserialization
                | ErrorCode::Handshake
        )
    }
}

pub trait ErrorMetadataAnyhowExt {
    fn is_conflict(&self) -> bool;
    fn is_transient(&self) -> bool;
    fn is_shutdown(&self) -> bool;
    fn is_ordering_violation(&self) -> bool;
    fn is_fatal(&self) -> bool;
    fn short_msg(&self) -> &str;
}

const UNCLASSIFIED: &str = "Unclassified";

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_conflict(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>().is_some_and(|e| e.is_conflict())
    }

    fn is_transient(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>().is_some_and(|e| e.is_transient())
    }

    fn is_shutdown(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>().is_some_and(|e| e.is_shutdown())
    }

    fn is_ordering_violation(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(|e| e.is_ordering_violation())
    }

    /// Unclassified errors (no `ErrorMetadata` in the chain) are treated as
    /// fatal: we only retry errors we've positively classified as transient.
    fn is_fatal(&self) -> bool {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => e.is_fatal(),
            None => true,
        }
    }

    fn short_msg(&self) -> &str {
        self.downcast_ref::<ErrorMetadata>()
            .map(|e| e.short_msg.as_ref())
            .unwrap_or(UNCLASSIFIED)
    }
}

#[cfg(any(test, feature = "testing"))]
mod proptest_impls {
    use proptest::prelude::*;

    use crate::{
        ErrorCode,
        ErrorMetadata,
    };

    impl Arbitrary for ErrorMetadata {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: ()) -> Self::Strategy {
            any::<ErrorCode>()
                .prop_map(|code| match code {
                    ErrorCode::Deserialization => ErrorMetadata::deserialization("bad", "wire"),
                    ErrorCode::Conflict => ErrorMetadata::conflict("c", "conflict"),
                    ErrorCode::OrderingViolation => ErrorMetadata::ordering_violation("o", "order"),
                    ErrorCode::Transient => ErrorMetadata::transient("t", "transient"),
                    ErrorCode::Shutdown => ErrorMetadata::shutdown(),
                    ErrorCode::Handshake => ErrorMetadata::handshake("h", "handshake"),
                    ErrorCode::CommitModeValidation => ErrorMetadata::commit_mode_validation("mode"),
                })
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn fatal_classification_is_consistent(em in any::<ErrorMetadata>()) {
            let fatal = em.is_fatal();
            let err: anyhow::Error = anyhow::anyhow!("inner").context(em);
            prop_assert_eq!(err.is_fatal(), fatal);
        }
    }

    #[test]
    fn unclassified_error_is_fatal() {
        let err = anyhow::anyhow!("boom");
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }
}
