//! Stop / continue / fatal decisions for errors raised during a cycle

use smrt_core::SmrtError;

/// What the service loop does after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log and stop cleanly
    Stop,
    /// Log and keep going
    Continue,
    /// Report and exit non-zero
    Fatal,
}

pub fn classify(err: &SmrtError) -> Disposition {
    match err {
        SmrtError::Auth(_) | SmrtError::Timeout(_) | SmrtError::Interrupted => Disposition::Stop,
        SmrtError::Runtime(_) if err.is_submission_failure() => Disposition::Stop,
        SmrtError::Runtime(_) => Disposition::Continue,
        SmrtError::Config(_)
        | SmrtError::PluginNotFound(_)
        | SmrtError::FeedNotFound { .. }
        | SmrtError::Rule { .. }
        | SmrtError::Coerce(_)
        | SmrtError::Archive(_)
        | SmrtError::Io(_)
        | SmrtError::Json(_) => Disposition::Fatal,
    }
}
