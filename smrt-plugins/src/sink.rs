//! Pass-through clients that never receive submissions

use async_trait::async_trait;
use smrt_core::SmrtError;

use crate::{Submission, SubmissionClient};

/// Indicators are printed by the service loop at the end of each cycle
#[derive(Debug, Default, Clone)]
pub struct StdoutClient;

#[async_trait]
impl SubmissionClient for StdoutClient {
    fn name(&self) -> &str {
        "stdout"
    }

    fn is_passthrough(&self) -> bool {
        true
    }

    fn renders_output(&self) -> bool {
        true
    }

    async fn ping(&self, _write: bool) -> Result<bool, SmrtError> {
        Ok(true)
    }

    async fn indicators_create(&self, submission: Submission<'_>) -> Result<usize, SmrtError> {
        Ok(submission.len())
    }
}

/// Discards everything; useful for warming the archive
#[derive(Debug, Default, Clone)]
pub struct NullClient;

#[async_trait]
impl SubmissionClient for NullClient {
    fn name(&self) -> &str {
        "null"
    }

    fn is_passthrough(&self) -> bool {
        true
    }

    async fn ping(&self, _write: bool) -> Result<bool, SmrtError> {
        Ok(true)
    }

    async fn indicators_create(&self, submission: Submission<'_>) -> Result<usize, SmrtError> {
        Ok(submission.len())
    }
}
