use anyhow::Error;

/// Installation ID used before a workflow has resolved (or created) a real
/// installation.
pub const PLACEHOLDER_INSTALLATION_ID: &str = "n/a";

/// Outcome accumulator for a single create/update/destroy workflow. Built at
/// the start of an operation, threaded by value through every step, and
/// inspected once by the workflow's outer wrapper. Never shared across
/// concurrent operations.
#[derive(Debug)]
pub struct LifecycleRequest {
    pub installation_id: String,
    pub error: Option<Error>,
    /// The operation stopped on purpose (duplicate environment, label
    /// removed mid-wait, race lost) rather than failing.
    pub aborted: bool,
    /// The failure should be escalated to the operator channel.
    pub report_error: bool,
}

impl Default for LifecycleRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleRequest {
    pub fn new() -> Self {
        Self {
            installation_id: PLACEHOLDER_INSTALLATION_ID.to_owned(),
            error: None,
            aborted: false,
            report_error: false,
        }
    }

    pub fn with_installation_id(mut self, id: impl Into<String>) -> Self {
        self.installation_id = id.into();
        self
    }

    pub fn with_error(mut self, error: Error) -> Self {
        self.error = Some(error);
        self
    }

    pub fn should_report_error(mut self) -> Self {
        self.report_error = true;
        self.aborted = false;
        self
    }

    pub fn intentional_abort(mut self) -> Self {
        self.aborted = true;
        self.report_error = false;
        self
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn new_request_starts_with_placeholder_id() {
        let request = LifecycleRequest::new();
        assert_eq!(request.installation_id, PLACEHOLDER_INSTALLATION_ID);
        assert!(!request.failed());
        assert!(!request.aborted);
        assert!(!request.report_error);
    }

    #[test]
    fn should_report_error_overrides_prior_abort() {
        let request = LifecycleRequest::new()
            .with_error(anyhow!("boom"))
            .intentional_abort()
            .should_report_error();

        assert!(request.failed());
        assert!(request.report_error);
        assert!(!request.aborted);
    }

    #[test]
    fn intentional_abort_clears_report_flag() {
        let request = LifecycleRequest::new()
            .with_error(anyhow!("already exists"))
            .should_report_error()
            .intentional_abort();

        assert!(request.aborted);
        assert!(!request.report_error);
    }
}
