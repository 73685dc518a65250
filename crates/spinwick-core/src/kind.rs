use serde::{Deserialize, Serialize};

/// Which SpinWick flavor a label asked for. Resolved once per event from
/// configuration, then switched on exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinwickKind {
    Standard,
    Ha,
    WithCustomerService,
}

impl SpinwickKind {
    pub fn with_license(self) -> bool {
        matches!(self, Self::Ha)
    }

    pub fn with_customer_service(self) -> bool {
        matches!(self, Self::WithCustomerService)
    }
}

/// How an environment is provisioned. Resolved once per event from the
/// repository configuration; the lifecycle controller dispatches on this
/// tag instead of comparing repository names inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentKind {
    PlainCloud,
    CustomerServiceCloud,
    KubernetesNamespace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ha_requests_carry_a_license() {
        assert!(!SpinwickKind::Standard.with_license());
        assert!(SpinwickKind::Ha.with_license());
        assert!(!SpinwickKind::WithCustomerService.with_license());
    }

    #[test]
    fn environment_kind_round_trips_through_kebab_case() {
        let parsed: EnvironmentKind = serde_json::from_str("\"customer-service-cloud\"").unwrap();
        assert_eq!(parsed, EnvironmentKind::CustomerServiceCloud);
    }
}
