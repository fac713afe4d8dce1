use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::DeployError;

/// Subscription tier. Each maps to exactly one [`Quota`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Starter,
    Pro,
    Enterprise,
}

/// Resource quota applied to a tenant namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub requests_cpu: &'static str,
    pub requests_memory: &'static str,
    pub limits_cpu: &'static str,
    pub limits_memory: &'static str,
    pub max_pods: u32,
    pub max_services: u32,
}

impl Plan {
    pub fn all() -> &'static [Plan] {
        &[Plan::Starter, Plan::Pro, Plan::Enterprise]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    pub fn quota(self) -> Quota {
        match self {
            Plan::Starter => Quota {
                requests_cpu: "500m",
                requests_memory: "512Mi",
                limits_cpu: "1",
                limits_memory: "1Gi",
                max_pods: 5,
                max_services: 5,
            },
            Plan::Pro => Quota {
                requests_cpu: "2",
                requests_memory: "2Gi",
                limits_cpu: "4",
                limits_memory: "4Gi",
                max_pods: 20,
                max_services: 10,
            },
            Plan::Enterprise => Quota {
                requests_cpu: "8",
                requests_memory: "8Gi",
                limits_cpu: "16",
                limits_memory: "16Gi",
                max_pods: 100,
                max_services: 50,
            },
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = DeployError;

    /// Exact, case-sensitive match. `Pro` is not `pro`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(DeployError::UnknownPlan(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_quota() {
        let quota: Quota = "pro".parse::<Plan>().unwrap().quota();
        assert_eq!(quota.requests_cpu, "2");
        assert_eq!(quota.requests_memory, "2Gi");
        assert_eq!(quota.limits_cpu, "4");
        assert_eq!(quota.limits_memory, "4Gi");
        assert_eq!(quota.max_pods, 20);
    }

    #[test]
    fn resolution_is_deterministic() {
        for plan in Plan::all() {
            let again: Plan = plan.as_str().parse().unwrap();
            assert_eq!(again.quota(), plan.quota());
        }
    }

    #[test]
    fn unknown_plan_message() {
        for bad in ["bogus", "", "Pro", "premium"] {
            let err = bad.parse::<Plan>().unwrap_err();
            assert!(err.to_string().contains("PLAN must be starter, pro, or enterprise."));
        }
    }
}
