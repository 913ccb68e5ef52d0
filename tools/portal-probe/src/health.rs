//! Health and schema checks against a running CRM origin.

use gymkit_common::{GymKitError, Result};
use gymkit_net::{Fetcher, Request};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// What a check expects from the JSON body.
#[derive(Debug, Clone, Copy)]
pub enum Expect {
    /// A `status` field with any value.
    HasStatus,
    /// `status` equal to the given string.
    Status(&'static str),
    /// Every listed top-level field present.
    Fields(&'static [&'static str]),
}

/// A single endpoint check.
#[derive(Debug, Clone, Copy)]
pub struct Check {
    pub name: &'static str,
    pub path: &'static str,
    pub expect: Expect,
}

/// Checks run by `portal-probe health`.
pub const CHECKS: &[Check] = &[
    Check {
        name: "health",
        path: "/health/",
        expect: Expect::HasStatus,
    },
    Check {
        name: "liveness",
        path: "/health/live/",
        expect: Expect::Status("ok"),
    },
    Check {
        name: "readiness",
        path: "/health/ready/",
        expect: Expect::Status("ok"),
    },
    Check {
        name: "ping",
        path: "/health/ping/",
        expect: Expect::Status("pong"),
    },
    Check {
        name: "schema",
        path: "/api/schema/",
        expect: Expect::Fields(&["openapi", "paths"]),
    },
];

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub url: String,
    pub passed: bool,
    pub status: Option<u16>,
    pub category: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub origin: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Run every check in order against `origin`.
pub async fn run(fetcher: &dyn Fetcher, origin: &Url) -> Result<HealthReport> {
    let mut checks = Vec::with_capacity(CHECKS.len());

    for check in CHECKS {
        let url = origin.join(check.path)?;
        let (status, outcome) = run_one(fetcher, &url, check.expect).await;

        let result = match outcome {
            Ok(()) => {
                debug!(check = check.name, %url, "Check passed");
                CheckResult {
                    name: check.name.to_string(),
                    url: url.to_string(),
                    passed: true,
                    status,
                    category: None,
                    error: None,
                }
            }
            Err(error) => {
                warn!(check = check.name, %url, %error, "Check failed");
                CheckResult {
                    name: check.name.to_string(),
                    url: url.to_string(),
                    passed: false,
                    status,
                    category: Some(error.category().to_string()),
                    error: Some(error.to_string()),
                }
            }
        };
        checks.push(result);
    }

    let passed = checks.iter().filter(|c| c.passed).count();
    Ok(HealthReport {
        origin: origin.to_string(),
        total: checks.len(),
        passed,
        failed: checks.len() - passed,
        checks,
    })
}

async fn run_one(fetcher: &dyn Fetcher, url: &Url, expect: Expect) -> (Option<u16>, Result<()>) {
    let response = match fetcher.fetch(&Request::get(url.clone())).await {
        Ok(response) => response,
        Err(e) => return (None, Err(GymKitError::network_with_source(url.as_str(), e))),
    };

    let status = response.status.as_u16();
    if !response.ok() {
        return (
            Some(status),
            Err(GymKitError::CheckFailed(format!("HTTP {status}"))),
        );
    }

    let body: Value = match response.json() {
        Ok(body) => body,
        Err(e) => {
            return (
                Some(status),
                Err(GymKitError::network_with_source("invalid JSON body", e)),
            )
        }
    };

    (Some(status), verify(&body, expect))
}

fn verify(body: &Value, expect: Expect) -> Result<()> {
    match expect {
        Expect::HasStatus => body
            .get("status")
            .map(|_| ())
            .ok_or_else(|| GymKitError::CheckFailed("missing `status`".to_string())),
        Expect::Status(wanted) => match body.get("status").and_then(Value::as_str) {
            Some(actual) if actual == wanted => Ok(()),
            Some(actual) => Err(GymKitError::CheckFailed(format!(
                "status is {actual:?}, expected {wanted:?}"
            ))),
            None => Err(GymKitError::CheckFailed("missing `status`".to_string())),
        },
        Expect::Fields(fields) => {
            let missing: Vec<&str> = fields
                .iter()
                .copied()
                .filter(|field| body.get(field).is_none())
                .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                Err(GymKitError::CheckFailed(format!(
                    "missing fields: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}
