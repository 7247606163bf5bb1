use std::fmt;
use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Health reporting vocabulary shared by the service components.
///
/// Every component that can judge its own state (the metrics recorder, the
/// connection pool monitor, the cleanup scheduler) reports a [`ComponentHealth`]:
/// a three-level verdict plus the issues that led to it and what an operator
/// could do about them. Verdicts only ever combine upwards: the combination of
/// several components is as bad as the worst of them.
///
/// `Degraded` means "up but struggling". Only `Unhealthy` maps to a 503 in
/// [`HealthStatus::status_code`]; health endpoints never answer with a 500.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// The more severe of the two statuses.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }

    pub fn is_unhealthy(&self) -> bool {
        *self == HealthStatus::Unhealthy
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// 200 unless unhealthy, in which case 503.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::OK,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            _ => Err(format!(
                "Unknown health status: {s}, must be HEALTHY, DEGRADED or UNHEALTHY"
            )),
        }
    }
}

/// Verdict of a single component, with the reasoning behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Record an issue that makes the component at least `Degraded`.
    pub fn degrade(&mut self, issue: impl Into<String>, recommendation: Option<&str>) {
        self.raise(HealthStatus::Degraded, issue, recommendation);
    }

    /// Record an issue that makes the component `Unhealthy`.
    pub fn fail(&mut self, issue: impl Into<String>, recommendation: Option<&str>) {
        self.raise(HealthStatus::Unhealthy, issue, recommendation);
    }

    /// Record an issue without changing the status.
    pub fn note(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }

    fn raise(
        &mut self,
        status: HealthStatus,
        issue: impl Into<String>,
        recommendation: Option<&str>,
    ) {
        self.status = self.status.worst(status);
        self.issues.push(issue.into());
        if let Some(r) = recommendation {
            if !self.recommendations.iter().any(|existing| existing == r) {
                self.recommendations.push(r.to_string());
            }
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status.is_unhealthy()
    }
}

/// A JSON health body paired with the overall status that picks its HTTP code.
pub struct HealthResponse<T> {
    pub status: HealthStatus,
    pub body: T,
}

impl<T: Serialize> IntoResponse for HealthResponse<T> {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self.body)).into_response()
    }
}
