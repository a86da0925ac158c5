//! HTTP surface for claim analysis and history browsing.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::explain::ExplanationClient;
use crate::history::{HistoryEntry, HistoryError, HistoryStore};
use crate::scoring::{
    parse_claim_date, ClaimScorer, RawClaimRecord, RawValue, RiskTier, ScoringError,
};

pub const CLAIM_DATE_FIELD: &str = "FECHA DE LA RECLAMACION";
const ACCIDENT_DATE_FIELD: &str = "FECHA DEL ACCIDENTE";
const POLICY_ISSUE_FIELD: &str = "FECHA EN LA QUE SE EMITIO LA POLIZA";

/// Shared state for the claims API. The scorer is read-only; the history
/// store is the only mutable piece and lives behind a mutex.
#[derive(Clone)]
pub struct ClaimsState {
    pub scorer: Arc<ClaimScorer>,
    pub history: Arc<Mutex<HistoryStore>>,
    pub explainer: Arc<ExplanationClient>,
    pub default_credential: Option<String>,
}

/// Router builder exposing the claim-analysis and history endpoints.
pub fn claims_router(state: ClaimsState) -> Router {
    Router::new()
        .route("/api/v1/claims/analyze", post(analyze_handler))
        .route(
            "/api/v1/claims/history",
            get(history_index_handler).delete(history_clear_handler),
        )
        .route(
            "/api/v1/claims/history/:analysis_id",
            get(history_entry_handler),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub claimant: String,
    pub fields: RawClaimRecord,
    #[serde(default)]
    pub explain: bool,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub id: String,
    pub score: f64,
    pub riesgo: RiskTier,
    pub recomendaciones: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicacion_ia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicacion_error: Option<String>,
}

pub(crate) async fn analyze_handler(
    State(state): State<ClaimsState>,
    Json(request): Json<AnalyzeRequest>,
) -> Response {
    let AnalyzeRequest {
        claimant,
        mut fields,
        explain,
        api_key,
    } = request;

    if claimant.trim().is_empty() {
        let payload = json!({ "error": "claimant name must not be empty" });
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response();
    }

    let now = Local::now();
    if !fields.contains(CLAIM_DATE_FIELD) {
        fields.insert(
            CLAIM_DATE_FIELD,
            RawValue::Text(now.format("%d/%m/%Y").to_string()),
        );
    }

    let issues = validate_claim_dates(&fields);
    if !issues.is_empty() {
        let payload = json!({ "errores": issues });
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response();
    }

    let assessment = match state.scorer.analyze(&fields) {
        Ok(assessment) => assessment,
        Err(error @ ScoringError::Normalize(_)) => {
            let payload = json!({ "error": error.to_string() });
            return (StatusCode::BAD_REQUEST, Json(payload)).into_response();
        }
        Err(error) => {
            let payload = json!({ "error": error.to_string() });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response();
        }
    };

    let entry = HistoryEntry {
        entrada: fields.clone(),
        resultado: assessment.claim.clone(),
        explicacion_ia: None,
    };
    let id = {
        let Ok(mut history) = state.history.lock() else {
            let payload = json!({ "error": "history store is unavailable" });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response();
        };
        match history.append(&claimant, now.naive_local(), entry) {
            Ok(id) => id,
            Err(HistoryError::Duplicate(id)) => {
                let payload = json!({ "error": format!("analysis '{id}' already exists") });
                return (StatusCode::CONFLICT, Json(payload)).into_response();
            }
            Err(error) => {
                let payload = json!({ "error": error.to_string() });
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response();
            }
        }
    };

    // Explanation failures degrade the response; the verdict above stands.
    let (explicacion_ia, explicacion_error) = if explain {
        let credential = api_key.or_else(|| state.default_credential.clone());
        match credential {
            Some(credential) => {
                match state
                    .explainer
                    .explain(&assessment.claim, &fields, &credential)
                    .await
                {
                    Ok(text) => {
                        if let Ok(mut history) = state.history.lock() {
                            if let Err(error) = history.attach_explanation(&id, text.clone()) {
                                warn!(%error, "could not persist the explanation");
                            }
                        }
                        (Some(text), None)
                    }
                    Err(error) => {
                        warn!(%error, "explanation request degraded");
                        (None, Some(error.to_string()))
                    }
                }
            }
            None => (
                None,
                Some("no explanation credential was provided".to_string()),
            ),
        }
    } else {
        (None, None)
    };

    let response = AnalyzeResponse {
        id,
        score: assessment.claim.score,
        riesgo: assessment.claim.riesgo,
        recomendaciones: assessment.claim.recomendaciones,
        explicacion_ia,
        explicacion_error,
    };
    (StatusCode::OK, Json(response)).into_response()
}

pub(crate) async fn history_index_handler(State(state): State<ClaimsState>) -> Response {
    let Ok(history) = state.history.lock() else {
        let payload = json!({ "error": "history store is unavailable" });
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response();
    };
    let payload = json!({ "ids": history.ids() });
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) async fn history_entry_handler(
    State(state): State<ClaimsState>,
    Path(analysis_id): Path<String>,
) -> Response {
    let Ok(history) = state.history.lock() else {
        let payload = json!({ "error": "history store is unavailable" });
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response();
    };
    match history.get(&analysis_id) {
        Some(entry) => (StatusCode::OK, Json(entry.clone())).into_response(),
        None => {
            let payload = json!({ "error": format!("no analysis with id '{analysis_id}'") });
            (StatusCode::NOT_FOUND, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn history_clear_handler(State(state): State<ClaimsState>) -> Response {
    let Ok(mut history) = state.history.lock() else {
        let payload = json!({ "error": "history store is unavailable" });
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response();
    };
    match history.clear() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

/// Claim-form sanity checks: the accident cannot postdate the claim, and the
/// policy must have been issued before both. Unparseable or absent dates are
/// left for the normalizer to handle.
pub fn validate_claim_dates(fields: &RawClaimRecord) -> Vec<String> {
    let date_of = |field: &str| {
        fields.get(field).and_then(|value| match value {
            RawValue::Text(text) => parse_claim_date(text),
            RawValue::Number(_) => None,
        })
    };

    let claim = date_of(CLAIM_DATE_FIELD);
    let accident = date_of(ACCIDENT_DATE_FIELD);
    let issued = date_of(POLICY_ISSUE_FIELD);

    let mut issues = Vec::new();
    if let (Some(accident), Some(claim)) = (accident, claim) {
        if accident > claim {
            issues.push(
                "La FECHA DEL ACCIDENTE no puede ser posterior a la FECHA DE LA RECLAMACIÓN."
                    .to_string(),
            );
        }
    }
    if let (Some(issued), Some(accident)) = (issued, accident) {
        if issued > accident {
            issues.push(
                "La FECHA DE EMISIÓN DE LA PÓLIZA no puede ser posterior a la FECHA DEL ACCIDENTE."
                    .to_string(),
            );
        }
    }
    if let (Some(issued), Some(claim)) = (issued, claim) {
        if issued > claim {
            issues.push(
                "La FECHA DE EMISIÓN DE LA PÓLIZA no puede ser posterior a la FECHA DE LA RECLAMACIÓN."
                    .to_string(),
            );
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(entries: &[(&str, &str)]) -> RawClaimRecord {
        let mut record = RawClaimRecord::new();
        for (field, value) in entries {
            record.insert(*field, RawValue::Text(value.to_string()));
        }
        record
    }

    #[test]
    fn consistent_dates_produce_no_issues() {
        let record = fields(&[
            (POLICY_ISSUE_FIELD, "30/01/2020"),
            (ACCIDENT_DATE_FIELD, "11/08/2021"),
            (CLAIM_DATE_FIELD, "25/08/2021"),
        ]);
        assert!(validate_claim_dates(&record).is_empty());
    }

    #[test]
    fn accident_after_claim_is_flagged() {
        let record = fields(&[
            (ACCIDENT_DATE_FIELD, "26/08/2021"),
            (CLAIM_DATE_FIELD, "25/08/2021"),
        ]);
        let issues = validate_claim_dates(&record);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("FECHA DEL ACCIDENTE"));
    }

    #[test]
    fn late_policy_issue_is_flagged_against_both_dates() {
        let record = fields(&[
            (POLICY_ISSUE_FIELD, "01/09/2021"),
            (ACCIDENT_DATE_FIELD, "11/08/2021"),
            (CLAIM_DATE_FIELD, "25/08/2021"),
        ]);
        let issues = validate_claim_dates(&record);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn unparseable_dates_are_left_to_the_normalizer() {
        let record = fields(&[
            (ACCIDENT_DATE_FIELD, "mañana"),
            (CLAIM_DATE_FIELD, "25/08/2021"),
        ]);
        assert!(validate_claim_dates(&record).is_empty());
    }
}
