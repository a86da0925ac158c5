//! Explanation gateway: turns a scored claim into prose for adjusters by
//! calling an OpenAI-compatible chat-completions endpoint. One attempt per
//! request, no retries; a failure here never invalidates the score.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::config::ExplainConfig;
use crate::scoring::{RawClaimRecord, ScoredClaim};

const SYSTEM_PROMPT: &str = "Eres un asistente experto en detección de fraudes en seguros de vehículos. \
Tu tarea es explicar de manera clara y sencilla, pero profesional, por qué un reclamo fue clasificado \
con un nivel de riesgo determinado, basándote únicamente en la información proporcionada del caso y en \
las recomendaciones automáticas generadas. El texto debe estar dirigido a un empleado del área de \
siniestros, sin conocimientos técnicos. No menciones puntuaciones, modelos, scores ni variables técnicas. \
En su lugar, elabora una explicación comprensible que justifique el riesgo percibido y las acciones \
sugeridas. No debes saludar al empleado ni referirte a él directamente. Además, nunca dejes la \
explicación incompleta. Debes garantizar que la explicación esté totalmente terminada, sin dejar dudas \
o puntos sin resolver. Para la explicación, puedes basarte en patrones comunes de riesgo. Algunos \
ejemplos incluyen:\n\
- Es sospechoso si no hay testigos del accidente.\n\
- Es sospechoso si no se presentó informe policial.\n\
- Es sospechoso si no hay documentos adjuntos.\n\
- Es sospechoso si hay muchos vehículos involucrados.\n\
- Es sospechoso si el número de coches involucrados es 0 o no se especifica.\n\
- También pueden influir reclamos pasados, valor del vehículo, edad del asegurado, etc.\n";

#[derive(Debug, thiserror::Error)]
pub enum ExplanationError {
    #[error("the explanation gateway rejected the credential")]
    InvalidCredential,
    #[error("the explanation gateway returned no content")]
    EmptyContent,
    #[error("explanation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("explanation gateway error {status}: {body}")]
    Gateway { status: u16, body: String },
}

/// Thin client over the chat-completions endpoint. The credential arrives
/// per call and is never stored here.
#[derive(Debug, Clone)]
pub struct ExplanationClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl ExplanationClient {
    pub fn new(config: &ExplainConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
        }
    }

    /// Single-attempt explanation for an already-scored claim. 401 means the
    /// credential is bad; a successful call with blank content is its own
    /// failure; anything else collapses into a generic gateway error
    /// carrying the cause.
    pub async fn explain(
        &self,
        result: &ScoredClaim,
        entrada: &RawClaimRecord,
        credential: &str,
    ) -> Result<String, ExplanationError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {credential}"))
            .json(&request_body(&self.model, result, entrada))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ExplanationError::InvalidCredential);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, "explanation gateway returned an error");
            return Err(ExplanationError::Gateway { status, body });
        }

        let payload: ChatCompletionResponse = response.json().await?;
        extract_content(payload)
    }
}

fn request_body(model: &str, result: &ScoredClaim, entrada: &RawClaimRecord) -> serde_json::Value {
    let entrada_legible: BTreeMap<&str, String> = entrada
        .iter()
        .map(|(field, value)| (field, value.to_string()))
        .collect();
    let entrada_legible =
        serde_json::to_string(&entrada_legible).unwrap_or_else(|_| "{}".to_string());

    let user_prompt = format!(
        "Nivel de riesgo del reclamo: {}\n\
         Recomendaciones automáticas: {}\n\
         Información del reclamo: {}\n\
         Redacta una explicación sencilla, clara y profesional que justifique el nivel de riesgo, \
         tomando en cuenta las recomendaciones. La respuesta debe estar completa y no quedarte NUNCA a medias.",
        result.riesgo.label(),
        result.recomendaciones.join(", "),
        entrada_legible,
    );

    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": user_prompt}
        ],
        "max_tokens": 400
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

fn extract_content(payload: ChatCompletionResponse) -> Result<String, ExplanationError> {
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(ExplanationError::EmptyContent)
}
