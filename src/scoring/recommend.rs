use super::normalizer::NormalizedClaim;

/// Advisory rules evaluated over the claim's numeric observations, in fixed
/// order. Rules are independent; several may fire for one claim. A field the
/// record does not carry falls back to a per-rule default that leaves the
/// rule untriggered, and a field present but unobserved (NaN) never compares
/// true, so absence is not treated as suspicion.
pub fn recommend(claim: &NormalizedClaim) -> Vec<String> {
    let field = |column: &str, fallback: f64| claim.observation(column).unwrap_or(fallback);
    let mut advice = Vec::new();

    if field("NumberOfSuppliments", 0.0) > 0.0 {
        advice.push("Consultar los documentos suplementarios adjuntos al reclamo.".to_string());
    }
    if field("WitnessPresent", 0.0) == 1.0 {
        advice.push("Solicitar testimonio o contacto del testigo.".to_string());
    }
    if field("PoliceReportFiled", 0.0) == 1.0 {
        advice.push("Revisar el informe policial relacionado con el accidente.".to_string());
    }
    advice.push("Confirmar la responsabilidad declarada por el asegurado.".to_string());
    if field("PastNumberOfClaims", 0.0) > 6.0 {
        advice.push("Historial de reclamos elevado: revisar patrones o recurrencia.".to_string());
    }
    if field("Days_Policy_Accident", 999.0) < 30.0 {
        advice.push(
            "El accidente ocurrió poco después de contratar la póliza: revisar con atención."
                .to_string(),
        );
    }
    let address_change = field("AddressChange_Claim", 1.0);
    if address_change == 0.0 || address_change == 2.0 || address_change == 3.0 {
        advice.push(
            "El asegurado cambió de domicilio recientemente: validar veracidad del cambio."
                .to_string(),
        );
    }
    if field("VehiclePrice", 0.0) > 65_500.0 {
        advice.push("Vehículo de alto valor: considerar inspección más exhaustiva.".to_string());
    }
    if field("AgentType", 1.0) == 0.0 {
        advice.push(
            "Agente externo involucrado: revisar consistencia de la documentación.".to_string(),
        );
    }
    if field("AgeOfPolicyHolder", 100.0) < 21.0 {
        advice.push("Corroborar historial del asegurado por edad especialmente joven.".to_string());
    }
    if field("VehicleCategory", -1.0) == 1.0 {
        advice.push(
            "Evaluar el contexto del accidente por tratarse de un vehículo deportivo.".to_string(),
        );
    }
    if field("BasePolicy", -1.0) == 0.0 {
        advice.push(
            "Evaluar nivel de cobertura total de la póliza por posible incentivo a fraude."
                .to_string(),
        );
    }
    if field("WitnessPresent", 0.0) == 0.0
        && field("PoliceReportFiled", 0.0) == 0.0
        && field("NumberOfSuppliments", 0.0) == 0.0
    {
        advice.push(
            "Falta total de respaldo documental: enviar perito o iniciar investigación formal."
                .to_string(),
        );
    }
    if advice.is_empty() {
        advice.push(
            "No se identificaron recomendaciones automáticas. Evaluar manualmente.".to_string(),
        );
    }

    advice
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::normalize;
    use crate::scoring::schema::SchemaRegistry;
    use crate::scoring::{RawClaimRecord, RawValue};

    fn claim_with(fields: &[(&str, f64)]) -> NormalizedClaim {
        let schema_json: String = format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(name, _)| format!(r#""{name}": {{"type": "numeric"}}"#))
                .collect::<Vec<_>>()
                .join(",")
        );
        let schema: SchemaRegistry =
            serde_json::from_str(&schema_json).expect("schema parses");

        let mut record = RawClaimRecord::new();
        for (name, value) in fields {
            record.insert(*name, RawValue::Number(*value));
        }
        let columns: Vec<String> = fields.iter().map(|(name, _)| name.to_string()).collect();
        normalize(&record, &schema, &columns).expect("normalizes")
    }

    #[test]
    fn liability_confirmation_is_always_present() {
        let advice = recommend(&claim_with(&[]));
        assert!(advice
            .iter()
            .any(|entry| entry.contains("responsabilidad declarada")));
        // The manual-review fallback only applies when nothing at all fired,
        // which the unconditional rule rules out.
        assert!(!advice.iter().any(|entry| entry.contains("manualmente")));
    }

    #[test]
    fn elevated_history_and_fresh_policy_fire_together() {
        let advice = recommend(&claim_with(&[
            ("PastNumberOfClaims", 8.0),
            ("Days_Policy_Accident", 5.0),
        ]));
        assert!(advice.iter().any(|entry| entry.contains("Historial de reclamos elevado")));
        assert!(advice
            .iter()
            .any(|entry| entry.contains("poco después de contratar la póliza")));
    }

    #[test]
    fn missing_documentary_support_triggers_the_investigation_rule() {
        let advice = recommend(&claim_with(&[
            ("WitnessPresent", 0.0),
            ("PoliceReportFiled", 0.0),
            ("NumberOfSuppliments", 0.0),
            ("VehiclePrice", 70_000.0),
        ]));
        assert!(advice
            .iter()
            .any(|entry| entry.contains("Falta total de respaldo documental")));
        assert!(advice
            .iter()
            .any(|entry| entry.contains("Vehículo de alto valor")));
    }

    #[test]
    fn absent_columns_use_non_triggering_defaults() {
        // Days_Policy_Accident absent defaults high, AddressChange_Claim
        // absent defaults to the no-move code, AgentType to internal.
        let advice = recommend(&claim_with(&[("WitnessPresent", 1.0)]));
        assert!(advice.iter().any(|entry| entry.contains("testigo")));
        assert!(!advice.iter().any(|entry| entry.contains("póliza: revisar")));
        assert!(!advice.iter().any(|entry| entry.contains("domicilio")));
        assert!(!advice.iter().any(|entry| entry.contains("Agente externo")));
    }

    #[test]
    fn unobserved_values_never_compare_true() {
        // A witness field that failed categorical mapping is NaN: it neither
        // requests testimony nor counts as documentary absence.
        let schema: SchemaRegistry = serde_json::from_str(
            r#"{"TESTIGOS": {"type": "categorical", "original": "WitnessPresent",
                 "options": {"EXISTEN": 1, "NO EXISTEN": 0}}}"#,
        )
        .expect("schema parses");
        let mut record = RawClaimRecord::new();
        record.insert("TESTIGOS", RawValue::Text("QUIZAS".to_string()));
        let claim =
            normalize(&record, &schema, &["WitnessPresent".to_string()]).expect("normalizes");

        let advice = recommend(&claim);
        assert!(!advice.iter().any(|entry| entry.contains("testigo")));
        assert!(!advice
            .iter()
            .any(|entry| entry.contains("Falta total de respaldo documental")));
    }

    #[test]
    fn address_change_codes_other_than_one_trigger_validation() {
        for code in [0.0, 2.0, 3.0] {
            let advice = recommend(&claim_with(&[("AddressChange_Claim", code)]));
            assert!(
                advice.iter().any(|entry| entry.contains("domicilio")),
                "code {code} should trigger the address rule"
            );
        }
        let advice = recommend(&claim_with(&[("AddressChange_Claim", 1.0)]));
        assert!(!advice.iter().any(|entry| entry.contains("domicilio")));
    }

    #[test]
    fn young_policyholder_and_sport_vehicle_rules() {
        let advice = recommend(&claim_with(&[
            ("AgeOfPolicyHolder", 19.0),
            ("VehicleCategory", 1.0),
            ("BasePolicy", 0.0),
        ]));
        assert!(advice.iter().any(|entry| entry.contains("especialmente joven")));
        assert!(advice.iter().any(|entry| entry.contains("deportivo")));
        assert!(advice.iter().any(|entry| entry.contains("cobertura total")));
    }
}
