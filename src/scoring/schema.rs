use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

/// Transformation rule for one raw input field, dispatched by pattern match
/// during normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    /// Parsed with the fixed `dd/mm/yyyy` claim-form format.
    Date { original: Option<String> },
    /// Mapped through `options`; values outside the map become missing.
    Categorical {
        original: Option<String>,
        options: BTreeMap<String, f64>,
    },
    /// Coerced to a number; bucketed-range features are snapped afterwards.
    Numeric { original: Option<String> },
    /// Computed from one or two other fields instead of read directly.
    Derived {
        original: Option<String>,
        sources: DerivationSources,
        options: Option<BTreeMap<String, f64>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DerivationSources {
    Single(String),
    Pair(String, String),
}

impl FieldSpec {
    pub fn original(&self) -> Option<&str> {
        match self {
            FieldSpec::Date { original }
            | FieldSpec::Numeric { original }
            | FieldSpec::Categorical { original, .. }
            | FieldSpec::Derived { original, .. } => original.as_deref(),
        }
    }
}

/// Persisted shape of a schema entry. `type` carries the semantic tag, but a
/// standalone `derived` flag also marks derivation, so conversion happens
/// after deserializing the raw fields.
#[derive(Debug, Deserialize)]
struct RawFieldSpec {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    derived: bool,
    #[serde(default)]
    original: Option<String>,
    #[serde(default)]
    options: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    from: Option<Vec<String>>,
}

impl TryFrom<RawFieldSpec> for FieldSpec {
    type Error = String;

    fn try_from(raw: RawFieldSpec) -> Result<Self, Self::Error> {
        let kind = raw.kind.trim().to_ascii_lowercase();

        if raw.derived || kind == "derived" || kind == "derived_numeric" {
            let sources = match raw.from.as_deref() {
                Some([source]) => DerivationSources::Single(source.clone()),
                Some([first, second]) => DerivationSources::Pair(first.clone(), second.clone()),
                Some(other) => {
                    return Err(format!(
                        "derived field must name one or two sources, found {}",
                        other.len()
                    ))
                }
                None => return Err("derived field is missing its 'from' sources".to_string()),
            };
            return Ok(FieldSpec::Derived {
                original: raw.original,
                sources,
                options: raw.options,
            });
        }

        match kind.as_str() {
            "date" => Ok(FieldSpec::Date {
                original: raw.original,
            }),
            "categorical" => Ok(FieldSpec::Categorical {
                original: raw.original,
                options: raw
                    .options
                    .ok_or_else(|| "categorical field is missing 'options'".to_string())?,
            }),
            "numeric" => Ok(FieldSpec::Numeric {
                original: raw.original,
            }),
            other => Err(format!("unknown field type '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for FieldSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawFieldSpec::deserialize(deserializer)?;
        FieldSpec::try_from(raw).map_err(de::Error::custom)
    }
}

/// Ordered field schema. Declaration order is preserved on load so
/// normalization walks the fields exactly as the artifact lists them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaRegistry {
    fields: Vec<(String, FieldSpec)>,
}

impl SchemaRegistry {
    pub fn from_pairs(fields: Vec<(String, FieldSpec)>) -> Self {
        Self { fields }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn get(&self, field: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, spec)| spec)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical column name for a raw field: the `original` mapping when the
    /// schema declares one, the field's own name otherwise.
    pub fn canonical_name<'a>(&'a self, field: &'a str) -> &'a str {
        match self.get(field).and_then(FieldSpec::original) {
            Some(original) => original,
            None => field,
        }
    }
}

impl<'de> Deserialize<'de> for SchemaRegistry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RegistryVisitor;

        impl<'de> Visitor<'de> for RegistryVisitor {
            type Value = SchemaRegistry;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of field names to field specs")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, spec)) = access.next_entry::<String, FieldSpec>()? {
                    fields.push((name, spec));
                }
                Ok(SchemaRegistry { fields })
            }
        }

        deserializer.deserialize_map(RegistryVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_persisted_schema_shape() {
        let json = r#"{
            "FECHA DEL ACCIDENTE": {"type": "date", "original": "AccidentDate"},
            "TESTIGOS DEL ACCIDENTE": {
                "type": "categorical",
                "original": "WitnessPresent",
                "options": {"NO EXISTEN": 0, "EXISTEN": 1}
            },
            "EDAD DEL ASEGURADO": {"type": "numeric", "original": "AgeOfPolicyHolder"},
            "Month": {
                "type": "derived",
                "from": ["AccidentDate"],
                "options": {"Jan": 1, "Feb": 2}
            },
            "Days_Policy_Accident": {
                "type": "derived_numeric",
                "from": ["PolicyIssueDate", "AccidentDate"]
            }
        }"#;

        let registry: SchemaRegistry = serde_json::from_str(json).expect("schema parses");
        assert_eq!(registry.len(), 5);

        let names: Vec<&str> = registry.iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec![
                "FECHA DEL ACCIDENTE",
                "TESTIGOS DEL ACCIDENTE",
                "EDAD DEL ASEGURADO",
                "Month",
                "Days_Policy_Accident",
            ],
        );

        assert_eq!(
            registry.canonical_name("TESTIGOS DEL ACCIDENTE"),
            "WitnessPresent"
        );
        assert_eq!(registry.canonical_name("Month"), "Month");

        match registry.get("Days_Policy_Accident") {
            Some(FieldSpec::Derived {
                sources: DerivationSources::Pair(first, second),
                options: None,
                ..
            }) => {
                assert_eq!(first, "PolicyIssueDate");
                assert_eq!(second, "AccidentDate");
            }
            other => panic!("expected a two-source derived field, got {other:?}"),
        }
    }

    #[test]
    fn derived_flag_marks_derivation_regardless_of_type() {
        let json = r#"{"WeekOfMonth": {"type": "numeric", "derived": true, "from": ["AccidentDate"]}}"#;
        let registry: SchemaRegistry = serde_json::from_str(json).expect("schema parses");
        assert!(matches!(
            registry.get("WeekOfMonth"),
            Some(FieldSpec::Derived {
                sources: DerivationSources::Single(_),
                options: None,
                ..
            })
        ));
    }

    #[test]
    fn rejects_derived_fields_without_sources() {
        let json = r#"{"Month": {"type": "derived"}}"#;
        let error = serde_json::from_str::<SchemaRegistry>(json).expect_err("must fail");
        assert!(error.to_string().contains("from"));
    }

    #[test]
    fn rejects_unknown_field_types() {
        let json = r#"{"X": {"type": "uuid"}}"#;
        let error = serde_json::from_str::<SchemaRegistry>(json).expect_err("must fail");
        assert!(error.to_string().contains("unknown field type"));
    }

    #[test]
    fn rejects_categorical_without_options() {
        let json = r#"{"X": {"type": "categorical"}}"#;
        let error = serde_json::from_str::<SchemaRegistry>(json).expect_err("must fail");
        assert!(error.to_string().contains("options"));
    }
}
