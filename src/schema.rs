//! Static per-tool argument schemas and the pure validator built on them.
//!
//! `validate` never performs I/O and always ends in one of three outcomes:
//! validated arguments, a field-level validation error, or an unknown tool.

use serde::Serialize;
use serde_json::{Map, Number, Value, json};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    NonEmptyString,
    Number,
    PositiveNumber,
    PositiveInteger,
}

impl FieldKind {
    fn json_type(&self) -> &'static str {
        match self {
            FieldKind::String | FieldKind::NonEmptyString => "string",
            FieldKind::Number | FieldKind::PositiveNumber => "number",
            FieldKind::PositiveInteger => "integer",
        }
    }
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

const fn required(name: &'static str, kind: FieldKind, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
        description,
    }
}

const fn optional(name: &'static str, kind: FieldKind, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
        description,
    }
}

/// get_pattern에서 bpm을 생략했을 때의 기본값
pub const DEFAULT_PATTERN_BPM: u32 = 120;

pub static TOOL_SCHEMAS: &[ToolSchema] = &[
    ToolSchema {
        name: "run_code",
        description: "Run code on the audio environment",
        fields: &[required("source", FieldKind::String, "Source code to execute")],
    },
    ToolSchema {
        name: "stop_all",
        description: "Stop all running jobs",
        fields: &[],
    },
    ToolSchema {
        name: "set_bpm",
        description: "Set the global BPM",
        fields: &[required("bpm", FieldKind::PositiveNumber, "Beats per minute")],
    },
    ToolSchema {
        name: "cue",
        description: "Send a cue message",
        fields: &[required("tag", FieldKind::NonEmptyString, "Cue tag to trigger")],
    },
    ToolSchema {
        name: "tail_logs",
        description: "Get recent log entries",
        fields: &[optional(
            "since_ms",
            FieldKind::Number,
            "Only return entries with a timestamp at or after this (epoch ms)",
        )],
    },
    ToolSchema {
        name: "diagnose",
        description: "Run diagnostics on the connection to the audio environment",
        fields: &[],
    },
    ToolSchema {
        name: "generate_music",
        description: "Generate code from a natural language description",
        fields: &[required(
            "request",
            FieldKind::NonEmptyString,
            "Natural language description of the desired music",
        )],
    },
    ToolSchema {
        name: "list_patterns",
        description: "List all available music patterns",
        fields: &[],
    },
    ToolSchema {
        name: "get_pattern",
        description: "Get a specific music pattern",
        fields: &[
            required("category", FieldKind::NonEmptyString, "Pattern category (drums, bass, chords)"),
            required("pattern_name", FieldKind::NonEmptyString, "Name of the pattern"),
            optional("bpm", FieldKind::PositiveInteger, "BPM override (default 120)"),
        ],
    },
    ToolSchema {
        name: "create_and_play",
        description: "Generate code from a natural language description and play it immediately",
        fields: &[required(
            "request",
            FieldKind::NonEmptyString,
            "Natural language description of the desired music",
        )],
    },
];

pub fn schema(name: &str) -> Option<&'static ToolSchema> {
    TOOL_SCHEMAS.iter().find(|s| s.name == name)
}

impl ToolSchema {
    /// JSON Schema for `tools/list`
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                let mut prop = json!({
                    "type": f.kind.json_type(),
                    "description": f.description,
                });
                match f.kind {
                    FieldKind::NonEmptyString => prop["minLength"] = json!(1),
                    FieldKind::PositiveNumber => {
                        prop["exclusiveMinimum"] = json!(0);
                        prop["maximum"] = json!(f32::MAX);
                    }
                    FieldKind::PositiveInteger => prop["minimum"] = json!(1),
                    FieldKind::String | FieldKind::Number => {}
                }
                (f.name.to_string(), prop)
            })
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        let mut schema = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }
}

/// Typed, validated arguments for each tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedArgs {
    RunCode { source: String },
    StopAll,
    /// The original JSON number is kept so the response echoes it verbatim.
    SetBpm { bpm: Number },
    Cue { tag: String },
    TailLogs { since_ms: Option<f64> },
    Diagnose,
    GenerateMusic { request: String },
    ListPatterns,
    GetPattern { category: String, pattern_name: String, bpm: u32 },
    CreateAndPlay { request: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    UnknownTool(String),
    Invalid(ValidationError),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::UnknownTool(name) => write!(f, "Unknown tool: {}", name),
            SchemaError::Invalid(e) => write!(f, "Invalid input: {}", e),
        }
    }
}

impl From<ValidationError> for SchemaError {
    fn from(e: ValidationError) -> Self {
        SchemaError::Invalid(e)
    }
}

/// Validate `args` for tool `name`. Unknown extra fields are ignored.
pub fn validate(name: &str, args: &Value) -> Result<ValidatedArgs, SchemaError> {
    let schema = schema(name).ok_or_else(|| SchemaError::UnknownTool(name.to_string()))?;

    let empty = Map::new();
    let object = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(ValidationError::new(
                "args",
                format!("expected an object, got {}", type_name(other)),
            )
            .into());
        }
    };

    let mut fields = Checked::default();
    for spec in schema.fields {
        // 선택 필드의 null은 생략과 동일
        match object.get(spec.name).filter(|v| !v.is_null()) {
            Some(value) => fields.push(spec.name, check(spec, value)?),
            None if spec.required => {
                return Err(ValidationError::new(spec.name, "field is required").into());
            }
            None => {}
        }
    }

    let validated = match schema.name {
        "run_code" => ValidatedArgs::RunCode {
            source: fields.string("source")?,
        },
        "stop_all" => ValidatedArgs::StopAll,
        "set_bpm" => ValidatedArgs::SetBpm {
            bpm: fields.number("bpm")?,
        },
        "cue" => ValidatedArgs::Cue {
            tag: fields.string("tag")?,
        },
        "tail_logs" => ValidatedArgs::TailLogs {
            since_ms: fields.optional_number("since_ms").and_then(|n| n.as_f64()),
        },
        "diagnose" => ValidatedArgs::Diagnose,
        "generate_music" => ValidatedArgs::GenerateMusic {
            request: fields.string("request")?,
        },
        "list_patterns" => ValidatedArgs::ListPatterns,
        "get_pattern" => ValidatedArgs::GetPattern {
            category: fields.string("category")?,
            pattern_name: fields.string("pattern_name")?,
            bpm: fields.optional_integer("bpm").unwrap_or(DEFAULT_PATTERN_BPM),
        },
        "create_and_play" => ValidatedArgs::CreateAndPlay {
            request: fields.string("request")?,
        },
        other => return Err(SchemaError::UnknownTool(other.to_string())),
    };
    Ok(validated)
}

#[derive(Debug, Clone)]
enum CheckedValue {
    Str(String),
    Num(Number),
    Int(u32),
}

#[derive(Default)]
struct Checked(Vec<(&'static str, CheckedValue)>);

impl Checked {
    fn push(&mut self, name: &'static str, value: CheckedValue) {
        self.0.push((name, value));
    }

    fn get(&self, name: &str) -> Option<&CheckedValue> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    fn string(&self, name: &str) -> Result<String, ValidationError> {
        match self.get(name) {
            Some(CheckedValue::Str(s)) => Ok(s.clone()),
            _ => Err(ValidationError::new(name, "expected a string")),
        }
    }

    fn number(&self, name: &str) -> Result<Number, ValidationError> {
        self.optional_number(name)
            .ok_or_else(|| ValidationError::new(name, "expected a number"))
    }

    fn optional_number(&self, name: &str) -> Option<Number> {
        match self.get(name) {
            Some(CheckedValue::Num(n)) => Some(n.clone()),
            _ => None,
        }
    }

    fn optional_integer(&self, name: &str) -> Option<u32> {
        match self.get(name) {
            Some(CheckedValue::Int(i)) => Some(*i),
            _ => None,
        }
    }
}

fn check(spec: &FieldSpec, value: &Value) -> Result<CheckedValue, ValidationError> {
    let mismatch = || {
        ValidationError::new(
            spec.name,
            format!("expected {}, got {}", spec.kind.json_type(), type_name(value)),
        )
    };

    match spec.kind {
        FieldKind::String => value
            .as_str()
            .map(|s| CheckedValue::Str(s.to_string()))
            .ok_or_else(mismatch),
        FieldKind::NonEmptyString => {
            let s = value.as_str().ok_or_else(mismatch)?;
            if s.trim().is_empty() {
                return Err(ValidationError::new(spec.name, "must not be empty"));
            }
            Ok(CheckedValue::Str(s.to_string()))
        }
        FieldKind::Number | FieldKind::PositiveNumber => {
            let Value::Number(n) = value else {
                return Err(mismatch());
            };
            let v = n.as_f64().filter(|v| v.is_finite()).ok_or_else(mismatch)?;
            if spec.kind == FieldKind::PositiveNumber && v <= 0.0 {
                return Err(ValidationError::new(
                    spec.name,
                    format!("must be greater than 0, got {}", n),
                ));
            }
            // 양수 필드는 OSC float(f32)로 전송됨
            if spec.kind == FieldKind::PositiveNumber && v > f64::from(f32::MAX) {
                return Err(ValidationError::new(
                    spec.name,
                    format!("must be at most {}, got {}", f32::MAX, n),
                ));
            }
            Ok(CheckedValue::Num(n.clone()))
        }
        FieldKind::PositiveInteger => {
            let Value::Number(n) = value else {
                return Err(mismatch());
            };
            let i = n.as_u64().ok_or_else(|| {
                ValidationError::new(spec.name, format!("expected a positive integer, got {}", n))
            })?;
            match u32::try_from(i) {
                Ok(i) if i > 0 => Ok(CheckedValue::Int(i)),
                _ => Err(ValidationError::new(
                    spec.name,
                    format!("must be between 1 and {}, got {}", u32::MAX, i),
                )),
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn every_schema_has_a_validated_form() {
        for schema in TOOL_SCHEMAS {
            let mut args = Map::new();
            for field in schema.fields {
                let value = match field.kind {
                    FieldKind::String | FieldKind::NonEmptyString => json!("x"),
                    FieldKind::Number | FieldKind::PositiveNumber => json!(1.5),
                    FieldKind::PositiveInteger => json!(3),
                };
                args.insert(field.name.to_string(), value);
            }
            assert!(
                validate(schema.name, &Value::Object(args)).is_ok(),
                "{} rejected well-formed args",
                schema.name
            );
        }
    }

    #[test]
    fn set_bpm_keeps_original_number() {
        let args = validate("set_bpm", &json!({"bpm": 120})).unwrap();
        assert_eq!(
            args,
            ValidatedArgs::SetBpm {
                bpm: Number::from(120)
            }
        );
    }

    #[test]
    fn set_bpm_rejects_strings_and_non_positive() {
        let err = validate("set_bpm", &json!({"bpm": "fast"})).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(ref e) if e.field == "bpm"));

        let err = validate("set_bpm", &json!({"bpm": 0})).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(ref e) if e.reason.contains("greater than 0")));

        let err = validate("set_bpm", &json!({})).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(ref e) if e.reason == "field is required"));
    }

    #[test]
    fn set_bpm_must_fit_an_osc_float() {
        let err = validate("set_bpm", &json!({"bpm": 1e300})).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(ref e) if e.field == "bpm" && e.reason.contains("at most")));

        assert!(validate("set_bpm", &json!({"bpm": f64::from(f32::MAX)})).is_ok());
        assert!(schema_for("set_bpm")["properties"]["bpm"]["maximum"].is_number());
    }

    #[test]
    fn unknown_tool_is_distinct() {
        assert_eq!(
            validate("launch_rockets", &json!({})),
            Err(SchemaError::UnknownTool("launch_rockets".to_string()))
        );
    }

    #[test]
    fn optional_fields_default() {
        assert_eq!(
            validate("tail_logs", &Value::Null).unwrap(),
            ValidatedArgs::TailLogs { since_ms: None }
        );
        assert_eq!(
            validate("tail_logs", &json!({"since_ms": null})).unwrap(),
            ValidatedArgs::TailLogs { since_ms: None }
        );
        let args = validate(
            "get_pattern",
            &json!({"category": "drums", "pattern_name": "rock"}),
        )
        .unwrap();
        assert!(matches!(args, ValidatedArgs::GetPattern { bpm: 120, .. }));
    }

    #[test]
    fn cue_tag_must_not_be_blank() {
        let err = validate("cue", &json!({"tag": "  "})).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(ref e) if e.field == "tag"));
    }

    #[test]
    fn non_object_args_are_rejected() {
        let err = validate("run_code", &json!(["play 60"])).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(ref e) if e.field == "args"));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let args = validate("cue", &json!({"tag": "drop", "colour": "red"})).unwrap();
        assert_eq!(args, ValidatedArgs::Cue { tag: "drop".into() });
    }

    #[test]
    fn input_schema_lists_required_fields() {
        let schema = schema("get_pattern").unwrap().input_schema();
        assert_eq!(schema["required"], json!(["category", "pattern_name"]));
        assert_eq!(schema["properties"]["bpm"]["type"], "integer");
        let empty = schema_for("stop_all");
        assert!(empty.get("required").is_none());
    }

    fn schema_for(name: &str) -> Value {
        schema(name).unwrap().input_schema()
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|i| json!(i)),
            any::<f64>().prop_map(|f| json!(f)),
            ".{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::hash_map(
                    prop_oneof![
                        Just("source".to_string()),
                        Just("bpm".to_string()),
                        Just("tag".to_string()),
                        Just("since_ms".to_string()),
                        "[a-z]{1,6}",
                    ],
                    inner,
                    0..4
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn validation_is_total(
            name in prop_oneof![
                Just("run_code"), Just("set_bpm"), Just("cue"), Just("tail_logs"),
                Just("get_pattern"), Just("nope")
            ],
            args in arb_json(),
        ) {
            // 어떤 입력이든 세 결과 중 하나로 끝나야 하며 패닉하지 않음
            let _ = validate(name, &args);
        }
    }
}
