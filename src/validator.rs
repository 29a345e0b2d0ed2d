//! Normalizes and constrains the raw incoming request. Unknown fields are
//! logged as a warning, never rejected; recognized fields are type- and
//! range-checked, failing fast on the first violation.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::AnalysisError;
use crate::models::{AnalysisType, DbConnection, DerivedFormula, Filter, ValidatedRequest};

const RECOGNIZED_FIELDS: &[&str] = &[
    "n_minus_1",
    "n",
    "analysis_type",
    "enable_mock",
    "table",
    "columns",
    "filters",
    "selected_pegs",
    "peg_definitions",
    "max_prompt_tokens",
    "db",
    "rel_ver",
    "choi_result",
];

pub fn validate(request: &Value) -> Result<ValidatedRequest, AnalysisError> {
    let obj = request.as_object().ok_or_else(|| AnalysisError::RequestInvalid {
        field: "<root>".to_string(),
        reason: "request must be a JSON object".to_string(),
    })?;

    for key in obj.keys() {
        if !RECOGNIZED_FIELDS.contains(&key.as_str()) {
            tracing::warn!(field = %key, "ignoring unrecognized request field");
        }
    }

    let n_minus_1 = require_string(obj, "n_minus_1")?;
    let n = require_string(obj, "n")?;

    let analysis_type = match obj.get("analysis_type") {
        None => AnalysisType::Enhanced,
        Some(Value::String(s)) => AnalysisType::parse(s).ok_or_else(|| AnalysisError::RequestInvalid {
            field: "analysis_type".to_string(),
            reason: format!("must be one of overall|enhanced|specific, got '{s}'"),
        })?,
        Some(_) => {
            return Err(AnalysisError::RequestInvalid {
                field: "analysis_type".to_string(),
                reason: "must be a string".to_string(),
            })
        },
    };

    let enable_mock = match obj.get("enable_mock") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(AnalysisError::RequestInvalid {
                field: "enable_mock".to_string(),
                reason: "must be a boolean".to_string(),
            })
        },
    };

    let table = match obj.get("table") {
        None => "summary".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(AnalysisError::RequestInvalid {
                field: "table".to_string(),
                reason: "must be a string".to_string(),
            })
        },
    };
    if !crate::store::is_safe_identifier(&table) {
        return Err(AnalysisError::RequestInvalid {
            field: "table".to_string(),
            reason: format!("'{table}' is not a safe identifier"),
        });
    }

    let columns = match obj.get("columns") {
        None => BTreeMap::new(),
        Some(Value::Object(map)) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                let physical = v.as_str().ok_or_else(|| AnalysisError::RequestInvalid {
                    field: "columns".to_string(),
                    reason: format!("value for '{k}' must be a string"),
                })?;
                if !crate::store::is_safe_identifier(physical) {
                    return Err(AnalysisError::RequestInvalid {
                        field: "columns".to_string(),
                        reason: format!("'{physical}' is not a safe identifier"),
                    });
                }
                out.insert(k.clone(), physical.to_string());
            }
            out
        },
        Some(_) => {
            return Err(AnalysisError::RequestInvalid {
                field: "columns".to_string(),
                reason: "must be an object".to_string(),
            })
        },
    };

    let filters = parse_filters(obj)?;

    let selected_pegs = match obj.get("selected_pegs") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| AnalysisError::RequestInvalid {
                    field: "selected_pegs".to_string(),
                    reason: "every element must be a string".to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(AnalysisError::RequestInvalid {
                field: "selected_pegs".to_string(),
                reason: "must be an array".to_string(),
            })
        },
    };

    let peg_definitions = match obj.get("peg_definitions") {
        None => Vec::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, expr)| {
                let expression = expr.as_str().ok_or_else(|| AnalysisError::RequestInvalid {
                    field: "peg_definitions".to_string(),
                    reason: format!("expression for '{name}' must be a string"),
                })?;
                Ok(DerivedFormula { name: name.clone(), expression: expression.to_string() })
            })
            .collect::<Result<Vec<_>, AnalysisError>>()?,
        Some(_) => {
            return Err(AnalysisError::RequestInvalid {
                field: "peg_definitions".to_string(),
                reason: "must be an object".to_string(),
            })
        },
    };

    let max_prompt_tokens = match obj.get("max_prompt_tokens") {
        None => None,
        Some(Value::Number(n)) => {
            let value = n.as_u64().ok_or_else(|| AnalysisError::RequestInvalid {
                field: "max_prompt_tokens".to_string(),
                reason: "must be a non-negative integer".to_string(),
            })? as u32;
            if value < 1000 {
                return Err(AnalysisError::RequestInvalid {
                    field: "max_prompt_tokens".to_string(),
                    reason: "must be >= 1000".to_string(),
                });
            }
            Some(value)
        },
        Some(_) => {
            return Err(AnalysisError::RequestInvalid {
                field: "max_prompt_tokens".to_string(),
                reason: "must be an integer".to_string(),
            })
        },
    };

    let db = match obj.get("db") {
        None if enable_mock => None,
        None => {
            return Err(AnalysisError::RequestInvalid {
                field: "db".to_string(),
                reason: "required unless enable_mock is true".to_string(),
            })
        },
        Some(value) => Some(serde_json::from_value::<DbConnection>(value.clone()).map_err(|e| {
            AnalysisError::RequestInvalid { field: "db".to_string(), reason: e.to_string() }
        })?),
    };

    let rel_ver = obj.get("rel_ver").and_then(|v| v.as_str()).map(str::to_string);
    let choi_result = obj.get("choi_result").cloned();

    Ok(ValidatedRequest {
        n_minus_1,
        n,
        analysis_type,
        enable_mock,
        table,
        columns,
        filters,
        selected_pegs,
        peg_definitions,
        max_prompt_tokens,
        db,
        rel_ver,
        choi_result,
    })
}

fn require_string(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String, AnalysisError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(AnalysisError::RequestInvalid {
            field: field.to_string(),
            reason: "must not be empty".to_string(),
        }),
        Some(_) => Err(AnalysisError::RequestInvalid {
            field: field.to_string(),
            reason: "must be a string".to_string(),
        }),
        None => {
            Err(AnalysisError::RequestInvalid { field: field.to_string(), reason: "is required".to_string() })
        },
    }
}

fn parse_filters(obj: &serde_json::Map<String, Value>) -> Result<Filter, AnalysisError> {
    let Some(raw) = obj.get("filters") else { return Ok(Filter::default()) };
    let Value::Object(map) = raw else {
        return Err(AnalysisError::RequestInvalid {
            field: "filters".to_string(),
            reason: "must be an object".to_string(),
        });
    };

    let ne = map.get("ne").and_then(|v| v.as_str()).map(str::to_string);
    let host = map.get("host").and_then(|v| v.as_str()).map(str::to_string);
    let cell_ids = match map.get("cellid") {
        None => Default::default(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| AnalysisError::RequestInvalid {
                    field: "filters.cellid".to_string(),
                    reason: "every element must be a string".to_string(),
                })
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(AnalysisError::RequestInvalid {
                field: "filters.cellid".to_string(),
                reason: "must be an array".to_string(),
            })
        },
    };

    Ok(Filter { ne, host, cell_ids, peg_names: Default::default() })
}
