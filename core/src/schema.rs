use serde_json::json;

use crate::models::{Difficulty, Unit};

pub const RECIPE_SCHEMA_NAME: &str = "receta";

/// JSON schema for a single generated recipe.
///
/// Written for strict structured-output mode: every property is listed in
/// `required` and objects forbid additional properties. Optional values are
/// expressed as nullable types.
#[must_use]
pub fn recipe_response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "title": { "type": "string" },
            "description": { "type": "string" },
            "servings": { "type": "integer" },
            "difficulty": { "type": "string", "enum": Difficulty::NAMES },
            "prep_time_minutes": { "type": "integer" },
            "ingredients": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "name": { "type": "string" },
                        "amount": { "type": "number" },
                        "unit": { "type": "string", "enum": Unit::NAMES },
                        "note": { "type": ["string", "null"] }
                    },
                    "required": ["name", "amount", "unit", "note"]
                }
            },
            "instructions": {
                "type": "array",
                "items": { "type": "string" }
            },
            "macros_per_serving": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "calories": { "type": "number" },
                    "protein": { "type": "number" },
                    "carbs": { "type": "number" },
                    "fat": { "type": "number" }
                },
                "required": ["calories", "protein", "carbs", "fat"]
            }
        },
        "required": [
            "title", "description", "servings", "difficulty", "prep_time_minutes",
            "ingredients", "instructions", "macros_per_serving"
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required_of(value: &serde_json::Value) -> Vec<&str> {
        value["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_every_property_is_required() {
        let schema = recipe_response_schema();
        let properties = schema["properties"].as_object().unwrap();
        let required = required_of(&schema);
        for key in properties.keys() {
            assert!(required.contains(&key.as_str()), "{key} not required");
        }

        let ingredient = &schema["properties"]["ingredients"]["items"];
        let required = required_of(ingredient);
        for key in ingredient["properties"].as_object().unwrap().keys() {
            assert!(required.contains(&key.as_str()), "{key} not required");
        }
    }

    #[test]
    fn test_enums_match_model() {
        let schema = recipe_response_schema();
        assert_eq!(
            schema["properties"]["difficulty"]["enum"],
            json!(["facil", "intermedio", "dificil"])
        );
        assert_eq!(
            schema["properties"]["ingredients"]["items"]["properties"]["unit"]["enum"],
            json!(["g", "kg", "ml", "l", "unidad"])
        );
    }
}
