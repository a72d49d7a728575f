//! Integration tests for config module

use super::*;
use crate::quant::{QuantizationStrategy, QuantizationType};
use std::io::Write;

#[test]
fn test_end_to_end_recipe_loading() {
    let yaml = r#"
scheme:
  targets: ["re:.*proj", lm_head]
  weights:
    num_bits: 4
    symmetric: false
    strategy: group
    group_size: 128
  input_activations:
    num_bits: 8
    observer: minmax
    observer_kwargs:
      averaging_constant: 0.1
"#;

    let mut temp_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    temp_file.write_all(yaml.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let recipe = load_recipe(temp_file.path()).unwrap();
    assert!(recipe.force_zero_point);
    assert_eq!(recipe.scheme.targets.len(), 2);

    let weights = recipe.scheme.weights.as_ref().unwrap();
    assert_eq!(weights.num_bits, 4);
    assert!(!weights.symmetric);
    assert_eq!(weights.strategy, QuantizationStrategy::Group);
    assert_eq!(weights.group_size, Some(128));
    assert_eq!(weights.observer, "minmax");

    let inputs = recipe.scheme.input_activations.as_ref().unwrap();
    assert_eq!(inputs.quant_type, QuantizationType::Int);
    assert_eq!(inputs.strategy, QuantizationStrategy::Tensor);
    assert_eq!(
        inputs.observer_kwargs["averaging_constant"],
        serde_json::json!(0.1)
    );
    assert!(recipe.scheme.output_activations.is_none());
}

#[test]
fn test_json_recipe() {
    let json = r#"{
        "scheme": {
            "targets": ["fc1"],
            "weights": {"num_bits": 8, "strategy": "channel", "observer": "round_to_nearest"}
        },
        "force_zero_point": false
    }"#;

    let mut temp_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    temp_file.write_all(json.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let recipe = load_recipe(temp_file.path()).unwrap();
    assert!(!recipe.force_zero_point);
    let weights = recipe.scheme.weights.unwrap();
    assert_eq!(weights.strategy, QuantizationStrategy::Channel);
    assert_eq!(weights.observer, "round_to_nearest");
    assert!(weights.symmetric);
}

#[test]
fn test_invalid_recipe_rejected_on_load() {
    let yaml = r#"
scheme:
  targets: [fc1]
  weights:
    num_bits: 4
    strategy: block
"#;
    let mut temp_file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    temp_file.write_all(yaml.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let err = load_recipe(temp_file.path()).unwrap_err();
    assert!(matches!(err, crate::Error::Config(_)));
    assert!(err.to_string().contains("weight"));
}

#[test]
fn test_unknown_strategy_is_parse_error() {
    let yaml = "scheme:\n  targets: [a]\n  weights: {strategy: rows}\n";
    assert!(parse_recipe(yaml, false).is_err());
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        load_recipe("/nonexistent/recipe.yaml"),
        Err(crate::Error::Config(_))
    ));
}
