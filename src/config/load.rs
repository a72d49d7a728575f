//! Recipe loading

use super::schema::CalibrationRecipe;
use super::validate::validate_recipe;
use crate::{Error, Result};
use std::fs;
use std::path::Path;

/// Load and validate a calibration recipe
///
/// `.json` files are parsed as JSON, everything else as YAML.
///
/// # Example
///
/// ```no_run
/// use qobserve::config::load_recipe;
///
/// let recipe = load_recipe("recipe.yaml").unwrap();
/// println!("targets: {:?}", recipe.scheme.targets);
/// ```
pub fn load_recipe<P: AsRef<Path>>(path: P) -> Result<CalibrationRecipe> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read recipe {}: {e}", path.display()))
    })?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let recipe = parse_recipe(&content, is_json)?;
    validate_recipe(&recipe)?;
    Ok(recipe)
}

/// Parse a recipe from text without validating it
pub fn parse_recipe(content: &str, is_json: bool) -> Result<CalibrationRecipe> {
    if is_json {
        serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON recipe: {e}")))
    } else {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML recipe: {e}")))
    }
}
