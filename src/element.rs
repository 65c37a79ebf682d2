//! The element record served by the API.
//!
//! A single flat data-transfer type. Every attribute other than the identity
//! fields is optional; list-valued attributes are always present and default
//! to an empty array.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Display color used when a record does not carry one.
pub const DEFAULT_COLOR: &str = "#E0E0E0";

static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("hex color pattern is valid"));

/// One oxidation state, stored either as a signed integer or as a free-form
/// label (e.g. `"+2 (rare)"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OxidationState {
    Value(i64),
    Label(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Element {
    // Identity
    #[validate(range(min = 1, message = "atomic_number must be a positive integer"))]
    pub atomic_number: u32,
    #[validate(length(min = 1, max = 3))]
    pub symbol: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    // Classification
    #[validate(custom(function = "validate_finite"))]
    pub atomic_mass: Option<f64>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[validate(length(max = 1))]
    pub block: Option<String>,
    pub group: Option<u32>,
    pub period: Option<u32>,
    #[serde(default = "default_color")]
    #[validate(custom(function = "validate_hex_color"))]
    pub color: String,

    // Composition
    pub protons: Option<u32>,
    pub neutrons: Option<u32>,
    pub electrons: Option<u32>,
    #[serde(default)]
    pub isotopes: Vec<serde_json::Value>,

    // Electronic
    #[validate(length(max = 200))]
    pub electron_configuration: Option<String>,
    pub valence_electrons: Option<u32>,
    #[serde(default)]
    pub oxidation_states: Vec<OxidationState>,
    #[validate(custom(function = "validate_finite"))]
    pub ionization_energy: Option<f64>,
    #[validate(custom(function = "validate_finite"))]
    pub electron_affinity: Option<f64>,
    #[validate(custom(function = "validate_finite"))]
    pub electronegativity: Option<f64>,

    // Periodic
    #[validate(custom(function = "validate_finite"))]
    pub atomic_radius: Option<f64>,
    #[validate(custom(function = "validate_finite"))]
    pub ionic_radius: Option<f64>,
    #[validate(length(max = 20))]
    pub shielding_effect: Option<String>,

    // Physical
    #[validate(length(max = 20))]
    pub state_at_room_temp: Option<String>,
    #[validate(length(max = 100))]
    pub color_appearance: Option<String>,
    #[validate(custom(function = "validate_finite"))]
    pub density: Option<f64>,
    #[validate(custom(function = "validate_finite"))]
    pub melting_point: Option<f64>,
    #[validate(custom(function = "validate_finite"))]
    pub boiling_point: Option<f64>,
    #[validate(length(max = 20))]
    pub electrical_conductivity: Option<String>,
    #[validate(length(max = 20))]
    pub thermal_conductivity: Option<String>,
    #[validate(length(max = 50))]
    pub hardness: Option<String>,
    pub malleability: Option<bool>,
    pub ductility: Option<bool>,
    #[validate(length(max = 50))]
    pub magnetic_properties: Option<String>,

    // Chemical
    #[validate(length(max = 50))]
    pub reactivity: Option<String>,
    #[serde(default)]
    pub bond_types: Vec<String>,
    #[validate(length(max = 50))]
    pub acidity_basicity: Option<String>,
    #[validate(length(max = 200))]
    pub corrosion_behavior: Option<String>,
    #[validate(length(max = 200))]
    pub combustion_behavior: Option<String>,

    // Nuclear
    #[validate(length(max = 50))]
    pub radioactivity: Option<String>,
    #[validate(length(max = 100))]
    pub half_life: Option<String>,
    #[validate(length(max = 20))]
    pub nuclear_spin: Option<String>,

    // Structural
    #[validate(length(max = 50))]
    pub crystal_structure: Option<String>,
    #[validate(length(max = 200))]
    pub lattice_parameters: Option<String>,
    pub coordination_number: Option<u32>,

    // Thermodynamic
    #[validate(custom(function = "validate_finite"))]
    pub enthalpy_formation: Option<f64>,
    #[validate(custom(function = "validate_finite"))]
    pub entropy: Option<f64>,
    #[validate(custom(function = "validate_finite"))]
    pub heat_capacity: Option<f64>,

    // Optical
    #[validate(length(max = 200))]
    pub emission_spectrum: Option<String>,
    #[validate(custom(function = "validate_finite"))]
    pub refractive_index: Option<f64>,

    // Biological
    #[validate(length(max = 50))]
    pub biological_role: Option<String>,
    #[validate(length(max = 50))]
    pub toxicity: Option<String>,
    #[validate(length(max = 200))]
    pub abundance: Option<String>,

    // Provenance
    #[validate(length(max = 20))]
    pub natural_or_synthetic: Option<String>,
}

impl Element {
    /// Minimal record carrying only its identity and the default color.
    pub fn new(atomic_number: u32, symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            atomic_number,
            symbol: symbol.into(),
            name: name.into(),
            color: default_color(),
            ..Default::default()
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {} ({})", self.atomic_number, self.name, self.symbol)
    }
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn validate_hex_color(color: &str) -> Result<(), ValidationError> {
    if HEX_COLOR.is_match(color) {
        Ok(())
    } else {
        Err(ValidationError::new("hex_color")
            .with_message(Cow::Borrowed("color must be a #RRGGBB hex string")))
    }
}

fn validate_finite(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::new("finite").with_message(Cow::Borrowed("value must be finite")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_element_is_valid() {
        let element = Element::new(1, "H", "Hydrogen");
        assert!(element.validate().is_ok());
        assert_eq!(element.color, DEFAULT_COLOR);
        assert_eq!(element.to_string(), "1. Hydrogen (H)");
    }

    #[test]
    fn test_serializes_every_field() {
        let value = serde_json::to_value(Element::new(2, "He", "Helium")).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 53);
        assert!(object["density"].is_null());
        assert!(object["malleability"].is_null());
        assert_eq!(object["isotopes"], json!([]));
        assert_eq!(object["oxidation_states"], json!([]));
        assert_eq!(object["bond_types"], json!([]));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let element: Element = serde_json::from_value(json!({
            "atomic_number": 8,
            "symbol": "O",
            "name": "Oxygen",
            "oxidation_states": [-2, "+2 (rare)"]
        }))
        .unwrap();

        assert_eq!(element.color, DEFAULT_COLOR);
        assert!(element.bond_types.is_empty());
        assert_eq!(
            element.oxidation_states,
            vec![OxidationState::Value(-2), OxidationState::Label("+2 (rare)".to_string())]
        );
    }

    #[test]
    fn test_rejects_invalid_identity() {
        let mut element = Element::new(0, "Uuoo", "");
        let errors = element.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("atomic_number"));
        assert!(fields.contains_key("symbol"));
        assert!(fields.contains_key("name"));

        element = Element::new(1, "H", "Hydrogen");
        element.block = Some("sp".to_string());
        assert!(element.validate().is_err());
    }

    #[test]
    fn test_rejects_non_finite_numbers() {
        let mut element = Element::new(26, "Fe", "Iron");
        element.density = Some(f64::NAN);
        let errors = element.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("density"));

        element.density = Some(7.874);
        element.melting_point = Some(f64::INFINITY);
        assert!(element.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_color() {
        let mut element = Element::new(29, "Cu", "Copper");
        element.color = "orange".to_string();
        assert!(element.validate().is_err());

        element.color = "#c88033".to_string();
        assert!(element.validate().is_ok());
    }
}
