use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::media::ImagePayload;

/// Attire value that tells the composer to take clothing from a second image.
pub const CUSTOM_ATTIRE_SENTINEL: &str = "Custom Attire Reference";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expression {
    #[serde(rename = "Slight Smile")]
    SlightSmile,
    #[serde(rename = "Confident Neutral")]
    ConfidentNeutral,
    #[serde(rename = "Warm & Approachable")]
    WarmApproachable,
    #[serde(rename = "Focused / Serious")]
    FocusedSerious,
}

impl Expression {
    pub const ALL: [Expression; 4] = [
        Expression::SlightSmile,
        Expression::ConfidentNeutral,
        Expression::WarmApproachable,
        Expression::FocusedSerious,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Expression::SlightSmile => "Slight Smile",
            Expression::ConfidentNeutral => "Confident Neutral",
            Expression::WarmApproachable => "Warm & Approachable",
            Expression::FocusedSerious => "Focused / Serious",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grooming {
    #[serde(rename = "Well-Groomed")]
    WellGroomed,
    #[serde(rename = "Natural / Raw")]
    NaturalRaw,
}

impl Grooming {
    pub const ALL: [Grooming; 2] = [Grooming::WellGroomed, Grooming::NaturalRaw];

    pub fn label(self) -> &'static str {
        match self {
            Grooming::WellGroomed => "Well-Groomed",
            Grooming::NaturalRaw => "Natural / Raw",
        }
    }
}

/// Free-text outfit description, or the custom-reference sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Attire {
    Described(String),
    CustomReference,
}

impl Attire {
    pub fn label(&self) -> &str {
        match self {
            Attire::Described(text) => text.as_str(),
            Attire::CustomReference => CUSTOM_ATTIRE_SENTINEL,
        }
    }
}

impl From<String> for Attire {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case(CUSTOM_ATTIRE_SENTINEL) {
            Attire::CustomReference
        } else {
            Attire::Described(value)
        }
    }
}

impl From<&str> for Attire {
    fn from(value: &str) -> Self {
        Attire::from(value.to_string())
    }
}

impl From<Attire> for String {
    fn from(value: Attire) -> Self {
        value.label().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChoice {
    pub field: &'static str,
    pub value: String,
    pub allowed: Vec<&'static str>,
}

impl fmt::Display for UnknownChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown {} '{}' (expected one of: {})",
            self.field,
            self.value,
            self.allowed.join(", ")
        )
    }
}

impl std::error::Error for UnknownChoice {}

fn choice_key(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

fn parse_choice<T: Copy>(
    field: &'static str,
    raw: &str,
    all: &[T],
    label: fn(T) -> &'static str,
) -> Result<T, UnknownChoice> {
    let wanted = choice_key(raw);
    all.iter()
        .copied()
        .find(|candidate| choice_key(label(*candidate)) == wanted)
        .ok_or_else(|| UnknownChoice {
            field,
            value: raw.to_string(),
            allowed: all.iter().map(|candidate| label(*candidate)).collect(),
        })
}

impl FromStr for Expression {
    type Err = UnknownChoice;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_choice("expression", raw, &Expression::ALL, Expression::label)
    }
}

impl FromStr for Grooming {
    type Err = UnknownChoice;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_choice("grooming", raw, &Grooming::ALL, Grooming::label)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for Grooming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Persona, environment and outfit. Carries no camera or lighting terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticFields<'a> {
    pub expression: Expression,
    pub background: &'a str,
    pub attire: &'a Attire,
    pub grooming: Grooming,
}

/// Camera, framing, optics and grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TechnicalFields<'a> {
    pub camera_angle: &'a str,
    pub pose: &'a str,
    pub lens_depth: &'a str,
    pub color_grade: &'a str,
}

/// Every parameter of a first generation, as chosen in the style wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub pose: String,
    pub attire: Attire,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attire_reference: Option<ImagePayload>,
    pub background: String,
    pub grooming: Grooming,
    pub expression: Expression,
    pub camera_angle: String,
    pub lens_depth: String,
    pub color_grade: String,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            pose: "3/4 Profile".to_string(),
            attire: Attire::Described(
                "Navy Blue Executive Suit, white shirt, silk tie".to_string(),
            ),
            attire_reference: None,
            background: "Modern tech office with soft daylight bokeh".to_string(),
            grooming: Grooming::WellGroomed,
            expression: Expression::SlightSmile,
            camera_angle: "Eye-level".to_string(),
            lens_depth: "F1.8 Cinematic Bokeh".to_string(),
            color_grade: "Clean & Modern".to_string(),
        }
    }
}

impl FeatureSet {
    pub fn semantic(&self) -> SemanticFields<'_> {
        SemanticFields {
            expression: self.expression,
            background: &self.background,
            attire: &self.attire,
            grooming: self.grooming,
        }
    }

    pub fn technical(&self) -> TechnicalFields<'_> {
        TechnicalFields {
            camera_angle: &self.camera_angle,
            pose: &self.pose,
            lens_depth: &self.lens_depth,
            color_grade: &self.color_grade,
        }
    }

    /// The reference image that will actually be sent. An empty payload counts
    /// as absent.
    pub fn effective_attire_reference(&self) -> Option<&ImagePayload> {
        self.attire_reference
            .as_ref()
            .filter(|payload| !payload.is_empty())
    }
}
