//! Message components (buttons and their containers).
//!
//! The provider attaches a row of buttons to a finished grid message; the
//! four labelled `U1`..`U4` trigger upscales of the corresponding variant.

use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// Prefix of the `custom_id` carried by the four upscale buttons.
const UPSAMPLE_CUSTOM_ID_PREFIX: &str = "MJ::JOB::upsample::";

/// Top-level component type.
///
/// In messages, this is usually an `ActionRow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Component {
    /// An action row containing other components.
    ActionRow(ActionRow),
    /// A button component (only valid inside an ActionRow).
    Button(Button),
}

/// The type of component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ComponentType {
    /// Container for other components.
    ActionRow = 1,
    /// Button object.
    Button = 2,
    /// Select menu for picking text.
    StringSelect = 3,
}

impl From<u8> for ComponentType {
    fn from(value: u8) -> Self {
        match value {
            2 => ComponentType::Button,
            3 => ComponentType::StringSelect,
            _ => ComponentType::ActionRow,
        }
    }
}

impl From<ComponentType> for u8 {
    fn from(value: ComponentType) -> Self {
        value as u8
    }
}

/// A container for other components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRow {
    /// Type 1 (ActionRow).
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    /// List of child components.
    pub components: Vec<Component>,
}

/// A clickable button.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    /// Type 2 (Button).
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    /// Style of the button.
    #[serde(default)]
    pub style: Option<u8>,
    /// Text label (max 80 characters).
    #[serde(default)]
    pub label: Option<String>,
    /// Custom ID (max 100 chars). Required for non-link buttons.
    #[serde(default)]
    pub custom_id: Option<String>,
    /// URL for link buttons.
    #[serde(default)]
    pub url: Option<String>,
    /// Whether the button is disabled.
    #[serde(default)]
    pub disabled: bool,
}

/// One of the four upscale buttons attached to a finished grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleButton {
    /// Grid message the button belongs to.
    pub message_id: Snowflake,
    /// Opaque custom id to echo back in the component interaction.
    pub custom_id: String,
    /// Button label, `U1`..`U4`.
    pub label: String,
    /// Zero-based variant index, 0..=3.
    pub variant_index: u8,
}

/// Extract the `U1`..`U4` upscale buttons from a message's components.
///
/// Returns buttons in variant order. A grid is only considered complete
/// when all four are present; callers check `len() == 4`.
pub fn upscale_buttons(message_id: Snowflake, components: &[Component]) -> Vec<UpscaleButton> {
    let mut found = Vec::with_capacity(4);

    for component in components {
        let Component::ActionRow(row) = component else {
            continue;
        };
        for child in &row.components {
            let Component::Button(button) = child else {
                continue;
            };
            let Some(custom_id) = button.custom_id.as_deref() else {
                continue;
            };
            let Some(variant) = parse_upsample_variant(custom_id) else {
                continue;
            };
            found.push(UpscaleButton {
                message_id,
                custom_id: custom_id.to_string(),
                label: button
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("U{}", variant + 1)),
                variant_index: variant,
            });
        }
    }

    found.sort_by_key(|b| b.variant_index);
    found.dedup_by_key(|b| b.variant_index);
    found
}

/// Parse the variant index out of an `MJ::JOB::upsample::{1..4}::<hash>`
/// custom id. Returns the zero-based index.
fn parse_upsample_variant(custom_id: &str) -> Option<u8> {
    let rest = custom_id.strip_prefix(UPSAMPLE_CUSTOM_ID_PREFIX)?;
    let digit = rest.split("::").next()?;
    match digit.parse::<u8>() {
        Ok(n @ 1..=4) => Some(n - 1),
        _ => None,
    }
}
