//! Group state types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Opaque room key shared by one sender and its receivers
pub type Token = String;

/// Sender identity
pub type SteamId = String;

/// Server-assigned connection identifier
pub type ConnectionId = String;

/// Mapping from sender identity to its latest known state
pub type Group = BTreeMap<SteamId, PositionState>;

/// In-game position: map coordinates plus heading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// `[x, y]` map coordinates
    pub location: [f64; 2],
    /// Heading in degrees
    pub rotation: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, rotation: f64) -> Self {
        Self {
            location: [x, y],
            rotation,
        }
    }

    pub fn x(&self) -> f64 {
        self.location[0]
    }

    pub fn y(&self) -> f64 {
        self.location[1]
    }

    /// All three components are finite numbers
    pub fn is_finite(&self) -> bool {
        self.location[0].is_finite() && self.location[1].is_finite() && self.rotation.is_finite()
    }
}

/// The independently updated fields of a [`PositionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Position,
    Location,
    Region,
    WorldName,
    Map,
    Username,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Position,
        Field::Location,
        Field::Region,
        Field::WorldName,
        Field::Map,
        Field::Username,
    ];

    /// Wire name of the field
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Position => "position",
            Field::Location => "location",
            Field::Region => "region",
            Field::WorldName => "worldName",
            Field::Map => "map",
            Field::Username => "username",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field change. Serialized as `{"<field>": value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldUpdate {
    Position(Position),
    Location(String),
    Region(String),
    WorldName(String),
    Map(String),
    Username(String),
}

impl FieldUpdate {
    pub fn field(&self) -> Field {
        match self {
            FieldUpdate::Position(_) => Field::Position,
            FieldUpdate::Location(_) => Field::Location,
            FieldUpdate::Region(_) => Field::Region,
            FieldUpdate::WorldName(_) => Field::WorldName,
            FieldUpdate::Map(_) => Field::Map,
            FieldUpdate::Username(_) => Field::Username,
        }
    }

    /// Reject values that decode but cannot be stored
    pub fn validate(&self) -> Result<()> {
        match self {
            FieldUpdate::Position(position) if !position.is_finite() => {
                Err(Error::MalformedField {
                    field: Field::Position.as_str(),
                    reason: "coordinates must be finite".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Latest known state of one sender.
///
/// Each field is the most recently received value for that field; there is
/// no ordering across fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionState {
    pub steam_id: SteamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl PositionState {
    pub fn new(steam_id: impl Into<SteamId>, steam_name: Option<String>) -> Self {
        Self {
            steam_id: steam_id.into(),
            steam_name,
            ..Default::default()
        }
    }

    /// Merge one field, leaving every other field untouched
    pub fn apply(&mut self, update: &FieldUpdate) {
        match update {
            FieldUpdate::Position(v) => self.position = Some(*v),
            FieldUpdate::Location(v) => self.location = Some(v.clone()),
            FieldUpdate::Region(v) => self.region = Some(v.clone()),
            FieldUpdate::WorldName(v) => self.world_name = Some(v.clone()),
            FieldUpdate::Map(v) => self.map = Some(v.clone()),
            FieldUpdate::Username(v) => self.username = Some(v.clone()),
        }
    }

    /// Current value of a field as an update
    pub fn get(&self, field: Field) -> Option<FieldUpdate> {
        match field {
            Field::Position => self.position.map(FieldUpdate::Position),
            Field::Location => self.location.clone().map(FieldUpdate::Location),
            Field::Region => self.region.clone().map(FieldUpdate::Region),
            Field::WorldName => self.world_name.clone().map(FieldUpdate::WorldName),
            Field::Map => self.map.clone().map(FieldUpdate::Map),
            Field::Username => self.username.clone().map(FieldUpdate::Username),
        }
    }

    /// Every field that has a value, in [`Field::ALL`] order
    pub fn updates(&self) -> Vec<FieldUpdate> {
        Field::ALL.iter().filter_map(|f| self.get(*f)).collect()
    }

    /// Name to show for this sender
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.steam_name.as_deref())
            .unwrap_or(&self.steam_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_is_field_independent() {
        let mut state = PositionState::new("steam-1", None);
        state.apply(&FieldUpdate::Region("Everfall".into()));
        state.apply(&FieldUpdate::Position(Position::new(100.0, 200.0, 0.0)));

        assert_eq!(state.region.as_deref(), Some("Everfall"));
        assert_eq!(state.position, Some(Position::new(100.0, 200.0, 0.0)));
        assert!(state.location.is_none());
        assert!(state.map.is_none());

        state.apply(&FieldUpdate::Position(Position::new(1.0, 2.0, 90.0)));
        assert_eq!(state.region.as_deref(), Some("Everfall"));
    }

    #[test]
    fn test_updates_lists_set_fields() {
        let mut state = PositionState::new("steam-1", None);
        state.apply(&FieldUpdate::Map("newworld_vitaeeterna".into()));
        state.apply(&FieldUpdate::Username("Aria".into()));

        let fields: Vec<Field> = state.updates().iter().map(|u| u.field()).collect();
        assert_eq!(fields, vec![Field::Map, Field::Username]);
    }

    #[test]
    fn test_field_update_wire_shape() {
        let json = serde_json::to_value(FieldUpdate::WorldName("Valhalla".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "worldName": "Valhalla" }));

        let json = serde_json::to_value(FieldUpdate::Position(Position::new(1.5, 2.5, 3.0))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "position": { "location": [1.5, 2.5], "rotation": 3.0 } })
        );
    }

    #[test]
    fn test_validate_rejects_non_finite_position() {
        let bad = FieldUpdate::Position(Position::new(f64::NAN, 0.0, 0.0));
        assert!(bad.validate().is_err());
        assert!(FieldUpdate::Region("Everfall".into()).validate().is_ok());
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut state = PositionState::new("7656", Some("steamy".into()));
        assert_eq!(state.display_name(), "steamy");
        state.apply(&FieldUpdate::Username("Aria".into()));
        assert_eq!(state.display_name(), "Aria");
        assert_eq!(PositionState::new("7656", None).display_name(), "7656");
    }
}
