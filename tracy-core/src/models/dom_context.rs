use serde::{Deserialize, Serialize};

/// Where in the markup a tracer string was found.
///
/// Encoded as its discriminant on the wire and in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HtmlLocationType {
    Attribute = 0,
    Text = 1,
    NodeName = 2,
    AttributeValue = 3,
    Comment = 4,
}

impl TryFrom<u8> for HtmlLocationType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Attribute),
            1 => Ok(Self::Text),
            2 => Ok(Self::NodeName),
            3 => Ok(Self::AttributeValue),
            4 => Ok(Self::Comment),
            other => Err(format!("unknown HTML location type {}", other)),
        }
    }
}

impl From<HtmlLocationType> for u8 {
    fn from(value: HtmlLocationType) -> Self {
        value as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomContext {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub tracer_event_id: i64,
    pub event_context: String,
    pub html_location_type: HtmlLocationType,
    pub html_node_type: String,
    #[serde(default)]
    pub severity: u32,
}
