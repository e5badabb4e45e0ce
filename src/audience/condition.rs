use serde::{Deserialize, Deserializer};

/// Boolean operator of a condition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl LogicalOperator {
    fn parse(s: &str) -> Option<LogicalOperator> {
        match s {
            "and" => Some(LogicalOperator::And),
            "or" => Some(LogicalOperator::Or),
            "not" => Some(LogicalOperator::Not),
            _ => None,
        }
    }
}

/// A matcher leaf: compares attribute `name` against `value` using the `match` matcher.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Condition {
    pub name: String,
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Matcher name. Legacy conditions omit it, meaning `exact`.
    #[serde(rename = "match", default)]
    pub match_type: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Condition {
    pub fn match_name(&self) -> &str {
        self.match_type.as_deref().unwrap_or("exact")
    }
}

/// Recursive audience condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionTree {
    /// A boolean operator applied to child trees.
    Operator {
        operator: LogicalOperator,
        children: Vec<ConditionTree>,
    },
    /// A matcher leaf.
    Leaf(Condition),
    /// Reference to another audience's condition tree.
    AudienceId(String),
}

impl ConditionTree {
    /// OR over the referenced audiences.
    pub fn any_of_audiences(audience_ids: &[String]) -> ConditionTree {
        ConditionTree::Operator {
            operator: LogicalOperator::Or,
            children: audience_ids
                .iter()
                .cloned()
                .map(ConditionTree::AudienceId)
                .collect(),
        }
    }

    /// An operator node with no operands, as produced by `[]`.
    pub fn is_empty(&self) -> bool {
        matches!(self, ConditionTree::Operator { children, .. } if children.is_empty())
    }
}

/// JSON shape of condition trees: `["and", {...}, ["or", "123", "456"]]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionWire {
    List(Vec<ConditionWire>),
    Leaf(Condition),
    Id(String),
}

impl From<ConditionWire> for ConditionTree {
    fn from(wire: ConditionWire) -> ConditionTree {
        match wire {
            ConditionWire::Leaf(condition) => ConditionTree::Leaf(condition),
            ConditionWire::Id(id) => ConditionTree::AudienceId(id),
            ConditionWire::List(items) => {
                let mut items = items.into_iter().peekable();
                let explicit = match items.peek() {
                    Some(ConditionWire::Id(s)) => LogicalOperator::parse(s),
                    _ => None,
                };
                let operator = match explicit {
                    Some(operator) => {
                        items.next();
                        operator
                    }
                    // Lists not starting with an operator are implicitly OR-ed.
                    None => LogicalOperator::Or,
                };
                ConditionTree::Operator {
                    operator,
                    children: items.map(ConditionTree::from).collect(),
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for ConditionTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ConditionWire::deserialize(deserializer).map(ConditionTree::from)
    }
}

/// A named, reusable condition tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "deserialize_audience_conditions")]
    pub conditions: ConditionTree,
}

/// Legacy audiences carry their conditions as a JSON-encoded string.
fn deserialize_audience_conditions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<ConditionTree, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(encoded) => {
            serde_json::from_str::<ConditionTree>(&encoded).map_err(serde::de::Error::custom)
        }
        value => ConditionTree::deserialize(value).map_err(serde::de::Error::custom),
    }
}
