use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Node labels of the movie graph.
///
/// `Actor` and `Director` are role labels layered on top of `Person`; they
/// never identify a node on their own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    Movie,
    Person,
    Genre,
    User,
    Tag,
    Actor,
    Director,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Movie => "Movie",
            Label::Person => "Person",
            Label::Genre => "Genre",
            Label::User => "User",
            Label::Tag => "Tag",
            Label::Actor => "Actor",
            Label::Director => "Director",
        }
    }

    pub fn from_name(name: &str) -> Option<Label> {
        match name {
            "Movie" => Some(Label::Movie),
            "Person" => Some(Label::Person),
            "Genre" => Some(Label::Genre),
            "User" => Some(Label::User),
            "Tag" => Some(Label::Tag),
            "Actor" => Some(Label::Actor),
            "Director" => Some(Label::Director),
            _ => None,
        }
    }

    /// The label that owns the identity key. Role labels resolve to `Person`.
    pub fn primary(&self) -> Label {
        match self {
            Label::Actor | Label::Director => Label::Person,
            other => *other,
        }
    }

    /// Name of the property holding the node's unique key.
    pub fn key_property(&self) -> &'static str {
        match self.primary() {
            Label::Movie => "id",
            Label::User => "userId",
            _ => "name",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship types of the movie graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelType {
    Directed,
    ActedIn,
    InGenre,
    Rated,
    /// Raw per-application tag edge. Only exists while tags are normalized.
    Tagged,
    HasTag,
    AppliedTag,
}

impl RelType {
    pub const ALL: [RelType; 7] = [
        RelType::Directed,
        RelType::ActedIn,
        RelType::InGenre,
        RelType::Rated,
        RelType::Tagged,
        RelType::HasTag,
        RelType::AppliedTag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Directed => "DIRECTED",
            RelType::ActedIn => "ACTED_IN",
            RelType::InGenre => "IN_GENRE",
            RelType::Rated => "RATED",
            RelType::Tagged => "TAGGED",
            RelType::HasTag => "HAS_TAG",
            RelType::AppliedTag => "APPLIED_TAG",
        }
    }

    /// (source, target) labels.
    pub fn endpoints(&self) -> (Label, Label) {
        match self {
            RelType::Directed | RelType::ActedIn => (Label::Person, Label::Movie),
            RelType::InGenre => (Label::Movie, Label::Genre),
            RelType::Rated | RelType::Tagged => (Label::User, Label::Movie),
            RelType::HasTag => (Label::Movie, Label::Tag),
            RelType::AppliedTag => (Label::User, Label::Tag),
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a node: its primary label plus the value of its key property.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: Label,
    pub key: String,
}

impl NodeKey {
    pub fn new(label: Label, key: impl Into<String>) -> Self {
        Self {
            label: label.primary(),
            key: key.into(),
        }
    }

    pub fn movie(id: impl Into<String>) -> Self {
        Self::new(Label::Movie, id)
    }

    pub fn person(name: impl Into<String>) -> Self {
        Self::new(Label::Person, name)
    }

    pub fn genre(name: impl Into<String>) -> Self {
        Self::new(Label::Genre, name)
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::new(Label::User, user_id)
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self::new(Label::Tag, name)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label, self.key)
    }
}

/// A scalar property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    String(String),
}

impl PropertyValue {
    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            PropertyValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            PropertyValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<NaiveDate> for PropertyValue {
    fn from(v: NaiveDate) -> Self {
        PropertyValue::Date(v)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        PropertyValue::DateTime(v)
    }
}

/// Property names written by the pipeline.
pub mod prop {
    pub const TITLE: &str = "title";
    pub const TAGLINE: &str = "tagline";
    pub const RELEASED: &str = "released";
    pub const RELEASE_YEAR: &str = "releaseYear";
    pub const IMDB_RATING: &str = "imdbRating";
    pub const RATING: &str = "rating";
    pub const TIMESTAMP: &str = "timestamp";
    pub const WEIGHT: &str = "weight";
    pub const FREQUENCY: &str = "frequency";
    pub const AVG_RATING: &str = "avgRating";
    pub const TOTAL_RATINGS: &str = "totalRatings";
    pub const MOVIE_COUNT: &str = "movieCount";
    pub const USAGE_COUNT: &str = "usageCount";
    pub const APPLICATION_COUNT: &str = "applicationCount";
}

/// Property map of a node or relationship. Ordered so that iteration is
/// deterministic.
pub type Properties = BTreeMap<String, PropertyValue>;
