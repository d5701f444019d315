use std::fmt;

/// The resource families that own a cache partition. Workouts live inside
/// training sessions and share their partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Exercises,
    TrainingSessions,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Exercises => "exercises",
            Family::TrainingSessions => "trainingSessions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Listing results, one entry per pagination variant.
    List,
    /// A single entity of the family.
    Detail,
    /// A single nested entity (a workout inside a training session).
    ChildDetail,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::List => "list",
            Scope::Detail => "detail",
            Scope::ChildDetail => "child",
        }
    }
}

/// Composite cache key `(family, scope, id-or-listing-params)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub family: Family,
    pub scope: Scope,
    pub params: String,
}

impl QueryKey {
    pub fn new(family: Family, scope: Scope, params: impl Into<String>) -> Self {
        Self {
            family,
            scope,
            params: params.into(),
        }
    }

    pub fn matches(&self, family: Family, scope: Scope) -> bool {
        self.family == family && self.scope == scope
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.family.as_str(),
            self.scope.as_str(),
            self.params
        )
    }
}
