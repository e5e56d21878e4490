use serde::{Deserialize, Serialize};

/// A UI navigation requested by the model during a run, handed back to the
/// web client next to the final answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NavigationIntent {
    Route { route: String },
    Section { section: String },
}

impl NavigationIntent {
    pub fn route<S: Into<String>>(route: S) -> Self {
        NavigationIntent::Route {
            route: route.into(),
        }
    }

    pub fn section<S: Into<String>>(section: S) -> Self {
        NavigationIntent::Section {
            section: section.into(),
        }
    }
}
