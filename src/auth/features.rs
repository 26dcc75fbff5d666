use serde::Serialize;

pub const EMPLOYEE: &str = "EMPLOYEE";
pub const USER: &str = "USER";
pub const ROLE: &str = "ROLE";

/// A permissioned capability area
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feature {
    pub code: String,
    pub name: String,
}

impl Feature {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self { code: code.into(), name: name.into() }
    }
}

/// Static list of feature codes the gate accepts
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    features: Vec<Feature>,
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new(vec![
            Feature::new(EMPLOYEE, "Employee"),
            Feature::new(USER, "User"),
            Feature::new(ROLE, "Role"),
        ])
    }
}

impl FeatureRegistry {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn get(&self, code: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.code == code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }
}
