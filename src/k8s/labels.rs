use std::collections::BTreeMap;

pub const MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VAL: &str = "oadp-e2e";
pub const CASE_LABEL_KEY: &str = "oadp-e2e/case";

/// Collection of labels used to identify the resources created by the suite.
#[derive(Default)]
pub struct DefaultLabels(BTreeMap<String, String>);

impl DefaultLabels {
    /// Creates a new collection of default labels.
    pub fn new() -> Self {
        DefaultLabels(BTreeMap::from([(
            MANAGED_BY_KEY.to_string(),
            MANAGED_BY_VAL.to_string(),
        )]))
    }

    /// Adds the test case label to the set.
    pub fn with_case(mut self, case_name: &str) -> Self {
        self.0
            .insert(CASE_LABEL_KEY.to_string(), case_name.to_string());
        self
    }

    pub fn get(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_label() {
        assert_eq!(
            DefaultLabels::new().get(),
            BTreeMap::from([(MANAGED_BY_KEY.to_string(), MANAGED_BY_VAL.to_string())])
        );
        let labels = DefaultLabels::new().with_case("mysql-csi").get();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[CASE_LABEL_KEY], "mysql-csi");
    }
}
