use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The user's search criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub target_roles: BTreeSet<String>,
    #[serde(default)]
    pub desired_locations: BTreeSet<String>,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub salary_min: Option<u32>,
    #[serde(default)]
    pub salary_max: Option<u32>,
}

/// A single edit applied to a preferences draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceUpdate {
    AddRole(String),
    RemoveRole(String),
    AddLocation(String),
    RemoveLocation(String),
    AddSkill(String),
    RemoveSkill(String),
    SetSkills(Vec<String>),
    SetSalaryMin(Option<u32>),
    SetSalaryMax(Option<u32>),
}

impl Preferences {
    /// Builds preferences from loose lists, trimming and dropping blank values.
    pub fn new<R, L, S>(roles: R, locations: L, skills: S) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        L: IntoIterator,
        L::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        Self {
            target_roles: clean(roles),
            desired_locations: clean(locations),
            skills: clean(skills),
            salary_min: None,
            salary_max: None,
        }
    }

    pub fn with_salary(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.salary_min = min;
        self.salary_max = max;
        self
    }

    /// True when there is something to search for.
    pub fn has_criteria(&self) -> bool {
        !self.target_roles.is_empty() || !self.skills.is_empty()
    }

    pub fn apply(&mut self, update: PreferenceUpdate) {
        match update {
            PreferenceUpdate::AddRole(v) => insert(&mut self.target_roles, &v),
            PreferenceUpdate::RemoveRole(v) => {
                self.target_roles.remove(v.trim());
            }
            PreferenceUpdate::AddLocation(v) => insert(&mut self.desired_locations, &v),
            PreferenceUpdate::RemoveLocation(v) => {
                self.desired_locations.remove(v.trim());
            }
            PreferenceUpdate::AddSkill(v) => insert(&mut self.skills, &v),
            PreferenceUpdate::RemoveSkill(v) => {
                self.skills.remove(v.trim());
            }
            PreferenceUpdate::SetSkills(values) => self.skills = clean(values),
            PreferenceUpdate::SetSalaryMin(v) => self.salary_min = v,
            PreferenceUpdate::SetSalaryMax(v) => self.salary_max = v,
        }
    }
}

fn insert(set: &mut BTreeSet<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        set.insert(value.to_string());
    }
}

fn clean<I>(values: I) -> BTreeSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_and_dedupes() {
        let prefs = Preferences::new(["engineer ", "engineer", ""], ["Remote"], [" python"]);
        assert_eq!(prefs.target_roles.len(), 1);
        assert!(prefs.target_roles.contains("engineer"));
        assert!(prefs.skills.contains("python"));
    }

    #[test]
    fn test_apply_updates() {
        let mut prefs = Preferences::default();
        prefs.apply(PreferenceUpdate::AddSkill("rust".into()));
        prefs.apply(PreferenceUpdate::AddSkill("  ".into()));
        prefs.apply(PreferenceUpdate::AddRole("engineer".into()));
        prefs.apply(PreferenceUpdate::RemoveRole(" engineer ".into()));
        prefs.apply(PreferenceUpdate::SetSalaryMin(Some(50_000)));
        assert_eq!(prefs.skills.len(), 1);
        assert!(prefs.target_roles.is_empty());
        assert_eq!(prefs.salary_min, Some(50_000));
        assert!(prefs.has_criteria());
    }

    #[test]
    fn test_missing_fields_default_when_parsing() {
        let prefs: Preferences =
            serde_json::from_value(serde_json::json!({ "skills": ["python"] })).unwrap();
        assert!(prefs.target_roles.is_empty());
        assert_eq!(prefs.salary_max, None);
        assert!(prefs.has_criteria());
    }
}
