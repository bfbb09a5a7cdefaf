use std::fmt;

use serde::{Deserialize, Serialize};

/// A single `;name=value` parameter. The value is optional (`;lr`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: Option<String>,
}

impl Param {
    pub fn new(name: &str, value: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            value: value.map(str::to_string),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An ordered parameter multimap.
///
/// Parameters keep their insertion order; lookup by name is
/// case-insensitive and returns the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Params(Vec<Param>);

impl Params {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: &str, value: Option<&str>) {
        self.0.push(Param::new(name, value));
    }

    /// Replaces the first occurrence of `name` or appends a new parameter.
    pub fn set(&mut self, name: &str, value: Option<&str>) {
        match self.0.iter_mut().find(|p| p.name.eq_ignore_ascii_case(name)) {
            Some(param) => param.value = value.map(str::to_string),
            None => self.push(name, value),
        }
    }

    /// Returns the value of the first occurrence of `name`.
    ///
    /// `Some(None)` means the parameter is present without a value.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.0
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_deref())
    }

    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.get(name).flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Param> {
        let idx = self.0.iter().position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in self.iter() {
            write!(f, ";{param}")?;
        }
        Ok(())
    }
}

impl FromIterator<Param> for Params {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut params = Params::new();
        params.push("Transport", Some("UDP"));

        assert_eq!(params.get_value("transport"), Some("UDP"));
        assert_eq!(params.get_value("TRANSPORT"), Some("UDP"));
    }

    #[test]
    fn test_valueless_param_renders_bare() {
        let mut params = Params::new();
        params.push("lr", None);
        params.push("ttl", Some("1"));

        assert_eq!(params.to_string(), ";lr;ttl=1");
        assert_eq!(params.get("lr"), Some(None));
    }

    #[test]
    fn test_set_replaces_first_occurrence_in_place() {
        let mut params = Params::new();
        params.push("a", Some("1"));
        params.push("b", Some("2"));
        params.set("a", Some("3"));

        assert_eq!(params.to_string(), ";a=3;b=2");
    }
}
