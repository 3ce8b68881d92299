//! Immutable environment snapshots
//!
//! A job's environment is built once, layer by layer, and every step gets
//! its own overlay on top of it. Overlays never modify the snapshot they
//! start from, so a variable a step adds is invisible to the next step.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_lua::VarProvider;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: Arc<BTreeMap<String, String>>,
}

impl EnvSnapshot {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self {
            vars: Arc::new(vars),
        }
    }

    /// Takes `names` from the runner's own environment, skipping `excluded`
    pub fn inherited<'a>(
        names: impl IntoIterator<Item = &'a String>,
        excluded: &[String],
    ) -> Self {
        let vars = names
            .into_iter()
            .filter(|name| !excluded.contains(name))
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.clone(), value)))
            .collect();
        Self::new(vars)
    }

    /// New snapshot with `layer` applied on top; later values win
    pub fn overlay<I, K, V>(&self, layer: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars = (*self.vars).clone();
        vars.extend(layer.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self::new(vars)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl VarProvider for EnvSnapshot {
    fn get(&self, name: &str) -> Option<String> {
        EnvSnapshot::get(self, name).map(str::to_string)
    }

    fn keys(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_leaves_base_untouched() {
        let base = EnvSnapshot::new(BTreeMap::from([
            ("IMAGE".to_string(), "ubi8".to_string()),
            ("TAG".to_string(), "latest".to_string()),
        ]));

        let step = base.overlay([("TAG", "v1"), ("TOKEN", "abcd1234")]);

        assert_eq!(step.get("TAG"), Some("v1"));
        assert_eq!(step.get("TOKEN"), Some("abcd1234"));
        assert_eq!(step.get("IMAGE"), Some("ubi8"));

        assert_eq!(base.get("TAG"), Some("latest"));
        assert!(!base.contains("TOKEN"));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_inherited_respects_exclusions() {
        let names = vec!["PATH".to_string(), "KEEL_TEST_NOT_SET_ANYWHERE".to_string()];
        let env = EnvSnapshot::inherited(&names, &[]);
        assert!(!env.contains("KEEL_TEST_NOT_SET_ANYWHERE"));

        let env = EnvSnapshot::inherited(&names, &["PATH".to_string()]);
        assert!(!env.contains("PATH"));
    }

    #[test]
    fn test_var_provider_keys_sorted() {
        let env = EnvSnapshot::default().overlay([("B", "2"), ("A", "1")]);
        assert_eq!(VarProvider::keys(&env), vec!["A", "B"]);
    }
}
