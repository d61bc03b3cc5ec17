//! `--redirect from=to` package URI rewriting.

use anyhow::{bail, Result};

/// Rewrites package URIs before lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRedirector {
    rules: Vec<(String, String)>,
}

impl PackageRedirector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a redirector from `from=to` arguments.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut redirector = Self::new();
        for arg in args {
            let (from, to) = parse_rule(arg.as_ref())?;
            redirector.add(from, to);
        }
        Ok(redirector)
    }

    /// Add a rule. A later rule for the same URI replaces the earlier one.
    pub fn add(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        match self.rules.iter_mut().find(|(f, _)| *f == from) {
            Some(rule) => rule.1 = to,
            None => self.rules.push((from, to)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The URI to look up in place of `uri`.
    pub fn redirect<'a>(&'a self, uri: &'a str) -> &'a str {
        self.rules
            .iter()
            .find(|(from, _)| from == uri)
            .map(|(_, to)| to.as_str())
            .unwrap_or(uri)
    }

    /// Render the rules back into command-line arguments.
    pub fn arguments(&self) -> Vec<String> {
        self.rules
            .iter()
            .flat_map(|(from, to)| ["--redirect".to_string(), format!("{}={}", from, to)])
            .collect()
    }
}

/// Parse a `from=to` rule.
pub fn parse_rule(arg: &str) -> Result<(String, String)> {
    let Some((from, to)) = arg.split_once('=') else {
        bail!("invalid redirect `{}`: expected FROM=TO", arg);
    };
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        bail!("invalid redirect `{}`: expected FROM=TO", arg);
    }
    Ok((from.to_string(), to.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect() {
        let redirector = PackageRedirector::from_args([
            "https-git://github.com/org/lib=local-git:///work/lib",
        ])
        .unwrap();

        assert_eq!(
            redirector.redirect("https-git://github.com/org/lib"),
            "local-git:///work/lib"
        );
        assert_eq!(redirector.redirect("https-git://github.com/org/other"), "https-git://github.com/org/other");
    }

    #[test]
    fn test_arguments_round_trip() {
        let mut redirector = PackageRedirector::new();
        redirector.add("a://x", "b://y");
        redirector.add("a://x", "b://z");

        let args = redirector.arguments();
        assert_eq!(args, vec!["--redirect", "a://x=b://z"]);

        let parsed = PackageRedirector::from_args([args[1].as_str()]).unwrap();
        assert_eq!(parsed, redirector);
    }

    #[test]
    fn test_invalid_rules() {
        assert!(parse_rule("no-equals").is_err());
        assert!(parse_rule("=b").is_err());
        assert!(parse_rule("a=").is_err());
    }
}
