use orchard_core::workflow::OutputSpec;
use wildmatch::WildMatch;

/// Matches a file name against patterns. Patterns with `*` or `?` are globs;
/// plain patterns match as substrings, so `png` selects `leaf.png`.
pub fn matches_any<S: AsRef<str>>(name: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|p| {
        let p = p.as_ref();
        if p.is_empty() {
            false
        } else if p.contains(['*', '?']) {
            WildMatch::new(p).matches(name)
        } else {
            name.contains(p)
        }
    })
}

/// Shell `case` pattern equivalent to [`matches_any`] for one pattern.
pub(crate) fn case_pattern(pattern: &str) -> String {
    let escaped: String = pattern
        .chars()
        .map(|c| match c {
            '*' | '?' => c.to_string(),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/') => c.to_string(),
            c => format!("\\{}", c),
        })
        .collect();
    if pattern.contains(['*', '?']) {
        escaped
    } else {
        format!("*{}*", escaped)
    }
}

/// Decides which files in a task's output directory count as results.
pub struct OutputSelector<'a> {
    output: &'a OutputSpec,
}

impl<'a> OutputSelector<'a> {
    pub fn new(output: &'a OutputSpec) -> Self {
        Self { output }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.output.exclude.names.iter().any(|n| n == name)
            || matches_any(name, &self.output.exclude.patterns)
    }

    pub fn included_names(&self) -> impl Iterator<Item = &str> {
        self.output
            .include
            .names
            .iter()
            .map(String::as_str)
            .filter(|n| !self.is_excluded(n))
    }

    pub fn matches_pattern(&self, name: &str) -> bool {
        matches_any(name, &self.output.include.patterns) && !self.is_excluded(name)
    }

    /// `case` arms selecting files by the include patterns (empty when there are none).
    pub(crate) fn include_case(&self) -> Option<String> {
        let arms: Vec<String> = self
            .output
            .include
            .patterns
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| case_pattern(p))
            .collect();
        (!arms.is_empty()).then(|| arms.join("|"))
    }

    pub(crate) fn exclude_case(&self) -> Option<String> {
        let arms: Vec<String> = self
            .output
            .exclude
            .names
            .iter()
            .map(|n| case_pattern(n).trim_matches('*').to_string())
            .chain(
                self.output
                    .exclude
                    .patterns
                    .iter()
                    .filter(|p| !p.is_empty())
                    .map(|p| case_pattern(p)),
            )
            .collect();
        (!arms.is_empty()).then(|| arms.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_core::workflow::FileFilter;

    fn spec() -> OutputSpec {
        OutputSpec {
            from: Some("out".into()),
            to: Some("/iplant/home/alice/results".into()),
            include: FileFilter {
                names: vec!["summary.csv".into(), "debug.txt".into()],
                patterns: vec!["png".into(), "mask_*.tif".into()],
            },
            exclude: FileFilter {
                names: vec!["debug.txt".into()],
                patterns: vec!["tmp".into()],
            },
        }
    }

    #[test]
    fn test_matches_any() {
        assert!(matches_any("leaf.png", &["png"]));
        assert!(matches_any("mask_01.tif", &["mask_*.tif"]));
        assert!(!matches_any("mask.tif", &["mask_*.tif"]));
        assert!(!matches_any::<&str>("leaf.png", &[]));
    }

    #[test]
    fn test_selector_applies_excludes() {
        let spec = spec();
        let selector = OutputSelector::new(&spec);
        assert_eq!(selector.included_names().collect::<Vec<_>>(), vec!["summary.csv"]);
        assert!(selector.matches_pattern("leaf.png"));
        assert!(!selector.matches_pattern("leaf.tmp.png"));
    }

    #[test]
    fn test_case_arms() {
        let spec = spec();
        let selector = OutputSelector::new(&spec);
        assert_eq!(selector.include_case().unwrap(), "*png*|mask_*.tif");
        assert_eq!(selector.exclude_case().unwrap(), "debug.txt|*tmp*");
        assert_eq!(case_pattern("a b"), "*a\\ b*");
    }
}
