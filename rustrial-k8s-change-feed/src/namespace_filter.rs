use crate::errors::ConfigError;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Literal(char),
    /// `?`
    AnyChar,
    /// `*`
    AnyRun,
    /// `[a-z]`, `[!abc]`
    Class {
        negated: bool,
        ranges: Vec<(char, char)>,
    },
}

impl Token {
    fn matches_char(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar | Token::AnyRun => true,
            Token::Class { negated, ranges } => {
                ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi) != *negated
            }
        }
    }
}

/// A single compiled glob pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespacePattern {
    source: String,
    tokens: Vec<Token>,
}

impl NamespacePattern {
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };
        let chars: Vec<char> = pattern.chars().collect();
        let mut tokens: Vec<Token> = Default::default();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' => {
                    // Consecutive stars are equivalent to one.
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyChar);
                    i += 1;
                }
                '[' => {
                    let mut j = i + 1;
                    let negated = j < chars.len() && (chars[j] == '!' || chars[j] == '^');
                    if negated {
                        j += 1;
                    }
                    // A `]` directly after the opening bracket is a literal member.
                    let first = j;
                    let mut ranges: Vec<(char, char)> = Default::default();
                    loop {
                        if j >= chars.len() {
                            return Err(invalid("unclosed character class"));
                        }
                        let c = chars[j];
                        if c == ']' && j > first {
                            break;
                        }
                        if j + 2 < chars.len() && chars[j + 1] == '-' && chars[j + 2] != ']' {
                            let hi = chars[j + 2];
                            if hi < c {
                                return Err(invalid("reversed character range"));
                            }
                            ranges.push((c, hi));
                            j += 3;
                        } else {
                            ranges.push((c, c));
                            j += 1;
                        }
                    }
                    tokens.push(Token::Class { negated, ranges });
                    i = j + 1;
                }
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }
        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        self.source.as_str()
    }

    /// `true` if the pattern matches exactly one namespace.
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    pub fn matches(&self, namespace: &str) -> bool {
        let text: Vec<char> = namespace.chars().collect();
        let tokens = self.tokens.as_slice();
        let (mut t, mut s) = (0usize, 0usize);
        // Position of the last `*` and the text offset it currently absorbs up to.
        let mut backtrack: Option<(usize, usize)> = None;
        while s < text.len() {
            if t < tokens.len() {
                if tokens[t] == Token::AnyRun {
                    backtrack = Some((t, s));
                    t += 1;
                    continue;
                }
                if tokens[t].matches_char(text[s]) {
                    t += 1;
                    s += 1;
                    continue;
                }
            }
            match backtrack {
                Some((star, absorbed)) => {
                    t = star + 1;
                    s = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            }
        }
        tokens[t..].iter().all(|v| *v == Token::AnyRun)
    }
}

/// Decides whether events of a namespace are of interest to a
/// [`WatchSession`](crate::session::WatchSession).
///
/// An empty filter is unrestricted. So is any pattern list containing `*`
/// or the empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceFilter {
    patterns: Vec<NamespacePattern>,
}

impl NamespaceFilter {
    pub fn all() -> Self {
        Default::default()
    }

    /// Compile `patterns`, failing on the first malformed one.
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled: Vec<NamespacePattern> = Default::default();
        let mut unrestricted = false;
        for p in patterns {
            let p = p.as_ref().trim();
            if p.is_empty() || p == "*" {
                unrestricted = true;
                continue;
            }
            let pattern = NamespacePattern::parse(p)?;
            if !compiled.contains(&pattern) {
                compiled.push(pattern);
            }
        }
        if unrestricted {
            compiled.clear();
        }
        Ok(Self { patterns: compiled })
    }

    pub fn is_unrestricted(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, namespace: &str) -> bool {
        self.is_unrestricted() || self.patterns.iter().any(|p| p.matches(namespace))
    }

    /// The namespace to list and watch directly, if the filter is exactly
    /// one literal namespace name.
    pub fn single_namespace(&self) -> Option<&str> {
        match self.patterns.as_slice() {
            [p] if p.is_literal() => Some(p.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for NamespaceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unrestricted() {
            write!(f, "*")
        } else {
            let patterns: Vec<&str> = self.patterns.iter().map(|p| p.as_str()).collect();
            write!(f, "{}", patterns.join(","))
        }
    }
}

/// `true` if `namespace` is selected by `filter`, no filter selects everything.
pub fn matches(namespace: &str, filter: Option<&NamespaceFilter>) -> bool {
    filter.map_or(true, |f| f.matches(namespace))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(patterns: &[&str]) -> NamespaceFilter {
        NamespaceFilter::new(patterns).unwrap()
    }

    #[test]
    fn unrestricted() {
        assert!(matches("anything", None));
        assert!(filter(&[]).matches("anything"));
        assert!(filter(&["*"]).is_unrestricted());
        assert!(filter(&["team-a", ""]).is_unrestricted());
        assert!(filter(&["team-a", "*"]).matches("kube-system"));
        assert_eq!("*", filter(&[]).to_string());
    }

    #[test]
    fn wildcards() {
        let f = filter(&["team-*", "dev?"]);
        assert!(f.matches("team-a"));
        assert!(f.matches("team-"));
        assert!(f.matches("dev1"));
        assert!(!f.matches("dev"));
        assert!(!f.matches("dev12"));
        assert!(!f.matches("prod"));
        assert!(matches("team-b", Some(&f)));
        assert_eq!("team-*,dev?", f.to_string());
    }

    #[test]
    fn star_backtracking() {
        let f = filter(&["*-a*-z"]);
        assert!(f.matches("x-ab-a-z"));
        assert!(f.matches("-a-z"));
        assert!(!f.matches("x-ab-a-y"));
        let f = filter(&["a**b"]);
        assert!(f.matches("ab"));
        assert!(f.matches("axxb"));
        assert!(!f.matches("axxc"));
    }

    #[test]
    fn classes() {
        let f = filter(&["ns[0-9]", "[!a-m]x", "[]]y"]);
        assert!(f.matches("ns7"));
        assert!(!f.matches("nsa"));
        assert!(f.matches("zx"));
        assert!(!f.matches("cx"));
        assert!(f.matches("]y"));
    }

    #[test]
    fn malformed_patterns_fail_fast() {
        for p in ["ns[0-9", "[z-a]", "[]", "[!"] {
            match NamespaceFilter::new([p]) {
                Err(ConfigError::InvalidPattern { pattern, .. }) => assert_eq!(p, pattern),
                other => panic!("expected error for {}: {:?}", p, other),
            }
        }
        // Also when another pattern makes the filter unrestricted.
        assert!(NamespaceFilter::new(["*", "[a"]).is_err());
    }

    #[test]
    fn single_namespace() {
        assert_eq!(Some("ns1"), filter(&["ns1"]).single_namespace());
        assert_eq!(Some("ns1"), filter(&["ns1", " ns1 "]).single_namespace());
        assert_eq!(None, filter(&["ns*"]).single_namespace());
        assert_eq!(None, filter(&["ns1", "ns2"]).single_namespace());
        assert_eq!(None, filter(&[]).single_namespace());
        assert_eq!(None, filter(&["ns1", "*"]).single_namespace());
    }
}
