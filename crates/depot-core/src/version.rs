//! Package version ordering and dependency constraints.
//!
//! Versions are `[epoch:]pkgver[-pkgrel]` strings compared segment-wise:
//! runs of digits compare numerically, runs of letters lexically, and a
//! numeric segment always orders after an alphabetic one. This is the
//! ordering package tooling expects from `vercmp`; it is not semver.

use std::{cmp::Ordering, fmt, str::FromStr};

use miette::Diagnostic;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Diagnostic, Debug, PartialEq, Eq)]
pub enum DependencyError {
    #[error("Dependency specification is empty")]
    #[diagnostic(code(depot_core::dependency::empty))]
    Empty,

    #[error("`{0}` is not a valid package name")]
    #[diagnostic(
        code(depot_core::dependency::name),
        help("Names may contain lowercase letters, digits and `@ . _ + -`")
    )]
    InvalidName(String),

    #[error("`{0}` has an operator but no version")]
    #[diagnostic(code(depot_core::dependency::version))]
    MissingVersion(String),

    #[error("`{input}` contains an invalid version `{version}`")]
    #[diagnostic(code(depot_core::dependency::version))]
    InvalidVersion { input: String, version: String },
}

/// Checks a package name against the allowed charset.
///
/// Names may contain lowercase ASCII letters, digits and `@ . _ + -`,
/// and must not start with `-` or `.`.
pub fn valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(['-', '.'])
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '@' | '.' | '_' | '+' | '-'))
}

/// Checks a version string for well-formedness.
pub fn valid_version(version: &str) -> bool {
    !version.is_empty() && version.chars().all(|c| c.is_ascii_graphic() && c != '/')
}

/// Segment-wise comparison of two plain version fragments.
pub fn vercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut one = 0;
    let mut two = 0;

    while one < a.len() && two < b.len() {
        let sep_start1 = one;
        let sep_start2 = two;
        while one < a.len() && !a[one].is_ascii_alphanumeric() {
            one += 1;
        }
        while two < b.len() && !b[two].is_ascii_alphanumeric() {
            two += 1;
        }
        if one == a.len() || two == b.len() {
            break;
        }
        // unequal separator runs order before segment content
        if one - sep_start1 != two - sep_start2 {
            return if one - sep_start1 < two - sep_start2 {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        let isnum = a[one].is_ascii_digit();
        let mut end1 = one;
        let mut end2 = two;
        if isnum {
            while end1 < a.len() && a[end1].is_ascii_digit() {
                end1 += 1;
            }
            while end2 < b.len() && b[end2].is_ascii_digit() {
                end2 += 1;
            }
        } else {
            while end1 < a.len() && a[end1].is_ascii_alphabetic() {
                end1 += 1;
            }
            while end2 < b.len() && b[end2].is_ascii_alphabetic() {
                end2 += 1;
            }
        }

        // segment types differ: numeric segments are always newer
        if end2 == two {
            return if isnum { Ordering::Greater } else { Ordering::Less };
        }

        let mut seg1 = &a[one..end1];
        let mut seg2 = &b[two..end2];
        if isnum {
            while seg1.first() == Some(&b'0') {
                seg1 = &seg1[1..];
            }
            while seg2.first() == Some(&b'0') {
                seg2 = &seg2[1..];
            }
            // more digits wins outright
            match seg1.len().cmp(&seg2.len()) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        match seg1.cmp(seg2) {
            Ordering::Equal => {}
            other => return other,
        }

        one = end1;
        two = end2;
    }

    if one == a.len() && two == b.len() {
        return Ordering::Equal;
    }

    // a remaining alphabetic tail never beats an empty one
    if (one == a.len() && !(two < b.len() && b[two].is_ascii_alphabetic()))
        || (one < a.len() && a[one].is_ascii_alphabetic())
    {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

fn split_version(version: &str) -> (&str, &str, Option<&str>) {
    let (epoch, rest) = match version.split_once(':') {
        Some((epoch, rest)) if !epoch.is_empty() && epoch.bytes().all(|b| b.is_ascii_digit()) => {
            (epoch, rest)
        }
        _ => ("0", version),
    };
    match rest.rsplit_once('-') {
        Some((pkgver, pkgrel)) => (epoch, pkgver, Some(pkgrel)),
        None => (epoch, rest, None),
    }
}

/// Full `[epoch:]pkgver[-pkgrel]` comparison.
///
/// The epoch dominates, then the version, then the release; the release
/// is only compared when both sides carry one.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (epoch_a, ver_a, rel_a) = split_version(a);
    let (epoch_b, ver_b, rel_b) = split_version(b);

    vercmp(epoch_a, epoch_b)
        .then_with(|| vercmp(ver_a, ver_b))
        .then_with(|| {
            match (rel_a, rel_b) {
                (Some(rel_a), Some(rel_b)) => vercmp(rel_a, rel_b),
                _ => Ordering::Equal,
            }
        })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl ConstraintOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintOp::Lt => "<",
            ConstraintOp::Le => "<=",
            ConstraintOp::Eq => "=",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Gt => ">",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            ConstraintOp::Lt => ordering == Ordering::Less,
            ConstraintOp::Le => ordering != Ordering::Greater,
            ConstraintOp::Eq => ordering == Ordering::Equal,
            ConstraintOp::Ge => ordering != Ordering::Less,
            ConstraintOp::Gt => ordering == Ordering::Greater,
        }
    }
}

/// A declared dependency: a package name with an optional version bound.
///
/// Textual form is `name`, `name>=1.2`, `name=2:1.0-3` and so on, as
/// found in archive manifests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub constraint: Option<(ConstraintOp, String)>,
}

impl Dependency {
    pub fn unversioned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
        }
    }

    /// Whether the given version satisfies this dependency.
    pub fn matches(&self, version: &str) -> bool {
        match &self.constraint {
            None => true,
            Some((op, bound)) => op.accepts(compare_versions(version, bound)),
        }
    }
}

impl FromStr for Dependency {
    type Err = DependencyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DependencyError::Empty);
        }

        for (pattern, op) in [
            (">=", ConstraintOp::Ge),
            ("<=", ConstraintOp::Le),
            (">", ConstraintOp::Gt),
            ("<", ConstraintOp::Lt),
            ("=", ConstraintOp::Eq),
        ] {
            if let Some(idx) = input.find(pattern) {
                let name = &input[..idx];
                let version = &input[idx + pattern.len()..];
                if !valid_package_name(name) {
                    return Err(DependencyError::InvalidName(name.to_string()));
                }
                if version.is_empty() {
                    return Err(DependencyError::MissingVersion(input.to_string()));
                }
                if !valid_version(version) {
                    return Err(DependencyError::InvalidVersion {
                        input: input.to_string(),
                        version: version.to_string(),
                    });
                }
                return Ok(Dependency {
                    name: name.to_string(),
                    constraint: Some((op, version.to_string())),
                });
            }
        }

        if !valid_package_name(input) {
            return Err(DependencyError::InvalidName(input.to_string()));
        }
        Ok(Dependency::unversioned(input))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            None => write!(f, "{}", self.name),
            Some((op, version)) => write!(f, "{}{}{}", self.name, op.as_str(), version),
        }
    }
}

impl Serialize for Dependency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Dependency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_order(a: &str, b: &str, expected: Ordering) {
        assert_eq!(compare_versions(a, b), expected, "{a} vs {b}");
        assert_eq!(compare_versions(b, a), expected.reverse(), "{b} vs {a}");
    }

    #[test]
    fn test_vercmp_basic() {
        assert_order("1.0", "1.0", Ordering::Equal);
        assert_order("1.0", "1.0.1", Ordering::Less);
        assert_order("1.0.1", "1.1", Ordering::Less);
        assert_order("12", "2", Ordering::Greater);
        assert_order("1.10", "1.9", Ordering::Greater);
    }

    #[test]
    fn test_vercmp_alpha_segments() {
        assert_order("1.0a", "1.0b", Ordering::Less);
        assert_order("1.0a", "1.0", Ordering::Less);
        assert_order("1.0rc1", "1.0", Ordering::Less);
        assert_order("1.0.1", "1.0a", Ordering::Greater);
        assert_order("a", "1", Ordering::Less);
    }

    #[test]
    fn test_vercmp_leading_zeros() {
        assert_order("1.001", "1.1", Ordering::Equal);
        assert_order("1.010", "1.10", Ordering::Equal);
    }

    #[test]
    fn test_compare_versions_release() {
        assert_order("1.0-1", "1.0-2", Ordering::Less);
        assert_order("1.0-10", "1.0-2", Ordering::Greater);
        // release ignored when one side has none
        assert_order("1.0", "1.0-5", Ordering::Equal);
    }

    #[test]
    fn test_compare_versions_epoch() {
        assert_order("1:0.5", "2.0", Ordering::Greater);
        assert_order("1:1.0", "2:0.1", Ordering::Less);
        assert_order("0:2.0", "2.0", Ordering::Equal);
    }

    #[test]
    fn test_dependency_parse_bare() {
        let dep: Dependency = "glibc".parse().unwrap();
        assert_eq!(dep.name, "glibc");
        assert!(dep.constraint.is_none());
        assert!(dep.matches("0.1"));
    }

    #[test]
    fn test_dependency_parse_constrained() {
        let dep: Dependency = "glibc>=2.27".parse().unwrap();
        assert_eq!(dep.name, "glibc");
        assert_eq!(
            dep.constraint,
            Some((ConstraintOp::Ge, "2.27".to_string()))
        );
        assert!(dep.matches("2.27"));
        assert!(dep.matches("2.30"));
        assert!(!dep.matches("2.26"));
    }

    #[test]
    fn test_dependency_parse_exact_with_release() {
        let dep: Dependency = "zlib=1:1.2-3".parse().unwrap();
        assert!(dep.matches("1:1.2-3"));
        assert!(!dep.matches("1:1.2-4"));
    }

    #[test]
    fn test_dependency_parse_errors() {
        assert_eq!("".parse::<Dependency>(), Err(DependencyError::Empty));
        assert!(matches!(
            "GLIBC".parse::<Dependency>(),
            Err(DependencyError::InvalidName(_))
        ));
        assert!(matches!(
            "glibc>=".parse::<Dependency>(),
            Err(DependencyError::MissingVersion(_))
        ));
        assert!(matches!(
            "-bad".parse::<Dependency>(),
            Err(DependencyError::InvalidName(_))
        ));
    }

    #[test]
    fn test_dependency_display_roundtrip() {
        for text in ["glibc", "glibc>=2.27", "zlib<2", "curl=8.0.1-1"] {
            let dep: Dependency = text.parse().unwrap();
            assert_eq!(dep.to_string(), text);
        }
    }

    #[test]
    fn test_dependency_serde_as_string() {
        let deps: Vec<Dependency> = serde_json::from_str(r#"["a", "b>=1.0"]"#).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(serde_json::to_string(&deps).unwrap(), r#"["a","b>=1.0"]"#);
    }

    #[test]
    fn test_valid_package_name() {
        assert!(valid_package_name("gcc-libs"));
        assert!(valid_package_name("libc++"));
        assert!(valid_package_name("java@17"));
        assert!(!valid_package_name(""));
        assert!(!valid_package_name("-dash"));
        assert!(!valid_package_name(".hidden"));
        assert!(!valid_package_name("Upper"));
        assert!(!valid_package_name("has space"));
    }
}
