use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;

pub const SNAPSHOT_QUALIFIER: &str = "-SNAPSHOT";
pub const RELEASE_VERSION: &str = "RELEASE";
pub const LATEST_VERSION: &str = "LATEST";

lazy_static! {
    /// `-<yyyyMMdd>.<HHmmss>-<build number>` at the end of a deployed snapshot version
    static ref TIMESTAMP_SUFFIX_REGEX: Regex = Regex::new(r"-\d{8}\.\d{6}-\d+$").unwrap();
}

/// Quality tier of a version string. The declaration order is the order used by
///  [`QualityRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// ends in `-SNAPSHOT`
    Snapshot,
    /// ends in a deployment timestamp and build number, e.g. `1.0-20090101.120000-3`
    SnapshotTs,
    Release,
}
pub fn classify(version: &str) -> Quality {
    if version.ends_with(SNAPSHOT_QUALIFIER) {
        Quality::Snapshot
    }
    else if TIMESTAMP_SUFFIX_REGEX.is_match(version) {
        Quality::SnapshotTs
    }
    else {
        Quality::Release
    }
}

/// The version with any snapshot qualifier stripped, e.g. `1.0` for both `1.0-SNAPSHOT` and
///  `1.0-20090101.120000-3`.
pub fn base(version: &str) -> &str {
    if let Some(stripped) = version.strip_suffix(SNAPSHOT_QUALIFIER) {
        return stripped;
    }
    match TIMESTAMP_SUFFIX_REGEX.find(version) {
        Some(m) => &version[..m.start()],
        None => version,
    }
}

/// Inclusive range of accepted qualities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityRange {
    pub min: Quality,
    pub max: Quality,
}
impl QualityRange {
    pub const ALL: QualityRange = QualityRange { min: Quality::Snapshot, max: Quality::Release };
    pub const RELEASES_ONLY: QualityRange = QualityRange { min: Quality::Release, max: Quality::Release };
    pub const SNAPSHOTS_ONLY: QualityRange = QualityRange { min: Quality::Snapshot, max: Quality::SnapshotTs };

    pub fn accepts(&self, quality: Quality) -> bool {
        self.min <= quality && quality <= self.max
    }
}
impl Default for QualityRange {
    fn default() -> Self {
        QualityRange::ALL
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Item<'a> {
    /// digits with leading zeros removed
    Number(&'a str),
    Qualifier(String),
}

fn qualifier_rank(qualifier: &str) -> (u8, &str) {
    match qualifier {
        "alpha" | "a" => (0, ""),
        "beta" | "b" => (1, ""),
        "milestone" | "m" => (2, ""),
        "rc" | "cr" => (3, ""),
        "snapshot" => (4, ""),
        "" | "ga" | "final" | "release" => (5, ""),
        "sp" => (6, ""),
        other => (7, other),
    }
}

fn parse_items(version: &str) -> Vec<Item<'_>> {
    let mut result = Vec::new();
    for segment in version.split(|c| c == '.' || c == '-') {
        let mut start = 0;
        let bytes = segment.as_bytes();
        for i in 1..=bytes.len() {
            let boundary = i == bytes.len() || bytes[i].is_ascii_digit() != bytes[i - 1].is_ascii_digit();
            if boundary {
                let token = &segment[start..i];
                if token.as_bytes()[0].is_ascii_digit() {
                    let trimmed = token.trim_start_matches('0');
                    result.push(Item::Number(trimmed));
                }
                else {
                    result.push(Item::Qualifier(token.to_ascii_lowercase()));
                }
                start = i;
            }
        }
    }

    // trailing zeros and release markers do not change a version's meaning
    while let Some(last) = result.last() {
        let is_null = match last {
            Item::Number(n) => n.is_empty(),
            Item::Qualifier(q) => qualifier_rank(q).0 == 5,
        };
        if is_null && result.len() > 1 {
            result.pop();
        }
        else {
            break;
        }
    }
    result
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_items(a: Option<&Item>, b: Option<&Item>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(Item::Number(n)), None) => compare_numbers(n, ""),
        (None, Some(Item::Number(n))) => compare_numbers("", n),
        (Some(Item::Qualifier(q)), None) => qualifier_rank(q).cmp(&qualifier_rank("")),
        (None, Some(Item::Qualifier(q))) => qualifier_rank("").cmp(&qualifier_rank(q)),
        (Some(Item::Number(x)), Some(Item::Number(y))) => compare_numbers(x, y),
        (Some(Item::Number(_)), Some(Item::Qualifier(_))) => Ordering::Greater,
        (Some(Item::Qualifier(_)), Some(Item::Number(_))) => Ordering::Less,
        (Some(Item::Qualifier(x)), Some(Item::Qualifier(y))) => qualifier_rank(x).cmp(&qualifier_rank(y)),
    }
}

/// Total order over version strings. Versions that are equivalent item by item (e.g. `1.0` and
///  `1`) are ordered by their plain string representation.
pub fn compare(a: &str, b: &str) -> Ordering {
    let items_a = parse_items(a);
    let items_b = parse_items(b);

    let len = items_a.len().max(items_b.len());
    for i in 0..len {
        let ordering = compare_items(items_a.get(i), items_b.get(i));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.cmp(b)
}

/// Picks the greatest version from a sequence in a single pass
pub fn max_version<I, S>(versions: I) -> Option<S>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    versions.into_iter().fold(None, |max, candidate| match max {
        Some(current) if compare(candidate.as_ref(), current.as_ref()) != Ordering::Greater => Some(current),
        _ => Some(candidate),
    })
}

/// A version string ordered by [`compare`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComparableVersion(pub String);
impl Ord for ComparableVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.0, &other.0)
    }
}
impl PartialOrd for ComparableVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Display for ComparableVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
impl From<&str> for ComparableVersion {
    fn from(value: &str) -> Self {
        ComparableVersion(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: String,
    inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Restriction {
    Any { releases_only: bool },
    Exact(String),
    Range { lower: Option<Bound>, upper: Option<Bound> },
}
impl Restriction {
    fn includes(&self, version: &str) -> bool {
        match self {
            Restriction::Any { releases_only } => !releases_only || classify(version) == Quality::Release,
            Restriction::Exact(v) => v == version,
            Restriction::Range { lower, upper } => {
                let lower_ok = match lower {
                    None => true,
                    Some(b) => match compare(version, &b.version) {
                        Ordering::Greater => true,
                        Ordering::Equal => b.inclusive,
                        Ordering::Less => false,
                    },
                };
                let upper_ok = match upper {
                    None => true,
                    Some(b) => match compare(version, &b.version) {
                        Ordering::Less => true,
                        Ordering::Equal => b.inclusive,
                        Ordering::Greater => false,
                    },
                };
                lower_ok && upper_ok
            }
        }
    }
}

/// Predicate over version strings, built from a requested version (`LATEST`, `RELEASE`, an exact
///  version or a Maven range like `[1.0,2.0)`) and an accepted quality range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    restrictions: Vec<Restriction>,
    quality_range: QualityRange,
}
impl VersionRange {
    pub fn parse(requested: &str, quality_range: QualityRange) -> Result<VersionRange, RepositoryError> {
        let trimmed = requested.trim();
        let invalid = |reason: &str| RepositoryError::VersionRange {
            range: requested.to_string(),
            reason: reason.to_string(),
        };

        let restrictions = match trimmed {
            "" | "*" | LATEST_VERSION => vec![Restriction::Any { releases_only: false }],
            RELEASE_VERSION => vec![Restriction::Any { releases_only: true }],
            s if !s.starts_with('[') && !s.starts_with('(') => {
                if s.contains(|c| c == '[' || c == ']' || c == '(' || c == ')' || c == ',') {
                    return Err(invalid("unexpected range delimiter"));
                }
                vec![Restriction::Exact(s.to_string())]
            }
            s => {
                let mut restrictions = Vec::new();
                let mut rest = s;
                while !rest.is_empty() {
                    let lower_inclusive = match rest.as_bytes()[0] {
                        b'[' => true,
                        b'(' => false,
                        _ => return Err(invalid("expected '[' or '('")),
                    };
                    let close = rest.find(|c| c == ']' || c == ')')
                        .ok_or_else(|| invalid("unterminated range"))?;
                    let upper_inclusive = rest.as_bytes()[close] == b']';
                    let body = &rest[1..close];

                    restrictions.push(match body.split_once(',') {
                        None => {
                            if !(lower_inclusive && upper_inclusive) || body.trim().is_empty() {
                                return Err(invalid("a single version must be enclosed in '[' and ']'"));
                            }
                            Restriction::Exact(body.trim().to_string())
                        }
                        Some((lower, upper)) => {
                            let lower = lower.trim();
                            let upper = upper.trim();
                            if upper.contains(',') {
                                return Err(invalid("more than two bounds"));
                            }
                            Restriction::Range {
                                lower: (!lower.is_empty()).then(|| Bound { version: lower.to_string(), inclusive: lower_inclusive }),
                                upper: (!upper.is_empty()).then(|| Bound { version: upper.to_string(), inclusive: upper_inclusive }),
                            }
                        }
                    });

                    rest = rest[close + 1..].trim_start();
                    if let Some(r) = rest.strip_prefix(',') {
                        rest = r.trim_start();
                        if rest.is_empty() {
                            return Err(invalid("trailing ','"));
                        }
                    }
                    else if !rest.is_empty() {
                        return Err(invalid("ranges must be separated by ','"));
                    }
                }
                restrictions
            }
        };

        Ok(VersionRange { restrictions, quality_range })
    }

    pub fn includes(&self, version: &str) -> bool {
        self.quality_range.accepts(classify(version))
            && self.restrictions.iter().any(|r| r.includes(version))
    }
}
