//! npm-style semantic versions and ranges.
//!
//! Supports the range grammar package manifests use: comparators
//! (`<`, `<=`, `>`, `>=`, `=`), caret and tilde ranges, x-ranges
//! (`1.x`, `1.2.*`, `*`), hyphen ranges (`1.0.0 - 2.0.0`) and `||` unions.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            (Identifier::Numeric(_), Identifier::Alpha(_)) => Ordering::Less,
            (Identifier::Alpha(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::Alpha(a), Identifier::Alpha(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A `major.minor.patch[-pre][+build]` version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pre: Vec<Identifier>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
        }
    }

    /// The lowest pre-release of this version (`x.y.z-0`).
    fn floor(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: vec![Identifier::Numeric(0)],
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// Parse a full version; a leading `v` or `=` is accepted.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        let s = s.strip_prefix('=').unwrap_or(s).trim_start();
        let s = s.strip_prefix('v').unwrap_or(s);
        let s = s.split('+').next()?;
        let (core, pre) = match s.split_once('-') {
            Some((c, p)) => (c, Some(p)),
            None => (s, None),
        };

        let nums: Vec<&str> = core.split('.').collect();
        if nums.len() != 3 {
            return None;
        }
        let major = parse_number(nums[0])?;
        let minor = parse_number(nums[1])?;
        let patch = parse_number(nums[2])?;
        let pre = match pre {
            Some(p) => parse_prerelease(p)?,
            None => Vec::new(),
        };

        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    fn bump_patch(&self) -> Option<Self> {
        Some(Self::new(self.major, self.minor, self.patch.checked_add(1)?))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            let parts: Vec<String> = self
                .pre
                .iter()
                .map(|i| match i {
                    Identifier::Numeric(n) => n.to_string(),
                    Identifier::Alpha(s) => s.clone(),
                })
                .collect();
            write!(f, "-{}", parts.join("."))?;
        }
        Ok(())
    }
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

fn parse_prerelease(s: &str) -> Option<Vec<Identifier>> {
    s.split('.')
        .map(|part| {
            if part.is_empty()
                || !part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
            {
                return None;
            }
            if part.chars().all(|c| c.is_ascii_digit()) {
                parse_number(part).map(Identifier::Numeric)
            } else {
                Some(Identifier::Alpha(part.to_string()))
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    fn test(&self, v: &Version) -> bool {
        match self.op {
            Op::Lt => v < &self.version,
            Op::Le => v <= &self.version,
            Op::Gt => v > &self.version,
            Op::Ge => v >= &self.version,
            Op::Eq => v == &self.version,
        }
    }
}

/// A partially specified version such as `1`, `1.2` or `1.x`.
#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Vec<Identifier>,
}

impl Partial {
    fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        let s = s.split('+').next()?;
        let (core, pre) = match s.split_once('-') {
            Some((c, p)) => (c, Some(p)),
            None => (s, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return None;
        }
        let mut nums = [None; 3];
        let mut wildcard = false;
        for (i, part) in parts.iter().enumerate() {
            if matches!(*part, "x" | "X" | "*") {
                wildcard = true;
                continue;
            }
            if wildcard {
                // `1.x.3` is not a valid x-range
                return None;
            }
            nums[i] = Some(parse_number(part)?);
        }

        let pre = match pre {
            Some(p) if nums[2].is_some() => parse_prerelease(p)?,
            Some(_) => return None,
            None => Vec::new(),
        };

        Some(Self {
            major: nums[0],
            minor: nums[1],
            patch: nums[2],
            pre,
        })
    }

    fn lower(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre: self.pre.clone(),
        }
    }

    fn is_full(&self) -> bool {
        self.patch.is_some()
    }
}

/// A union of comparator sets; a version matches when every comparator of
/// at least one set accepts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    sets: Vec<Vec<Comparator>>,
}

impl Range {
    pub fn parse(input: &str) -> Option<Self> {
        let mut sets = Vec::new();
        for part in input.split("||") {
            sets.push(parse_set(part.trim())?);
        }
        if sets.is_empty() {
            return None;
        }
        Some(Self { sets })
    }

    /// Standard satisfaction: a pre-release only matches a set that names
    /// a pre-release of the same `major.minor.patch`.
    pub fn satisfies(&self, v: &Version) -> bool {
        self.sets.iter().any(|set| {
            if !set.iter().all(|c| c.test(v)) {
                return false;
            }
            if !v.is_prerelease() {
                return true;
            }
            set.iter().any(|c| {
                c.version.is_prerelease()
                    && c.version.major == v.major
                    && c.version.minor == v.minor
                    && c.version.patch == v.patch
            })
        })
    }

    /// Lowest version that satisfies the range, ignoring pre-release rules.
    pub fn min_version(&self) -> Option<Version> {
        self.sets
            .iter()
            .filter_map(|set| {
                let mut candidate = Version::new(0, 0, 0);
                for c in set {
                    let bound = match c.op {
                        Op::Ge | Op::Eq => c.version.clone(),
                        Op::Gt if c.version.is_prerelease() => {
                            let mut v = c.version.clone();
                            v.pre.push(Identifier::Numeric(0));
                            v
                        }
                        Op::Gt => c.version.bump_patch()?,
                        Op::Lt | Op::Le => continue,
                    };
                    if bound > candidate {
                        candidate = bound;
                    }
                }
                set.iter().all(|c| c.test(&candidate)).then_some(candidate)
            })
            .min()
    }

    /// Whether some version satisfies both ranges.
    pub fn intersects(&self, other: &Range) -> bool {
        self.sets.iter().any(|a| {
            other.sets.iter().any(|b| {
                let (Some(ia), Some(ib)) = (Interval::of(a), Interval::of(b)) else {
                    return false;
                };
                ia.intersect(&ib).is_some()
            })
        })
    }
}

fn parse_set(input: &str) -> Option<Vec<Comparator>> {
    if input.is_empty() {
        return Some(Vec::new());
    }

    if let Some((lo, hi)) = input.split_once(" - ") {
        let lo = Partial::parse(lo)?;
        let hi = Partial::parse(hi)?;
        let mut set = vec![Comparator::new(Op::Ge, lo.lower())];
        set.extend(upper_inclusive(&hi)?);
        return Some(set);
    }

    let mut set = Vec::new();
    for token in tokenize(input) {
        set.extend(parse_comparator(&token)?);
    }
    Some(set)
}

/// Split on whitespace, joining an operator with a following version
/// (`>= 1.2.3` becomes `>=1.2.3`).
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op = false;
    for word in input.split_whitespace() {
        if pending_op {
            if let Some(last) = tokens.last_mut() {
                last.push_str(word);
            }
        } else {
            tokens.push(word.to_string());
        }
        pending_op = word
            .chars()
            .all(|c| matches!(c, '<' | '>' | '=' | '^' | '~'));
    }
    tokens
}

fn parse_comparator(token: &str) -> Option<Vec<Comparator>> {
    let (op, rest) = split_operator(token);
    let p = Partial::parse(rest)?;

    let Some(major) = p.major else {
        // `*`, `x`, `>=*`: anything; `<*`, `>*`: nothing
        return Some(match op {
            "<" | ">" => vec![Comparator::new(Op::Lt, Version::floor(0, 0, 0))],
            _ => Vec::new(),
        });
    };

    let set = match op {
        "^" => {
            let lower = Comparator::new(Op::Ge, p.lower());
            let upper = match (p.minor, p.patch) {
                (None, _) => Version::floor(next(major)?, 0, 0),
                (Some(_), _) if major > 0 => Version::floor(next(major)?, 0, 0),
                (Some(minor), None) => Version::floor(0, next(minor)?, 0),
                (Some(minor), Some(_)) if minor > 0 => Version::floor(0, next(minor)?, 0),
                (Some(_), Some(patch)) => Version::floor(0, 0, next(patch)?),
            };
            vec![lower, Comparator::new(Op::Lt, upper)]
        }
        "~" | "~>" => {
            let lower = Comparator::new(Op::Ge, p.lower());
            let upper = match p.minor {
                None => Version::floor(next(major)?, 0, 0),
                Some(minor) => Version::floor(major, next(minor)?, 0),
            };
            vec![lower, Comparator::new(Op::Lt, upper)]
        }
        ">=" => vec![Comparator::new(Op::Ge, p.lower())],
        ">" => match (p.minor, p.patch) {
            (None, _) => vec![Comparator::new(Op::Ge, Version::new(next(major)?, 0, 0))],
            (Some(minor), None) => {
                vec![Comparator::new(Op::Ge, Version::new(major, next(minor)?, 0))]
            }
            _ => vec![Comparator::new(Op::Gt, p.lower())],
        },
        "<" => {
            if p.is_full() {
                vec![Comparator::new(Op::Lt, p.lower())]
            } else {
                vec![Comparator::new(
                    Op::Lt,
                    Version::floor(major, p.minor.unwrap_or(0), 0),
                )]
            }
        }
        "<=" => upper_inclusive(&p)?,
        "" | "=" => {
            if p.is_full() {
                vec![Comparator::new(Op::Eq, p.lower())]
            } else {
                let mut set = vec![Comparator::new(Op::Ge, p.lower())];
                set.extend(upper_inclusive(&p)?);
                set
            }
        }
        _ => return None,
    };
    Some(set)
}

/// `<=` semantics for a partial: `<=1.2` means below 1.3.0.
fn upper_inclusive(p: &Partial) -> Option<Vec<Comparator>> {
    Some(match (p.major, p.minor, p.patch) {
        (None, _, _) => Vec::new(),
        (Some(major), None, _) => vec![Comparator::new(Op::Lt, Version::floor(next(major)?, 0, 0))],
        (Some(major), Some(minor), None) => {
            vec![Comparator::new(Op::Lt, Version::floor(major, next(minor)?, 0))]
        }
        (Some(_), Some(_), Some(_)) => vec![Comparator::new(Op::Le, p.lower())],
    })
}

/// The next component value; `None` when it would not fit, which makes the
/// range unparseable.
fn next(n: u64) -> Option<u64> {
    n.checked_add(1)
}

fn split_operator(token: &str) -> (&str, &str) {
    for op in ["<=", ">=", "~>", "<", ">", "=", "^", "~"] {
        if let Some(rest) = token.strip_prefix(op) {
            return (op, rest);
        }
    }
    ("", token)
}

#[derive(Debug, Clone)]
struct Bound {
    version: Version,
    inclusive: bool,
}

/// The contiguous span a comparator set accepts.
#[derive(Debug, Clone)]
struct Interval {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl Interval {
    fn of(set: &[Comparator]) -> Option<Self> {
        let mut interval = Interval {
            lower: None,
            upper: None,
        };
        for c in set {
            let bound = |inclusive| Bound {
                version: c.version.clone(),
                inclusive,
            };
            let single = match c.op {
                Op::Ge => Interval { lower: Some(bound(true)), upper: None },
                Op::Gt => Interval { lower: Some(bound(false)), upper: None },
                Op::Le => Interval { lower: None, upper: Some(bound(true)) },
                Op::Lt => Interval { lower: None, upper: Some(bound(false)) },
                Op::Eq => Interval {
                    lower: Some(bound(true)),
                    upper: Some(bound(true)),
                },
            };
            interval = interval.intersect(&single)?;
        }
        Some(interval)
    }

    fn intersect(&self, other: &Interval) -> Option<Interval> {
        let lower = pick(&self.lower, &other.lower, |a, b| match a.version.cmp(&b.version) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => !a.inclusive,
        });
        let upper = pick(&self.upper, &other.upper, |a, b| match a.version.cmp(&b.version) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => !a.inclusive,
        });

        if let (Some(lo), Some(hi)) = (&lower, &upper) {
            match lo.version.cmp(&hi.version) {
                Ordering::Greater => return None,
                Ordering::Equal if !(lo.inclusive && hi.inclusive) => return None,
                _ => {}
            }
        }
        Some(Interval { lower, upper })
    }
}

/// Choose the tighter of two optional bounds; `prefer_a` says whether `a`
/// is tighter than `b`.
fn pick(a: &Option<Bound>, b: &Option<Bound>, prefer_a: impl Fn(&Bound, &Bound) -> bool) -> Option<Bound> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if prefer_a(a, b) { a.clone() } else { b.clone() }),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

/// Whether an installed version or range meets a required version or range.
///
/// - version vs version: `installed >= required`
/// - version vs range: range satisfaction; a pre-release install is
///   compared against the range's minimum version instead
/// - range vs version: the installed range reaches `>= required`
/// - range vs range: the ranges intersect
///
/// Empty input on either side passes. Unparseable input fails.
pub fn semver_valid(installed: &str, required: &str) -> bool {
    let installed = installed.trim();
    let required = required.trim();
    if installed.is_empty() || required.is_empty() {
        return true;
    }

    let result = match (Version::parse(installed), Version::parse(required)) {
        (Some(i), Some(r)) => Some(i >= r),
        (Some(i), None) => Range::parse(required).map(|range| {
            if i.is_prerelease() {
                range.min_version().map(|min| i >= min).unwrap_or(false)
            } else {
                range.satisfies(&i)
            }
        }),
        (None, Some(r)) => Range::parse(installed).and_then(|range| {
            Range::parse(&format!(">={}", r)).map(|at_least| range.intersects(&at_least))
        }),
        (None, None) => match (Range::parse(installed), Range::parse(required)) {
            (Some(a), Some(b)) => Some(a.intersects(&b)),
            _ => None,
        },
    };

    result.unwrap_or_else(|| {
        tracing::warn!(installed, required, "invalid semver input");
        false
    })
}
