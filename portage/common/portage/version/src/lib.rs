// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Portage package versions as they appear in ebuild file names.

use anyhow::{anyhow, Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    cmp::Ordering,
    fmt::{Debug, Display},
    str::FromStr,
};

pub const VERSION_RE_RAW: &str =
    r"[0-9]+(?:\.[0-9]+)*[a-z]?(?:_(?:alpha|beta|pre|rc|p)[0-9]*)*(?:-r[0-9]+)?";
static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("-({})$", VERSION_RE_RAW)).unwrap());

/// The version of the perpetual tip-of-tree ("cros-workon") ebuild.
pub const UNSTABLE_HEAD_VERSION: &str = "9999";

/// Represents a version of a Portage package, including its revision.
///
/// Numeric components are kept as strings so that arbitrarily long numbers
/// and leading zeros survive a parse/format round trip.
#[derive(Clone, Debug)]
pub struct Version {
    main: Vec<String>,
    letter: String,
    suffixes: Vec<VersionSuffix>,
    revision: u64,
}

impl Version {
    /// Parses `text` into [`Version`].
    pub fn try_new(text: &str) -> Result<Self> {
        let (_, ver) = parser::parse_version(text)
            .map_err(|e| anyhow!("invalid version {:?}: {}", text, e.to_owned()))?;
        Ok(ver)
    }

    /// Splits `input` into a prefix and a trailing version, separated by a
    /// hyphen.
    ///
    /// # Example
    ///
    /// ```
    /// # use version::Version;
    /// let (name, ver) = Version::from_str_suffix("chromeos-chrome-78.0.3876.0_rc-r1")?;
    /// assert_eq!("chromeos-chrome", name);
    /// assert_eq!(1, ver.revision());
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_str_suffix(input: &str) -> Result<(&str, Self)> {
        let caps = VERSION_SUFFIX_RE
            .captures(input)
            .ok_or_else(|| anyhow!("no version suffix in {:?}", input))?;
        let whole = caps.get(0).unwrap();
        let ver = Self::try_new(&caps[1])?;
        Ok((&input[..whole.start()], ver))
    }

    /// Returns the dotted numeric components.
    pub fn main(&self) -> &[String] {
        &self.main
    }

    /// Returns the optional single-letter component, or an empty string.
    pub fn letter(&self) -> &str {
        &self.letter
    }

    pub fn suffixes(&self) -> &[VersionSuffix] {
        &self.suffixes
    }

    /// Returns the ebuild revision. Zero means the version carries no `-rN`.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns a copy of [`Version`] without the revision part.
    pub fn without_revision(&self) -> Self {
        self.with_revision(0)
    }

    /// Returns a copy of [`Version`] with the revision replaced.
    pub fn with_revision(&self, revision: u64) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }

    /// Returns a copy of [`Version`] whose suffixes are taken from `other`
    /// if this version has none of its own.
    ///
    /// ```
    /// # use version::Version;
    /// let target = Version::try_new("4.3.2.2")?;
    /// let stable = Version::try_new("4.3.2.1_rc-r1")?;
    /// assert_eq!("4.3.2.2_rc", target.inherit_suffixes(&stable).to_string());
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn inherit_suffixes(&self, other: &Version) -> Self {
        if !self.suffixes.is_empty() {
            return self.clone();
        }
        Self {
            suffixes: other.suffixes.clone(),
            ..self.clone()
        }
    }

    /// Whether this is the `9999` version used by unstable cros-workon ebuilds.
    pub fn is_unstable_head(&self) -> bool {
        self.main.len() == 1
            && self.main[0] == UNSTABLE_HEAD_VERSION
            && self.letter.is_empty()
            && self.suffixes.is_empty()
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Version::try_new(text)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.main.join("."))?;
        write!(f, "{}", self.letter)?;
        for suffix in self.suffixes.iter() {
            write!(f, "{}", suffix)?;
        }
        if self.revision != 0 {
            write!(f, "-r{}", self.revision)?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    /// Compares two versions following PMS section 3.3, except that a
    /// missing revision and `-r0` are the same thing.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_numbers(&self.main[0], &other.main[0])
            .then_with(|| {
                self.main[1..]
                    .iter()
                    .zip(other.main[1..].iter())
                    .map(|(a, b)| compare_post_major(a, b))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| self.main.len().cmp(&other.main.len()))
            .then_with(|| self.letter.cmp(&other.letter))
            .then_with(|| compare_suffix_lists(&self.suffixes, &other.suffixes))
            .then_with(|| self.revision.cmp(&other.revision))
    }
}

/// Compares suffix lists pairwise. When one list is a prefix of the other,
/// the longer one is newer only if its next suffix is `_p`.
fn compare_suffix_lists(a: &[VersionSuffix], b: &[VersionSuffix]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let o = x.cmp(y);
        if o.is_ne() {
            return o;
        }
    }
    let n = a.len().min(b.len());
    match (a.get(n), b.get(n)) {
        (Some(extra), None) if extra.label == VersionSuffixLabel::P => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (None, Some(extra)) if extra.label == VersionSuffixLabel::P => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// A pre- or post-release suffix such as `_rc2`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct VersionSuffix {
    label: VersionSuffixLabel,
    number: String,
}

impl VersionSuffix {
    pub fn label(&self) -> VersionSuffixLabel {
        self.label
    }

    pub fn number(&self) -> &str {
        &self.number
    }
}

impl Display for VersionSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.label, self.number)
    }
}

impl PartialOrd for VersionSuffix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionSuffix {
    fn cmp(&self, other: &Self) -> Ordering {
        self.label
            .cmp(&other.label)
            .then_with(|| compare_numbers(&self.number, &other.number))
    }
}

/// Version suffix labels, declared in ascending order so that the derived
/// [`Ord`] is the PMS order. "No suffix" sits between `Rc` and `P`, which
/// [`compare_suffix_lists`] takes care of.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum VersionSuffixLabel {
    #[strum(serialize = "_alpha")]
    Alpha,
    #[strum(serialize = "_beta")]
    Beta,
    #[strum(serialize = "_pre")]
    Pre,
    #[strum(serialize = "_rc")]
    Rc,
    #[strum(serialize = "_p")]
    P,
}

/// Compares two decimal strings as integers of unbounded size.
fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Components after the major one with a leading zero compare as decimal
/// fractions (PMS algorithm 3.3).
fn compare_post_major(a: &str, b: &str) -> Ordering {
    if a.starts_with('0') || b.starts_with('0') {
        return a.trim_end_matches('0').cmp(b.trim_end_matches('0'));
    }
    compare_numbers(a, b)
}

mod parser {
    use super::*;
    use nom::{
        branch::alt,
        bytes::complete::tag,
        character::complete::{char, digit0, digit1, one_of},
        combinator::{eof, map_res, opt},
        multi::many0,
        sequence::preceded,
        IResult,
    };

    fn parse_main(input: &str) -> IResult<&str, Vec<String>> {
        let (input, major) = digit1(input)?;
        let (input, rest) = many0(preceded(char('.'), digit1))(input)?;
        let main = std::iter::once(major)
            .chain(rest)
            .map(str::to_owned)
            .collect();
        Ok((input, main))
    }

    fn parse_letter(input: &str) -> IResult<&str, String> {
        let (input, letter) = opt(one_of("abcdefghijklmnopqrstuvwxyz"))(input)?;
        Ok((input, letter.map(String::from).unwrap_or_default()))
    }

    fn parse_suffix(input: &str) -> IResult<&str, VersionSuffix> {
        let (input, label) = map_res(
            alt((
                tag(VersionSuffixLabel::Alpha.as_ref()),
                tag(VersionSuffixLabel::Beta.as_ref()),
                tag(VersionSuffixLabel::Pre.as_ref()),
                tag(VersionSuffixLabel::Rc.as_ref()),
                tag(VersionSuffixLabel::P.as_ref()),
            )),
            VersionSuffixLabel::from_str,
        )(input)?;
        let (input, number) = digit0(input)?;
        Ok((
            input,
            VersionSuffix {
                label,
                number: number.to_owned(),
            },
        ))
    }

    fn parse_revision(input: &str) -> IResult<&str, u64> {
        let (input, revision) = opt(preceded(tag("-r"), map_res(digit1, u64::from_str)))(input)?;
        Ok((input, revision.unwrap_or(0)))
    }

    pub(super) fn parse_version(input: &str) -> IResult<&str, Version> {
        let (input, main) = parse_main(input)?;
        let (input, letter) = parse_letter(input)?;
        let (input, suffixes) = many0(parse_suffix)(input)?;
        let (input, revision) = parse_revision(input)?;
        let (input, _) = eof(input)?;
        Ok((
            input,
            Version {
                main,
                letter,
                suffixes,
                revision,
            },
        ))
    }
}
