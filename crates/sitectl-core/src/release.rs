use anyhow::{anyhow, Context, Result};
use semver::Version;

// (release, build number, branch, minimum release a site must run before upgrading)
const RELEASES: &[((u64, u64, u64), u64, u32, Option<(u64, u64, u64)>)] = &[
    ((1, 9, 0), 2007101509, 19, None),
    ((2, 0, 0), 2010112400, 20, Some((1, 9, 0))),
    ((2, 1, 0), 2011070100, 21, Some((1, 9, 0))),
    ((2, 2, 0), 2011120500, 22, Some((1, 9, 0))),
    ((2, 2, 9), 2011120509, 22, Some((1, 9, 0))),
    ((2, 2, 11), 2011120511, 22, Some((1, 9, 0))),
    ((2, 3, 0), 2012062500, 23, Some((2, 2, 0))),
    ((2, 4, 0), 2012120300, 24, Some((2, 2, 0))),
    ((2, 5, 0), 2013051400, 25, Some((2, 2, 9))),
    ((2, 6, 0), 2013111800, 26, Some((2, 2, 11))),
    ((2, 7, 0), 2014051200, 27, Some((2, 2, 11))),
    ((2, 7, 14), 2014051214, 27, Some((2, 2, 11))),
    ((2, 8, 0), 2014111000, 28, Some((2, 2, 11))),
    ((2, 9, 0), 2015051100, 29, Some((2, 2, 11))),
    ((3, 0, 0), 2015111600, 30, Some((2, 2, 11))),
    ((3, 1, 0), 2016052300, 31, Some((2, 7, 14))),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub release: Version,
    pub build: u64,
    pub branch: u32,
    pub requires: Option<Version>,
}

fn version((major, minor, patch): (u64, u64, u64)) -> Version {
    Version::new(major, minor, patch)
}

pub fn known_releases() -> Vec<Release> {
    RELEASES
        .iter()
        .map(|(release, build, branch, requires)| Release {
            release: version(*release),
            build: *build,
            branch: *branch,
            requires: requires.map(version),
        })
        .collect()
}

/// Branch numbers that have at least one known release, ascending.
pub fn known_branches() -> Vec<u32> {
    let mut branches: Vec<u32> = RELEASES.iter().map(|entry| entry.2).collect();
    branches.dedup();
    branches
}

/// First release of a branch, which carries the upgrade requirement for entering it.
pub fn first_release_of(branch: u32) -> Option<Release> {
    known_releases()
        .into_iter()
        .find(|release| release.branch == branch)
}

/// Parses loose release strings such as `2.7`, `2.7.14+ (Build: 20160509)` or `3.1`.
pub fn parse_release(raw: &str) -> Result<Version> {
    let token = raw
        .split(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .find(|part| !part.is_empty())
        .ok_or_else(|| anyhow!("release string has no version number: '{raw}'"))?;
    let mut parts = token.split('.').filter(|part| !part.is_empty());
    let mut next = |label: &str| -> Result<u64> {
        match parts.next() {
            Some(part) => part
                .parse()
                .with_context(|| format!("invalid {label} component in release '{raw}'")),
            None => Ok(0),
        }
    };
    let major = next("major")?;
    let minor = next("minor")?;
    let patch = next("patch")?;
    Ok(Version::new(major, minor, patch))
}

/// Fails when a site on `current` cannot be moved straight to `target_branch`.
pub fn check_upgrade_path(current: &Version, target_branch: u32) -> Result<()> {
    let Some(target) = first_release_of(target_branch) else {
        return Err(anyhow!("no known release for branch {target_branch}"));
    };
    if let Some(required) = &target.requires {
        if current < required {
            return Err(anyhow!(
                "release {current} is too old to upgrade to {}; upgrade to {required} first",
                target.release
            ));
        }
    }
    Ok(())
}
