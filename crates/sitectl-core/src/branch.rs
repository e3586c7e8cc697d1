const BRANCH_PREFIX: &str = "MOODLE_";
const BRANCH_SUFFIX: &str = "_STABLE";

/// Release number embedded in a `MOODLE_<n>_STABLE` branch name, or 0 when there is none.
///
/// The pattern may appear anywhere in the input, so remote-qualified names such as
/// `origin/MOODLE_27_STABLE` parse too.
pub fn branch_number(branch: &str) -> u32 {
    let mut rest = branch;
    while let Some(index) = rest.find(BRANCH_PREFIX) {
        let after = &rest[index + BRANCH_PREFIX.len()..];
        let digits_len = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits_len > 0 && after[digits_len..].starts_with(BRANCH_SUFFIX) {
            if let Ok(number) = after[..digits_len].parse() {
                return number;
            }
        }
        rest = &rest[index + 1..];
    }
    0
}

pub fn branch_name(number: u32) -> String {
    format!("{BRANCH_PREFIX}{number}{BRANCH_SUFFIX}")
}

/// A major upgrade strictly raises the branch number.
pub fn is_major_upgrade(old_number: u32, new_number: u32) -> bool {
    old_number < new_number
}

/// Repository name without any leading path or URL and without a `.git` suffix.
pub fn repository_basename(repository: &str) -> &str {
    let trimmed = repository.trim().trim_end_matches('/');
    let base = trimmed
        .rsplit(|ch| ch == '/' || ch == ':')
        .next()
        .unwrap_or(trimmed);
    base.strip_suffix(".git").unwrap_or(base)
}
