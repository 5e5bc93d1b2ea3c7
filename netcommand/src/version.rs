//! Firmware version comparison.

use std::cmp::Ordering;

/// Compare two dotted version strings.
///
/// Anything after the first `-` is ignored, missing components count as
/// zero and each component is compared numerically. Returns `None` when a
/// component is not a number.
///
/// ```
/// use std::cmp::Ordering;
/// use netcommand::version::compare_versions;
///
/// assert_eq!(compare_versions("7.10.2", "7.9"), Some(Ordering::Greater));
/// assert_eq!(compare_versions("10.5", "10.5.0-beta"), Some(Ordering::Equal));
/// ```
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    let a = components(a)?;
    let b = components(b)?;
    let len = a.len().max(b.len());

    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(Ordering::Equal)
}

/// Whether `a` and `b` name the same version.
///
/// Falls back to exact string comparison when either is not numeric.
pub fn same_version(a: &str, b: &str) -> bool {
    match compare_versions(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a.trim() == b.trim(),
    }
}

fn components(version: &str) -> Option<Vec<u64>> {
    let base = version.trim().split('-').next().unwrap_or_default();
    if base.is_empty() {
        return None;
    }
    base.split('.').map(|part| part.parse().ok()).collect()
}
