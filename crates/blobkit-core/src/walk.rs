//! Shared pieces of resumable enumeration.
//!
//! Every backend walks in its own way, but they all gate on the same
//! starting-point rule, and the paginating ones derive the same exclusive
//! start-after marker from it.

use std::ops::ControlFlow;

use crate::error::{StoreError, StoreResult};

/// Callback receiving each base name during a walk.
///
/// `Ok(ControlFlow::Break(()))` ends the walk successfully. An `Err` aborts
/// the walk and is returned unchanged from the walk call.
pub type Visitor<'a> = &'a mut (dyn FnMut(&str) -> StoreResult<ControlFlow<()>> + Send);

/// Reject a starting point outside the walked prefix.
///
/// Called before any I/O so misuse never surfaces mid-walk.
pub fn check_starting_point(prefix: &str, starting_point: &str) -> StoreResult<()> {
    if !starting_point.is_empty() && !starting_point.starts_with(prefix) {
        return Err(StoreError::invalid_usage(format!(
            "starting point {starting_point:?} must start with prefix {prefix:?}"
        )));
    }
    Ok(())
}

/// Whether `name` falls before the inclusive lower bound `starting_point`.
pub fn before_start(name: &str, starting_point: &str) -> bool {
    !starting_point.is_empty() && name < starting_point
}

/// Derive an exclusive start-after marker strictly below `starting_point`.
///
/// The last character is dropped, yielding a proper prefix, which sorts
/// before the target in byte order. Truncation happens on a character
/// boundary so the marker stays valid UTF-8 for multi-byte names. A
/// starting point of one character or less has no shorter marker; the
/// caller then lists from the beginning and relies on [`before_start`].
pub fn start_after_marker(starting_point: &str) -> Option<&str> {
    let (last, _) = starting_point.char_indices().next_back()?;
    if last == 0 {
        return None;
    }
    Some(&starting_point[..last])
}

/// Visitor collecting names into `out`, stopping after `max` entries.
///
/// A negative `max` collects everything.
pub fn collect_into(
    out: &mut Vec<String>,
    max: i64,
) -> impl FnMut(&str) -> StoreResult<ControlFlow<()>> + Send + '_ {
    let limit = usize::try_from(max).ok();
    move |name| {
        if let Some(limit) = limit {
            if out.len() >= limit {
                return Ok(ControlFlow::Break(()));
            }
        }
        out.push(name.to_string());
        match limit {
            Some(limit) if out.len() >= limit => Ok(ControlFlow::Break(())),
            _ => Ok(ControlFlow::Continue(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_point_must_extend_prefix() {
        assert!(check_starting_point("0000", "").is_ok());
        assert!(check_starting_point("0000", "0000/0002").is_ok());
        assert!(check_starting_point("", "anything").is_ok());

        let err = check_starting_point("0000", "0001/0002").unwrap_err();
        assert!(matches!(err, StoreError::InvalidUsage(_)));
        assert!(err.to_string().contains("must start with prefix"));
    }

    #[test]
    fn marker_drops_last_character() {
        assert_eq!(start_after_marker("00000002"), Some("0000000"));
        assert_eq!(start_after_marker("ab"), Some("a"));
        assert_eq!(start_after_marker("b"), None);
        assert_eq!(start_after_marker(""), None);
    }

    #[test]
    fn marker_respects_multibyte_characters() {
        assert_eq!(start_after_marker("aé"), Some("a"));
        assert_eq!(start_after_marker("é"), None);
        assert_eq!(start_after_marker("日本"), Some("日"));
    }

    #[test]
    fn marker_sorts_below_start() {
        for start in ["00000002", "b/c", "zz", "日本"] {
            let marker = start_after_marker(start).unwrap();
            assert!(marker < start);
        }
    }

    #[test]
    fn gate_is_inclusive() {
        assert!(before_start("a", "b"));
        assert!(!before_start("b", "b"));
        assert!(!before_start("c", "b"));
        assert!(!before_start("a", ""));
    }

    #[test]
    fn collector_honours_limit() {
        let mut out = Vec::new();
        {
            let mut visit = collect_into(&mut out, 2);
            assert_eq!(visit("a").unwrap(), ControlFlow::Continue(()));
            assert_eq!(visit("b").unwrap(), ControlFlow::Break(()));
        }
        assert_eq!(out, ["a", "b"]);

        let mut none = Vec::new();
        {
            let mut visit = collect_into(&mut none, 0);
            assert_eq!(visit("a").unwrap(), ControlFlow::Break(()));
        }
        assert!(none.is_empty());

        let mut all = Vec::new();
        {
            let mut visit = collect_into(&mut all, -1);
            for name in ["a", "b", "c"] {
                assert_eq!(visit(name).unwrap(), ControlFlow::Continue(()));
            }
        }
        assert_eq!(all.len(), 3);
    }
}
