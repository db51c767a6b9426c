//! Diagnostic rendering of native sequences and pairs for logs and reprs.
//!
//! - sequences render as `[e0, e1, ..., en]`, empty as `[]`
//! - pairs render as `(first,second)`
//! - shared elements render as the pointee, or `nullptr` when empty
//!
//! Everything here works on native data only and never needs the lock.

use std::fmt;
use std::sync::Arc;

/// Renders any iterable of `Display` items as a list.
pub struct DisplayList<I>(pub I);

impl<I> fmt::Display for DisplayList<I>
where
    I: IntoIterator + Clone,
    I::Item: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, item) in self.0.clone().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        write!(f, "]")
    }
}

/// Renders a pair as `(first,second)`.
pub struct DisplayPair<'a, A, B>(pub &'a (A, B));

impl<A: fmt::Display, B: fmt::Display> fmt::Display for DisplayPair<'_, A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.0 .0, self.0 .1)
    }
}

/// Renders an optional shared element as its pointee, or `nullptr`.
pub struct DisplayShared<'a, T: ?Sized>(pub &'a Option<Arc<T>>);

impl<T: fmt::Display + ?Sized> fmt::Display for DisplayShared<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(item) => write!(f, "{}", item),
            None => write!(f, "nullptr"),
        }
    }
}

/// Renders a slice of optional shared elements as a list.
pub struct DisplaySharedList<'a, T: ?Sized>(pub &'a [Option<Arc<T>>]);

impl<T: fmt::Display + ?Sized> fmt::Display for DisplaySharedList<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&DisplayList(self.0.iter().map(DisplayShared)), f)
    }
}

/// Shorthand for `DisplayList(items)`.
pub fn display_list<I>(items: I) -> DisplayList<I>
where
    I: IntoIterator + Clone,
    I::Item: fmt::Display,
{
    DisplayList(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Waypoint {
        road_id: u32,
        lane_id: i32,
    }

    impl fmt::Display for Waypoint {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Waypoint(road_id={}, lane_id={})", self.road_id, self.lane_id)
        }
    }

    #[test]
    fn test_list() {
        let empty: Vec<i32> = vec![];
        assert_eq!(display_list(&empty).to_string(), "[]");
        assert_eq!(display_list(&[1.5, 2.0, -3.25]).to_string(), "[1.5, 2, -3.25]");
        assert_eq!(display_list(["a"]).to_string(), "[a]");
    }

    #[test]
    fn test_pair() {
        assert_eq!(DisplayPair(&(3, "left")).to_string(), "(3,left)");
    }

    #[test]
    fn test_list_of_pairs() {
        let pairs = vec![(1, 2), (3, 4)];
        let rendered = display_list(pairs.iter().map(DisplayPair)).to_string();
        assert_eq!(rendered, "[(1,2), (3,4)]");
    }

    #[test]
    fn test_shared_elements() {
        let waypoints = vec![
            Some(Arc::new(Waypoint { road_id: 4, lane_id: -1 })),
            None,
            Some(Arc::new(Waypoint { road_id: 4, lane_id: 1 })),
        ];
        assert_eq!(
            DisplaySharedList(&waypoints).to_string(),
            "[Waypoint(road_id=4, lane_id=-1), nullptr, Waypoint(road_id=4, lane_id=1)]"
        );
        assert_eq!(DisplayShared::<Waypoint>(&None).to_string(), "nullptr");
    }

    #[test]
    fn test_empty_shared_list() {
        let none: Vec<Option<Arc<str>>> = vec![];
        assert_eq!(DisplaySharedList(&none).to_string(), "[]");
    }
}
