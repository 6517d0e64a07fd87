//! Synchronized walk over two sorted streams.
//!
//! Both inputs must be strictly ascending. The walk keeps one head per side
//! and advances whichever is smaller, so memory stays constant no matter
//! how large the streams are. Blob cursors yield quads in [`QuadKey`] order,
//! which is the derived `Ord` of `Quad`, so comparing heads with `cmp`
//! agrees with the storage order.
//!
//! [`QuadKey`]: quadgit_types::QuadKey

use std::cmp::Ordering;
use std::iter::Fuse;

/// Where an element was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step<T> {
    /// Only in the left stream.
    Left(T),
    /// Only in the right stream.
    Right(T),
    /// In both streams.
    Both(T),
}

/// Merge-join of two sorted, fallible streams.
///
/// The first error from either side is yielded once and ends the walk.
pub struct SyncWalk<T, E, L, R>
where
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    left: Fuse<L>,
    right: Fuse<R>,
    left_head: Option<T>,
    right_head: Option<T>,
    failed: bool,
}

impl<T, E, L, R> SyncWalk<T, E, L, R>
where
    T: Ord,
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    pub fn new(left: L, right: R) -> Self {
        Self {
            left: left.fuse(),
            right: right.fuse(),
            left_head: None,
            right_head: None,
            failed: false,
        }
    }

    fn fill(&mut self) -> Result<(), E> {
        if self.left_head.is_none() {
            self.left_head = self.left.next().transpose()?;
        }
        if self.right_head.is_none() {
            self.right_head = self.right.next().transpose()?;
        }
        Ok(())
    }
}

impl<T, E, L, R> Iterator for SyncWalk<T, E, L, R>
where
    T: Ord,
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    type Item = Result<Step<T>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Err(e) = self.fill() {
            self.failed = true;
            return Some(Err(e));
        }
        let step = match (self.left_head.take(), self.right_head.take()) {
            (None, None) => return None,
            (Some(l), None) => Step::Left(l),
            (None, Some(r)) => Step::Right(r),
            (Some(l), Some(r)) => match l.cmp(&r) {
                Ordering::Less => {
                    self.right_head = Some(r);
                    Step::Left(l)
                }
                Ordering::Greater => {
                    self.left_head = Some(l);
                    Step::Right(r)
                }
                Ordering::Equal => Step::Both(l),
            },
        };
        Some(Ok(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(values: &[u32]) -> impl Iterator<Item = Result<u32, String>> + '_ {
        values.iter().copied().map(Ok)
    }

    #[test]
    fn interleaves_and_matches() {
        let steps: Vec<_> = SyncWalk::new(ok(&[1, 3, 5, 7]), ok(&[2, 3, 7, 8]))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            steps,
            vec![
                Step::Left(1),
                Step::Right(2),
                Step::Both(3),
                Step::Left(5),
                Step::Both(7),
                Step::Right(8),
            ]
        );
    }

    #[test]
    fn empty_sides() {
        assert_eq!(SyncWalk::new(ok(&[]), ok(&[])).count(), 0);
        let steps: Vec<_> = SyncWalk::new(ok(&[]), ok(&[4]))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(steps, vec![Step::Right(4)]);
    }

    #[test]
    fn first_error_ends_the_walk() {
        let left = vec![Ok(1), Err("broken".to_string()), Ok(9)].into_iter();
        let mut walk = SyncWalk::new(left, ok(&[5]));
        assert_eq!(walk.next(), Some(Ok(Step::Left(1))));
        assert_eq!(walk.next(), Some(Err("broken".to_string())));
        assert_eq!(walk.next(), None);
    }
}
