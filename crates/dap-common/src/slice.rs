//! Slice algebra for DAP hyperslabs.
//!
//! Index expressions arrive in the numpy-like form callers write
//! (`[0, 10:14, ...]`), are normalized against a shape into one selector per
//! axis, composed losslessly when a view is re-sliced, and rendered in the
//! inclusive-stop `[start:step:last]` wire form.

use std::fmt;
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use crate::error::{DapError, DapResult};

/// Stop rendered on the wire for an axis with no known upper bound.
const UNBOUNDED_STOP: i64 = i64::MAX;

/// A possibly open slice as written by a caller. Negative bounds count from
/// the end of the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slice {
    pub start: Option<isize>,
    pub stop: Option<isize>,
    pub step: Option<isize>,
}

impl Slice {
    /// The `:` slice, selecting a whole axis.
    pub const FULL: Slice = Slice {
        start: None,
        stop: None,
        step: None,
    };

    pub fn new(start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> Self {
        Self { start, stop, step }
    }

    /// `start:stop`
    pub fn range(start: isize, stop: isize) -> Self {
        Self::new(Some(start), Some(stop), None)
    }

    /// `start:stop:step`
    pub fn stepped(start: isize, stop: isize, step: isize) -> Self {
        Self::new(Some(start), Some(stop), Some(step))
    }
}

/// One term of an index expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// A single position; kept as a scalar so callers can drop the axis.
    At(isize),
    Slice(Slice),
    /// Expands to as many whole-axis slices as needed.
    Ellipsis,
}

impl Index {
    pub fn range(start: isize, stop: isize) -> Self {
        Index::Slice(Slice::range(start, stop))
    }

    pub fn full() -> Self {
        Index::Slice(Slice::FULL)
    }
}

impl From<isize> for Index {
    fn from(i: isize) -> Self {
        Index::At(i)
    }
}

impl From<Slice> for Index {
    fn from(s: Slice) -> Self {
        Index::Slice(s)
    }
}

impl From<Range<isize>> for Index {
    fn from(r: Range<isize>) -> Self {
        Index::range(r.start, r.end)
    }
}

impl From<RangeFrom<isize>> for Index {
    fn from(r: RangeFrom<isize>) -> Self {
        Index::Slice(Slice::new(Some(r.start), None, None))
    }
}

impl From<RangeTo<isize>> for Index {
    fn from(r: RangeTo<isize>) -> Self {
        Index::Slice(Slice::new(None, Some(r.end), None))
    }
}

impl From<RangeFull> for Index {
    fn from(_: RangeFull) -> Self {
        Index::full()
    }
}

/// A normalized, non-negative range over one axis. `stop` is exclusive and
/// `None` means "to the end of the axis".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub stop: Option<usize>,
    pub step: usize,
}

impl Span {
    /// The whole axis.
    pub const FULL: Span = Span {
        start: 0,
        stop: None,
        step: 1,
    };

    pub fn new(start: usize, stop: Option<usize>, step: usize) -> Self {
        Self { start, stop, step }
    }

    /// Whether the span covers a whole axis of the given size (or any size
    /// when the size is unknown).
    pub fn is_full(&self, dim: Option<usize>) -> bool {
        if self.start != 0 || self.step != 1 {
            return false;
        }
        match (self.stop, dim) {
            (None, _) => true,
            (Some(stop), Some(dim)) => stop >= dim,
            (Some(_), None) => false,
        }
    }

    /// Number of positions selected from an axis of size `dim`.
    pub fn len(&self, dim: usize) -> usize {
        let stop = self.stop.unwrap_or(dim).min(dim);
        if stop <= self.start {
            0
        } else {
            (stop - self.start).div_ceil(self.step)
        }
    }

    /// Positions selected from an axis of size `dim`, in the original axis
    /// coordinates.
    pub fn indices(&self, dim: usize) -> impl Iterator<Item = usize> {
        let start = self.start;
        let step = self.step;
        (0..self.len(dim)).map(move |k| start + k * step)
    }
}

impl fmt::Display for Span {
    /// Inclusive-stop wire form `[start:step:last]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = match self.stop {
            Some(stop) => stop as i64 - 1,
            None => UNBOUNDED_STOP - 1,
        };
        write!(f, "[{}:{}:{}]", self.start, self.step, last)
    }
}

/// A normalized index term for exactly one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Point(usize),
    Span(Span),
}

impl Selector {
    /// View the selector as a range; a point becomes a one-element span.
    pub fn as_span(&self) -> Span {
        match *self {
            Selector::Point(i) => Span::new(i, Some(i + 1), 1),
            Selector::Span(span) => span,
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self, Selector::Point(_))
    }
}

impl From<Span> for Selector {
    fn from(span: Span) -> Self {
        Selector::Span(span)
    }
}

impl From<Selector> for Index {
    fn from(sel: Selector) -> Self {
        match sel {
            Selector::Point(i) => Index::At(i as isize),
            Selector::Span(span) => Index::Slice(Slice::new(
                Some(span.start as isize),
                span.stop.map(|s| s as isize),
                Some(span.step as isize),
            )),
        }
    }
}

/// Expand `index` to one selector per axis of `shape`.
///
/// Negative bounds are rebased against the axis size, missing stops default
/// to the axis size, and out-of-bounds bounds are clamped. A point index that
/// falls outside its axis, a non-positive step, more than one ellipsis, or
/// more terms than axes is an `Index` error.
pub fn normalize(index: &[Index], shape: &[usize]) -> DapResult<Vec<Selector>> {
    let ellipses = index.iter().filter(|i| matches!(i, Index::Ellipsis)).count();
    if ellipses > 1 {
        return Err(DapError::index("an index can only have a single ellipsis"));
    }
    let explicit = index.len() - ellipses;
    if explicit > shape.len() {
        return Err(DapError::index(format!(
            "too many indices: {} given for an array of {} dimension(s)",
            explicit,
            shape.len()
        )));
    }

    let mut expanded = Vec::with_capacity(shape.len());
    let mut missing = shape.len() - explicit;
    for term in index {
        match term {
            Index::Ellipsis => {
                expanded.extend(std::iter::repeat(Index::full()).take(missing));
                missing = 0;
            }
            other => expanded.push(*other),
        }
    }
    expanded.extend(std::iter::repeat(Index::full()).take(missing));

    expanded
        .iter()
        .zip(shape)
        .map(|(term, &dim)| normalize_term(term, dim))
        .collect()
}

fn normalize_term(term: &Index, dim: usize) -> DapResult<Selector> {
    let rebase = |value: isize| -> usize {
        if value < 0 {
            (value + dim as isize).max(0) as usize
        } else {
            (value as usize).min(dim)
        }
    };

    match *term {
        Index::At(i) => {
            let pos = if i < 0 { i + dim as isize } else { i };
            if pos < 0 || pos as usize >= dim {
                return Err(DapError::index(format!(
                    "index {} is out of bounds for axis with size {}",
                    i, dim
                )));
            }
            Ok(Selector::Point(pos as usize))
        }
        Index::Slice(slice) => {
            let step = slice.step.unwrap_or(1);
            if step <= 0 {
                return Err(DapError::index(format!(
                    "slice step must be positive, got {}",
                    step
                )));
            }
            let start = slice.start.map(rebase).unwrap_or(0);
            let stop = slice.stop.map(rebase).unwrap_or(dim);
            Ok(Selector::Span(Span::new(start, Some(stop), step as usize)))
        }
        Index::Ellipsis => Ok(Selector::Span(Span::new(0, Some(dim), 1))),
    }
}

/// Compose a slice already applied (`outer`) with a slice meant for the
/// resulting view (`inner`), returning one slice over the original axes.
///
/// Shorter inputs are right-padded with whole-axis spans. Points are treated
/// as one-element spans, so the composed result keeps the original rank.
pub fn compose(outer: &[Selector], inner: &[Selector]) -> Vec<Span> {
    let axes = outer.len().max(inner.len());
    (0..axes)
        .map(|axis| {
            let a = outer.get(axis).map(Selector::as_span).unwrap_or(Span::FULL);
            let b = inner.get(axis).map(Selector::as_span).unwrap_or(Span::FULL);
            compose_span(a, b)
        })
        .collect()
}

fn compose_span(a: Span, b: Span) -> Span {
    let start = a.start + b.start * a.step;
    let step = a.step * b.step;
    let stop = match (a.stop, b.stop) {
        (None, None) => None,
        (Some(stop), None) => Some(stop),
        (None, Some(inner)) => Some(a.start + inner * a.step),
        (Some(stop), Some(inner)) => Some(stop.min(a.start + inner * a.step)),
    };
    Span::new(start, stop, step)
}

/// Shape of the view selected by `spans` over an array of `shape`.
pub fn view_shape(spans: &[Span], shape: &[usize]) -> Vec<usize> {
    shape
        .iter()
        .enumerate()
        .map(|(axis, &dim)| spans.get(axis).map_or(dim, |span| span.len(dim)))
        .collect()
}

/// Render spans as a DAP hyperslab. Trailing whole-axis spans are dropped, so
/// a whole-array selection renders as the empty string.
pub fn to_wire(spans: &[Span], shape: &[usize]) -> String {
    let mut keep = spans.len();
    while keep > 0 && spans[keep - 1].is_full(shape.get(keep - 1).copied()) {
        keep -= 1;
    }
    spans[..keep].iter().map(Span::to_string).collect()
}

/// Parse a comma separated index expression such as `0, 10:14, ..., ::2`.
pub fn parse_index_expr(expr: &str) -> DapResult<Vec<Index>> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(Vec::new());
    }

    let parse_bound = |token: &str| -> DapResult<Option<isize>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        token
            .parse::<isize>()
            .map(Some)
            .map_err(|_| DapError::index(format!("invalid index bound '{}'", token)))
    };

    expr.split(',')
        .map(|term| {
            let term = term.trim();
            if term == "..." {
                return Ok(Index::Ellipsis);
            }
            if !term.contains(':') {
                return parse_bound(term)?
                    .map(Index::At)
                    .ok_or_else(|| DapError::index("empty index term"));
            }
            let parts: Vec<&str> = term.split(':').collect();
            if parts.len() > 3 {
                return Err(DapError::index(format!("invalid slice '{}'", term)));
            }
            let start = parse_bound(parts[0])?;
            let stop = parse_bound(parts[1])?;
            let step = match parts.get(2) {
                Some(step) => parse_bound(step)?,
                None => None,
            };
            Ok(Index::Slice(Slice::new(start, stop, step)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(selectors: &[Selector]) -> Vec<Span> {
        selectors.iter().map(Selector::as_span).collect()
    }

    #[test]
    fn test_normalize_pads_missing_axes() {
        let out = normalize(&[Index::At(1)], &[3, 4]).unwrap();
        assert_eq!(out, vec![Selector::Point(1), Span::new(0, Some(4), 1).into()]);
    }

    #[test]
    fn test_normalize_ellipsis() {
        let out = normalize(&[Index::Ellipsis, Index::At(-1)], &[2, 3, 4]).unwrap();
        assert_eq!(
            out,
            vec![
                Span::new(0, Some(2), 1).into(),
                Span::new(0, Some(3), 1).into(),
                Selector::Point(3),
            ]
        );
    }

    #[test]
    fn test_normalize_negative_and_clamped() {
        let out = normalize(&[Index::range(-3, 100)], &[10]).unwrap();
        assert_eq!(out, vec![Span::new(7, Some(10), 1).into()]);

        let out = normalize(&[Index::range(-30, -20)], &[10]).unwrap();
        assert_eq!(out, vec![Span::new(0, Some(0), 1).into()]);
    }

    #[test]
    fn test_normalize_too_many_terms() {
        let err = normalize(&[Index::At(0), Index::At(0)], &[3]).unwrap_err();
        assert!(matches!(err, DapError::Index(_)));
    }

    #[test]
    fn test_normalize_rejects_two_ellipses() {
        assert!(normalize(&[Index::Ellipsis, Index::Ellipsis], &[3]).is_err());
    }

    #[test]
    fn test_normalize_rejects_out_of_bounds_point() {
        assert!(normalize(&[Index::At(5)], &[5]).is_err());
        assert!(normalize(&[Index::At(-6)], &[5]).is_err());
    }

    #[test]
    fn test_normalize_bounds_within_shape() {
        let shape = [5, 1, 7];
        let cases = [
            vec![Index::full()],
            vec![Index::range(-100, 100), Index::Ellipsis],
            vec![Index::Slice(Slice::stepped(2, 50, 3)), Index::At(0), Index::range(3, 1)],
        ];
        for case in &cases {
            let out = normalize(case, &shape).unwrap();
            assert_eq!(out.len(), shape.len());
            for (sel, &dim) in out.iter().zip(&shape) {
                let span = sel.as_span();
                assert!(span.start <= dim);
                assert!(span.stop.unwrap() <= dim);
            }
        }
    }

    #[test]
    fn test_compose_matches_sequential_application() {
        let dim = 20;
        let outers = [
            Slice::range(2, 18),
            Slice::stepped(1, 19, 3),
            Slice::FULL,
            Slice::stepped(0, 20, 2),
        ];
        let inners = [
            Slice::range(1, 4),
            Slice::stepped(0, 10, 2),
            Slice::new(Some(2), None, None),
            Slice::range(-3, -1),
        ];
        for outer in outers {
            for inner in inners {
                let a = normalize(&[Index::Slice(outer)], &[dim]).unwrap();
                let view: Vec<usize> = a[0].as_span().indices(dim).collect();
                let b = normalize(&[Index::Slice(inner)], &[view.len()]).unwrap();
                let expected: Vec<usize> = b[0]
                    .as_span()
                    .indices(view.len())
                    .map(|k| view[k])
                    .collect();

                let composed = compose(&a, &b);
                let actual: Vec<usize> = composed[0].indices(dim).collect();
                assert_eq!(actual, expected, "outer={:?} inner={:?}", outer, inner);
            }
        }
    }

    #[test]
    fn test_compose_unit_step_rule() {
        let outer = [Selector::Span(Span::new(10, Some(20), 1))];
        let inner = [Selector::Span(Span::new(2, None, 2))];
        assert_eq!(compose(&outer, &inner), vec![Span::new(12, Some(20), 2)]);

        let inner = [Selector::Span(Span::new(2, Some(50), 1))];
        assert_eq!(compose(&outer, &inner), vec![Span::new(12, Some(20), 1)]);
    }

    #[test]
    fn test_compose_pads_shorter_tuple() {
        let outer = [Selector::Point(3)];
        let inner = [Selector::Point(0), Selector::Span(Span::new(1, Some(2), 1))];
        assert_eq!(
            compose(&outer, &inner),
            vec![Span::new(3, Some(4), 1), Span::new(1, Some(2), 1)]
        );
    }

    #[test]
    fn test_to_wire_full_selection_is_empty() {
        for shape in [vec![], vec![1], vec![12, 90, 180]] {
            let full = normalize(&[Index::Ellipsis], &shape).unwrap();
            assert_eq!(to_wire(&spans(&full), &shape), "");
        }
    }

    #[test]
    fn test_to_wire_inclusive_stop() {
        let shape = [12, 90, 180];
        let sel = normalize(&[Index::At(0), Index::range(10, 14)], &shape).unwrap();
        assert_eq!(to_wire(&spans(&sel), &shape), "[0:1:0][10:1:13]");
    }

    #[test]
    fn test_to_wire_keeps_interior_full_axis() {
        let shape = [4, 5];
        let sel = normalize(&[Index::full(), Index::At(2)], &shape).unwrap();
        assert_eq!(to_wire(&spans(&sel), &shape), "[0:1:3][2:1:2]");
    }

    #[test]
    fn test_view_shape() {
        let spans = [Span::new(0, Some(12), 3), Span::new(10, Some(14), 1)];
        assert_eq!(view_shape(&spans, &[12, 90, 180]), vec![4, 4, 180]);
    }

    #[test]
    fn test_parse_index_expr() {
        let idx = parse_index_expr("0, 10:14, ..., ::2, -1:").unwrap();
        assert_eq!(
            idx,
            vec![
                Index::At(0),
                Index::range(10, 14),
                Index::Ellipsis,
                Index::Slice(Slice::new(None, None, Some(2))),
                Index::Slice(Slice::new(Some(-1), None, None)),
            ]
        );
        assert!(parse_index_expr("a:b").is_err());
        assert!(parse_index_expr("1:2:3:4").is_err());
    }
}
