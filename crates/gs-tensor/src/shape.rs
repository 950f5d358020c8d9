use std::fmt;

/// A tensor shape in GGUF on-disk order: the fastest-varying dimension
/// (`ne0`) comes first, the reverse of the row-major order most tensor
/// libraries use in memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<u64>,
}

impl Shape {
    /// Create a shape from dimensions already in on-disk order.
    pub fn new(dims: Vec<u64>) -> Self {
        Shape { dims }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    ///
    /// Shapes read from a file must pass [`Shape::checked_numel`] first;
    /// this saturates instead of wrapping.
    pub fn numel(&self) -> usize {
        self.checked_numel().unwrap_or(usize::MAX)
    }

    /// Element count, or `None` if it does not fit in `usize`.
    pub fn checked_numel(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| {
            acc.checked_mul(usize::try_from(d).ok()?)
        })
    }

    /// Dimension sizes in on-disk order.
    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    /// Dimension sizes in row-major order.
    pub fn row_major(&self) -> Vec<usize> {
        self.dims.iter().rev().map(|&d| d as usize).collect()
    }
}

/// Renders row-major dimensions as `"  4096 x  11008"`, padded for progress lines.
impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.row_major().iter().enumerate() {
            if i > 0 {
                write!(f, " x ")?;
            }
            write!(f, "{:6}", d)?;
        }
        Ok(())
    }
}

impl From<Vec<u64>> for Shape {
    fn from(dims: Vec<u64>) -> Self {
        Shape::new(dims)
    }
}
